//! In-memory processed marker.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use pipeline::{MessageId, ProcessedMarker, Reservation, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MarkerState {
    InProgress,
    Processed,
}

/// [`ProcessedMarker`] over a `DashMap`. `reserve` goes through the entry
/// API, so the check and the insert happen under one shard lock.
///
/// Lives as long as the process. A consumer restart forgets every id, which
/// is covered by the result store's upsert and the notifier's dedup key.
#[derive(Debug, Default)]
pub struct InMemoryProcessedMarker {
    entries: DashMap<MessageId, MarkerState>,
}

impl InMemoryProcessedMarker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids whose processing completed.
    pub fn processed_ids(&self) -> Vec<MessageId> {
        self.entries
            .iter()
            .filter(|e| *e.value() == MarkerState::Processed)
            .map(|e| e.key().clone())
            .collect()
    }
}

#[async_trait]
impl ProcessedMarker for InMemoryProcessedMarker {
    async fn reserve(&self, id: &MessageId) -> Result<Reservation, StoreError> {
        Ok(match self.entries.entry(id.clone()) {
            Entry::Occupied(entry) => match entry.get() {
                MarkerState::Processed => Reservation::AlreadyProcessed,
                MarkerState::InProgress => Reservation::InProgress,
            },
            Entry::Vacant(entry) => {
                entry.insert(MarkerState::InProgress);
                Reservation::Reserved
            }
        })
    }

    async fn commit(&self, id: &MessageId) -> Result<(), StoreError> {
        self.entries.insert(id.clone(), MarkerState::Processed);
        Ok(())
    }

    async fn release(&self, id: &MessageId) -> Result<(), StoreError> {
        self.entries
            .remove_if(id, |_, state| *state == MarkerState::InProgress);
        Ok(())
    }

    async fn is_processed(&self, id: &MessageId) -> Result<bool, StoreError> {
        Ok(self
            .entries
            .get(id)
            .is_some_and(|state| *state == MarkerState::Processed))
    }
}
