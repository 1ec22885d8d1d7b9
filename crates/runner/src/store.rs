//! In-memory result store with per-run aggregates.

use std::collections::BTreeMap;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use pipeline::{MessageId, ResultStore, RunId, StoreError, TestResult};

/// [`ResultStore`] keeping every run's results in memory, keyed by message id
/// so that a replayed result replaces rather than duplicates.
#[derive(Debug, Default)]
pub struct InMemoryResultStore {
    runs: DashMap<RunId, BTreeMap<MessageId, TestResult>>,
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct results stored across all runs.
    pub fn len(&self) -> usize {
        self.runs.iter().map(|run| run.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ResultStore for InMemoryResultStore {
    async fn persist(&self, key: &MessageId, result: &TestResult) -> Result<(), StoreError> {
        let replaced = self
            .runs
            .entry(result.run_id().clone())
            .or_default()
            .insert(key.clone(), result.clone())
            .is_some();
        debug!(message_id = %key, replaced, "Result stored");
        Ok(())
    }

    async fn run_results(&self, run_id: &RunId) -> Result<Vec<TestResult>, StoreError> {
        Ok(self
            .runs
            .get(run_id)
            .map(|run| run.values().cloned().collect())
            .unwrap_or_default())
    }
}
