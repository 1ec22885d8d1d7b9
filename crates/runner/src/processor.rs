//! Result Processor: the per-message state machine on the consumer side.
//!
//! ```text
//! received ─┬─ already processed ───────────────────────────► ack
//!           ├─ in progress elsewhere ───────────────────────► (lease left to expire)
//!           ├─ undecodable ─────────────────────────────────► dead-letter
//!           └─ processing ─┬─ ok ─► commit marker ──────────► ack
//!                          └─ transient failure ─► release ─► nack
//! ```
//!
//! There is no retry loop here. A nacked message comes back from the broker
//! with a higher `delivery_count`, and the broker dead-letters it once the
//! subscription's `max_delivery_count` is spent.
//!
//! A message whose id is reserved by another consumer is not settled. It
//! becomes visible again only when its lease expires, so redeliveries of an
//! in-flight message come at most once per lock duration.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, instrument, warn};

use pipeline::{
    decode_result, Broker, BrokerError, DeadLetter, Envelope, LockToken, MessageId,
    Notification, NotificationSummary, Notifier, ProcessedMarker, Reservation, ResultStore,
    SubscriptionName, TestResult, TransientProcessingError, REASON_MALFORMED_PAYLOAD,
};

/// How the handling of one delivery ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Processed now and completed on the broker.
    Acknowledged,
    /// Processed on an earlier delivery; completed without side effects.
    Duplicate,
    /// Moved to the dead-letter store.
    DeadLettered {
        /// Reason recorded on the dead letter.
        reason: String,
    },
    /// Processing failed transiently; released for redelivery.
    Released,
    /// Another consumer holds the reservation for this id. The delivery is
    /// left unsettled and comes back once its lease expires.
    InFlightElsewhere,
    /// The lease ended before the message could be settled. The broker has
    /// already made it redeliverable.
    LockLost,
    /// Settling failed for another reason; the lease will run out.
    Unsettled,
}

/// A competing consumer of one subscription.
///
/// Instances share nothing except the [`ProcessedMarker`] and the
/// [`ResultStore`]. Exclusion between instances comes from broker leases.
pub struct ResultProcessor {
    broker: Arc<dyn Broker>,
    notifier: Arc<dyn Notifier>,
    store: Arc<dyn ResultStore>,
    marker: Arc<dyn ProcessedMarker>,
    subscription: SubscriptionName,
}

enum Settle {
    Ack,
    Nack,
}

impl ResultProcessor {
    /// Builds a consumer of `subscription`.
    ///
    /// Every processor of one subscription must share the same `marker` and
    /// `store`; the broker and notifier may be shared or not.
    pub fn new(
        broker: Arc<dyn Broker>,
        notifier: Arc<dyn Notifier>,
        store: Arc<dyn ResultStore>,
        marker: Arc<dyn ProcessedMarker>,
        subscription: SubscriptionName,
    ) -> Self {
        Self {
            broker,
            notifier,
            store,
            marker,
            subscription,
        }
    }

    /// The subscription this processor consumes.
    pub fn subscription(&self) -> &SubscriptionName {
        &self.subscription
    }

    /// Receives one message from the subscription without handling it.
    pub async fn receive(&self, wait: Duration) -> Result<Option<Envelope>, BrokerError> {
        self.broker.receive(&self.subscription, wait).await
    }

    /// Receives and handles the next message, waiting up to `wait`.
    ///
    /// `Ok(None)` means nothing was available. Only receive failures are
    /// errors; everything that happens to a received message is reported as a
    /// [`ProcessOutcome`].
    pub async fn process_next(&self, wait: Duration) -> Result<Option<ProcessOutcome>, BrokerError> {
        match self.receive(wait).await? {
            Some(envelope) => Ok(Some(self.handle(envelope).await)),
            None => Ok(None),
        }
    }

    /// Drives one delivered message to a settled state.
    #[instrument(
        skip_all,
        fields(
            subscription = %self.subscription,
            message_id = %envelope.message_id,
            delivery_count = envelope.delivery_count,
        )
    )]
    pub async fn handle(&self, envelope: Envelope) -> ProcessOutcome {
        let Some(token) = envelope.lock_token.as_ref() else {
            warn!("Delivered message carries no lock token; cannot settle");
            return ProcessOutcome::LockLost;
        };
        let id = &envelope.message_id;

        match self.marker.reserve(id).await {
            Ok(Reservation::Reserved) => {}
            Ok(Reservation::AlreadyProcessed) => {
                info!("Message already processed; acknowledging without side effects");
                return self.settle(Settle::Ack, token, ProcessOutcome::Duplicate).await;
            }
            Ok(Reservation::InProgress) => {
                debug!("Message is being processed by another consumer; leaving lease to expire");
                return ProcessOutcome::InFlightElsewhere;
            }
            Err(e) => {
                warn!(error = %e, "Processed marker unavailable; releasing message");
                return self.settle(Settle::Nack, token, ProcessOutcome::Released).await;
            }
        }

        let result = match decode_result(&envelope.payload) {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "Undecodable payload");
                self.release(id).await;
                return self.dead_letter(token, REASON_MALFORMED_PAYLOAD).await;
            }
        };

        if let Err(e) = self.process(id, &result).await {
            warn!(
                error = %e,
                delivery_count = envelope.delivery_count,
                "Processing failed; releasing for redelivery"
            );
            self.release(id).await;
            return self.settle(Settle::Nack, token, ProcessOutcome::Released).await;
        }

        if let Err(e) = self.marker.commit(id).await {
            warn!(error = %e, "Could not record message as processed; releasing");
            self.release(id).await;
            return self.settle(Settle::Nack, token, ProcessOutcome::Released).await;
        }

        self.settle(Settle::Ack, token, ProcessOutcome::Acknowledged)
            .await
    }

    /// Persists the result and, for anything but a pass, notifies with the
    /// run's aggregate so far.
    async fn process(
        &self,
        id: &MessageId,
        result: &TestResult,
    ) -> Result<(), TransientProcessingError> {
        self.store.persist(id, result).await?;
        if result.is_pass() {
            return Ok(());
        }

        let run_results = self.store.run_results(result.run_id()).await?;
        let summary = NotificationSummary::from_results(result.run_id().clone(), &run_results);
        self.notifier
            .notify(&Notification {
                dedup_key: id.to_string(),
                summary,
            })
            .await?;
        Ok(())
    }

    async fn release(&self, id: &MessageId) {
        if let Err(e) = self.marker.release(id).await {
            warn!(error = %e, "Could not release processed-marker reservation");
        }
    }

    async fn settle(
        &self,
        settle: Settle,
        token: &LockToken,
        outcome: ProcessOutcome,
    ) -> ProcessOutcome {
        let settled = match settle {
            Settle::Ack => self.broker.ack(token).await,
            Settle::Nack => self.broker.nack(token).await,
        };
        match settled {
            Ok(()) => outcome,
            Err(BrokerError::LockLost { .. }) => {
                warn!("Lock expired before the message was settled; broker will redeliver");
                ProcessOutcome::LockLost
            }
            Err(e) => {
                error!(error = %e, "Could not settle message; lease will expire");
                ProcessOutcome::Unsettled
            }
        }
    }

    /// Dead-letters through the broker. Adapters without an explicit
    /// dead-letter operation get a nack instead; their own delivery budget
    /// then moves the message to the dead-letter store.
    async fn dead_letter(&self, token: &LockToken, reason: &str) -> ProcessOutcome {
        match self.broker.dead_letter(token, reason).await {
            Ok(()) => {
                warn!(reason, "Message dead-lettered");
                ProcessOutcome::DeadLettered {
                    reason: reason.to_string(),
                }
            }
            Err(BrokerError::LockLost { .. }) => {
                warn!("Lock expired before the message could be dead-lettered");
                ProcessOutcome::LockLost
            }
            Err(e) => {
                warn!(error = %e, reason, "Dead-letter failed; releasing instead");
                self.settle(Settle::Nack, token, ProcessOutcome::Released).await
            }
        }
    }

    /// Logs the subscription's dead-letter store for manual inspection.
    ///
    /// Dead-lettered messages are terminal and never reprocessed here.
    pub async fn inspect_dead_letters(&self) -> Result<Vec<DeadLetter>, BrokerError> {
        let letters = self.broker.dead_letters(&self.subscription).await?;
        for letter in &letters {
            warn!(
                subscription = %self.subscription,
                message_id = %letter.message_id,
                reason = %letter.reason,
                delivery_count = letter.delivery_count,
                dead_lettered_at = %letter.dead_lettered_at,
                "Dead-lettered message requires manual inspection"
            );
        }
        info!(subscription = %self.subscription, count = letters.len(), "Dead-letter inspection finished");
        Ok(letters)
    }
}
