//! Port traits implemented by infrastructure crates.
//!
//! The orchestration code in `runner` depends only on these traits, held as
//! `Arc<dyn Trait>`; `broker`, `probe` and `notifier` supply the concrete
//! adapters, and tests supply fakes.

use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::{
    BrokerError, DeadLetter, Envelope, ExecutionError, HttpMethod, LockToken, MessageId,
    NotificationSummary, NotifyError, OutboundMessage, PublishError, RunId, StoreError,
    SubscriptionName, TestResult, TopicName,
};

// ---------------------------------------------------------------------------
// Broker
// ---------------------------------------------------------------------------

/// Topic/subscription pub-sub store with leases, delivery counting, TTL and
/// dead-lettering.
///
/// Implementations must guarantee:
///
/// - every subscription of a topic receives its own copy of each message;
/// - a received message is invisible to other receivers of the same
///   subscription until its lease ends;
/// - a lease that ends without `ack` makes the message redeliverable, unless
///   its `delivery_count` has reached `max_delivery_count`, in which case it
///   is dead-lettered instead;
/// - a message older than its TTL is never delivered;
/// - operations presenting a token whose lease is over fail with
///   [`BrokerError::LockLost`].
#[async_trait]
pub trait Broker: Send + Sync {
    /// Durably enqueues `message` on `topic`, returning its message id.
    async fn publish(
        &self,
        topic: &TopicName,
        message: OutboundMessage,
    ) -> Result<MessageId, PublishError>;

    /// Receives the next visible message, waiting up to `wait` for one.
    ///
    /// A zero `wait` is a non-blocking poll.
    async fn receive(
        &self,
        subscription: &SubscriptionName,
        wait: Duration,
    ) -> Result<Option<Envelope>, BrokerError>;

    /// Completes the message: it is removed from the subscription.
    async fn ack(&self, token: &LockToken) -> Result<(), BrokerError>;

    /// Releases the lease immediately so the message can be redelivered.
    async fn nack(&self, token: &LockToken) -> Result<(), BrokerError>;

    /// Moves the message to the subscription's dead-letter store.
    async fn dead_letter(&self, token: &LockToken, reason: &str) -> Result<(), BrokerError>;

    /// Read-only view of the subscription's dead-letter store.
    async fn dead_letters(
        &self,
        subscription: &SubscriptionName,
    ) -> Result<Vec<DeadLetter>, BrokerError>;
}

// ---------------------------------------------------------------------------
// HTTP probe
// ---------------------------------------------------------------------------

/// One HTTP call issued on behalf of a test case.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeRequest {
    pub method: HttpMethod,
    pub url: Url,
    /// Transport timeout for the whole call.
    pub timeout: Duration,
    /// Sent as a JSON body when present.
    pub body: Option<serde_json::Value>,
}

/// The parts of a completed response the executor classifies on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResponse {
    /// HTTP status code, whatever its class.
    pub status: u16,
    /// Full response body.
    pub body: Vec<u8>,
}

/// Issues HTTP calls. Any status code is a completed call; only transport
/// failures are errors.
#[async_trait]
pub trait HttpProbe: Send + Sync {
    async fn send(&self, request: &ProbeRequest) -> Result<ProbeResponse, ExecutionError>;
}

// ---------------------------------------------------------------------------
// Notifier
// ---------------------------------------------------------------------------

/// A summary plus the key that identifies it across redeliveries.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// Stable per logical result; channels use it to suppress duplicates.
    pub dedup_key: String,
    pub summary: NotificationSummary,
}

/// Dispatches processed summaries to an external channel.
///
/// May be invoked more than once for the same `dedup_key`; implementations
/// should avoid duplicate user-visible alerts on a best-effort basis.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

// ---------------------------------------------------------------------------
// Result store
// ---------------------------------------------------------------------------

/// Durable home of processed results.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Stores `result` under `key`. Storing the same key again replaces the
    /// earlier value, so replays do not duplicate.
    async fn persist(&self, key: &MessageId, result: &TestResult) -> Result<(), StoreError>;

    /// All results stored so far for `run_id`.
    async fn run_results(&self, run_id: &RunId) -> Result<Vec<TestResult>, StoreError>;
}

// ---------------------------------------------------------------------------
// Processed marker
// ---------------------------------------------------------------------------

/// Outcome of [`ProcessedMarker::reserve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reservation {
    /// The caller now owns processing of this id.
    Reserved,
    /// The id was durably processed earlier.
    AlreadyProcessed,
    /// Another consumer is processing this id right now.
    InProgress,
}

/// Record of message ids whose side effects have completed.
///
/// `reserve` is an atomic check-and-set: of any number of concurrent callers
/// for the same id, at most one observes [`Reservation::Reserved`].
#[async_trait]
pub trait ProcessedMarker: Send + Sync {
    async fn reserve(&self, id: &MessageId) -> Result<Reservation, StoreError>;

    /// Marks a reserved id as processed. Must happen before the ack.
    async fn commit(&self, id: &MessageId) -> Result<(), StoreError>;

    /// Drops a reservation after a failed attempt so a redelivery can retry.
    async fn release(&self, id: &MessageId) -> Result<(), StoreError>;

    async fn is_processed(&self, id: &MessageId) -> Result<bool, StoreError>;
}
