//! Error taxonomy and retry-policy types for the result delivery domain.
//!
//! Each component has its own error type so that failure handling stays local:
//! execution errors become `error` results, publish errors go back to the
//! caller, malformed payloads go to the dead-letter store, and transient
//! processing errors are retried by broker redelivery.
//!
//! [`RetryPolicy`] is a cross-cutting concern: any error type that participates
//! in retry decisions must be able to produce a [`RetryPolicy`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Retry semantics
// ---------------------------------------------------------------------------

/// Whether an error condition is safe to retry and, if so, after what delay.
///
/// - `Retryable` errors: broker unreachable, throttling, transport timeouts.
/// - `NonRetryable` errors: authentication failure, oversized payload, unknown
///   topic, stale lock token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RetryPolicy {
    /// The operation may be retried.
    ///
    /// `after` optionally specifies the minimum delay before retrying (e.g.
    /// derived from a `Retry-After` response header).
    Retryable {
        /// Minimum back-off before the next attempt. `None` means apply the
        /// caller's own back-off schedule.
        after: Option<Duration>,
    },
    /// The operation must not be retried.
    NonRetryable,
}

impl RetryPolicy {
    /// `true` for [`RetryPolicy::Retryable`].
    pub fn is_retryable(&self) -> bool {
        matches!(self, RetryPolicy::Retryable { .. })
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// The test suite or a delivery policy is invalid.
///
/// Produced at load time; a run never starts with an invalid configuration.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    /// The suite file exists but could not be read.
    #[error("Could not read test configuration '{path}': {message}")]
    Io { path: String, message: String },

    /// The suite file is not JSON of the expected shape.
    #[error("Test configuration is not valid JSON: {message}")]
    Parse { message: String },

    /// `api_tests` is empty.
    #[error("Test configuration contains no test cases")]
    EmptySuite,

    /// A test case name is empty or only whitespace.
    #[error("Test case name must not be empty")]
    EmptyName,

    /// Two test cases share a name, which would collide in message ids.
    #[error("Duplicate test case name '{name}'")]
    DuplicateName { name: String },

    /// The URL does not parse, is not `http`/`https`, or has no host.
    #[error("Test case '{name}' has invalid URL '{url}'")]
    InvalidUrl { name: String, url: String },

    /// The method is not one of the supported verbs.
    #[error("Unsupported HTTP method '{method}'")]
    InvalidMethod { method: String },

    /// The expected status lies outside `100..=599`.
    #[error("Test case '{name}' has invalid expected status {status}")]
    InvalidStatus { name: String, status: i64 },

    /// The timeout is zero, negative or not finite.
    #[error("Test case '{name}' must have a positive timeout")]
    InvalidTimeout { name: String },

    /// A [`crate::DeliveryPolicy`] has a zero budget or duration.
    #[error("Invalid delivery policy: {message}")]
    InvalidPolicy { message: String },
}

// ---------------------------------------------------------------------------
// Execution (per test case)
// ---------------------------------------------------------------------------

/// An HTTP check did not complete.
///
/// Never aborts a batch: the executor records it as an `error` result.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    /// No complete response arrived within the case's timeout.
    #[error("Request timeout after {}s", .after.as_secs_f64())]
    Timeout { after: Duration },

    /// DNS resolution or the TCP/TLS handshake failed.
    #[error("Connection failed: {message}")]
    Connect { message: String },

    /// Any other transport failure, including reading the body.
    #[error("Request failed: {message}")]
    Request { message: String },
}

// ---------------------------------------------------------------------------
// Publishing
// ---------------------------------------------------------------------------

/// A result could not be handed to the broker.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PublishError {
    /// Transport failure, throttling or a server-side error.
    #[error("Broker unreachable: {message}")]
    Unreachable {
        message: String,
        /// Server-suggested delay, from `Retry-After`.
        retry_after: Option<Duration>,
    },

    /// The credentials were refused.
    #[error("Broker rejected credentials: {message}")]
    Unauthorized { message: String },

    /// The encoded result exceeds the broker's message size limit.
    #[error("Message too large: {size_bytes} bytes exceeds limit of {limit_bytes} bytes")]
    PayloadTooLarge {
        size_bytes: usize,
        limit_bytes: usize,
    },

    /// The topic does not exist.
    #[error("Topic not found: {topic}")]
    TopicNotFound { topic: String },

    /// The result or its broker properties could not be serialised.
    #[error("Result could not be serialised: {message}")]
    Serialization { message: String },
}

impl PublishError {
    /// [`PublishError::Unreachable`] without a retry hint.
    pub fn unreachable(message: impl Into<String>) -> Self {
        Self::Unreachable {
            message: message.into(),
            retry_after: None,
        }
    }

    /// Only connectivity/throttling failures are worth another attempt.
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            PublishError::Unreachable { retry_after, .. } => RetryPolicy::Retryable {
                after: *retry_after,
            },
            _ => RetryPolicy::NonRetryable,
        }
    }
}

// ---------------------------------------------------------------------------
// Consuming
// ---------------------------------------------------------------------------

/// A consumer-side broker operation (receive, ack, nack, dead-letter) failed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// The lock token is unknown or its lease has already expired. The broker
    /// has made (or will make) the message redeliverable.
    #[error("Lock lost or expired for token {token}")]
    LockLost { token: String },

    /// The subscription is unknown to the broker or to this adapter.
    #[error("Subscription not found: {subscription}")]
    SubscriptionNotFound { subscription: String },

    /// Transport failure, throttling or a server-side error.
    #[error("Broker unreachable: {message}")]
    Unreachable { message: String },

    /// The credentials were refused.
    #[error("Broker rejected credentials: {message}")]
    Unauthorized { message: String },

    /// The adapter cannot perform this operation.
    #[error("Operation '{operation}' is not supported by this broker")]
    Unsupported { operation: String },

    /// The broker answered with something the adapter does not understand.
    #[error("Unexpected broker response: {message}")]
    Protocol { message: String },
}

impl BrokerError {
    /// Connectivity and protocol hiccups are retryable; the rest are not.
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            BrokerError::Unreachable { .. } | BrokerError::Protocol { .. } => {
                RetryPolicy::Retryable { after: None }
            }
            _ => RetryPolicy::NonRetryable,
        }
    }
}

// ---------------------------------------------------------------------------
// Processing
// ---------------------------------------------------------------------------

/// A delivered payload cannot be decoded into a [`crate::TestResult`].
///
/// Permanent: the message is dead-lettered immediately and never retried.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Malformed payload: {message}")]
pub struct MalformedPayloadError {
    pub message: String,
}

/// The notification channel could not accept a summary.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NotifyError {
    /// Transport failure, throttling or a server-side error.
    #[error("Notification channel unavailable: {message}")]
    Unavailable { message: String },

    /// The channel refused the notification with a client-error status.
    #[error("Notification rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    /// The configured endpoint is not an absolute `http`/`https` URL.
    #[error("Invalid notification endpoint '{url}': {message}")]
    InvalidEndpoint { url: String, message: String },
}

/// The result store could not be read or written.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Result store unavailable: {message}")]
pub struct StoreError {
    pub message: String,
}

/// Domain processing of one delivered result failed.
///
/// Every variant is transient from the processor's point of view: the message
/// is released for broker-driven redelivery, bounded by `max_delivery_count`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransientProcessingError {
    #[error(transparent)]
    Notify(#[from] NotifyError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
