//! Core domain for the API test result delivery pipeline.
//!
//! A producer runs a batch of HTTP checks, publishes each outcome as a durable
//! message onto a topic, and independent subscribers consume, deduplicate and
//! react to those outcomes with at-least-once delivery, bounded redelivery and
//! dead-lettering of poison messages.
//!
//! This crate contains every domain concept, newtype identifier, value type,
//! error type and port trait used by the rest of the workspace. Infrastructure
//! crates implement the traits defined here; they never add domain rules.
//!
//! ## Architectural Layer
//!
//! **Business logic + port definitions.** This crate has no network I/O
//! dependencies. It defines *what* is needed; infrastructure crates define
//! *how* to supply it.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | Newtype identifiers (`RunId`, `MessageId`, `LockToken`, etc.) |
//! | [`types`] | Test cases, results and timestamps |
//! | [`envelope`] | Outbound/inbound messages, dead letters, delivery policy |
//! | [`errors`] | Error taxonomy and retry policy |
//! | [`codec`] | Result wire format |
//! | [`config`] | Test suite file loading and validation |
//! | [`summary`] | Run and notification summaries |
//! | [`ports`] | `Broker`, `HttpProbe`, `Notifier`, `ResultStore`, `ProcessedMarker` |

pub mod codec;
pub mod config;
pub mod envelope;
pub mod errors;
pub mod identifiers;
pub mod ports;
pub mod summary;
pub mod types;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use codec::{decode_result, encode_result, CONTENT_TYPE};
pub use config::{
    config_paths_for, TestCaseConfig, TestSuiteConfig, DEFAULT_CONFIG_PATHS, KUBERNETES_CONFIG_PATHS,
};
pub use envelope::{
    DeadLetter, DeliveryPolicy, Envelope, OutboundMessage, REASON_MALFORMED_PAYLOAD,
    REASON_MAX_DELIVERY, REASON_TTL_EXPIRED,
};
pub use errors::{
    BrokerError, ConfigError, ExecutionError, MalformedPayloadError, NotifyError, PublishError,
    RetryPolicy, StoreError, TransientProcessingError,
};
pub use identifiers::{LockToken, MessageId, RunId, SubscriptionName, TestName, TopicName};
pub use ports::{
    Broker, HttpProbe, Notification, Notifier, ProbeRequest, ProbeResponse, ProcessedMarker,
    Reservation, ResultStore,
};
pub use summary::{AlertLevel, FailureDetail, NotificationSummary, RunContext, RunSummary, UNKNOWN};
pub use types::{HttpMethod, TestCase, TestResult, TestStatus, Timestamp};
pub use url::Url;
