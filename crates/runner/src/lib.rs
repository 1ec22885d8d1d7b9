//! Result delivery orchestration.
//!
//! This crate drives both ends of the pipeline: the [`TestExecutor`] and
//! [`ResultPublisher`] on the producer side, the [`ResultProcessor`] state
//! machine and its [`spawn_workers`] pool on the consumer side. It also
//! provides in-memory [`pipeline::ProcessedMarker`] and
//! [`pipeline::ResultStore`] implementations.
//!
//! ## Architectural Layer
//!
//! **Orchestration layer.** Code here sequences calls between the domain
//! types in the [`pipeline`] crate and the port traits (broker, HTTP probe,
//! notifier, store). It performs no I/O of its own.

pub mod executor;
pub mod marker;
pub mod processor;
pub mod publisher;
pub mod store;
pub mod worker;

pub use executor::{
    ExecutorConfig, RunOutcome, TestExecutor, INVALID_JSON_RESPONSE, RUN_DEADLINE_EXCEEDED,
};
pub use marker::InMemoryProcessedMarker;
pub use processor::{ProcessOutcome, ResultProcessor};
pub use publisher::{PublishReport, PublishRetryConfig, ResultPublisher};
pub use store::InMemoryResultStore;
pub use worker::{spawn_workers, WorkerConfig};
