//! Topic/subscription broker adapters.
//!
//! Implements the [`pipeline::Broker`] trait with two backends:
//!
//! - [`InMemoryBroker`] — an in-process simulation with topic fan-out,
//!   per-subscription cursors, lock leases, delivery counting, TTL expiry and
//!   dead-letter stores. Used by tests and by `resultbus simulate`.
//!
//! - [`ServiceBusBroker`] — Azure Service Bus over its REST surface. Each
//!   message body is the JSON-encoded result documented in
//!   [`pipeline::codec`]; lease and redelivery semantics come from the
//!   service.
//!
//! ## Deployment Scenarios
//!
//! | Scenario | Broker | Notes |
//! |----------|--------|-------|
//! | Unit / integration tests | `InMemoryBroker` | Paused tokio time drives leases and TTL |
//! | Local demo | `InMemoryBroker` | `resultbus simulate` |
//! | CI runner → cloud processor | `ServiceBusBroker` | Pre-issued SAS token |
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** Transport details, provider configuration, and
//! lease bookkeeping all live here. The [`pipeline`] crate sees only
//! [`pipeline::Broker`].

pub mod in_memory;
pub mod service_bus;

pub use in_memory::{InMemoryBroker, DEFAULT_MAX_MESSAGE_BYTES};
pub use service_bus::{ServiceBusBroker, ServiceBusConfig, MAX_DEAD_LETTER_BROWSE};
