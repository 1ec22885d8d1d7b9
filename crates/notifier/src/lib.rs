//! Failure notification adapters.
//!
//! Implements the [`pipeline::Notifier`] trait:
//!
//! - [`WebhookNotifier`] — posts a Slack-compatible message to an incoming
//!   webhook. Throttling, server errors and transport failures map to
//!   [`pipeline::NotifyError::Unavailable`].
//! - [`LogNotifier`] — writes the summary to the log; used when no webhook is
//!   configured.
//! - [`DedupingNotifier`] — wraps either of the above and suppresses a
//!   repeated `dedup_key`.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** Message rendering and HTTP transport live here. The
//! result processor sees only [`pipeline::Notifier`] and treats every error
//! as transient.

pub mod dedup;
pub mod log;
pub mod webhook;

pub use dedup::{DedupingNotifier, DEFAULT_RETENTION};
pub use log::LogNotifier;
pub use webhook::WebhookNotifier;
