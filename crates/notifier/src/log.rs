//! Log-only notifier used when no webhook is configured.

use async_trait::async_trait;
use tracing::info;

use pipeline::{Notification, Notifier, NotifyError};

/// Writes each notification to the log instead of an external channel.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        let summary = &notification.summary;
        info!(
            run_id = %summary.run_id,
            dedup_key = %notification.dedup_key,
            alert_level = ?summary.alert_level,
            failed = summary.failed_count,
            total = summary.total_count,
            "Test summary (no webhook configured)"
        );
        for failure in &summary.failures {
            info!(run_id = %summary.run_id, test_name = %failure.test_name, reason = %failure.reason, "Failed test");
        }
        Ok(())
    }
}
