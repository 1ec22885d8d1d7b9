//! Best-effort suppression of repeated notifications.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::debug;

use pipeline::{Notification, Notifier, NotifyError};

/// How long a delivered key suppresses repeats by default.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Wraps a [`Notifier`] and drops notifications whose `dedup_key` was already
/// delivered within the retention window.
///
/// A key is remembered only after the inner notifier succeeds, so a failed
/// dispatch is retried on the next invocation. Two concurrent first calls for
/// the same key may both go through.
#[derive(Debug)]
pub struct DedupingNotifier<N> {
    inner: N,
    delivered: DashMap<String, Instant>,
    retention: Duration,
}

impl<N: Notifier> DedupingNotifier<N> {
    pub fn new(inner: N) -> Self {
        Self::with_retention(inner, DEFAULT_RETENTION)
    }

    pub fn with_retention(inner: N, retention: Duration) -> Self {
        Self {
            inner,
            delivered: DashMap::new(),
            retention,
        }
    }

    fn recently_delivered(&self, key: &str, now: Instant) -> bool {
        self.delivered
            .get(key)
            .is_some_and(|at| now.duration_since(*at) < self.retention)
    }
}

#[async_trait]
impl<N: Notifier> Notifier for DedupingNotifier<N> {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        let now = Instant::now();
        if self.recently_delivered(&notification.dedup_key, now) {
            debug!(dedup_key = %notification.dedup_key, "Duplicate notification suppressed");
            return Ok(());
        }

        self.inner.notify(notification).await?;

        let retention = self.retention;
        self.delivered
            .retain(|_, at| now.duration_since(*at) < retention);
        self.delivered
            .insert(notification.dedup_key.clone(), Instant::now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use pipeline::{AlertLevel, NotificationSummary, RunId};

    #[derive(Default)]
    struct Counting {
        calls: AtomicUsize,
        fail_first: usize,
    }

    #[async_trait]
    impl Notifier for Counting {
        async fn notify(&self, _: &Notification) -> Result<(), NotifyError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                Err(NotifyError::Unavailable {
                    message: "down".into(),
                })
            } else {
                Ok(())
            }
        }
    }

    fn note(key: &str) -> Notification {
        Notification {
            dedup_key: key.into(),
            summary: NotificationSummary {
                run_id: RunId::new("r1").unwrap(),
                failed_count: 1,
                total_count: 1,
                failures: vec![],
                alert_level: AlertLevel::Error,
            },
        }
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_key_is_suppressed() {
        let notifier = DedupingNotifier::new(Counting::default());
        notifier.notify(&note("r1:a")).await.unwrap();
        notifier.notify(&note("r1:a")).await.unwrap();
        notifier.notify(&note("r1:b")).await.unwrap();
        assert_eq!(notifier.inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_dispatch_is_not_remembered() {
        let notifier = DedupingNotifier::new(Counting {
            fail_first: 1,
            ..Default::default()
        });
        assert!(notifier.notify(&note("r1:a")).await.is_err());
        notifier.notify(&note("r1:a")).await.unwrap();
        assert_eq!(notifier.inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn key_is_forgotten_after_retention() {
        let notifier = DedupingNotifier::with_retention(Counting::default(), Duration::from_secs(60));
        notifier.notify(&note("r1:a")).await.unwrap();
        tokio::time::advance(Duration::from_secs(61)).await;
        notifier.notify(&note("r1:a")).await.unwrap();
        assert_eq!(notifier.inner.calls.load(Ordering::SeqCst), 2);
    }
}
