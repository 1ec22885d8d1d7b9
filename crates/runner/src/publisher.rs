//! Result Publisher: puts encoded results on the results topic.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use pipeline::{
    encode_result, Broker, MessageId, OutboundMessage, PublishError, RetryPolicy, TestName,
    TestResult, TopicName,
};

/// Bounded retry for a single publish plus batch parallelism.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishRetryConfig {
    /// Attempts per result, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles for every further attempt.
    pub base_backoff: Duration,
    /// Publishes in flight at once during a batch.
    pub concurrency: usize,
}

impl Default for PublishRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(200),
            concurrency: 4,
        }
    }
}

/// Per-batch accounting returned by [`ResultPublisher::publish_batch`].
#[derive(Debug, Default)]
pub struct PublishReport {
    /// Ids the broker accepted.
    pub published: Vec<MessageId>,
    /// Results that still failed after retrying, with the last error.
    pub failed: Vec<(TestName, PublishError)>,
    /// Results never attempted because the batch was cancelled.
    pub skipped: usize,
}

impl PublishReport {
    /// `true` when nothing failed and nothing was skipped.
    pub fn all_published(&self) -> bool {
        self.failed.is_empty() && self.skipped == 0
    }
}

/// Publishes test results to one topic, retrying transient broker failures.
pub struct ResultPublisher {
    broker: Arc<dyn Broker>,
    topic: TopicName,
    time_to_live: Option<Duration>,
    retry: PublishRetryConfig,
}

impl ResultPublisher {
    /// Publisher with the default retry policy and the subscription's TTL.
    pub fn new(broker: Arc<dyn Broker>, topic: TopicName) -> Self {
        Self {
            broker,
            topic,
            time_to_live: None,
            retry: PublishRetryConfig::default(),
        }
    }

    /// TTL stamped on every message. Without one the subscription default
    /// applies.
    pub fn with_time_to_live(mut self, ttl: Duration) -> Self {
        self.time_to_live = Some(ttl);
        self
    }

    pub fn with_retry(mut self, retry: PublishRetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Publishes one result, retrying retryable failures with exponential
    /// back-off.
    ///
    /// The message id is `"{run_id}:{test_name}"` on every attempt, so a
    /// publish that succeeded on the broker but failed on the wire is
    /// absorbed by the consumer's processed marker.
    #[instrument(skip_all, fields(run_id = %result.run_id(), test_name = %result.test_name()))]
    pub async fn publish(&self, result: &TestResult) -> Result<MessageId, PublishError> {
        let payload = encode_result(result)?;
        let message_id = result.message_id();

        let mut attempt = 1;
        loop {
            let mut message =
                OutboundMessage::new(payload.clone()).with_message_id(message_id.clone());
            if let Some(ttl) = self.time_to_live {
                message = message.with_time_to_live(ttl);
            }

            let error = match self.broker.publish(&self.topic, message).await {
                Ok(id) => {
                    info!(message_id = %id, attempt, "Result published");
                    return Ok(id);
                }
                Err(error) => error,
            };

            match error.retry_policy() {
                RetryPolicy::Retryable { after } if attempt < self.retry.max_attempts => {
                    let delay = after.unwrap_or_else(|| self.backoff(attempt));
                    warn!(attempt, error = %error, delay_ms = delay.as_millis() as u64, "Publish failed; retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                _ => {
                    error!(attempt, error = %error, "Publish failed");
                    return Err(error);
                }
            }
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.retry.base_backoff.saturating_mul(factor)
    }

    /// Publishes every result with bounded concurrency. A failure is recorded
    /// and does not stop the rest.
    ///
    /// Once `cancel` fires no new publish is started; publishes already in
    /// flight run to completion so no result is left half-sent.
    pub async fn publish_batch(
        &self,
        results: &[TestResult],
        cancel: &CancellationToken,
    ) -> PublishReport {
        let outcomes: Vec<_> = stream::iter(results)
            .map(|result| async move {
                if cancel.is_cancelled() {
                    return (result, None);
                }
                (result, Some(self.publish(result).await))
            })
            .buffer_unordered(self.retry.concurrency.max(1))
            .collect()
            .await;

        let mut report = PublishReport::default();
        for (result, outcome) in outcomes {
            match outcome {
                Some(Ok(id)) => report.published.push(id),
                Some(Err(error)) => report.failed.push((result.test_name().clone(), error)),
                None => report.skipped += 1,
            }
        }
        info!(
            topic = %self.topic,
            published = report.published.len(),
            failed = report.failed.len(),
            skipped = report.skipped,
            "Batch publish finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use pipeline::{
        BrokerError, DeadLetter, Envelope, LockToken, RunId, SubscriptionName, Timestamp,
    };
    use tokio::time::Instant;

    use super::*;

    /// Fails the first `failures` publishes with `error`, then accepts.
    struct FlakyBroker {
        failures: u32,
        error: PublishError,
        calls: AtomicU32,
    }

    impl FlakyBroker {
        fn new(failures: u32, error: PublishError) -> Self {
            Self {
                failures,
                error,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl Broker for FlakyBroker {
        async fn publish(
            &self,
            _: &TopicName,
            message: OutboundMessage,
        ) -> Result<MessageId, PublishError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err(self.error.clone());
            }
            Ok(message.message_id.unwrap_or_else(MessageId::new_random))
        }

        async fn receive(
            &self,
            _: &SubscriptionName,
            _: Duration,
        ) -> Result<Option<Envelope>, BrokerError> {
            Ok(None)
        }

        async fn ack(&self, _: &LockToken) -> Result<(), BrokerError> {
            Ok(())
        }

        async fn nack(&self, _: &LockToken) -> Result<(), BrokerError> {
            Ok(())
        }

        async fn dead_letter(&self, _: &LockToken, _: &str) -> Result<(), BrokerError> {
            Ok(())
        }

        async fn dead_letters(&self, _: &SubscriptionName) -> Result<Vec<DeadLetter>, BrokerError> {
            Ok(Vec::new())
        }
    }

    fn result(name: &str) -> TestResult {
        TestResult::passed(
            RunId::new("r1").unwrap(),
            TestName::new(name).unwrap(),
            200,
            Duration::from_millis(12),
            Timestamp::now(),
        )
    }

    fn publisher(broker: Arc<FlakyBroker>) -> ResultPublisher {
        ResultPublisher::new(broker, TopicName::new("api-test-results").unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried_with_backoff() {
        let broker = Arc::new(FlakyBroker::new(2, PublishError::unreachable("reset")));
        let started = Instant::now();

        let id = publisher(broker.clone()).publish(&result("health")).await.unwrap();

        assert_eq!(id.as_str(), "r1:health");
        assert_eq!(broker.calls.load(Ordering::SeqCst), 3);
        // 200ms + 400ms of back-off.
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(600) && waited < Duration::from_millis(700));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_hint_overrides_backoff() {
        let broker = Arc::new(FlakyBroker::new(
            1,
            PublishError::Unreachable {
                message: "throttled".into(),
                retry_after: Some(Duration::from_secs(5)),
            },
        ));
        let started = Instant::now();

        publisher(broker).publish(&result("health")).await.unwrap();

        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(5) && waited < Duration::from_millis(5_200));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let broker = Arc::new(FlakyBroker::new(10, PublishError::unreachable("down")));
        let err = publisher(broker.clone())
            .publish(&result("health"))
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::Unreachable { .. }));
        assert_eq!(broker.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_failures_are_not_retried() {
        let broker = Arc::new(FlakyBroker::new(
            10,
            PublishError::Unauthorized {
                message: "bad token".into(),
            },
        ));
        let err = publisher(broker.clone())
            .publish(&result("health"))
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::Unauthorized { .. }));
        assert_eq!(broker.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn batch_records_failures_without_stopping() {
        let broker = Arc::new(FlakyBroker::new(
            1,
            PublishError::PayloadTooLarge {
                size_bytes: 10,
                limit_bytes: 5,
            },
        ));
        let publisher = publisher(broker).with_retry(PublishRetryConfig {
            concurrency: 1,
            ..Default::default()
        });
        let results = vec![result("a"), result("b"), result("c")];

        let report = publisher
            .publish_batch(&results, &CancellationToken::new())
            .await;

        assert_eq!(report.published.len(), 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0.as_str(), "a");
        assert_eq!(report.skipped, 0);
        assert!(!report.all_published());
    }

    #[tokio::test]
    async fn cancelled_batch_skips_everything_not_started() {
        let broker = Arc::new(FlakyBroker::new(0, PublishError::unreachable("unused")));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = publisher(broker.clone())
            .publish_batch(&[result("a"), result("b")], &cancel)
            .await;

        assert!(report.published.is_empty());
        assert_eq!(report.skipped, 2);
        assert_eq!(broker.calls.load(Ordering::SeqCst), 0);
    }
}
