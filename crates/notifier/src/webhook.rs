//! Slack-compatible incoming-webhook notifier.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Value};
use tracing::{info, instrument};

use pipeline::{AlertLevel, Notification, Notifier, NotifyError, Url};

/// Failures rendered in the message text; the rest are summarised as a count.
const MAX_RENDERED_FAILURES: usize = 5;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Posts notifications to an incoming-webhook URL.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    webhook_url: Url,
}

impl WebhookNotifier {
    /// Builds a notifier for `webhook_url`, which must be an absolute
    /// `http`/`https` URL.
    pub fn new(webhook_url: &str) -> Result<Self, NotifyError> {
        let invalid = |message: String| NotifyError::InvalidEndpoint {
            url: webhook_url.to_string(),
            message,
        };
        let webhook_url = Url::parse(webhook_url).map_err(|e| invalid(e.to_string()))?;
        if !matches!(webhook_url.scheme(), "http" | "https") {
            return Err(invalid(format!("unsupported scheme '{}'", webhook_url.scheme())));
        }
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| NotifyError::Unavailable {
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            webhook_url,
        })
    }
}

fn headline(level: AlertLevel) -> (&'static str, &'static str) {
    match level {
        AlertLevel::Success => ("ALL TESTS PASSED", "good"),
        AlertLevel::Warning => ("PARTIAL SUCCESS", "warning"),
        AlertLevel::Error => ("TESTS FAILED", "danger"),
    }
}

/// Builds the webhook body. The dedup key travels in the footer so a channel
/// integration (or a human) can spot repeats.
pub(crate) fn render(notification: &Notification) -> Value {
    let summary = &notification.summary;
    let (status, color) = headline(summary.alert_level);

    let mut failed_lines: Vec<String> = summary
        .failures
        .iter()
        .take(MAX_RENDERED_FAILURES)
        .map(|f| format!("• {}: {}", f.test_name, f.reason))
        .collect();
    if summary.failures.len() > MAX_RENDERED_FAILURES {
        failed_lines.push(format!(
            "… and {} more",
            summary.failures.len() - MAX_RENDERED_FAILURES
        ));
    }

    let mut fields = vec![json!({
        "title": "Test Summary",
        "value": format!(
            "Failed: {} of {}",
            summary.failed_count, summary.total_count
        ),
        "short": true,
    })];
    if !failed_lines.is_empty() {
        fields.push(json!({
            "title": "Failed Tests",
            "value": failed_lines.join("\n"),
            "short": false,
        }));
    }

    json!({
        "text": format!("API Test Results: {status} (run {})", summary.run_id),
        "attachments": [{
            "color": color,
            "fields": fields,
            "footer": format!("dedup-key: {}", notification.dedup_key),
        }],
    })
}

fn status_error(status: StatusCode, body: String) -> NotifyError {
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        NotifyError::Unavailable {
            message: format!("status {status}: {body}"),
        }
    } else {
        NotifyError::Rejected {
            status: status.as_u16(),
            message: body,
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    #[instrument(skip_all, fields(run_id = %notification.summary.run_id, dedup_key = %notification.dedup_key))]
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(self.webhook_url.clone())
            .json(&render(notification))
            .send()
            .await
            .map_err(|e| NotifyError::Unavailable {
                message: e.to_string(),
            })?;

        let status = response.status();
        if status.is_success() {
            info!("Notification sent successfully to webhook");
            return Ok(());
        }
        Err(status_error(status, response.text().await.unwrap_or_default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline::{FailureDetail, NotificationSummary, RunId};

    fn notification(failures: usize, total: usize, level: AlertLevel) -> Notification {
        Notification {
            dedup_key: "r1:orders".into(),
            summary: NotificationSummary {
                run_id: RunId::new("r1").unwrap(),
                failed_count: failures,
                total_count: total,
                failures: (0..failures)
                    .map(|i| FailureDetail {
                        test_name: format!("t{i}"),
                        reason: "Expected 200, got 500".into(),
                    })
                    .collect(),
                alert_level: level,
            },
        }
    }

    #[test]
    fn render_limits_listed_failures() {
        let body = render(&notification(7, 10, AlertLevel::Error));
        let fields = body["attachments"][0]["fields"].as_array().unwrap();
        let listed = fields[1]["value"].as_str().unwrap();
        assert_eq!(listed.lines().count(), MAX_RENDERED_FAILURES + 1);
        assert!(listed.ends_with("… and 2 more"));
        assert_eq!(body["attachments"][0]["color"], "danger");
        assert_eq!(body["attachments"][0]["footer"], "dedup-key: r1:orders");
    }

    #[test]
    fn render_warning_headline() {
        let body = render(&notification(1, 10, AlertLevel::Warning));
        assert_eq!(body["text"], "API Test Results: PARTIAL SUCCESS (run r1)");
    }

    #[test]
    fn throttling_and_server_errors_are_unavailable() {
        assert!(matches!(
            status_error(StatusCode::TOO_MANY_REQUESTS, String::new()),
            NotifyError::Unavailable { .. }
        ));
        assert!(matches!(
            status_error(StatusCode::BAD_GATEWAY, String::new()),
            NotifyError::Unavailable { .. }
        ));
        assert!(matches!(
            status_error(StatusCode::NOT_FOUND, "no_service".into()),
            NotifyError::Rejected { status: 404, .. }
        ));
    }

    #[test]
    fn webhook_url_must_be_absolute_http() {
        for url in ["hooks.slack.com/services/T0", "ftp://hooks.example.com/", "https://"] {
            assert!(
                matches!(WebhookNotifier::new(url), Err(NotifyError::InvalidEndpoint { .. })),
                "{url} should be rejected"
            );
        }
        assert!(WebhookNotifier::new("https://hooks.slack.com/services/T0/B0/x").is_ok());
    }
}
