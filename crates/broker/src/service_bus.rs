//! Azure Service Bus adapter over the HTTP REST surface.
//!
//! | Operation | REST call |
//! |-----------|-----------|
//! | `publish` | `POST {topic}/messages` |
//! | `receive` | `POST {topic}/subscriptions/{sub}/messages/head?timeout=N` (peek-lock) |
//! | `ack` | `DELETE {topic}/subscriptions/{sub}/messages/{message_id}/{lock_token}` |
//! | `nack` | `PUT {topic}/subscriptions/{sub}/messages/{message_id}/{lock_token}` |
//! | `dead_letters` | peek-lock `{topic}/subscriptions/{sub}/$DeadLetterQueue/messages/head`, then unlock |
//!
//! Leases, delivery counting, TTL and dead-lettering on `max_delivery_count`
//! are enforced by Service Bus itself. The REST surface has no explicit
//! dead-letter operation: `dead_letter` returns [`BrokerError::Unsupported`],
//! and callers fall back to releasing the message, which Service Bus
//! dead-letters once its delivery budget is spent.
//!
//! `dead_letters` browses by peek-locking up to [`MAX_DEAD_LETTER_BROWSE`]
//! messages from the dead-letter sub-queue and unlocking every one of them
//! afterwards, so the queue is left as it was found. Each browse raises the
//! dead-lettered messages' own delivery count.
//!
//! The adapter takes a pre-issued SAS authorization value; issuing or rotating
//! it is outside this crate.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::header::{HeaderMap, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Method, StatusCode, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use pipeline::{
    Broker, BrokerError, DeadLetter, Envelope, LockToken, MessageId, OutboundMessage,
    PublishError, SubscriptionName, Timestamp, TopicName, REASON_MAX_DELIVERY, REASON_TTL_EXPIRED,
};

const BROKER_PROPERTIES: &str = "BrokerProperties";

/// Custom property Service Bus sets on dead-lettered messages.
const DEAD_LETTER_REASON: &str = "DeadLetterReason";

const DEAD_LETTER_QUEUE: &str = "$DeadLetterQueue";

/// Most dead letters returned by one `dead_letters` call.
pub const MAX_DEAD_LETTER_BROWSE: usize = 100;

/// Longest server-side wait the REST receive call accepts.
const MAX_RECEIVE_WAIT: Duration = Duration::from_secs(55);

/// Connection settings for [`ServiceBusBroker`].
#[derive(Debug, Clone)]
pub struct ServiceBusConfig {
    /// Namespace name (`"mybus"`) or full endpoint (`"https://mybus.servicebus.windows.net"`).
    pub namespace: String,
    /// `SharedAccessSignature sr=…&sig=…&se=…&skn=…`
    pub sas_token: String,
    /// Per-request timeout, on top of the longest receive wait.
    pub request_timeout: Duration,
}

/// Outgoing `BrokerProperties` header.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct OutgoingProperties {
    #[serde(skip_serializing_if = "Option::is_none")]
    message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    time_to_live: Option<f64>,
}

/// Incoming `BrokerProperties` header of a peek-locked message.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
struct IncomingProperties {
    delivery_count: u32,
    lock_token: String,
    message_id: String,
    #[serde(default)]
    enqueued_time_utc: Option<String>,
    #[serde(default)]
    time_to_live: Option<f64>,
}

/// What `ack`/`nack` need to address a leased message.
#[derive(Debug, Clone)]
struct LeasedMessage {
    topic: TopicName,
    subscription: SubscriptionName,
    message_id: MessageId,
}

/// [`Broker`] backed by Azure Service Bus.
#[derive(Debug)]
pub struct ServiceBusBroker {
    client: reqwest::Client,
    endpoint: Url,
    sas_token: String,
    /// Subscription → topic it belongs to.
    subscriptions: HashMap<SubscriptionName, TopicName>,
    leases: DashMap<LockToken, LeasedMessage>,
}

impl ServiceBusBroker {
    /// Builds the adapter. No request is made until the first operation.
    pub fn new(config: ServiceBusConfig) -> Result<Self, BrokerError> {
        let endpoint = endpoint_url(&config.namespace)?;
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout + MAX_RECEIVE_WAIT)
            .build()
            .map_err(|e| BrokerError::Protocol {
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            endpoint,
            sas_token: config.sas_token,
            subscriptions: HashMap::new(),
            leases: DashMap::new(),
        })
    }

    /// Registers a subscription the adapter may receive from.
    pub fn with_subscription(mut self, topic: TopicName, subscription: SubscriptionName) -> Self {
        self.subscriptions.insert(subscription, topic);
        self
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.endpoint.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn message_url(&self, leased: &LeasedMessage, token: &LockToken) -> Url {
        self.url(&[
            leased.topic.as_str(),
            "subscriptions",
            leased.subscription.as_str(),
            "messages",
            leased.message_id.as_str(),
            token.as_str(),
        ])
    }

    fn topic_of(&self, subscription: &SubscriptionName) -> Result<&TopicName, BrokerError> {
        self.subscriptions
            .get(subscription)
            .ok_or_else(|| BrokerError::SubscriptionNotFound {
                subscription: subscription.to_string(),
            })
    }

    /// Peek-locks the head of the queue at `segments`.
    ///
    /// Returns the broker properties, the raw response headers (custom
    /// properties travel there) and the body, or `None` on `204`.
    async fn peek_lock(
        &self,
        segments: &[&str],
        subscription: &SubscriptionName,
        wait: Duration,
    ) -> Result<Option<(IncomingProperties, HeaderMap, Vec<u8>)>, BrokerError> {
        let mut url = self.url(segments);
        url.query_pairs_mut().append_pair(
            "timeout",
            &wait.min(MAX_RECEIVE_WAIT).as_secs().to_string(),
        );

        let response = self
            .client
            .post(url)
            .header(AUTHORIZATION, &self.sas_token)
            .send()
            .await
            .map_err(|e| BrokerError::Unreachable {
                message: e.to_string(),
            })?;

        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(match status {
                StatusCode::NOT_FOUND => BrokerError::SubscriptionNotFound {
                    subscription: subscription.to_string(),
                },
                _ => consume_error(status, &response.text().await.unwrap_or_default()),
            });
        }

        let properties: IncomingProperties = response
            .headers()
            .get(BROKER_PROPERTIES)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| BrokerError::Protocol {
                message: "peek-lock response without BrokerProperties".into(),
            })
            .and_then(|raw| {
                serde_json::from_str(raw).map_err(|e| BrokerError::Protocol {
                    message: format!("invalid BrokerProperties: {e}"),
                })
            })?;
        let headers = response.headers().clone();
        let payload = response
            .bytes()
            .await
            .map_err(|e| BrokerError::Unreachable {
                message: e.to_string(),
            })?
            .to_vec();
        Ok(Some((properties, headers, payload)))
    }

    async fn settle(&self, method: Method, token: &LockToken) -> Result<(), BrokerError> {
        let leased = self
            .leases
            .remove(token)
            .map(|(_, leased)| leased)
            .ok_or_else(|| BrokerError::LockLost {
                token: token.to_string(),
            })?;

        let response = self
            .client
            .request(method, self.message_url(&leased, token))
            .header(AUTHORIZATION, &self.sas_token)
            .send()
            .await
            .map_err(|e| BrokerError::Unreachable {
                message: e.to_string(),
            })?;

        match response.status() {
            s if s.is_success() => Ok(()),
            StatusCode::NOT_FOUND | StatusCode::GONE => Err(BrokerError::LockLost {
                token: token.to_string(),
            }),
            status => Err(consume_error(status, &response.text().await.unwrap_or_default())),
        }
    }
}

fn endpoint_url(namespace: &str) -> Result<Url, BrokerError> {
    let raw = if namespace.starts_with("https://") || namespace.starts_with("http://") {
        namespace.to_string()
    } else {
        format!("https://{namespace}.servicebus.windows.net/")
    };
    Url::parse(&raw).map_err(|e| BrokerError::Protocol {
        message: format!("invalid Service Bus namespace '{namespace}': {e}"),
    })
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn publish_error(
    status: StatusCode,
    topic: &TopicName,
    size_bytes: usize,
    retry_after: Option<Duration>,
    body: &str,
) -> PublishError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => PublishError::Unauthorized {
            message: body.to_string(),
        },
        StatusCode::PAYLOAD_TOO_LARGE => PublishError::PayloadTooLarge {
            size_bytes,
            limit_bytes: crate::DEFAULT_MAX_MESSAGE_BYTES,
        },
        StatusCode::NOT_FOUND => PublishError::TopicNotFound {
            topic: topic.to_string(),
        },
        _ => PublishError::Unreachable {
            message: format!("status {status}: {body}"),
            retry_after,
        },
    }
}

fn consume_error(status: StatusCode, body: &str) -> BrokerError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => BrokerError::Unauthorized {
            message: body.to_string(),
        },
        s if s.is_server_error() || s == StatusCode::TOO_MANY_REQUESTS => {
            BrokerError::Unreachable {
                message: format!("status {status}: {body}"),
            }
        }
        _ => BrokerError::Protocol {
            message: format!("status {status}: {body}"),
        },
    }
}

/// Service Bus reports enqueue time in RFC 1123 form.
fn parse_enqueued(value: Option<&str>) -> Timestamp {
    value
        .and_then(|v| chrono::DateTime::parse_from_rfc2822(v).ok())
        .map(|dt| Timestamp::from_utc(dt.with_timezone(&chrono::Utc)))
        .unwrap_or_else(Timestamp::now)
}

fn envelope_from(properties: IncomingProperties, payload: Vec<u8>) -> Result<Envelope, BrokerError> {
    let protocol = |what: &str| BrokerError::Protocol {
        message: format!("BrokerProperties has empty {what}"),
    };
    let time_to_live = properties
        .time_to_live
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .unwrap_or(Duration::MAX);
    Ok(Envelope {
        message_id: MessageId::new(properties.message_id).ok_or_else(|| protocol("MessageId"))?,
        payload,
        enqueued_at: parse_enqueued(properties.enqueued_time_utc.as_deref()),
        delivery_count: properties.delivery_count,
        lock_token: Some(LockToken::new(properties.lock_token).ok_or_else(|| protocol("LockToken"))?),
        time_to_live,
    })
}

#[async_trait]
impl Broker for ServiceBusBroker {
    async fn publish(
        &self,
        topic: &TopicName,
        message: OutboundMessage,
    ) -> Result<MessageId, PublishError> {
        let message_id = message.message_id.unwrap_or_else(MessageId::new_random);
        let properties = serde_json::to_string(&OutgoingProperties {
            message_id: Some(message_id.to_string()),
            time_to_live: message.time_to_live.map(|ttl| ttl.as_secs_f64()),
        })
        .map_err(|e| PublishError::Serialization {
            message: e.to_string(),
        })?;
        let size_bytes = message.payload.len();

        let response = self
            .client
            .post(self.url(&[topic.as_str(), "messages"]))
            .header(AUTHORIZATION, &self.sas_token)
            .header(CONTENT_TYPE, pipeline::CONTENT_TYPE)
            .header(BROKER_PROPERTIES, properties)
            .body(message.payload)
            .send()
            .await
            .map_err(|e| PublishError::unreachable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            debug!(topic = %topic, message_id = %message_id, "Message sent to Service Bus");
            return Ok(message_id);
        }
        let hint = retry_after(response.headers());
        let body = response.text().await.unwrap_or_default();
        Err(publish_error(status, topic, size_bytes, hint, &body))
    }

    async fn receive(
        &self,
        subscription: &SubscriptionName,
        wait: Duration,
    ) -> Result<Option<Envelope>, BrokerError> {
        let topic = self.topic_of(subscription)?;
        let segments = [
            topic.as_str(),
            "subscriptions",
            subscription.as_str(),
            "messages",
            "head",
        ];
        let Some((properties, _, payload)) = self.peek_lock(&segments, subscription, wait).await?
        else {
            return Ok(None);
        };

        let envelope = envelope_from(properties, payload)?;
        if let Some(token) = &envelope.lock_token {
            self.leases.insert(
                token.clone(),
                LeasedMessage {
                    topic: topic.clone(),
                    subscription: subscription.clone(),
                    message_id: envelope.message_id.clone(),
                },
            );
        }
        Ok(Some(envelope))
    }

    async fn ack(&self, token: &LockToken) -> Result<(), BrokerError> {
        self.settle(Method::DELETE, token).await
    }

    async fn nack(&self, token: &LockToken) -> Result<(), BrokerError> {
        self.settle(Method::PUT, token).await
    }

    async fn dead_letter(&self, token: &LockToken, reason: &str) -> Result<(), BrokerError> {
        warn!(lock_token = %token, reason, "Explicit dead-lettering is not available over REST");
        Err(BrokerError::Unsupported {
            operation: "dead_letter".into(),
        })
    }

    async fn dead_letters(
        &self,
        subscription: &SubscriptionName,
    ) -> Result<Vec<DeadLetter>, BrokerError> {
        let topic = self.topic_of(subscription)?;
        let queue = [
            topic.as_str(),
            "subscriptions",
            subscription.as_str(),
            DEAD_LETTER_QUEUE,
            "messages",
        ];
        let head: Vec<&str> = queue.iter().copied().chain(["head"]).collect();

        let mut letters = Vec::new();
        let mut locked: Vec<(String, String)> = Vec::new();
        let mut browse = Ok(());
        while letters.len() < MAX_DEAD_LETTER_BROWSE {
            match self.peek_lock(&head, subscription, Duration::ZERO).await {
                Ok(Some((properties, headers, payload))) => {
                    locked.push((properties.message_id.clone(), properties.lock_token.clone()));
                    match dead_letter_from(properties, &headers, payload) {
                        Ok(letter) => letters.push(letter),
                        Err(e) => {
                            browse = Err(e);
                            break;
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    browse = Err(e);
                    break;
                }
            }
        }

        for (message_id, lock_token) in locked {
            let segments: Vec<&str> = queue
                .iter()
                .copied()
                .chain([message_id.as_str(), lock_token.as_str()])
                .collect();
            let unlocked = self
                .client
                .put(self.url(&segments))
                .header(AUTHORIZATION, &self.sas_token)
                .send()
                .await;
            match unlocked {
                Ok(r) if r.status().is_success() => {}
                Ok(r) => {
                    warn!(message_id = %message_id, status = %r.status(), "Could not unlock dead letter")
                }
                Err(e) => warn!(message_id = %message_id, error = %e, "Could not unlock dead letter"),
            }
        }
        browse.map(|()| letters)
    }
}

/// Maps Service Bus' own dead-letter reasons onto the workspace's reason
/// strings; any other reason is kept verbatim.
fn dead_letter_reason(headers: &HeaderMap) -> String {
    let raw = headers
        .get(DEAD_LETTER_REASON)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().trim_matches('"'))
        .unwrap_or_default();
    match raw {
        "MaxDeliveryCountExceeded" => REASON_MAX_DELIVERY.to_string(),
        "TTLExpiredException" => REASON_TTL_EXPIRED.to_string(),
        "" => "unknown".to_string(),
        other => other.to_string(),
    }
}

fn dead_letter_from(
    properties: IncomingProperties,
    headers: &HeaderMap,
    payload: Vec<u8>,
) -> Result<DeadLetter, BrokerError> {
    let envelope = envelope_from(properties, payload)?;
    Ok(DeadLetter {
        message_id: envelope.message_id,
        payload: envelope.payload,
        reason: dead_letter_reason(headers),
        delivery_count: envelope.delivery_count,
        enqueued_at: envelope.enqueued_at,
        // REST does not report when the message was dead-lettered.
        dead_lettered_at: Timestamp::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn broker() -> ServiceBusBroker {
        ServiceBusBroker::new(ServiceBusConfig {
            namespace: "mybus".into(),
            sas_token: "SharedAccessSignature sr=x&sig=y&se=1&skn=send".into(),
            request_timeout: Duration::from_secs(5),
        })
        .unwrap()
        .with_subscription(
            TopicName::new("api-test-results").unwrap(),
            SubscriptionName::new("results-processor").unwrap(),
        )
    }

    #[test]
    fn namespace_expands_to_servicebus_host() {
        let url = broker().url(&["api-test-results", "messages"]);
        assert_eq!(
            url.as_str(),
            "https://mybus.servicebus.windows.net/api-test-results/messages"
        );
    }

    #[test]
    fn message_ids_with_spaces_are_percent_encoded() {
        let leased = LeasedMessage {
            topic: TopicName::new("api-test-results").unwrap(),
            subscription: SubscriptionName::new("results-processor").unwrap(),
            message_id: MessageId::new("r1:HTTPBin Status Check").unwrap(),
        };
        let url = broker().message_url(&leased, &LockToken::new("abc").unwrap());
        assert!(url.as_str().ends_with("/messages/r1:HTTPBin%20Status%20Check/abc"));
    }

    #[test]
    fn broker_properties_map_to_envelope() {
        let raw = r#"{"DeliveryCount":2,"EnqueuedSequenceNumber":0,"EnqueuedTimeUtc":"Sun, 18 Oct 2026 08:00:00 GMT","LockToken":"6f6c…","LockedUntilUtc":"Sun, 18 Oct 2026 08:01:00 GMT","MessageId":"r1:health","SequenceNumber":7,"State":"Active","TimeToLive":3600}"#;
        let props: IncomingProperties = serde_json::from_str(raw).unwrap();
        let env = envelope_from(props, b"{}".to_vec()).unwrap();
        assert_eq!(env.delivery_count, 2);
        assert_eq!(env.message_id.as_str(), "r1:health");
        assert_eq!(env.time_to_live, Duration::from_secs(3600));
        assert_eq!(env.enqueued_at.to_string(), "2026-10-18T08:00:00+00:00");
    }

    #[test]
    fn publish_status_mapping() {
        let topic = TopicName::new("t").unwrap();
        assert!(matches!(
            publish_error(StatusCode::UNAUTHORIZED, &topic, 1, None, ""),
            PublishError::Unauthorized { .. }
        ));
        assert!(matches!(
            publish_error(StatusCode::PAYLOAD_TOO_LARGE, &topic, 1, None, ""),
            PublishError::PayloadTooLarge { size_bytes: 1, .. }
        ));
        let throttled = publish_error(
            StatusCode::SERVICE_UNAVAILABLE,
            &topic,
            1,
            Some(Duration::from_secs(3)),
            "busy",
        );
        assert_eq!(
            throttled.retry_policy(),
            pipeline::RetryPolicy::Retryable {
                after: Some(Duration::from_secs(3))
            }
        );
    }

    #[tokio::test]
    async fn settling_an_unknown_token_is_lock_lost() {
        let err = broker()
            .ack(&LockToken::new("never-issued").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::LockLost { .. }));
    }

    #[tokio::test]
    async fn receive_from_unregistered_subscription_fails_fast() {
        let err = broker()
            .receive(&SubscriptionName::new("other").unwrap(), Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::SubscriptionNotFound { .. }));
    }
}
