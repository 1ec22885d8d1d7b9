//! Broker-facing message types: what goes onto a topic, what a consumer
//! receives back, and the subscription policy that governs redelivery.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{ConfigError, LockToken, MessageId, Timestamp};

/// Reason recorded when a consumer rejects a payload it cannot decode.
pub const REASON_MALFORMED_PAYLOAD: &str = "malformed-payload";

/// Reason recorded by the broker when the retry budget is exhausted.
pub const REASON_MAX_DELIVERY: &str = "max-delivery-count-exceeded";

/// Reason recorded by the broker when a message outlives its time-to-live.
pub const REASON_TTL_EXPIRED: &str = "ttl-expired";

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// A message handed to [`crate::Broker::publish`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Producer-assigned id; the broker generates one when `None`.
    pub message_id: Option<MessageId>,
    /// Serialised body (see [`crate::codec`]).
    pub payload: Vec<u8>,
    /// Per-message TTL; the subscription default applies when `None`.
    pub time_to_live: Option<Duration>,
}

impl OutboundMessage {
    /// A message with a broker-assigned id and the subscription's default TTL.
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            message_id: None,
            payload,
            time_to_live: None,
        }
    }

    pub fn with_message_id(mut self, id: MessageId) -> Self {
        self.message_id = Some(id);
        self
    }

    pub fn with_time_to_live(mut self, ttl: Duration) -> Self {
        self.time_to_live = Some(ttl);
        self
    }
}

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// A message as delivered to a consumer of one subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Producer-assigned id; stable across redeliveries.
    pub message_id: MessageId,
    /// Body exactly as published.
    pub payload: Vec<u8>,
    /// When the broker accepted the message.
    pub enqueued_at: Timestamp,
    /// Number of deliveries including this one; the first delivery is `1`.
    pub delivery_count: u32,
    /// Present while this consumer holds the message's lease.
    pub lock_token: Option<LockToken>,
    /// TTL the message was enqueued with.
    pub time_to_live: Duration,
}

/// A message parked in a subscription's dead-letter store.
///
/// Dead-lettered messages are terminal: they are never redelivered and are
/// surfaced only for inspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub message_id: MessageId,
    pub payload: Vec<u8>,
    /// One of the `REASON_*` constants, or a broker-specific reason.
    pub reason: String,
    /// Deliveries made before the message was parked.
    pub delivery_count: u32,
    pub enqueued_at: Timestamp,
    pub dead_lettered_at: Timestamp,
}

// ---------------------------------------------------------------------------
// Subscription policy
// ---------------------------------------------------------------------------

/// Per-subscription delivery policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryPolicy {
    /// Deliveries allowed before the broker dead-letters the message.
    pub max_delivery_count: u32,
    /// How long a receive grants exclusive visibility.
    pub lock_duration: Duration,
    /// TTL for messages published without one.
    pub default_time_to_live: Duration,
    /// Dead-letter (rather than silently drop) messages that expire.
    pub dead_letter_on_expiration: bool,
}

impl DeliveryPolicy {
    /// Creates a policy, rejecting a zero delivery budget or zero durations.
    pub fn new(
        max_delivery_count: u32,
        lock_duration: Duration,
        default_time_to_live: Duration,
    ) -> Result<Self, ConfigError> {
        if max_delivery_count == 0 {
            return Err(ConfigError::InvalidPolicy {
                message: "max_delivery_count must be at least 1".into(),
            });
        }
        if lock_duration.is_zero() || default_time_to_live.is_zero() {
            return Err(ConfigError::InvalidPolicy {
                message: "lock_duration and default_time_to_live must be positive".into(),
            });
        }
        Ok(Self {
            max_delivery_count,
            lock_duration,
            default_time_to_live,
            dead_letter_on_expiration: true,
        })
    }

    pub fn with_dead_letter_on_expiration(mut self, enabled: bool) -> Self {
        self.dead_letter_on_expiration = enabled;
        self
    }
}

impl Default for DeliveryPolicy {
    /// Service Bus defaults: 10 deliveries, 60 s lock, 14 day TTL.
    fn default() -> Self {
        Self {
            max_delivery_count: 10,
            lock_duration: Duration::from_secs(60),
            default_time_to_live: Duration::from_secs(14 * 24 * 60 * 60),
            dead_letter_on_expiration: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_rejects_zero_delivery_budget() {
        let err = DeliveryPolicy::new(0, Duration::from_secs(1), Duration::from_secs(1));
        assert!(matches!(err, Err(ConfigError::InvalidPolicy { .. })));
    }

    #[test]
    fn policy_rejects_zero_lock() {
        assert!(DeliveryPolicy::new(3, Duration::ZERO, Duration::from_secs(1)).is_err());
    }

    #[test]
    fn outbound_builder_sets_fields() {
        let msg = OutboundMessage::new(b"{}".to_vec())
            .with_message_id(MessageId::new("r1:a").unwrap())
            .with_time_to_live(Duration::from_secs(5));
        assert_eq!(msg.message_id.unwrap().as_str(), "r1:a");
        assert_eq!(msg.time_to_live, Some(Duration::from_secs(5)));
    }
}
