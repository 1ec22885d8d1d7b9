//! In-process topic/subscription broker.
//!
//! Honours the full [`Broker`] contract without an external service, so the
//! publisher, processor and worker pool can be exercised end to end in tests
//! and in `resultbus simulate`.
//!
//! All timing (leases, TTL) uses [`tokio::time::Instant`]; tests drive it with
//! paused time. Expired TTL messages are dead-lettered with reason
//! [`REASON_TTL_EXPIRED`] when the subscription policy says so, and dropped
//! otherwise. Expiry is only evaluated for unlocked messages.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use pipeline::{
    Broker, BrokerError, DeadLetter, DeliveryPolicy, Envelope, LockToken, MessageId,
    OutboundMessage, PublishError, SubscriptionName, Timestamp, TopicName, REASON_MAX_DELIVERY,
    REASON_TTL_EXPIRED,
};

/// Standard-tier Service Bus message size limit.
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 256 * 1024;

/// In-process [`Broker`] implementation.
#[derive(Debug)]
pub struct InMemoryBroker {
    state: Mutex<BrokerState>,
    available: Notify,
    max_message_bytes: usize,
}

#[derive(Debug, Default)]
struct BrokerState {
    topics: HashMap<TopicName, Vec<SubscriptionName>>,
    subscriptions: HashMap<SubscriptionName, SubscriptionState>,
    /// Live leases: token → (subscription, sequence number).
    leases: HashMap<LockToken, (SubscriptionName, u64)>,
    next_sequence: u64,
}

#[derive(Debug)]
struct SubscriptionState {
    policy: DeliveryPolicy,
    /// Ordered by sequence number, i.e. enqueue order.
    messages: BTreeMap<u64, StoredMessage>,
    dead_letters: Vec<DeadLetter>,
}

#[derive(Debug, Clone)]
struct StoredMessage {
    message_id: MessageId,
    payload: Vec<u8>,
    enqueued_at: Timestamp,
    enqueued_instant: Instant,
    time_to_live: Duration,
    delivery_count: u32,
    lease: Option<Lease>,
}

#[derive(Debug, Clone)]
struct Lease {
    token: LockToken,
    expires_at: Instant,
}

impl StoredMessage {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.enqueued_instant) >= self.time_to_live
    }

    fn into_dead_letter(self, reason: &str) -> DeadLetter {
        DeadLetter {
            message_id: self.message_id,
            payload: self.payload,
            reason: reason.to_string(),
            delivery_count: self.delivery_count,
            enqueued_at: self.enqueued_at,
            dead_lettered_at: Timestamp::now(),
        }
    }
}

impl SubscriptionState {
    fn new(policy: DeliveryPolicy) -> Self {
        Self {
            policy,
            messages: BTreeMap::new(),
            dead_letters: Vec::new(),
        }
    }

    /// Ends leases that ran out and applies TTL and delivery-budget rules.
    ///
    /// Returns `true` when a message became visible again.
    fn reclaim(
        &mut self,
        name: &SubscriptionName,
        leases: &mut HashMap<LockToken, (SubscriptionName, u64)>,
        now: Instant,
    ) -> bool {
        let mut released = false;
        let mut dead: Vec<(u64, &'static str)> = Vec::new();
        let mut dropped: Vec<u64> = Vec::new();

        for (&seq, msg) in self.messages.iter_mut() {
            if let Some(lease) = &msg.lease {
                if lease.expires_at > now {
                    continue;
                }
                debug!(
                    subscription = %name,
                    message_id = %msg.message_id,
                    delivery_count = msg.delivery_count,
                    "Lease expired"
                );
                leases.remove(&lease.token);
                msg.lease = None;
                if msg.delivery_count >= self.policy.max_delivery_count {
                    dead.push((seq, REASON_MAX_DELIVERY));
                    continue;
                }
                released = true;
            }
            if msg.is_expired(now) {
                if self.policy.dead_letter_on_expiration {
                    dead.push((seq, REASON_TTL_EXPIRED));
                } else {
                    dropped.push(seq);
                }
            }
        }

        for (seq, reason) in dead {
            self.move_to_dead_letters(name, seq, reason);
        }
        for seq in dropped {
            if let Some(msg) = self.messages.remove(&seq) {
                info!(subscription = %name, message_id = %msg.message_id, "Message expired and was dropped");
            }
        }
        released
    }

    fn move_to_dead_letters(&mut self, name: &SubscriptionName, seq: u64, reason: &str) {
        if let Some(msg) = self.messages.remove(&seq) {
            warn!(
                subscription = %name,
                message_id = %msg.message_id,
                delivery_count = msg.delivery_count,
                reason,
                "Message dead-lettered"
            );
            self.dead_letters.push(msg.into_dead_letter(reason));
        }
    }

    fn next_lease_expiry(&self) -> Option<Instant> {
        self.messages
            .values()
            .filter_map(|m| m.lease.as_ref().map(|l| l.expires_at))
            .min()
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    /// An empty broker with the standard-tier message size limit.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BrokerState::default()),
            available: Notify::new(),
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        }
    }

    /// Rejects payloads larger than `limit` with `PayloadTooLarge`.
    pub fn with_max_message_bytes(mut self, limit: usize) -> Self {
        self.max_message_bytes = limit;
        self
    }

    /// Declares a topic. Declaring an existing topic is a no-op.
    pub fn create_topic(&self, topic: &TopicName) {
        self.state.lock().topics.entry(topic.clone()).or_default();
    }

    /// Attaches a subscription to `topic` (declaring the topic if needed).
    ///
    /// Only messages published after this call reach the subscription.
    /// Re-subscribing an existing name replaces its policy but keeps its
    /// messages.
    pub fn subscribe(
        &self,
        topic: &TopicName,
        subscription: SubscriptionName,
        policy: DeliveryPolicy,
    ) {
        let mut state = self.state.lock();
        let subs = state.topics.entry(topic.clone()).or_default();
        if !subs.contains(&subscription) {
            subs.push(subscription.clone());
        }
        state
            .subscriptions
            .entry(subscription)
            .and_modify(|s| s.policy = policy)
            .or_insert_with(|| SubscriptionState::new(policy));
    }

    /// Messages still owned by the subscription (visible or leased).
    pub fn active_message_count(&self, subscription: &SubscriptionName) -> usize {
        self.state
            .lock()
            .subscriptions
            .get(subscription)
            .map_or(0, |s| s.messages.len())
    }

    /// Attempts to lease the next visible message. Also returns the earliest
    /// pending lease expiry so a waiting receiver knows when to look again.
    fn try_take(
        &self,
        subscription: &SubscriptionName,
    ) -> Result<(Option<Envelope>, Option<Instant>), BrokerError> {
        let now = Instant::now();
        let mut guard = self.state.lock();
        let BrokerState {
            subscriptions,
            leases,
            ..
        } = &mut *guard;
        let sub = subscriptions
            .get_mut(subscription)
            .ok_or_else(|| BrokerError::SubscriptionNotFound {
                subscription: subscription.to_string(),
            })?;
        sub.reclaim(subscription, leases, now);

        let lock_duration = sub.policy.lock_duration;
        let next = sub
            .messages
            .iter_mut()
            .find(|(_, m)| m.lease.is_none());
        let envelope = match next {
            Some((&seq, msg)) => {
                let token = LockToken::new_random();
                msg.delivery_count += 1;
                msg.lease = Some(Lease {
                    token: token.clone(),
                    expires_at: now + lock_duration,
                });
                leases.insert(token.clone(), (subscription.clone(), seq));
                debug!(
                    subscription = %subscription,
                    message_id = %msg.message_id,
                    delivery_count = msg.delivery_count,
                    "Message delivered"
                );
                Some(Envelope {
                    message_id: msg.message_id.clone(),
                    payload: msg.payload.clone(),
                    enqueued_at: msg.enqueued_at,
                    delivery_count: msg.delivery_count,
                    lock_token: Some(token),
                    time_to_live: msg.time_to_live,
                })
            }
            None => None,
        };
        Ok((envelope, sub.next_lease_expiry()))
    }

    /// Validates `token` against its live lease and hands the owning
    /// subscription and sequence number to `f`.
    fn with_lease<T>(
        &self,
        token: &LockToken,
        f: impl FnOnce(&SubscriptionName, &mut SubscriptionState, u64) -> T,
    ) -> Result<T, BrokerError> {
        let now = Instant::now();
        let mut guard = self.state.lock();
        let BrokerState {
            subscriptions,
            leases,
            ..
        } = &mut *guard;
        let lock_lost = || BrokerError::LockLost {
            token: token.to_string(),
        };

        let (name, seq) = leases.get(token).cloned().ok_or_else(lock_lost)?;
        let sub = subscriptions
            .get_mut(&name)
            .ok_or_else(|| BrokerError::SubscriptionNotFound {
                subscription: name.to_string(),
            })?;
        if sub.reclaim(&name, leases, now) {
            self.available.notify_waiters();
        }
        if leases.remove(token).is_none() {
            return Err(lock_lost());
        }
        Ok(f(&name, sub, seq))
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn publish(
        &self,
        topic: &TopicName,
        message: OutboundMessage,
    ) -> Result<MessageId, PublishError> {
        if message.payload.len() > self.max_message_bytes {
            return Err(PublishError::PayloadTooLarge {
                size_bytes: message.payload.len(),
                limit_bytes: self.max_message_bytes,
            });
        }

        let message_id = message.message_id.unwrap_or_else(MessageId::new_random);
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let subs = state
                .topics
                .get(topic)
                .ok_or_else(|| PublishError::TopicNotFound {
                    topic: topic.to_string(),
                })?;

            let seq = state.next_sequence;
            state.next_sequence += 1;
            let enqueued_at = Timestamp::now();
            let enqueued_instant = Instant::now();

            for name in subs {
                if let Some(sub) = state.subscriptions.get_mut(name) {
                    sub.messages.insert(
                        seq,
                        StoredMessage {
                            message_id: message_id.clone(),
                            payload: message.payload.clone(),
                            enqueued_at,
                            enqueued_instant,
                            time_to_live: message
                                .time_to_live
                                .unwrap_or(sub.policy.default_time_to_live),
                            delivery_count: 0,
                            lease: None,
                        },
                    );
                }
            }
            debug!(topic = %topic, message_id = %message_id, subscriptions = subs.len(), "Message published");
        }
        self.available.notify_waiters();
        Ok(message_id)
    }

    async fn receive(
        &self,
        subscription: &SubscriptionName,
        wait: Duration,
    ) -> Result<Option<Envelope>, BrokerError> {
        let deadline = Instant::now() + wait;
        loop {
            // Register interest before looking so a publish between the look
            // and the wait is not missed.
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let (envelope, next_expiry) = self.try_take(subscription)?;
            if envelope.is_some() {
                return Ok(envelope);
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }

            let wake_at = next_expiry.map_or(deadline, |e| e.min(deadline));
            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    async fn ack(&self, token: &LockToken) -> Result<(), BrokerError> {
        self.with_lease(token, |name, sub, seq| {
            if let Some(msg) = sub.messages.remove(&seq) {
                debug!(subscription = %name, message_id = %msg.message_id, "Message acknowledged");
            }
        })
    }

    async fn nack(&self, token: &LockToken) -> Result<(), BrokerError> {
        let released = self.with_lease(token, |name, sub, seq| {
            let Some(msg) = sub.messages.get_mut(&seq) else {
                return false;
            };
            msg.lease = None;
            if msg.delivery_count >= sub.policy.max_delivery_count {
                sub.move_to_dead_letters(name, seq, REASON_MAX_DELIVERY);
                false
            } else {
                debug!(subscription = %name, message_id = %msg.message_id, "Message released");
                true
            }
        })?;
        if released {
            self.available.notify_waiters();
        }
        Ok(())
    }

    async fn dead_letter(&self, token: &LockToken, reason: &str) -> Result<(), BrokerError> {
        self.with_lease(token, |name, sub, seq| {
            sub.move_to_dead_letters(name, seq, reason);
        })
    }

    async fn dead_letters(
        &self,
        subscription: &SubscriptionName,
    ) -> Result<Vec<DeadLetter>, BrokerError> {
        let now = Instant::now();
        let mut guard = self.state.lock();
        let BrokerState {
            subscriptions,
            leases,
            ..
        } = &mut *guard;
        let sub = subscriptions
            .get_mut(subscription)
            .ok_or_else(|| BrokerError::SubscriptionNotFound {
                subscription: subscription.to_string(),
            })?;
        if sub.reclaim(subscription, leases, now) {
            self.available.notify_waiters();
        }
        Ok(sub.dead_letters.clone())
    }
}
