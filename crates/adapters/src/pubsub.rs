//! In-memory pub/sub transport
//!
//! At-least-once delivery with per-subscription queues: a nacked (or
//! dropped) delivery is requeued until the attempt budget is exhausted, then
//! parked on the subscription's dead-letter list. Used both as the command
//! bus between Conductor and Director and as the pipeline source/sink
//! transport in local runs and tests.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, warn};
use uuid::Uuid;

use stratoflow_core::error::{DomainError, Result};
use stratoflow_core::message::Message;
use stratoflow_ports::messaging::{
    AckOutcome, AckToken, Delivery, MessageSource, SubscriberPort, TopicPublisher,
};

const DEFAULT_MAX_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone)]
struct TransportMessage {
    id: String,
    payload: Vec<u8>,
    attributes: HashMap<String, String>,
    publish_time: DateTime<Utc>,
    attempt: u32,
}

struct SubscriptionQueue {
    name: String,
    queue: Mutex<VecDeque<TransportMessage>>,
    notify: Notify,
    dead_letter: Mutex<Vec<TransportMessage>>,
    max_attempts: u32,
}

impl SubscriptionQueue {
    fn new(name: &str, max_attempts: u32) -> Self {
        Self {
            name: name.to_string(),
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            dead_letter: Mutex::new(Vec::new()),
            max_attempts,
        }
    }

    fn push(&self, msg: TransportMessage) {
        self.queue.lock().push_back(msg);
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<TransportMessage> {
        self.queue.lock().pop_front()
    }

    fn redeliver(&self, mut msg: TransportMessage) {
        msg.attempt += 1;
        if msg.attempt > self.max_attempts {
            warn!(
                subscription = %self.name,
                message_id = %msg.id,
                attempts = msg.attempt,
                "attempt budget exhausted, parking message on dead-letter"
            );
            self.dead_letter.lock().push(msg);
            return;
        }
        debug!(subscription = %self.name, message_id = %msg.id, attempt = msg.attempt, "redelivering");
        self.push(msg);
    }
}

struct SubscriptionRecord {
    topic: String,
    queue: Arc<SubscriptionQueue>,
}

/// The in-memory transport shared by every component of a run.
pub struct InMemoryPubSub {
    /// topic name -> attached subscription names
    topics: DashMap<String, Vec<String>>,
    subscriptions: DashMap<String, SubscriptionRecord>,
    max_attempts: u32,
}

impl Default for InMemoryPubSub {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryPubSub {
    pub fn new() -> Self {
        Self {
            topics: DashMap::new(),
            subscriptions: DashMap::new(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::new()
        }
    }

    /// Returns true when the topic was created, false when it existed.
    pub fn create_topic(&self, name: &str) -> bool {
        let mut created = false;
        self.topics.entry(name.to_string()).or_insert_with(|| {
            created = true;
            Vec::new()
        });
        created
    }

    pub fn topic_exists(&self, name: &str) -> bool {
        self.topics.contains_key(name)
    }

    pub fn delete_topic(&self, name: &str) -> bool {
        self.topics.remove(name).is_some()
    }

    /// Returns true when the subscription was created, false when an
    /// identical one existed. A name collision on a different topic is a
    /// Conflict.
    pub fn create_subscription(&self, name: &str, topic: &str) -> Result<bool> {
        if !self.topic_exists(topic) {
            return Err(DomainError::Precondition(format!(
                "subscription {name} requires topic {topic}"
            )));
        }
        if let Some(existing) = self.subscriptions.get(name) {
            if existing.topic == topic {
                return Ok(false);
            }
            return Err(DomainError::Conflict(format!(
                "subscription {name} is attached to topic {}, not {topic}",
                existing.topic
            )));
        }
        self.subscriptions.insert(
            name.to_string(),
            SubscriptionRecord {
                topic: topic.to_string(),
                queue: Arc::new(SubscriptionQueue::new(name, self.max_attempts)),
            },
        );
        self.topics
            .entry(topic.to_string())
            .or_default()
            .push(name.to_string());
        Ok(true)
    }

    pub fn subscription_topic(&self, name: &str) -> Option<String> {
        self.subscriptions.get(name).map(|r| r.topic.clone())
    }

    pub fn delete_subscription(&self, name: &str) -> bool {
        match self.subscriptions.remove(name) {
            Some((_, record)) => {
                if let Some(mut subs) = self.topics.get_mut(&record.topic) {
                    subs.retain(|s| s != name);
                }
                true
            }
            None => false,
        }
    }

    /// Messages parked after exhausting their attempt budget.
    pub fn dead_letter_count(&self, subscription: &str) -> usize {
        self.subscriptions
            .get(subscription)
            .map(|r| r.queue.dead_letter.lock().len())
            .unwrap_or(0)
    }

    pub fn backlog(&self, subscription: &str) -> usize {
        self.subscriptions
            .get(subscription)
            .map(|r| r.queue.queue.lock().len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl TopicPublisher for InMemoryPubSub {
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        attributes: HashMap<String, String>,
    ) -> Result<String> {
        let sub_names = self
            .topics
            .get(topic)
            .map(|subs| subs.clone())
            .ok_or_else(|| DomainError::NotFound(format!("topic {topic}")))?;

        let msg = TransportMessage {
            id: Uuid::new_v4().to_string(),
            payload,
            attributes,
            publish_time: Utc::now(),
            attempt: 1,
        };
        for name in &sub_names {
            if let Some(record) = self.subscriptions.get(name) {
                record.queue.push(msg.clone());
            }
        }
        Ok(msg.id)
    }
}

#[async_trait]
impl SubscriberPort for InMemoryPubSub {
    async fn consumer(&self, subscription: &str) -> Result<Box<dyn MessageSource>> {
        let queue = self
            .subscriptions
            .get(subscription)
            .map(|r| Arc::clone(&r.queue))
            .ok_or_else(|| DomainError::NotFound(format!("subscription {subscription}")))?;
        Ok(Box::new(InMemorySource {
            queue,
            closed: false,
        }))
    }
}

struct InMemorySource {
    queue: Arc<SubscriptionQueue>,
    closed: bool,
}

impl InMemorySource {
    fn deliver(&self, msg: TransportMessage) -> Delivery {
        let (token, settled) = AckToken::channel();
        let queue = Arc::clone(&self.queue);
        let pending = msg.clone();
        // Watch the settlement; a dropped token closes the channel and is
        // treated as nack.
        tokio::spawn(async move {
            let outcome = settled.await.unwrap_or(AckOutcome::Nack);
            if outcome == AckOutcome::Nack {
                queue.redeliver(pending);
            }
        });

        let message = Message {
            id: msg.id,
            payload: msg.payload,
            publish_time: msg.publish_time,
            attributes: msg.attributes,
            enrichment: BTreeMap::new(),
        };
        Delivery {
            message,
            ack: token,
        }
    }
}

#[async_trait]
impl MessageSource for InMemorySource {
    async fn pull(&mut self) -> Result<Option<Delivery>> {
        loop {
            if self.closed {
                return Ok(None);
            }
            if let Some(msg) = self.queue.pop() {
                return Ok(Some(self.deliver(msg)));
            }
            self.queue.notify.notified().await;
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn bus() -> InMemoryPubSub {
        let bus = InMemoryPubSub::with_max_attempts(2);
        bus.create_topic("readings");
        bus.create_subscription("readings-sub", "readings").unwrap();
        bus
    }

    #[tokio::test]
    async fn published_message_is_delivered_with_attributes() {
        let bus = bus();
        bus.publish(
            "readings",
            b"payload".to_vec(),
            HashMap::from([("uid".to_string(), "dev-1".to_string())]),
        )
        .await
        .unwrap();

        let mut source = bus.consumer("readings-sub").await.unwrap();
        let delivery = source.pull().await.unwrap().unwrap();
        assert_eq!(delivery.message.payload, b"payload");
        assert_eq!(delivery.message.attribute("uid"), Some("dev-1"));
        delivery.ack.ack();
    }

    #[tokio::test]
    async fn nacked_message_is_redelivered() {
        let bus = bus();
        bus.publish("readings", b"flaky".to_vec(), HashMap::new())
            .await
            .unwrap();

        let mut source = bus.consumer("readings-sub").await.unwrap();
        let first = source.pull().await.unwrap().unwrap();
        let first_id = first.message.id.clone();
        first.ack.nack();

        let second = source.pull().await.unwrap().unwrap();
        assert_eq!(second.message.id, first_id);
        second.ack.ack();
    }

    #[tokio::test]
    async fn attempt_budget_parks_on_dead_letter() {
        let bus = bus();
        bus.publish("readings", b"poison".to_vec(), HashMap::new())
            .await
            .unwrap();

        let mut source = bus.consumer("readings-sub").await.unwrap();
        for _ in 0..2 {
            let delivery = source.pull().await.unwrap().unwrap();
            delivery.ack.nack();
            // Let the settlement watcher run.
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(bus.dead_letter_count("readings-sub"), 1);
        assert_eq!(bus.backlog("readings-sub"), 0);
    }

    #[tokio::test]
    async fn closed_source_stops_yielding() {
        let bus = bus();
        let mut source = bus.consumer("readings-sub").await.unwrap();
        source.close().await.unwrap();
        assert!(source.pull().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn subscription_requires_topic() {
        let bus = InMemoryPubSub::new();
        let err = bus.create_subscription("orphan-sub", "missing").unwrap_err();
        assert!(matches!(err, DomainError::Precondition(_)));
    }

    #[tokio::test]
    async fn conflicting_subscription_topic_is_rejected() {
        let bus = bus();
        bus.create_topic("other");
        let err = bus.create_subscription("readings-sub", "other").unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
        // Identical re-creation is idempotent.
        assert!(!bus.create_subscription("readings-sub", "readings").unwrap());
    }
}
