//! Messaging ports: publish, pull-consume, acknowledge
//!
//! The transport carries opaque payload bytes plus string attributes;
//! structured records (`MessageData`) are a payload convention of the
//! publish sinks, not of the transport. Delivery is at-least-once: every
//! delivery must be settled exactly once, by exactly one of ack or nack.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::oneshot;

use stratoflow_core::error::Result;
use stratoflow_core::message::Message;

/// Publishes payloads to a named topic. Returns the transport message id.
#[async_trait]
pub trait TopicPublisher: Send + Sync {
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        attributes: HashMap<String, String>,
    ) -> Result<String>;
}

/// Opens pull consumers on named subscriptions.
#[async_trait]
pub trait SubscriberPort: Send + Sync {
    async fn consumer(&self, subscription: &str) -> Result<Box<dyn MessageSource>>;
}

/// A pull consumer bound to one subscription.
#[async_trait]
pub trait MessageSource: Send {
    /// Wait for the next delivery. `None` means the source is closed and
    /// will never yield again.
    async fn pull(&mut self) -> Result<Option<Delivery>>;

    /// Stop intake. In-flight deliveries stay settleable.
    async fn close(&mut self) -> Result<()>;
}

/// One at-least-once delivery: the message plus its settlement token.
pub struct Delivery {
    pub message: Message,
    pub ack: AckToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    Ack,
    Nack,
}

/// Single-use settlement handle.
///
/// Consuming `self` makes "exactly one of ack/nack, exactly once" a type
/// system guarantee. Dropping the token unsettled counts as a nack on the
/// transport side (redelivery).
#[derive(Debug)]
pub struct AckToken {
    tx: oneshot::Sender<AckOutcome>,
}

impl AckToken {
    /// A token and the receiver the transport watches for the settlement.
    /// A dropped token closes the channel, which the transport reads as nack.
    pub fn channel() -> (Self, oneshot::Receiver<AckOutcome>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    pub fn ack(self) {
        let _ = self.tx.send(AckOutcome::Ack);
    }

    pub fn nack(self) {
        let _ = self.tx.send(AckOutcome::Nack);
    }

    pub fn settle(self, outcome: AckOutcome) {
        let _ = self.tx.send(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn token_settles_exactly_once() {
        let (token, rx) = AckToken::channel();
        token.ack();
        assert_eq!(rx.await.unwrap(), AckOutcome::Ack);
    }

    #[tokio::test]
    async fn dropped_token_reads_as_nack() {
        let (token, rx) = AckToken::channel();
        drop(token);
        // Channel closed without a value: the transport treats it as nack.
        assert!(rx.await.is_err());
    }
}
