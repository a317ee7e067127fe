//! Message bus abstraction for the work queue and completion notices.
//!
//! # Key Principles
//!
//! - **Store first**: a request is committed before its id is published
//! - **At-least-once delivery**: a message may be delivered more than once
//! - **Explicit settlement**: every [`Delivery`] is acked or nacked; the
//!   broker position only moves forward on ack
//! - **Idempotency**: consumers must tolerate duplicates
//!
//! # Implementations
//!
//! - `InMemoryMessageBus` in `conversion-report-testing`: for tests
//! - `RedpandaMessageBus` in `conversion-report-redpanda`: Kafka-compatible
//!
//! # Example
//!
//! ```rust,ignore
//! use futures::StreamExt;
//!
//! bus.publish("report.requests", "Report ID: 6f1c2a9e-...").await?;
//!
//! let mut stream = bus.subscribe(&["report.requests"]).await?;
//! while let Some(delivery) = stream.next().await {
//!     let delivery = delivery?;
//!     handle(delivery.payload()).await;
//!     delivery.ack().await?;
//! }
//! ```

use futures::Stream;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during message bus operations.
#[derive(Error, Debug, Clone)]
pub enum QueueError {
    /// Failed to connect to the broker
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish a message to a topic
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to subscribe to topics
    #[error("Subscription failed for topics {topics:?}: {reason}")]
    SubscriptionFailed {
        /// The topics that failed to subscribe
        topics: Vec<String>,
        /// The reason for failure
        reason: String,
    },

    /// Failed to commit or rewind the consumer position
    #[error("Settlement failed: {0}")]
    SettlementFailed(String),

    /// Payload was not valid UTF-8
    #[error("Invalid payload on topic '{topic}': {reason}")]
    InvalidPayload {
        /// Topic the payload came from
        topic: String,
        /// Why it was rejected
        reason: String,
    },

    /// Network or transport error
    #[error("Transport error: {0}")]
    TransportError(String),
}

/// How a consumer finished with a delivery.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Settlement {
    /// Processed (or deliberately skipped); advance past it.
    Ack,
    /// Not processed; redeliver later.
    Nack,
}

/// Backend hook that applies a [`Settlement`] to one delivery.
pub trait Acknowledger: Send {
    /// Apply the settlement.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::SettlementFailed`] if the broker rejects it.
    fn settle(
        self: Box<Self>,
        settlement: Settlement,
    ) -> Pin<Box<dyn Future<Output = Result<(), QueueError>> + Send>>;
}

/// One message handed to a consumer, with its settlement handle.
pub struct Delivery {
    topic: String,
    payload: String,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    /// Wrap a received message.
    #[must_use]
    pub fn new(
        topic: impl Into<String>,
        payload: impl Into<String>,
        acker: Box<dyn Acknowledger>,
    ) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            acker,
        }
    }

    /// Topic the message arrived on.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Message body.
    #[must_use]
    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Settle the delivery either way.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::SettlementFailed`] if the broker rejects it.
    pub async fn settle(self, settlement: Settlement) -> Result<(), QueueError> {
        self.acker.settle(settlement).await
    }

    /// Mark as processed.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::SettlementFailed`] if the broker rejects it.
    pub async fn ack(self) -> Result<(), QueueError> {
        self.settle(Settlement::Ack).await
    }

    /// Ask for redelivery.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::SettlementFailed`] if the broker rejects it.
    pub async fn nack(self) -> Result<(), QueueError> {
        self.settle(Settlement::Nack).await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("topic", &self.topic)
            .field("payload", &self.payload)
            .finish_non_exhaustive()
    }
}

/// Stream of deliveries from a subscription.
pub type MessageStream = Pin<Box<dyn Stream<Item = Result<Delivery, QueueError>> + Send>>;

/// Publishing half of the message bus.
pub trait Publisher: Send + Sync {
    /// Publish a text message to a topic.
    ///
    /// Returns once the broker has accepted the message.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::PublishFailed`] if the broker rejects or times out.
    fn publish(
        &self,
        topic: &str,
        payload: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), QueueError>> + Send + '_>>;
}

/// Consuming half of the message bus.
pub trait Subscriber: Send + Sync {
    /// Subscribe to one or more topics.
    ///
    /// Every call joins the same consumer group, so concurrent subscriptions
    /// share the topic's partitions.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::SubscriptionFailed`] if the subscription cannot
    /// be established.
    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<MessageStream, QueueError>> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct Recording(Arc<Mutex<Vec<Settlement>>>);

    impl Acknowledger for Recording {
        fn settle(
            self: Box<Self>,
            settlement: Settlement,
        ) -> Pin<Box<dyn Future<Output = Result<(), QueueError>> + Send>> {
            if let Ok(mut log) = self.0.lock() {
                log.push(settlement);
            }
            Box::pin(async { Ok(()) })
        }
    }

    #[tokio::test]
    #[allow(clippy::expect_used)]
    async fn ack_and_nack_reach_the_backend() {
        let log = Arc::new(Mutex::new(Vec::new()));

        let first = Delivery::new("t", "one", Box::new(Recording(Arc::clone(&log))));
        assert_eq!(first.topic(), "t");
        assert_eq!(first.payload(), "one");
        first.ack().await.expect("ack");

        let second = Delivery::new("t", "two", Box::new(Recording(Arc::clone(&log))));
        second.nack().await.expect("nack");

        let log = log.lock().expect("lock");
        assert_eq!(*log, vec![Settlement::Ack, Settlement::Nack]);
    }

    #[test]
    fn debug_omits_the_acknowledger() {
        let delivery = Delivery::new(
            "t",
            "payload",
            Box::new(Recording(Arc::new(Mutex::new(Vec::new())))),
        );
        let debug = format!("{delivery:?}");
        assert!(debug.contains("payload"));
        assert!(debug.ends_with(".. }"));
    }
}
