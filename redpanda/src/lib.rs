//! Redpanda work queue for the conversion report pipeline.
//!
//! This crate provides [`RedpandaMessageBus`], which implements the
//! [`Publisher`] and [`Subscriber`] traits from `conversion-report-core` over
//! rdkafka. Any Kafka-compatible broker works (Redpanda, Apache Kafka, MSK).
//!
//! # Delivery Semantics
//!
//! **At-least-once delivery** with manual offset commits:
//! - A subscription hands out one [`Delivery`] at a time and waits for it to
//!   be settled before reading the next message
//! - [`Settlement::Ack`] commits the offset
//! - [`Settlement::Nack`] waits `nack_delay` and rewinds the partition to
//!   the same offset, so the message is delivered again
//! - A delivery dropped without settlement counts as a nack
//! - If the process crashes before commit, the message is redelivered
//!
//! Consumers must therefore be idempotent.
//!
//! # Example
//!
//! ```no_run
//! use conversion_report_core::queue::{Publisher, Subscriber};
//! use conversion_report_redpanda::RedpandaMessageBus;
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = RedpandaMessageBus::builder()
//!     .brokers("localhost:9092")
//!     .consumer_group("report-group")
//!     .build()?;
//!
//! bus.publish("report.requests", "Report ID: 0f8fad5b-d9cb-469f-a165-70867728950e").await?;
//!
//! let mut stream = bus.subscribe(&["report.requests"]).await?;
//! while let Some(delivery) = stream.next().await {
//!     let delivery = delivery?;
//!     println!("Received: {}", delivery.payload());
//!     delivery.ack().await?;
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use conversion_report_core::queue::{
    Acknowledger, Delivery, MessageStream, Publisher, QueueError, Settlement, Subscriber,
};
use rdkafka::Offset;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_NACK_DELAY: Duration = Duration::from_secs(1);

/// Kafka-compatible work queue.
///
/// One producer is shared by every publish call. Each call to
/// [`Subscriber::subscribe`] creates its own consumer in the configured
/// group, so running several subscriptions spreads the topic's partitions
/// across them.
///
/// # Example
///
/// ```no_run
/// use conversion_report_redpanda::RedpandaMessageBus;
/// use std::time::Duration;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = RedpandaMessageBus::builder()
///     .brokers("localhost:9092,localhost:9093")
///     .producer_acks("all")
///     .consumer_group("report-group")
///     .nack_delay(Duration::from_millis(500))
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct RedpandaMessageBus {
    producer: FutureProducer,
    brokers: String,
    timeout: Duration,
    consumer_group: Option<String>,
    auto_offset_reset: String,
    nack_delay: Duration,
}

impl RedpandaMessageBus {
    /// Create a bus with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::ConnectionFailed`] if the producer cannot be created.
    pub fn new(brokers: &str) -> Result<Self, QueueError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a new builder.
    #[must_use]
    pub fn builder() -> RedpandaMessageBusBuilder {
        RedpandaMessageBusBuilder::default()
    }

    /// Get a reference to the brokers string.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }

    fn group_for(&self, topics: &[String]) -> String {
        self.consumer_group
            .clone()
            .unwrap_or_else(|| default_group(topics))
    }
}

/// Builder for configuring a [`RedpandaMessageBus`].
#[derive(Default)]
pub struct RedpandaMessageBusBuilder {
    brokers: Option<String>,
    producer_acks: Option<String>,
    timeout: Option<Duration>,
    consumer_group: Option<String>,
    auto_offset_reset: Option<String>,
    nack_delay: Option<Duration>,
}

impl RedpandaMessageBusBuilder {
    /// Set the broker addresses (comma-separated).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the producer acknowledgment mode: `"0"`, `"1"` or `"all"`.
    ///
    /// Default: `"all"`
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Set the producer send timeout.
    ///
    /// Default: 5 seconds
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the consumer group every subscription joins.
    ///
    /// If not set, a group name is derived from the subscribed topics.
    #[must_use]
    pub fn consumer_group(mut self, consumer_group: impl Into<String>) -> Self {
        self.consumer_group = Some(consumer_group.into());
        self
    }

    /// Set where a new consumer group starts reading.
    ///
    /// Default: `"earliest"`, so requests published before the first worker
    /// starts are not skipped.
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Set how long a nacked message waits before it is delivered again.
    ///
    /// Default: 1 second
    #[must_use]
    pub const fn nack_delay(mut self, delay: Duration) -> Self {
        self.nack_delay = Some(delay);
        self
    }

    /// Build the [`RedpandaMessageBus`].
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::ConnectionFailed`] if brokers are not set or
    /// the producer cannot be created.
    pub fn build(self) -> Result<RedpandaMessageBus, QueueError> {
        let brokers = self
            .brokers
            .filter(|b| !b.trim().is_empty())
            .ok_or_else(|| QueueError::ConnectionFailed("Brokers not configured".to_string()))?;
        let acks = self.producer_acks.unwrap_or_else(|| "all".to_string());
        let timeout = self.timeout.unwrap_or(DEFAULT_TIMEOUT);

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", timeout.as_millis().to_string())
            .set("acks", &acks)
            .create()
            .map_err(|e| QueueError::ConnectionFailed(format!("Failed to create producer: {e}")))?;

        let auto_offset_reset = self
            .auto_offset_reset
            .unwrap_or_else(|| "earliest".to_string());
        let nack_delay = self.nack_delay.unwrap_or(DEFAULT_NACK_DELAY);

        tracing::info!(
            brokers = %brokers,
            acks = %acks,
            consumer_group = ?self.consumer_group,
            auto_offset_reset = %auto_offset_reset,
            nack_delay_ms = nack_delay.as_millis(),
            "RedpandaMessageBus created"
        );

        Ok(RedpandaMessageBus {
            producer,
            brokers,
            timeout,
            consumer_group: self.consumer_group,
            auto_offset_reset,
            nack_delay,
        })
    }
}

impl Publisher for RedpandaMessageBus {
    fn publish(
        &self,
        topic: &str,
        payload: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), QueueError>> + Send + '_>> {
        let topic = topic.to_string();
        let payload = payload.to_string();

        Box::pin(async move {
            // Keyed by payload: redeliveries of one report land on one partition.
            let record = FutureRecord::to(&topic).payload(&payload).key(&payload);

            match self.producer.send(record, Timeout::After(self.timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic = %topic,
                        partition,
                        offset,
                        "Message published"
                    );
                    Ok(())
                }
                Err((kafka_error, _)) => {
                    tracing::error!(topic = %topic, error = %kafka_error, "Failed to publish message");
                    Err(QueueError::PublishFailed {
                        topic,
                        reason: kafka_error.to_string(),
                    })
                }
            }
        })
    }
}

impl Subscriber for RedpandaMessageBus {
    #[allow(clippy::too_many_lines)] // One task owns the consumer for the subscription's lifetime
    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<MessageStream, QueueError>> + Send + '_>> {
        let topics: Vec<String> = topics.iter().map(|s| (*s).to_string()).collect();

        Box::pin(async move {
            let group = self.group_for(&topics);
            let subscription_failed = |reason: String| QueueError::SubscriptionFailed {
                topics: topics.clone(),
                reason,
            };

            let consumer: StreamConsumer = ClientConfig::new()
                .set("bootstrap.servers", &self.brokers)
                .set("group.id", &group)
                .set("enable.auto.commit", "false")
                .set("auto.offset.reset", &self.auto_offset_reset)
                .set("session.timeout.ms", "6000")
                .set("enable.partition.eof", "false")
                .create()
                .map_err(|e| subscription_failed(format!("Failed to create consumer: {e}")))?;

            let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
            consumer
                .subscribe(&topic_refs)
                .map_err(|e| subscription_failed(format!("Failed to subscribe to topics: {e}")))?;

            tracing::info!(
                topics = ?topics,
                consumer_group = %group,
                manual_commit = true,
                "Subscribed to topics"
            );

            let (tx, rx) = mpsc::channel(1);
            let nack_delay = self.nack_delay;

            tokio::spawn(async move {
                use futures::StreamExt;

                let mut stream = consumer.stream();

                while let Some(next) = stream.next().await {
                    let message = match next {
                        Ok(message) => message,
                        Err(e) => {
                            let err = QueueError::TransportError(format!(
                                "Failed to receive message: {e}"
                            ));
                            if tx.send(Err(err)).await.is_err() {
                                break;
                            }
                            continue;
                        }
                    };

                    let topic = message.topic().to_string();
                    let partition = message.partition();
                    let offset = message.offset();

                    let payload = match message.payload_view::<str>() {
                        Some(Ok(text)) => text.to_string(),
                        Some(Err(e)) => {
                            skip_unreadable(&consumer, &message, format!("not UTF-8: {e}"));
                            let err = QueueError::InvalidPayload {
                                topic,
                                reason: e.to_string(),
                            };
                            if tx.send(Err(err)).await.is_err() {
                                break;
                            }
                            continue;
                        }
                        None => {
                            skip_unreadable(&consumer, &message, "no payload".to_string());
                            continue;
                        }
                    };

                    let (settle_tx, settle_rx) = oneshot::channel();
                    let delivery = Delivery::new(
                        topic.clone(),
                        payload,
                        Box::new(KafkaAcknowledger { settle: settle_tx }),
                    );
                    if tx.send(Ok(delivery)).await.is_err() {
                        tracing::debug!("Subscription dropped, exiting consumer task");
                        break;
                    }

                    // An abandoned delivery is redelivered.
                    let settlement = settle_rx.await.unwrap_or(Settlement::Nack);

                    match settlement {
                        Settlement::Ack => {
                            if let Err(e) = consumer.commit_message(&message, CommitMode::Async) {
                                tracing::warn!(
                                    topic = %topic,
                                    partition,
                                    offset,
                                    error = %e,
                                    "Failed to commit offset (message may be redelivered)"
                                );
                            }
                        }
                        Settlement::Nack => {
                            tracing::debug!(
                                topic = %topic,
                                partition,
                                offset,
                                delay_ms = nack_delay.as_millis(),
                                "Message nacked, rewinding"
                            );
                            tokio::time::sleep(nack_delay).await;
                            if let Err(e) = consumer.seek(
                                &topic,
                                partition,
                                Offset::Offset(offset),
                                Timeout::After(DEFAULT_TIMEOUT),
                            ) {
                                tracing::error!(
                                    topic = %topic,
                                    partition,
                                    offset,
                                    error = %e,
                                    "Failed to rewind after nack"
                                );
                            }
                        }
                    }
                }

                tracing::debug!("Consumer task exiting");
            });

            let stream = async_stream::stream! {
                let mut rx = rx;
                while let Some(result) = rx.recv().await {
                    yield result;
                }
            };

            Ok(Box::pin(stream) as MessageStream)
        })
    }
}

/// Commit past a message that can never be handed to a consumer.
fn skip_unreadable(
    consumer: &StreamConsumer,
    message: &rdkafka::message::BorrowedMessage<'_>,
    reason: String,
) {
    tracing::warn!(
        topic = message.topic(),
        partition = message.partition(),
        offset = message.offset(),
        reason = %reason,
        "Skipping unreadable message"
    );
    if let Err(e) = consumer.commit_message(message, CommitMode::Async) {
        tracing::warn!(error = %e, "Failed to commit unreadable message");
    }
}

/// Settles a delivery by signalling the consumer task that owns the message.
struct KafkaAcknowledger {
    settle: oneshot::Sender<Settlement>,
}

impl Acknowledger for KafkaAcknowledger {
    fn settle(
        self: Box<Self>,
        settlement: Settlement,
    ) -> Pin<Box<dyn Future<Output = Result<(), QueueError>> + Send>> {
        let sent = self.settle.send(settlement).map_err(|_| {
            QueueError::SettlementFailed("Consumer task stopped before settlement".to_string())
        });
        Box::pin(async move { sent })
    }
}

fn default_group(topics: &[String]) -> String {
    let mut sorted = topics.to_vec();
    sorted.sort();
    format!("conversion-report-{}", sorted.join("-"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn redpanda_message_bus_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<RedpandaMessageBus>();
        assert_sync::<RedpandaMessageBus>();
    }

    #[test]
    fn build_requires_brokers() {
        let err = RedpandaMessageBus::builder().build().err().expect("no brokers");
        assert!(matches!(err, QueueError::ConnectionFailed(_)));

        let err = RedpandaMessageBus::builder().brokers("  ").build().err().expect("blank");
        assert!(matches!(err, QueueError::ConnectionFailed(_)));
    }

    #[test]
    fn explicit_group_wins_over_derived() {
        let bus = RedpandaMessageBus::builder()
            .brokers("localhost:9092")
            .consumer_group("report-group")
            .build()
            .expect("producer");
        assert_eq!(bus.group_for(&["report.requests".to_string()]), "report-group");
    }

    #[test]
    fn derived_group_is_order_independent() {
        let a = default_group(&["b".to_string(), "a".to_string()]);
        let b = default_group(&["a".to_string(), "b".to_string()]);
        assert_eq!(a, b);
        assert_eq!(a, "conversion-report-a-b");
    }

    #[tokio::test]
    async fn acknowledger_forwards_settlement() {
        let (tx, rx) = oneshot::channel();
        let delivery = Delivery::new(
            "report.requests",
            "payload",
            Box::new(KafkaAcknowledger { settle: tx }),
        );

        delivery.nack().await.expect("settle");
        assert_eq!(rx.await.expect("settlement"), Settlement::Nack);
    }

    #[tokio::test]
    async fn settling_after_consumer_stopped_fails() {
        let (tx, rx) = oneshot::channel();
        drop(rx);
        let delivery = Delivery::new("t", "p", Box::new(KafkaAcknowledger { settle: tx }));

        assert!(matches!(
            delivery.ack().await,
            Err(QueueError::SettlementFailed(_))
        ));
    }
}
