//! Message bus consumer with automatic resubscription and explicit settlement.
//!
//! [`QueueConsumer`] owns the subscribe-process-resubscribe loop. For each
//! delivery it asks a [`MessageHandler`] for a [`Settlement`] and applies it,
//! so a delivery is only acknowledged after the handler has finished.
//!
//! ```text
//! loop {
//!     subscribe (retry after delay on failure)
//!     for delivery in stream {
//!         settlement = handler.handle(payload)
//!         delivery.settle(settlement)
//!         stop if shutdown was signalled
//!     }
//!     stream ended: wait, resubscribe
//! }
//! ```
//!
//! Shutdown is only observed between deliveries; a delivery being handled
//! when the signal arrives is finished and settled first.

use conversion_report_core::queue::{MessageStream, Settlement, Subscriber};
use futures::StreamExt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Processes one message payload and decides how to settle it.
pub trait MessageHandler: Send + Sync {
    /// Handle the payload.
    ///
    /// Never fails: failures are expressed as [`Settlement::Nack`].
    fn handle<'a>(&'a self, payload: &'a str) -> Pin<Box<dyn Future<Output = Settlement> + Send + 'a>>;
}

/// Missing configuration when building a consumer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsumerError {
    /// A required builder field was not set.
    #[error("Consumer builder is missing '{0}'")]
    Missing(&'static str),
}

/// Long-running consumer task for one subscription.
pub struct QueueConsumer {
    name: String,
    topics: Vec<String>,
    subscriber: Arc<dyn Subscriber>,
    handler: Arc<dyn MessageHandler>,
    shutdown: broadcast::Receiver<()>,
    retry_delay: Duration,
}

impl QueueConsumer {
    /// Create a builder for configuring a consumer.
    #[must_use]
    pub fn builder() -> QueueConsumerBuilder {
        QueueConsumerBuilder::default()
    }

    /// Consumer name used in logs.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Spawn the consumer as a background task.
    ///
    /// The task runs until the shutdown signal is received.
    #[must_use]
    pub fn spawn(mut self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    /// Run the consumer on the current task until shutdown.
    pub async fn run(&mut self) {
        info!(consumer = %self.name, topics = ?self.topics, "Consumer started");

        loop {
            let topics: Vec<&str> = self.topics.iter().map(String::as_str).collect();

            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(consumer = %self.name, "Consumer received shutdown signal");
                    break;
                }
                subscribed = self.subscriber.subscribe(&topics) => {
                    match subscribed {
                        Ok(stream) => {
                            info!(consumer = %self.name, "Subscribed");
                            if self.process_stream(stream).await == StreamEnd::Shutdown {
                                break;
                            }
                            warn!(
                                consumer = %self.name,
                                retry_delay_ms = u64::try_from(self.retry_delay.as_millis()).unwrap_or(u64::MAX),
                                "Message stream ended, resubscribing"
                            );
                        }
                        Err(e) => {
                            error!(
                                consumer = %self.name,
                                error = %e,
                                retry_delay_ms = u64::try_from(self.retry_delay.as_millis()).unwrap_or(u64::MAX),
                                "Failed to subscribe, retrying"
                            );
                        }
                    }
                    if self.sleep_or_shutdown(self.retry_delay).await {
                        break;
                    }
                }
            }
        }

        info!(consumer = %self.name, "Consumer stopped");
    }

    async fn sleep_or_shutdown(&mut self, delay: Duration) -> bool {
        tokio::select! {
            _ = self.shutdown.recv() => true,
            () = tokio::time::sleep(delay) => false,
        }
    }

    async fn process_stream(&mut self, mut stream: MessageStream) -> StreamEnd {
        loop {
            let next = tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(consumer = %self.name, "Consumer received shutdown signal while idle");
                    return StreamEnd::Shutdown;
                }
                next = stream.next() => next,
            };

            match next {
                Some(Ok(delivery)) => {
                    let settlement = self.handler.handle(delivery.payload()).await;
                    debug!(
                        consumer = %self.name,
                        topic = delivery.topic(),
                        ?settlement,
                        "Settling delivery"
                    );
                    if let Err(e) = delivery.settle(settlement).await {
                        error!(consumer = %self.name, error = %e, "Failed to settle delivery");
                    }
                }
                Some(Err(e)) => {
                    error!(consumer = %self.name, error = %e, "Error receiving from stream");
                }
                None => return StreamEnd::Closed,
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum StreamEnd {
    Closed,
    Shutdown,
}

/// Builder for [`QueueConsumer`].
#[derive(Default)]
pub struct QueueConsumerBuilder {
    name: Option<String>,
    topics: Vec<String>,
    subscriber: Option<Arc<dyn Subscriber>>,
    handler: Option<Arc<dyn MessageHandler>>,
    shutdown: Option<broadcast::Receiver<()>>,
    retry_delay: Option<Duration>,
}

impl QueueConsumerBuilder {
    /// Set consumer name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Add a topic to subscribe to.
    #[must_use]
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topics.push(topic.into());
        self
    }

    /// Set the message bus to consume from.
    #[must_use]
    pub fn subscriber(mut self, subscriber: Arc<dyn Subscriber>) -> Self {
        self.subscriber = Some(subscriber);
        self
    }

    /// Set the handler for each payload.
    #[must_use]
    pub fn handler(mut self, handler: Arc<dyn MessageHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Set shutdown signal receiver.
    #[must_use]
    pub fn shutdown(mut self, shutdown: broadcast::Receiver<()>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Set delay before resubscribing (default: 5 seconds).
    #[must_use]
    pub const fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    /// Build one consumer.
    ///
    /// # Errors
    ///
    /// [`ConsumerError::Missing`] if name, topic, subscriber, handler or
    /// shutdown is not set.
    pub fn build(self) -> Result<QueueConsumer, ConsumerError> {
        let shutdown = self.shutdown.ok_or(ConsumerError::Missing("shutdown"))?;
        let (name, topics, subscriber, handler, retry_delay) = Self::parts(
            self.name,
            self.topics,
            self.subscriber,
            self.handler,
            self.retry_delay,
        )?;
        Ok(QueueConsumer {
            name,
            topics,
            subscriber,
            handler,
            shutdown,
            retry_delay,
        })
    }

    /// Build `size` consumers sharing subscriber and handler, each with its
    /// own shutdown receiver and a numbered name.
    ///
    /// Consumers of one pool join the same consumer group, so the broker
    /// spreads partitions across them.
    ///
    /// # Errors
    ///
    /// [`ConsumerError::Missing`] if name, topic, subscriber or handler is not set.
    pub fn build_pool(
        self,
        size: usize,
        shutdown: &broadcast::Sender<()>,
    ) -> Result<Vec<QueueConsumer>, ConsumerError> {
        let (name, topics, subscriber, handler, retry_delay) = Self::parts(
            self.name,
            self.topics,
            self.subscriber,
            self.handler,
            self.retry_delay,
        )?;
        Ok((0..size.max(1))
            .map(|i| QueueConsumer {
                name: format!("{name}-{i}"),
                topics: topics.clone(),
                subscriber: Arc::clone(&subscriber),
                handler: Arc::clone(&handler),
                shutdown: shutdown.subscribe(),
                retry_delay,
            })
            .collect())
    }

    #[allow(clippy::type_complexity)]
    fn parts(
        name: Option<String>,
        topics: Vec<String>,
        subscriber: Option<Arc<dyn Subscriber>>,
        handler: Option<Arc<dyn MessageHandler>>,
        retry_delay: Option<Duration>,
    ) -> Result<
        (
            String,
            Vec<String>,
            Arc<dyn Subscriber>,
            Arc<dyn MessageHandler>,
            Duration,
        ),
        ConsumerError,
    > {
        let name = name.ok_or(ConsumerError::Missing("name"))?;
        if topics.is_empty() {
            return Err(ConsumerError::Missing("topic"));
        }
        let subscriber = subscriber.ok_or(ConsumerError::Missing("subscriber"))?;
        let handler = handler.ok_or(ConsumerError::Missing("handler"))?;
        Ok((
            name,
            topics,
            subscriber,
            handler,
            retry_delay.unwrap_or(Duration::from_secs(5)),
        ))
    }
}
