//! In-memory message bus with ack/nack semantics.
//!
//! Each topic is a single FIFO shared by every subscriber, which mirrors one
//! consumer group reading a topic. A nacked delivery goes back to the tail of
//! its topic; an acked one is gone.

use conversion_report_core::queue::{
    Acknowledger, Delivery, MessageStream, Publisher, QueueError, Settlement, Subscriber,
};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Topic {
    queue: VecDeque<String>,
    notify: Arc<Notify>,
}

#[derive(Debug, Default)]
struct Log {
    published: Vec<(String, String)>,
    acked: Vec<(String, String)>,
    nacked: Vec<(String, String)>,
}

#[derive(Debug, Default)]
struct Inner {
    topics: Mutex<HashMap<String, Topic>>,
    log: Mutex<Log>,
    fail_publish: AtomicBool,
}

impl Inner {
    fn topics(&self) -> Result<MutexGuard<'_, HashMap<String, Topic>>, QueueError> {
        self.topics
            .lock()
            .map_err(|_| QueueError::TransportError("topic lock poisoned".to_string()))
    }

    fn log(&self) -> Result<MutexGuard<'_, Log>, QueueError> {
        self.log
            .lock()
            .map_err(|_| QueueError::TransportError("log lock poisoned".to_string()))
    }

    fn enqueue(&self, topic: &str, payload: String) -> Result<(), QueueError> {
        let mut topics = self.topics()?;
        let entry = topics.entry(topic.to_string()).or_default();
        entry.queue.push_back(payload);
        entry.notify.notify_one();
        Ok(())
    }

    fn pop(&self, topic: &str) -> Result<Option<String>, QueueError> {
        Ok(self
            .topics()?
            .get_mut(topic)
            .and_then(|t| t.queue.pop_front()))
    }

    fn notifier(&self, topic: &str) -> Result<Arc<Notify>, QueueError> {
        let mut topics = self.topics()?;
        Ok(Arc::clone(&topics.entry(topic.to_string()).or_default().notify))
    }
}

struct MemoryAcker {
    inner: Arc<Inner>,
    topic: String,
    payload: String,
}

impl Acknowledger for MemoryAcker {
    fn settle(
        self: Box<Self>,
        settlement: Settlement,
    ) -> Pin<Box<dyn Future<Output = Result<(), QueueError>> + Send>> {
        let outcome = (|| -> Result<(), QueueError> {
            let entry = (self.topic.clone(), self.payload.clone());
            match settlement {
                Settlement::Ack => self.inner.log()?.acked.push(entry),
                Settlement::Nack => {
                    self.inner.log()?.nacked.push(entry);
                    self.inner.enqueue(&self.topic, self.payload.clone())?;
                }
            }
            Ok(())
        })();
        Box::pin(async move { outcome })
    }
}

/// Message bus for tests: publishes are queued in memory and can be
/// consumed either as a [`Subscriber`] stream or one at a time with
/// [`InMemoryMessageBus::try_next`].
///
/// Clones share the same topics.
///
/// # Example
///
/// ```
/// use conversion_report_testing::InMemoryMessageBus;
/// use conversion_report_core::queue::Publisher;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = InMemoryMessageBus::new();
/// bus.publish("work", "hello").await?;
///
/// let delivery = bus.try_next("work").expect("queued");
/// assert_eq!(delivery.payload(), "hello");
/// delivery.ack().await?;
/// assert_eq!(bus.pending("work"), 0);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryMessageBus {
    inner: Arc<Inner>,
}

impl InMemoryMessageBus {
    /// Create a bus with no topics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the next queued message on `topic` without waiting.
    #[must_use]
    pub fn try_next(&self, topic: &str) -> Option<Delivery> {
        let payload = self.inner.pop(topic).ok().flatten()?;
        Some(self.delivery(topic, payload))
    }

    /// Messages queued on `topic` and not yet handed out.
    #[must_use]
    pub fn pending(&self, topic: &str) -> usize {
        self.inner
            .topics()
            .map_or(0, |topics| topics.get(topic).map_or(0, |t| t.queue.len()))
    }

    /// Every payload ever published to `topic`, in order.
    #[must_use]
    pub fn published(&self, topic: &str) -> Vec<String> {
        self.filter_log(topic, |log| &log.published)
    }

    /// Payloads acked on `topic`, in order.
    #[must_use]
    pub fn acked(&self, topic: &str) -> Vec<String> {
        self.filter_log(topic, |log| &log.acked)
    }

    /// Payloads nacked on `topic`, in order.
    #[must_use]
    pub fn nacked(&self, topic: &str) -> Vec<String> {
        self.filter_log(topic, |log| &log.nacked)
    }

    /// Make every publish fail with [`QueueError::PublishFailed`].
    pub fn set_fail_publish(&self, fail: bool) {
        self.inner.fail_publish.store(fail, Ordering::SeqCst);
    }

    fn filter_log(&self, topic: &str, pick: impl Fn(&Log) -> &Vec<(String, String)>) -> Vec<String> {
        self.inner.log().map_or_else(
            |_| Vec::new(),
            |log| {
                pick(&*log)
                    .iter()
                    .filter(|(t, _)| t == topic)
                    .map(|(_, p)| p.clone())
                    .collect()
            },
        )
    }

    fn delivery(&self, topic: &str, payload: String) -> Delivery {
        let acker = MemoryAcker {
            inner: Arc::clone(&self.inner),
            topic: topic.to_string(),
            payload: payload.clone(),
        };
        Delivery::new(topic, payload, Box::new(acker))
    }
}

impl Publisher for InMemoryMessageBus {
    fn publish(
        &self,
        topic: &str,
        payload: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), QueueError>> + Send + '_>> {
        let topic = topic.to_string();
        let payload = payload.to_string();
        Box::pin(async move {
            if self.inner.fail_publish.load(Ordering::SeqCst) {
                return Err(QueueError::PublishFailed {
                    topic,
                    reason: "broker unavailable".to_string(),
                });
            }
            self.inner
                .log()?
                .published
                .push((topic.clone(), payload.clone()));
            self.inner.enqueue(&topic, payload)
        })
    }
}

impl Subscriber for InMemoryMessageBus {
    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<MessageStream, QueueError>> + Send + '_>> {
        let topics: Vec<String> = topics.iter().map(|t| (*t).to_string()).collect();
        let bus = self.clone();
        Box::pin(async move {
            if topics.is_empty() {
                return Err(QueueError::SubscriptionFailed {
                    topics,
                    reason: "no topics given".to_string(),
                });
            }
            let notifiers = topics
                .iter()
                .map(|t| bus.inner.notifier(t))
                .collect::<Result<Vec<_>, _>>()?;

            let stream = async_stream::stream! {
                loop {
                    let mut delivered = false;
                    for topic in &topics {
                        match bus.inner.pop(topic) {
                            Ok(Some(payload)) => {
                                delivered = true;
                                yield Ok(bus.delivery(topic, payload));
                            }
                            Ok(None) => {}
                            Err(e) => yield Err(e),
                        }
                    }
                    if !delivered {
                        let waits = notifiers.iter().map(|n| Box::pin(n.notified()));
                        futures::future::select_all(waits).await;
                    }
                }
            };
            let stream: MessageStream = Box::pin(stream);
            Ok(stream)
        })
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::time::Duration;

    #[tokio::test]
    async fn nack_requeues_at_the_tail() {
        let bus = InMemoryMessageBus::new();
        bus.publish("t", "a").await.expect("publish");
        bus.publish("t", "b").await.expect("publish");

        let first = bus.try_next("t").expect("a");
        first.nack().await.expect("nack");

        let order: Vec<String> = std::iter::from_fn(|| bus.try_next("t"))
            .map(|d| d.payload().to_string())
            .collect();
        assert_eq!(order, vec!["b".to_string(), "a".to_string()]);
        assert_eq!(bus.nacked("t"), vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn failing_publish_queues_nothing() {
        let bus = InMemoryMessageBus::new();
        bus.set_fail_publish(true);

        let outcome = bus.publish("t", "a").await;
        assert!(matches!(outcome, Err(QueueError::PublishFailed { .. })));
        assert_eq!(bus.pending("t"), 0);
        assert!(bus.published("t").is_empty());
    }

    #[tokio::test]
    async fn subscription_wakes_on_later_publish() {
        let bus = InMemoryMessageBus::new();
        let mut stream = bus.subscribe(&["t"]).await.expect("subscribe");

        let publisher = bus.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            publisher.publish("t", "late").await.expect("publish");
        });

        let delivery = tokio::time::timeout(Duration::from_secs(2), stream.next())
            .await
            .expect("delivery before timeout")
            .expect("stream open")
            .expect("delivery ok");
        assert_eq!(delivery.payload(), "late");
        delivery.ack().await.expect("ack");
        assert_eq!(bus.acked("t"), vec!["late".to_string()]);
    }

    #[tokio::test]
    async fn subscribe_requires_topics() {
        let bus = InMemoryMessageBus::new();
        assert!(bus.subscribe(&[]).await.is_err());
    }
}
