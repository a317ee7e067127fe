//! Integration tests for [`RedpandaMessageBus`] against a real Kafka broker.
//!
//! Marked `#[ignore]` because they need Docker and take tens of seconds to
//! start the broker. Run explicitly:
//!
//! ```bash
//! cargo test -p conversion-report-redpanda --test delivery_tests -- --ignored
//! ```

#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use conversion_report_core::queue::{Delivery, MessageStream, Publisher, Subscriber};
use conversion_report_redpanda::RedpandaMessageBus;
use futures::StreamExt;
use std::time::Duration;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::kafka::{KAFKA_PORT, Kafka};

const WARMUP: &str = "warmup";

async fn start_broker() -> (ContainerAsync<Kafka>, String) {
    let kafka = Kafka::default()
        .with_env_var("KAFKA_AUTO_CREATE_TOPICS_ENABLE", "true")
        .start()
        .await
        .expect("Failed to start Kafka container");

    let host = kafka.get_host().await.expect("Failed to get host");
    let port = kafka
        .get_host_port_ipv4(KAFKA_PORT)
        .await
        .expect("Failed to get port");
    (kafka, format!("{host}:{port}"))
}

fn bus(brokers: &str, group: &str) -> RedpandaMessageBus {
    RedpandaMessageBus::builder()
        .brokers(brokers)
        .consumer_group(group)
        .nack_delay(Duration::from_millis(100))
        .build()
        .expect("Failed to create message bus")
}

/// Publish until the broker accepts, which also auto-creates the topic.
async fn ensure_topic_exists(bus: &RedpandaMessageBus, topic: &str) {
    for attempt in 1..=60 {
        if bus.publish(topic, WARMUP).await.is_ok() {
            tokio::time::sleep(Duration::from_secs(3)).await;
            return;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(attempt != 60, "Topic {topic} never became available");
    }
}

/// Next non-warmup delivery, acking warmups along the way.
async fn next_delivery(stream: &mut MessageStream) -> Delivery {
    loop {
        let delivery = tokio::time::timeout(Duration::from_secs(20), stream.next())
            .await
            .expect("Timeout waiting for delivery")
            .expect("Stream ended")
            .expect("Delivery error");
        if delivery.payload() == WARMUP {
            delivery.ack().await.expect("ack warmup");
            continue;
        }
        return delivery;
    }
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn published_message_is_delivered_once_acked() {
    let (_kafka, brokers) = start_broker().await;
    let bus = bus(&brokers, "delivery-ack");
    ensure_topic_exists(&bus, "report.requests").await;

    let mut stream = bus
        .subscribe(&["report.requests"])
        .await
        .expect("Failed to subscribe");

    let payload = "Report ID: 0f8fad5b-d9cb-469f-a165-70867728950e";
    bus.publish("report.requests", payload)
        .await
        .expect("Failed to publish");

    let delivery = next_delivery(&mut stream).await;
    assert_eq!(delivery.topic(), "report.requests");
    assert_eq!(delivery.payload(), payload);
    delivery.ack().await.expect("ack");

    bus.publish("report.requests", "Report ID: 7c9e6679-7425-40de-944b-e07fc1f90ae7")
        .await
        .expect("Failed to publish");
    let next = next_delivery(&mut stream).await;
    assert_ne!(next.payload(), payload, "acked message must not come back");
    next.ack().await.expect("ack");
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn nacked_message_is_redelivered() {
    let (_kafka, brokers) = start_broker().await;
    let bus = bus(&brokers, "delivery-nack");
    ensure_topic_exists(&bus, "report.requests").await;

    let mut stream = bus
        .subscribe(&["report.requests"])
        .await
        .expect("Failed to subscribe");

    let payload = "Report ID: 16fd2706-8baf-433b-82eb-8c7fada847da";
    bus.publish("report.requests", payload)
        .await
        .expect("Failed to publish");

    let first = next_delivery(&mut stream).await;
    assert_eq!(first.payload(), payload);
    first.nack().await.expect("nack");

    let again = next_delivery(&mut stream).await;
    assert_eq!(again.payload(), payload);
    again.ack().await.expect("ack");
}
