//! End-to-end tests of the report pipeline over in-memory infrastructure.
//!
//! Each test submits through the service, lets the worker drain the work
//! queue, and inspects the store, the bus and the analytics reader.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use conversion_report_core::error::ReportError;
use conversion_report_core::message::ReportMessage;
use conversion_report_core::queue::Publisher;
use conversion_report_core::report::{ReportStatus, Version};
use conversion_report_runtime::Outcome;
use conversion_report_testing::helpers::{admin, parameters, timestamp, user};
use conversion_report_testing::PipelineHarness;
use proptest::prelude::*;
use tokio_test::assert_ok;

const START: &str = "2024-01-01T00:00:00";
const END: &str = "2024-01-31T23:59:59";

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn happy_path_computes_half_conversion() {
    let h = PipelineHarness::new();
    h.analytics.record_views("p1", "l1", timestamp("2024-01-10T12:00:00"), 10);
    h.analytics.record_payments("p1", "l1", timestamp("2024-01-11T12:00:00"), 5);

    let id = assert_ok!(h.service.submit(&user(), parameters("p1", "l1", START, END)).await);

    // Nothing is visible until the worker has run.
    assert!(matches!(
        h.service.fetch(&user(), id).await,
        Err(ReportError::NotFound(_))
    ));

    let outcomes = h.drain().await;
    assert_eq!(outcomes.len(), 1);

    let result = assert_ok!(h.service.fetch(&user(), id).await);
    assert_eq!(result.request_id, id);
    assert!((result.conversion_ratio - 0.5).abs() < f64::EPSILON);
    assert_eq!(result.payment_count, 5);

    let request = h.store.request(id).expect("request");
    assert_eq!(request.status, ReportStatus::Completed);
    assert_eq!(request.version, Version::new(1));
}

#[tokio::test]
async fn zero_views_gives_zero_ratio() {
    let h = PipelineHarness::new();
    h.analytics.record_payments("p1", "l1", timestamp("2024-01-05T00:00:00"), 3);

    let id = h.service.submit(&user(), parameters("p1", "l1", START, END)).await.unwrap();
    h.drain().await;

    let result = h.service.fetch(&user(), id).await.unwrap();
    assert!(result.conversion_ratio.abs() < f64::EPSILON);
    assert_eq!(result.payment_count, 3);
}

#[tokio::test]
async fn empty_window_completes_with_zeroes() {
    let h = PipelineHarness::new();
    h.analytics.record_views("p1", "l1", timestamp("2024-01-05T00:00:01"), 2);

    let instant = "2024-01-05T00:00:00";
    let id = h
        .service
        .submit(&user(), parameters("p1", "l1", instant, instant))
        .await
        .unwrap();
    h.drain().await;

    let result = h.service.fetch(&admin(), id).await.unwrap();
    assert!(result.conversion_ratio.abs() < f64::EPSILON);
    assert_eq!(result.payment_count, 0);
    assert_eq!(
        h.store.request(id).map(|r| r.status),
        Some(ReportStatus::Completed)
    );
}

#[tokio::test]
async fn duplicate_delivery_reads_and_writes_nothing() {
    let h = PipelineHarness::new();
    h.analytics.record_views("p1", "l1", timestamp("2024-01-10T00:00:00"), 4);
    h.analytics.record_payments("p1", "l1", timestamp("2024-01-10T00:00:00"), 1);

    let id = h.service.submit(&user(), parameters("p1", "l1", START, END)).await.unwrap();
    h.drain().await;

    let first_result = h.store.result(id).expect("result");
    let queries = h.analytics.query_count();
    let commits = h.store.commit_count();

    // The broker hands the same message out a second time.
    h.bus
        .publish(PipelineHarness::REQUESTS_TOPIC, &ReportMessage::new(id).to_string())
        .await
        .unwrap();
    let outcomes = h.drain().await;

    assert_eq!(outcomes, vec![Outcome::AlreadyCompleted(id)]);
    assert_eq!(h.analytics.query_count(), queries);
    assert_eq!(h.store.commit_count(), commits);
    assert_eq!(h.store.result(id), Some(first_result));
    assert_eq!(h.store.request(id).map(|r| r.version), Some(Version::new(1)));
}

#[tokio::test]
async fn admin_cannot_submit() {
    let h = PipelineHarness::new();

    let err = h
        .service
        .submit(&admin(), parameters("p1", "l1", START, END))
        .await
        .unwrap_err();

    assert!(matches!(err, ReportError::Forbidden { .. }));
    assert_eq!(h.store.request_count(), 0);
    assert!(h.bus.published(PipelineHarness::REQUESTS_TOPIC).is_empty());
}

#[tokio::test]
async fn retrieval_before_completion_is_not_found() {
    let h = PipelineHarness::new();
    let id = h.service.submit(&user(), parameters("p1", "l1", START, END)).await.unwrap();

    let err = h.service.fetch(&user(), id).await.unwrap_err();
    assert!(matches!(err, ReportError::NotFound(found) if found == id));
    assert_eq!(
        h.store.request(id).map(|r| r.status),
        Some(ReportStatus::Pending)
    );
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn completion_notice_follows_result() {
    let h = PipelineHarness::new();
    let id = h.service.submit(&user(), parameters("p1", "l1", START, END)).await.unwrap();
    h.drain().await;

    assert_eq!(
        h.bus.published(PipelineHarness::NOTIFICATIONS_TOPIC),
        vec![format!("REPORT_COMPLETED:{id}")]
    );
}

#[tokio::test]
async fn admin_update_recomputes_with_new_parameters() {
    let h = PipelineHarness::new();
    h.analytics.record_views("p1", "l1", timestamp("2024-01-10T00:00:00"), 10);
    h.analytics.record_payments("p1", "l1", timestamp("2024-01-10T00:00:00"), 1);
    h.analytics.record_views("p2", "l9", timestamp("2024-01-10T00:00:00"), 2);
    h.analytics.record_payments("p2", "l9", timestamp("2024-01-10T00:00:00"), 2);

    let id = h.service.submit(&user(), parameters("p1", "l1", START, END)).await.unwrap();
    h.drain().await;
    let before = h.service.fetch(&user(), id).await.unwrap();
    assert!((before.conversion_ratio - 0.1).abs() < f64::EPSILON);

    let version = h
        .service
        .update(&admin(), id, parameters("p2", "l9", START, END), None)
        .await
        .unwrap();
    assert_eq!(version, Version::new(2));
    assert!(h.service.fetch(&user(), id).await.is_err());

    h.drain().await;
    let after = h.service.fetch(&user(), id).await.unwrap();
    assert!((after.conversion_ratio - 1.0).abs() < f64::EPSILON);
    assert_eq!(after.payment_count, 2);
    assert_eq!(h.store.request(id).map(|r| r.version), Some(Version::new(3)));
}

#[tokio::test]
async fn deleted_request_is_dropped_by_worker() {
    let h = PipelineHarness::new();
    let id = h.service.submit(&user(), parameters("p1", "l1", START, END)).await.unwrap();

    h.service.delete(&admin(), id).await.unwrap();
    let outcomes = h.drain().await;

    assert_eq!(outcomes, vec![Outcome::MissingRequest(id)]);
    assert_eq!(h.store.result_count(), 0);
    assert_eq!(h.bus.acked(PipelineHarness::REQUESTS_TOPIC).len(), 1);
}

#[tokio::test]
async fn malformed_message_is_acknowledged() {
    let h = PipelineHarness::new();
    h.bus
        .publish(PipelineHarness::REQUESTS_TOPIC, "Report ID: 1234")
        .await
        .unwrap();

    assert_eq!(h.drain().await, vec![Outcome::Malformed]);
    assert_eq!(h.bus.pending(PipelineHarness::REQUESTS_TOPIC), 0);
    assert!(h.bus.nacked(PipelineHarness::REQUESTS_TOPIC).is_empty());
}

#[tokio::test]
async fn store_outage_defers_then_recovers() {
    let h = PipelineHarness::new();
    let id = h.service.submit(&user(), parameters("p1", "l1", START, END)).await.unwrap();

    h.store.set_unavailable(true);
    let first = h.deliver_next().await.expect("delivery");
    assert!(matches!(first, Outcome::Deferred { .. }));
    assert_eq!(h.bus.pending(PipelineHarness::REQUESTS_TOPIC), 1);

    h.store.set_unavailable(false);
    let outcomes = h.drain().await;
    assert!(matches!(outcomes.as_slice(), [Outcome::Completed { .. }]));
    assert!(h.store.result(id).is_some());
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn result_matches_recorded_counts(views in 0_usize..40, payments in 0_usize..40) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let h = PipelineHarness::new();
            h.analytics.record_views("p1", "l1", timestamp("2024-01-15T00:00:00"), views);
            h.analytics.record_payments("p1", "l1", timestamp("2024-01-15T00:00:00"), payments);

            let id = h.service.submit(&user(), parameters("p1", "l1", START, END)).await.unwrap();
            h.drain().await;

            let result = h.store.result(id).unwrap();
            let expected = if views == 0 { 0.0 } else { payments as f64 / views as f64 };
            assert_eq!(result.conversion_ratio, expected);
            assert_eq!(result.payment_count, payments as u64);
            assert_eq!(h.store.request(id).unwrap().status, ReportStatus::Completed);
        });
    }
}
