//! Delivery worker behavior: the per-delivery state machine, guard
//! clauses, retry scheduling, and terminal failure.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use storelink_core::{
    storage::MemoryDeliveryStore, DeliveryId, DeliveryStatus, DeliveryStore, EventType,
};
use storelink_delivery::{
    DeliveryWorker, ObservabilityBuffer, RetryPolicy, StoreScheduler, TransportDispatcher,
    WorkerConfig, WorkerPool,
};
use storelink_testing::{seed_delivery, WebhookBuilder};
use tokio_util::sync::CancellationToken;
use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

const DOMAIN: &str = "shop.example.com";

fn make_worker(
    store: Arc<MemoryDeliveryStore>,
    buffer: Arc<ObservabilityBuffer>,
    policy: RetryPolicy,
) -> DeliveryWorker {
    DeliveryWorker::new(
        0,
        store.clone(),
        Arc::new(TransportDispatcher::with_defaults().expect("dispatcher")),
        Arc::new(StoreScheduler::new(store)),
        buffer,
        DOMAIN.to_string(),
        WorkerConfig { retry_policy: policy, ..WorkerConfig::default() },
        CancellationToken::new(),
    )
}

async fn run_once(store: &Arc<MemoryDeliveryStore>, delivery_id: DeliveryId) {
    let buffer = Arc::new(ObservabilityBuffer::new(100));
    let worker = make_worker(store.clone(), buffer, RetryPolicy::default());
    worker.send_webhook_request(delivery_id).await.expect("delivery task");
}

#[tokio::test]
async fn successful_delivery_records_attempt_and_clears_payload() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .and(matchers::path("/hook"))
        .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryDeliveryStore::new());
    let webhook = WebhookBuilder::new(format!("{}/hook", server.uri()))
        .secret("hunter2")
        .build();
    let delivery_id =
        seed_delivery(store.as_ref(), &webhook, EventType::OrderCreated, r#"{"order":{"id":1}}"#)
            .await;

    run_once(&store, delivery_id).await;

    let delivery = store.delivery(delivery_id).await.unwrap();
    assert_eq!(delivery.status, DeliveryStatus::Success);
    // Terminal success detaches the payload reference.
    assert!(delivery.payload_id.is_none());

    let attempts = store.attempts_for_delivery(delivery_id).await.unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].status, DeliveryStatus::Success);
    assert_eq!(attempts[0].response_status_code, Some(200));
    assert_eq!(attempts[0].response_body, "OK");
    assert!(attempts[0].duration.is_some());

    server.verify().await;
}

#[tokio::test]
async fn failed_delivery_schedules_backoff_retry() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("Internal Server Error"))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryDeliveryStore::new());
    let webhook = WebhookBuilder::new(format!("{}/hook", server.uri())).build();
    let delivery_id =
        seed_delivery(store.as_ref(), &webhook, EventType::OrderCreated, "{}").await;

    let before = Utc::now();
    run_once(&store, delivery_id).await;

    let delivery = store.delivery(delivery_id).await.unwrap();
    // Still pending: the retry budget is not exhausted.
    assert_eq!(delivery.status, DeliveryStatus::Pending);
    assert_eq!(delivery.attempt_count, 1);

    // First retry waits base * 2^0 = 10s.
    let next = delivery.next_attempt_at.expect("retry scheduled");
    let delay = (next - before).num_seconds();
    assert!((9..=11).contains(&delay), "unexpected retry delay: {delay}s");

    let attempts = store.attempts_for_delivery(delivery_id).await.unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].status, DeliveryStatus::Failed);
}

#[tokio::test]
async fn exhausted_retries_mark_delivery_failed() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("still broken"))
        .mount(&server)
        .await;

    let store = Arc::new(MemoryDeliveryStore::new());
    let webhook = WebhookBuilder::new(format!("{}/hook", server.uri())).build();
    let delivery_id =
        seed_delivery(store.as_ref(), &webhook, EventType::OrderCreated, "{}").await;

    // Burn through the budget: with max_retries = 5, the 6th failure is
    // terminal.
    for _ in 0..6 {
        run_once(&store, delivery_id).await;
    }

    let delivery = store.delivery(delivery_id).await.unwrap();
    assert_eq!(delivery.status, DeliveryStatus::Failed);
    assert_eq!(delivery.attempt_count, 6);

    let attempts = store.attempts_for_delivery(delivery_id).await.unwrap();
    assert_eq!(attempts.len(), 6);
    assert!(attempts.iter().all(|a| a.status == DeliveryStatus::Failed));
}

#[tokio::test]
async fn inactive_webhook_fails_without_attempt() {
    let store = Arc::new(MemoryDeliveryStore::new());
    let webhook = WebhookBuilder::new("https://unreachable.example.com/hook")
        .inactive()
        .build();
    let delivery_id =
        seed_delivery(store.as_ref(), &webhook, EventType::OrderCreated, "{}").await;

    run_once(&store, delivery_id).await;

    let delivery = store.delivery(delivery_id).await.unwrap();
    assert_eq!(delivery.status, DeliveryStatus::Failed);

    // No attempt row and no network call were made.
    let attempts = store.attempts_for_delivery(delivery_id).await.unwrap();
    assert!(attempts.is_empty());
}

#[tokio::test]
async fn missing_delivery_is_a_soft_failure() {
    let store = Arc::new(MemoryDeliveryStore::new());
    let webhook = WebhookBuilder::new("https://example.com/hook").build();
    let delivery_id =
        seed_delivery(store.as_ref(), &webhook, EventType::OrderCreated, "{}").await;

    store.purge_delivery(delivery_id).await;

    // Processing a purged delivery logs and returns cleanly.
    run_once(&store, delivery_id).await;
    assert!(store.delivery(delivery_id).await.is_none());
}

#[tokio::test]
async fn misconfigured_scheme_fails_terminally_without_retry() {
    let store = Arc::new(MemoryDeliveryStore::new());
    let webhook = WebhookBuilder::new("ftp://example.com/hook").build();
    let delivery_id =
        seed_delivery(store.as_ref(), &webhook, EventType::OrderCreated, "{}").await;

    run_once(&store, delivery_id).await;

    let delivery = store.delivery(delivery_id).await.unwrap();
    assert_eq!(delivery.status, DeliveryStatus::Failed);

    let attempts = store.attempts_for_delivery(delivery_id).await.unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].status, DeliveryStatus::Failed);
    assert!(attempts[0].response_body.contains("unknown webhook scheme"));
}

#[tokio::test]
async fn every_outcome_is_reported_to_observability() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("no"))
        .mount(&server)
        .await;

    let store = Arc::new(MemoryDeliveryStore::new());
    let buffer = Arc::new(ObservabilityBuffer::new(100));
    let webhook = WebhookBuilder::new(format!("{}/hook", server.uri())).build();
    let delivery_id =
        seed_delivery(store.as_ref(), &webhook, EventType::OrderCreated, "{}").await;

    let worker = make_worker(store.clone(), buffer.clone(), RetryPolicy::default());
    worker.send_webhook_request(delivery_id).await.unwrap();

    let events = buffer.pop_batch(10);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].status, "failed");
    // A scheduled retry carries its fire time for operators.
    assert!(events[0].next_retry.is_some());
}

#[tokio::test]
async fn worker_pool_drains_queued_deliveries() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
        .mount(&server)
        .await;

    let store = Arc::new(MemoryDeliveryStore::new());
    let webhook = WebhookBuilder::new(format!("{}/hook", server.uri())).build();
    let delivery_id =
        seed_delivery(store.as_ref(), &webhook, EventType::OrderCreated, "{}").await;

    let cancel = CancellationToken::new();
    let pool = WorkerPool::spawn(
        store.clone(),
        Arc::new(TransportDispatcher::with_defaults().unwrap()),
        Arc::new(StoreScheduler::new(store.clone())),
        Arc::new(ObservabilityBuffer::new(100)),
        DOMAIN.to_string(),
        WorkerConfig {
            worker_count: 2,
            poll_interval: Duration::from_millis(20),
            ..WorkerConfig::default()
        },
        cancel.clone(),
    );

    // Wait for the pool to claim and deliver.
    let mut delivered = false;
    for _ in 0..100 {
        if store.delivery(delivery_id).await.unwrap().status == DeliveryStatus::Success {
            delivered = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    pool.shutdown().await;

    assert!(delivered, "worker pool did not deliver the queued event");
}
