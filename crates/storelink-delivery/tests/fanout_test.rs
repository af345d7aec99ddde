//! Async fan-out: payload sharing, subscription rendering, and queueing.

use std::sync::Arc;

use serde_json::json;
use storelink_core::{storage::MemoryDeliveryStore, DeliveryStatus, EventType};
use storelink_delivery::{
    trigger_webhooks_async, PayloadRenderer, Requestor, StoreScheduler,
};
use storelink_testing::{ScriptedExecutor, WebhookBuilder};

#[tokio::test]
async fn fixed_schema_webhooks_share_one_payload() {
    let store = Arc::new(MemoryDeliveryStore::new());
    let scheduler = StoreScheduler::new(store.clone());
    let renderer = PayloadRenderer::new(Arc::new(ScriptedExecutor::default()));

    let webhooks = vec![
        WebhookBuilder::new("https://a.example.com/hook").build(),
        WebhookBuilder::new("https://b.example.com/hook").build(),
        WebhookBuilder::new("https://c.example.com/hook").build(),
    ];

    let deliveries = trigger_webhooks_async(
        store.as_ref(),
        &scheduler,
        &renderer,
        Some(r#"{"order":{"id":9}}"#.to_string()),
        EventType::OrderCreated,
        webhooks,
        None,
        Requestor::Anonymous,
    )
    .await
    .unwrap();

    assert_eq!(deliveries.len(), 3);
    assert_eq!(store.payload_count().await, 1);

    let shared = deliveries[0].payload_id;
    for delivery in &deliveries {
        assert_eq!(delivery.status, DeliveryStatus::Pending);
        assert_eq!(delivery.payload_id, shared);
        // Queued: due immediately.
        let stored = store.delivery(delivery.id).await.unwrap();
        assert!(stored.next_attempt_at.is_some());
    }
}

#[tokio::test]
async fn subscription_webhooks_render_their_own_payloads() {
    let store = Arc::new(MemoryDeliveryStore::new());
    let scheduler = StoreScheduler::new(store.clone());

    let executor = ScriptedExecutor::new(vec![EventType::OrderCreated])
        .respond_to("subscription { order { id } }", json!({"order": {"id": 9}}))
        .respond_to("subscription { order { number } }", json!({"order": {"number": "A-9"}}));
    let renderer = PayloadRenderer::new(Arc::new(executor));

    let webhooks = vec![
        WebhookBuilder::new("https://a.example.com/hook")
            .subscription_query("subscription { order { id } }")
            .build(),
        WebhookBuilder::new("https://b.example.com/hook")
            .subscription_query("subscription { order { number } }")
            .build(),
    ];

    let deliveries = trigger_webhooks_async(
        store.as_ref(),
        &scheduler,
        &renderer,
        None,
        EventType::OrderCreated,
        webhooks,
        Some(&json!({"order": {"id": 9}})),
        Requestor::Anonymous,
    )
    .await
    .unwrap();

    assert_eq!(deliveries.len(), 2);
    assert_eq!(store.payload_count().await, 2);
    assert_ne!(deliveries[0].payload_id, deliveries[1].payload_id);
}

#[tokio::test]
async fn empty_subscription_render_skips_that_webhook_only() {
    let store = Arc::new(MemoryDeliveryStore::new());
    let scheduler = StoreScheduler::new(store.clone());

    // Only one of the two queries is scripted; the other renders empty.
    let executor = ScriptedExecutor::new(vec![EventType::OrderCreated])
        .respond_to("subscription { order { id } }", json!({"order": {"id": 9}}));
    let renderer = PayloadRenderer::new(Arc::new(executor));

    let webhooks = vec![
        WebhookBuilder::new("https://a.example.com/hook")
            .subscription_query("subscription { order { id } }")
            .build(),
        WebhookBuilder::new("https://b.example.com/hook")
            .subscription_query("subscription { broken }")
            .build(),
    ];

    let deliveries = trigger_webhooks_async(
        store.as_ref(),
        &scheduler,
        &renderer,
        None,
        EventType::OrderCreated,
        webhooks,
        Some(&json!({"order": {"id": 9}})),
        Requestor::Anonymous,
    )
    .await
    .unwrap();

    assert_eq!(deliveries.len(), 1);
    assert_eq!(store.payload_count().await, 1);
}

#[tokio::test]
async fn empty_webhook_set_is_a_no_op() {
    let store = Arc::new(MemoryDeliveryStore::new());
    let scheduler = StoreScheduler::new(store.clone());
    let renderer = PayloadRenderer::new(Arc::new(ScriptedExecutor::default()));

    let deliveries = trigger_webhooks_async(
        store.as_ref(),
        &scheduler,
        &renderer,
        Some("{}".to_string()),
        EventType::OrderCreated,
        Vec::new(),
        None,
        Requestor::Anonymous,
    )
    .await
    .unwrap();

    assert!(deliveries.is_empty());
    assert_eq!(store.payload_count().await, 0);
}

#[tokio::test]
async fn mixed_webhook_set_combines_both_modes() {
    let store = Arc::new(MemoryDeliveryStore::new());
    let scheduler = StoreScheduler::new(store.clone());

    let executor = ScriptedExecutor::new(vec![EventType::OrderCreated])
        .respond_to("subscription { order { id } }", json!({"order": {"id": 9}}));
    let renderer = PayloadRenderer::new(Arc::new(executor));

    let webhooks = vec![
        WebhookBuilder::new("https://plain.example.com/hook").build(),
        WebhookBuilder::new("https://custom.example.com/hook")
            .subscription_query("subscription { order { id } }")
            .build(),
    ];

    let deliveries = trigger_webhooks_async(
        store.as_ref(),
        &scheduler,
        &renderer,
        Some(r#"{"order":{"id":9},"meta":{}}"#.to_string()),
        EventType::OrderCreated,
        webhooks,
        Some(&json!({"order": {"id": 9}})),
        Requestor::App { name: "sales-sync".to_string() },
    )
    .await
    .unwrap();

    assert_eq!(deliveries.len(), 2);
    // One shared fixed payload plus one rendered subscription payload.
    assert_eq!(store.payload_count().await, 2);
}
