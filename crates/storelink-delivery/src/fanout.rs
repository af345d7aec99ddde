//! Async fan-out: from a domain event to pending deliveries.
//!
//! Splits the webhook set by rendering mode, persists payloads and
//! deliveries in batches, and hands every delivery to the scheduler. Actual
//! sending happens later, in worker tasks.

use chrono::Utc;
use serde_json::Value;
use storelink_core::{
    DeliveryStore, EventDelivery, EventType, PayloadId, Webhook, WebhookId,
};
use tracing::debug;

use crate::{
    error::{DeliveryError, Result},
    render::{group_by_subscription, PayloadRenderer, RenderContext, Requestor},
    scheduler::Scheduler,
};

/// Creates pending deliveries for an async event and enqueues them.
///
/// Fixed-schema webhooks share one payload rendered by the caller (`data`);
/// subscription webhooks each render their own through `renderer`. Webhooks
/// whose subscription yields no payload are skipped. Returns the created
/// deliveries.
///
/// # Errors
///
/// Returns an error when persistence fails, or when fixed-schema webhooks
/// are present but no `data` payload was supplied.
pub async fn trigger_webhooks_async(
    store: &dyn DeliveryStore,
    scheduler: &dyn Scheduler,
    renderer: &PayloadRenderer,
    data: Option<String>,
    event_type: EventType,
    webhooks: Vec<Webhook>,
    subscribable: Option<&Value>,
    requestor: Requestor,
) -> Result<Vec<EventDelivery>> {
    let (regular, subscriptions) = group_by_subscription(webhooks);
    let mut deliveries = Vec::new();

    if !regular.is_empty() {
        let data = data.ok_or_else(|| {
            DeliveryError::Internal(format!(
                "no payload supplied for fixed-schema webhooks of event {event_type}"
            ))
        })?;
        let payloads = store.create_payloads(vec![data]).await?;
        let shared = payloads[0].id;
        let pairs: Vec<(WebhookId, PayloadId)> =
            regular.iter().map(|w| (w.id, shared)).collect();
        deliveries.extend(store.create_deliveries(event_type, &pairs).await?);
    }

    if !subscriptions.is_empty() {
        deliveries.extend(
            create_deliveries_for_subscriptions(
                store,
                renderer,
                event_type,
                subscribable.unwrap_or(&Value::Null),
                &subscriptions,
                requestor,
            )
            .await?,
        );
    }

    let now = Utc::now();
    for delivery in &deliveries {
        scheduler.enqueue(delivery.id, now).await?;
    }

    debug!(
        %event_type,
        deliveries = deliveries.len(),
        "async webhook fan-out queued"
    );
    Ok(deliveries)
}

/// Renders one payload per subscription webhook and persists the results in
/// two batch operations (payloads, then deliveries).
///
/// Webhooks whose query yields no data are skipped with a log; an
/// unsubscribable event type skips all of them.
pub async fn create_deliveries_for_subscriptions(
    store: &dyn DeliveryStore,
    renderer: &PayloadRenderer,
    event_type: EventType,
    subscribable: &Value,
    webhooks: &[Webhook],
    requestor: Requestor,
) -> Result<Vec<EventDelivery>> {
    let context = RenderContext::new(requestor, event_type.is_sync());

    let mut bodies = Vec::new();
    let mut targets = Vec::new();
    for webhook in webhooks {
        if let Some(body) = renderer
            .render_subscription_async(event_type, subscribable, webhook, &context)
            .await
        {
            bodies.push(body);
            targets.push(webhook.id);
        }
    }

    let payloads = store.create_payloads(bodies).await?;
    let pairs: Vec<(WebhookId, PayloadId)> =
        targets.into_iter().zip(payloads.iter().map(|p| p.id)).collect();
    store.create_deliveries(event_type, &pairs).await.map_err(Into::into)
}
