//! Builders and doubles for deterministic pipeline tests.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use storelink_core::{
    DeliveryId, DeliveryStore, EventType, Webhook,
};
use storelink_delivery::render::{RenderContext, SubscriptionExecutor};

/// Builder for webhook registrations with sensible defaults.
pub struct WebhookBuilder {
    app_name: String,
    target_url: String,
    secret_key: Option<String>,
    subscription_query: Option<String>,
    is_active: bool,
    events: Vec<EventType>,
}

impl WebhookBuilder {
    /// Starts a builder targeting `target_url`.
    pub fn new(target_url: impl Into<String>) -> Self {
        Self {
            app_name: "test-app".to_string(),
            target_url: target_url.into(),
            secret_key: None,
            subscription_query: None,
            is_active: true,
            events: vec![EventType::OrderCreated],
        }
    }

    /// Sets the owning app name.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Sets the signing secret.
    pub fn secret(mut self, secret: impl Into<String>) -> Self {
        self.secret_key = Some(secret.into());
        self
    }

    /// Configures a subscription query, switching the webhook to
    /// subscription-based rendering.
    pub fn subscription_query(mut self, query: impl Into<String>) -> Self {
        self.subscription_query = Some(query.into());
        self
    }

    /// Marks the webhook inactive.
    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    /// Replaces the subscribed event types.
    pub fn events(mut self, events: Vec<EventType>) -> Self {
        self.events = events;
        self
    }

    /// Builds the registration.
    pub fn build(self) -> Webhook {
        let mut webhook = Webhook::new(self.app_name, self.target_url, self.events);
        webhook.secret_key = self.secret_key;
        webhook.subscription_query = self.subscription_query;
        webhook.is_active = self.is_active;
        webhook
    }
}

/// Persists one webhook, payload, and pending delivery; returns the
/// delivery id ready for a worker to process.
pub async fn seed_delivery(
    store: &dyn DeliveryStore,
    webhook: &Webhook,
    event_type: EventType,
    body: &str,
) -> DeliveryId {
    store.create_webhook(webhook).await.expect("create webhook");
    let payloads =
        store.create_payloads(vec![body.to_string()]).await.expect("create payload");
    let deliveries = store
        .create_deliveries(event_type, &[(webhook.id, payloads[0].id)])
        .await
        .expect("create delivery");
    deliveries[0].id
}

/// Scripted subscription executor double.
///
/// Returns the response configured for a query string, or `None` for
/// queries with no script entry — which exercises the empty-render paths.
#[derive(Default)]
pub struct ScriptedExecutor {
    supported: Vec<EventType>,
    responses: HashMap<String, Value>,
}

impl ScriptedExecutor {
    /// Creates an executor supporting the given event types.
    pub fn new(supported: Vec<EventType>) -> Self {
        Self { supported, responses: HashMap::new() }
    }

    /// Scripts a response for a query string.
    pub fn respond_to(mut self, query: impl Into<String>, data: Value) -> Self {
        self.responses.insert(query.into(), data);
        self
    }
}

#[async_trait]
impl SubscriptionExecutor for ScriptedExecutor {
    fn supports(&self, event_type: EventType) -> bool {
        self.supported.contains(&event_type)
    }

    async fn execute(
        &self,
        _event_type: EventType,
        _subscribable: &Value,
        query: &str,
        _context: &RenderContext,
    ) -> Option<Value> {
        self.responses.get(query).cloned()
    }
}
