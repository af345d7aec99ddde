//! Payload rendering for webhook deliveries.
//!
//! Two modes, selected per webhook: fixed-schema rendering calls a
//! pre-registered generation function for the event type, independent of the
//! webhook; subscription rendering executes the webhook's stored
//! subscription query against the subscribable object through the
//! [`SubscriptionExecutor`] collaborator (the GraphQL engine lives outside
//! this crate).
//!
//! The two delivery families treat an empty subscription result differently:
//! async fan-out skips the webhook with a warning, while sync rendering
//! fails hard because the caller is waiting for an authoritative answer.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use serde_json::Value;
use storelink_core::{EventType, Webhook};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{DeliveryError, Result};

/// Identity on whose behalf an event fired. Rendered into payload
/// meta-fields.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Requestor {
    /// No authenticated requestor.
    #[default]
    Anonymous,
    /// A staff or customer user.
    User {
        /// User id.
        id: Uuid,
        /// User email.
        email: String,
    },
    /// An installed app acting through the API.
    App {
        /// App name.
        name: String,
    },
}

/// Explicit, immutable context for subscription rendering.
///
/// Replaces the synthetic per-request machinery of the surrounding web
/// framework. Built once per sync coordinator invocation and shared across
/// all webhook calls in that invocation; never mutated after construction.
#[derive(Debug, Clone)]
pub struct RenderContext {
    /// Who triggered the event.
    pub requestor: Requestor,
    /// Whether the render serves a synchronous, in-request call.
    pub sync: bool,
}

impl RenderContext {
    /// Builds a context for the given requestor and delivery family.
    pub fn new(requestor: Requestor, sync: bool) -> Self {
        Self { requestor, sync }
    }
}

/// Collaborator executing a webhook's subscription query.
///
/// Implemented by the GraphQL layer. `execute` returns `None` when the query
/// yields no data; errors internal to query execution are the executor's to
/// log and also surface as `None`.
#[async_trait]
pub trait SubscriptionExecutor: Send + Sync {
    /// Whether the event type has a subscription schema mapping at all.
    ///
    /// Guards against misconfigured webhooks subscribing to event types
    /// without a mapping.
    fn supports(&self, event_type: EventType) -> bool;

    /// Executes `query` for `event_type` against the subscribable object.
    async fn execute(
        &self,
        event_type: EventType,
        subscribable: &Value,
        query: &str,
        context: &RenderContext,
    ) -> Option<Value>;
}

/// Registry of fixed-schema payload generation functions, one per event
/// type. Populated by the domain layer at startup.
#[derive(Default)]
pub struct FixedPayloads {
    generators: HashMap<EventType, Box<dyn Fn(&Value) -> String + Send + Sync>>,
}

impl FixedPayloads {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the generation function for an event type.
    pub fn register(
        &mut self,
        event_type: EventType,
        generator: impl Fn(&Value) -> String + Send + Sync + 'static,
    ) {
        self.generators.insert(event_type, Box::new(generator));
    }

    /// Renders the fixed payload for `event_type`, if registered.
    pub fn generate(&self, event_type: EventType, subscribable: &Value) -> Option<String> {
        self.generators.get(&event_type).map(|generator| generator(subscribable))
    }
}

/// Renders payloads for webhook deliveries in either mode.
pub struct PayloadRenderer {
    executor: Arc<dyn SubscriptionExecutor>,
}

impl PayloadRenderer {
    /// Creates a renderer over the given subscription executor.
    pub fn new(executor: Arc<dyn SubscriptionExecutor>) -> Self {
        Self { executor }
    }

    /// Renders a subscription payload for async fan-out.
    ///
    /// Returns `None` — skipping the webhook — when the event type has no
    /// subscription mapping or the query yields no data. Both cases are
    /// logged; neither fails the fan-out.
    pub async fn render_subscription_async(
        &self,
        event_type: EventType,
        subscribable: &Value,
        webhook: &Webhook,
        context: &RenderContext,
    ) -> Option<String> {
        if !self.executor.supports(event_type) {
            info!(%event_type, "skipping subscription webhook: event is not subscribable");
            return None;
        }
        let query = webhook.subscription_query.as_deref()?;

        let data = self.executor.execute(event_type, subscribable, query, context).await;
        match data {
            Some(data) => Some(data.to_string()),
            None => {
                warn!(
                    %event_type,
                    webhook_id = %webhook.id,
                    "no payload was generated with subscription for event"
                );
                None
            },
        }
    }

    /// Renders a subscription payload for a sync call.
    ///
    /// Returns `Ok(None)` when the event type has no subscription mapping
    /// (misconfiguration, skipped with a log). An empty query result is a
    /// hard [`DeliveryError::EmptyRender`]: the sync caller requires an
    /// authoritative answer.
    pub async fn render_subscription_sync(
        &self,
        event_type: EventType,
        subscribable: &Value,
        webhook: &Webhook,
        context: &RenderContext,
    ) -> Result<Option<String>> {
        if !self.executor.supports(event_type) {
            info!(%event_type, "skipping subscription webhook: event is not subscribable");
            return Ok(None);
        }
        let query = webhook
            .subscription_query
            .as_deref()
            .ok_or_else(|| DeliveryError::Internal(format!(
                "webhook {} has no subscription query", webhook.id
            )))?;

        match self.executor.execute(event_type, subscribable, query, context).await {
            Some(data) => Ok(Some(data.to_string())),
            None => Err(DeliveryError::EmptyRender { event_type }),
        }
    }
}

/// Splits a webhook set into fixed-schema and subscription groups.
///
/// Fixed-schema webhooks share one rendered payload; subscription webhooks
/// each render their own.
pub fn group_by_subscription(webhooks: Vec<Webhook>) -> (Vec<Webhook>, Vec<Webhook>) {
    webhooks.into_iter().partition(|w| w.subscription_query.is_none())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct StaticExecutor {
        supported: Vec<EventType>,
        data: Option<Value>,
    }

    #[async_trait]
    impl SubscriptionExecutor for StaticExecutor {
        fn supports(&self, event_type: EventType) -> bool {
            self.supported.contains(&event_type)
        }

        async fn execute(
            &self,
            _event_type: EventType,
            _subscribable: &Value,
            _query: &str,
            _context: &RenderContext,
        ) -> Option<Value> {
            self.data.clone()
        }
    }

    fn subscription_webhook() -> Webhook {
        let mut webhook =
            Webhook::new("app", "https://example.com/hook", vec![EventType::OrderCreated]);
        webhook.subscription_query = Some("subscription { event { ... } }".to_string());
        webhook
    }

    #[tokio::test]
    async fn unmapped_event_type_skipped_in_both_modes() {
        let renderer = PayloadRenderer::new(Arc::new(StaticExecutor {
            supported: vec![],
            data: Some(serde_json::json!({"order": 1})),
        }));
        let webhook = subscription_webhook();
        let context = RenderContext::new(Requestor::Anonymous, false);

        let rendered = renderer
            .render_subscription_async(
                EventType::OrderCreated,
                &Value::Null,
                &webhook,
                &context,
            )
            .await;
        assert!(rendered.is_none());

        let rendered = renderer
            .render_subscription_sync(
                EventType::PaymentAuthorize,
                &Value::Null,
                &webhook,
                &context,
            )
            .await
            .unwrap();
        assert!(rendered.is_none());
    }

    #[tokio::test]
    async fn empty_data_skips_async_but_fails_sync() {
        let renderer = PayloadRenderer::new(Arc::new(StaticExecutor {
            supported: vec![EventType::OrderCreated, EventType::PaymentAuthorize],
            data: None,
        }));
        let webhook = subscription_webhook();
        let context = RenderContext::new(Requestor::Anonymous, true);

        let rendered = renderer
            .render_subscription_async(
                EventType::OrderCreated,
                &Value::Null,
                &webhook,
                &context,
            )
            .await;
        assert!(rendered.is_none());

        let err = renderer
            .render_subscription_sync(
                EventType::PaymentAuthorize,
                &Value::Null,
                &webhook,
                &context,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::EmptyRender { .. }));
    }

    #[tokio::test]
    async fn rendered_data_serialized_as_json_text() {
        let renderer = PayloadRenderer::new(Arc::new(StaticExecutor {
            supported: vec![EventType::OrderCreated],
            data: Some(serde_json::json!({"order": {"id": 7}})),
        }));
        let webhook = subscription_webhook();
        let context = RenderContext::new(Requestor::Anonymous, false);

        let rendered = renderer
            .render_subscription_async(
                EventType::OrderCreated,
                &Value::Null,
                &webhook,
                &context,
            )
            .await
            .unwrap();
        assert_eq!(rendered, r#"{"order":{"id":7}}"#);
    }

    #[test]
    fn fixed_registry_renders_per_event_type() {
        let mut registry = FixedPayloads::new();
        registry.register(EventType::OrderCreated, |subscribable| {
            serde_json::json!({ "order": subscribable, "meta": {"issuing_principal": null} })
                .to_string()
        });

        let rendered = registry
            .generate(EventType::OrderCreated, &serde_json::json!({"id": 3}))
            .unwrap();
        assert!(rendered.contains(r#""order":{"id":3}"#));

        // Unregistered event types render nothing.
        assert!(registry.generate(EventType::OrderUpdated, &Value::Null).is_none());
    }

    #[test]
    fn grouping_partitions_on_subscription_query() {
        let plain = Webhook::new("a", "https://example.com", vec![]);
        let subscription = subscription_webhook();
        let (regular, with_query) =
            group_by_subscription(vec![plain.clone(), subscription.clone()]);
        assert_eq!(regular.len(), 1);
        assert_eq!(regular[0].id, plain.id);
        assert_eq!(with_query.len(), 1);
        assert_eq!(with_query[0].id, subscription.id);
    }
}
