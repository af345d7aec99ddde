//! Synchronous webhook calls serving live request paths.
//!
//! Sync events (payment actions, tax calculation, shipping filtering) are
//! awaited in-line: webhooks are called sequentially, in registration
//! order, until one produces a response the caller accepts.
//!
//! Two entry points with deliberately asymmetric error handling:
//!
//! - [`SyncCoordinator::trigger_webhook_sync`] calls one webhook the caller
//!   already resolved. It fails loudly — a missing webhook or an empty
//!   subscription render raises, because the caller expects an
//!   authoritative answer from this specific provider.
//! - [`SyncCoordinator::trigger_all_webhooks_sync`] polls every subscribed
//!   webhook. It degrades gracefully — a webhook that fails to render or
//!   answer is skipped and the next one is tried; only "no provider
//!   answered" is reported, as `Ok(None)`.

use std::sync::Arc;

use serde_json::Value;
use storelink_core::{
    DeliveryStore, EventDelivery, EventType, ResponseStatus, Webhook,
};
use tracing::{debug, warn};

use crate::{
    error::{DeliveryError, Result},
    observability::ObservabilityBuffer,
    render::{PayloadRenderer, RenderContext, Requestor},
    transport::TransportDispatcher,
};

/// Coordinates synchronous, in-request webhook calls.
pub struct SyncCoordinator {
    store: Arc<dyn DeliveryStore>,
    dispatcher: Arc<TransportDispatcher>,
    renderer: Arc<PayloadRenderer>,
    buffer: Arc<ObservabilityBuffer>,
    domain: String,
}

impl SyncCoordinator {
    /// Creates a coordinator over the shared pipeline components.
    pub fn new(
        store: Arc<dyn DeliveryStore>,
        dispatcher: Arc<TransportDispatcher>,
        renderer: Arc<PayloadRenderer>,
        buffer: Arc<ObservabilityBuffer>,
        domain: String,
    ) -> Self {
        Self { store, dispatcher, renderer, buffer, domain }
    }

    /// Calls one webhook synchronously and returns its parsed JSON
    /// response, or `None` when the webhook did not answer acceptably.
    ///
    /// `data` is the pre-rendered payload for fixed-schema webhooks; a
    /// configured subscription query takes precedence and renders from
    /// `subscribable` instead.
    ///
    /// # Errors
    ///
    /// - [`DeliveryError::MissingWebhook`] when `webhook` is `None` — the
    ///   caller skipped resolving providers for the event type.
    /// - [`DeliveryError::EmptyRender`] when the subscription query yields
    ///   no data.
    /// - [`DeliveryError::UnknownScheme`] for non-HTTP targets; sync calls
    ///   cannot await queue transports.
    pub async fn trigger_webhook_sync(
        &self,
        event_type: EventType,
        data: &str,
        webhook: Option<&Webhook>,
        subscribable: Option<&Value>,
        requestor: Requestor,
    ) -> Result<Option<Value>> {
        let webhook = webhook.ok_or(DeliveryError::MissingWebhook { event_type })?;

        let body = if webhook.subscription_query.is_some() {
            let context = RenderContext::new(requestor, true);
            match self
                .renderer
                .render_subscription_sync(
                    event_type,
                    subscribable.unwrap_or(&Value::Null),
                    webhook,
                    &context,
                )
                .await?
            {
                Some(body) => body,
                // Event type has no subscription mapping: misconfigured
                // webhook, logged by the renderer.
                None => return Ok(None),
            }
        } else {
            data.to_string()
        };

        let delivery = self.create_sync_delivery(event_type, webhook, body.clone()).await?;
        self.send_webhook_request_sync(webhook, &delivery, &body).await
    }

    /// Polls all webhooks subscribed to `event_type`, in registration
    /// order, until `parse_response` accepts one response.
    ///
    /// `generate_payload` is invoked at most once, on the first
    /// fixed-schema webhook; the synthetic render context is built at most
    /// once, on the first subscription webhook, and shared across the rest
    /// of the invocation. Webhooks that fail to render or to answer are
    /// skipped. Returns `Ok(None)` when no webhook's response was accepted.
    ///
    /// # Errors
    ///
    /// Configuration errors (unusable target URLs) and store failures
    /// propagate; per-webhook transport and rendering failures do not.
    pub async fn trigger_all_webhooks_sync<R, G, P>(
        &self,
        event_type: EventType,
        generate_payload: G,
        parse_response: P,
        subscribable: Option<&Value>,
        requestor: Requestor,
    ) -> Result<Option<R>>
    where
        G: Fn() -> String,
        P: Fn(&Value) -> Option<R>,
    {
        let webhooks = self.store.webhooks_for_event(event_type).await?;
        debug!(%event_type, webhooks = webhooks.len(), "sync fan-out starting");

        let mut context: Option<RenderContext> = None;
        let mut shared_payload: Option<String> = None;

        for webhook in &webhooks {
            let body = if webhook.subscription_query.is_some() {
                let context = context.get_or_insert_with(|| {
                    RenderContext::new(requestor.clone(), event_type.is_sync())
                });
                match self
                    .renderer
                    .render_subscription_sync(
                        event_type,
                        subscribable.unwrap_or(&Value::Null),
                        webhook,
                        context,
                    )
                    .await
                {
                    Ok(Some(body)) => body,
                    Ok(None) => continue,
                    Err(DeliveryError::EmptyRender { .. }) => {
                        // One webhook's rendering failing must not end the
                        // poll; the next provider may still answer.
                        warn!(
                            %event_type,
                            webhook_id = %webhook.id,
                            "subscription rendered no payload, trying next webhook"
                        );
                        continue;
                    },
                    Err(e) => return Err(e),
                }
            } else {
                shared_payload.get_or_insert_with(&generate_payload).clone()
            };

            let delivery = self.create_sync_delivery(event_type, webhook, body.clone()).await?;
            let response_data =
                self.send_webhook_request_sync(webhook, &delivery, &body).await?;

            if let Some(data) = response_data {
                if let Some(parsed) = parse_response(&data) {
                    return Ok(Some(parsed));
                }
            }
        }

        Ok(None)
    }

    async fn create_sync_delivery(
        &self,
        event_type: EventType,
        webhook: &Webhook,
        body: String,
    ) -> Result<EventDelivery> {
        let payloads = self.store.create_payloads(vec![body]).await?;
        let deliveries = self
            .store
            .create_deliveries(event_type, &[(webhook.id, payloads[0].id)])
            .await?;
        deliveries
            .into_iter()
            .next()
            .ok_or_else(|| DeliveryError::Internal("sync delivery was not created".to_string()))
    }

    /// Performs the HTTP call for one sync delivery, recording attempt and
    /// delivery rows exactly like the async path.
    ///
    /// A non-2xx response or an unparseable JSON body counts as "this
    /// webhook did not answer" and yields `Ok(None)`.
    async fn send_webhook_request_sync(
        &self,
        webhook: &Webhook,
        delivery: &EventDelivery,
        body: &str,
    ) -> Result<Option<Value>> {
        let scheme = TransportDispatcher::scheme_for(&webhook.target_url)?;
        if !scheme.is_http() {
            self.store
                .update_delivery_status(delivery.id, storelink_core::DeliveryStatus::Failed)
                .await?;
            return Err(DeliveryError::UnknownScheme { scheme: scheme.to_string() });
        }

        debug!(
            target_url = %webhook.target_url,
            event_type = %delivery.event_type,
            "sending sync webhook payload"
        );
        let mut attempt = self.store.record_attempt(delivery.id, None).await?;

        let mut response = self
            .dispatcher
            .dispatch_with_timeout(
                &webhook.target_url,
                bytes::Bytes::from(body.to_string()),
                &self.domain,
                webhook.secret_key.as_deref(),
                delivery.event_type,
                self.dispatcher.sync_timeout(),
            )
            .await?;

        let response_data = if response.is_success() {
            match serde_json::from_str::<Value>(&response.content) {
                Ok(data) => Some(data),
                Err(e) => {
                    warn!(
                        target_url = %webhook.target_url,
                        attempt_id = %attempt.id,
                        error = %e,
                        "failed to parse JSON response from sync webhook"
                    );
                    response.status = ResponseStatus::Failed;
                    None
                },
            }
        } else {
            warn!(
                target_url = %webhook.target_url,
                attempt_id = %attempt.id,
                response = %response.content,
                "sync webhook request failed"
            );
            None
        };

        self.store.update_attempt(attempt.id, &response).await?;
        self.store.update_delivery_status(delivery.id, response.delivery_status()).await?;
        attempt.status = response.delivery_status();
        attempt.response_status_code = response.status_code.map(i32::from);
        attempt.duration = Some(response.duration.as_secs_f64());
        self.buffer.report_delivery_attempt(
            &attempt,
            delivery.event_type,
            webhook.id,
            None,
        );
        self.store.clear_if_successful(delivery.id).await?;

        Ok(response_data)
    }
}
