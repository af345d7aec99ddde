//! In-memory store for deterministic tests.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::{
    error::{CoreError, Result},
    event_types::EventType,
    models::{
        AttemptId, DeliveryAttempt, DeliveryId, DeliveryStatus, EventDelivery, EventPayload,
        PayloadId, Webhook, WebhookId, WebhookResponse,
    },
    storage::{DeliveryRecord, DeliveryStore, CLAIM_LEASE_SECS},
};

#[derive(Default)]
struct State {
    webhooks: Vec<Webhook>,
    payloads: HashMap<PayloadId, EventPayload>,
    deliveries: HashMap<DeliveryId, EventDelivery>,
    delivery_order: Vec<DeliveryId>,
    attempts: Vec<DeliveryAttempt>,
}

/// In-memory [`DeliveryStore`] with the same observable behavior as the
/// Postgres implementation, minus durability.
#[derive(Clone, Default)]
pub struct MemoryDeliveryStore {
    state: Arc<RwLock<State>>,
}

impl MemoryDeliveryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes a delivery row outright, simulating an external purge racing
    /// a scheduled retry.
    pub async fn purge_delivery(&self, id: DeliveryId) {
        let mut state = self.state.write().await;
        state.deliveries.remove(&id);
        state.delivery_order.retain(|d| *d != id);
    }

    /// Snapshot of a delivery row for test assertions.
    pub async fn delivery(&self, id: DeliveryId) -> Option<EventDelivery> {
        self.state.read().await.deliveries.get(&id).cloned()
    }

    /// Snapshot of a payload row for test assertions.
    pub async fn payload(&self, id: PayloadId) -> Option<EventPayload> {
        self.state.read().await.payloads.get(&id).cloned()
    }

    /// Total number of payload rows.
    pub async fn payload_count(&self) -> usize {
        self.state.read().await.payloads.len()
    }
}

#[async_trait]
impl DeliveryStore for MemoryDeliveryStore {
    async fn create_webhook(&self, webhook: &Webhook) -> Result<()> {
        self.state.write().await.webhooks.push(webhook.clone());
        Ok(())
    }

    async fn set_webhook_active(&self, id: WebhookId, is_active: bool) -> Result<()> {
        let mut state = self.state.write().await;
        let webhook = state
            .webhooks
            .iter_mut()
            .find(|w| w.id == id)
            .ok_or_else(|| CoreError::NotFound(format!("webhook not found: {id}")))?;
        webhook.is_active = is_active;
        Ok(())
    }

    async fn webhooks_for_event(&self, event_type: EventType) -> Result<Vec<Webhook>> {
        let state = self.state.read().await;
        Ok(state
            .webhooks
            .iter()
            .filter(|w| w.is_active && w.events.contains(&event_type))
            .cloned()
            .collect())
    }

    async fn create_payloads(&self, bodies: Vec<String>) -> Result<Vec<EventPayload>> {
        let payloads: Vec<EventPayload> = bodies.into_iter().map(EventPayload::new).collect();
        let mut state = self.state.write().await;
        for payload in &payloads {
            state.payloads.insert(payload.id, payload.clone());
        }
        Ok(payloads)
    }

    async fn create_deliveries(
        &self,
        event_type: EventType,
        pairs: &[(WebhookId, PayloadId)],
    ) -> Result<Vec<EventDelivery>> {
        let deliveries: Vec<EventDelivery> = pairs
            .iter()
            .map(|(webhook_id, payload_id)| {
                EventDelivery::new(event_type, *webhook_id, *payload_id)
            })
            .collect();
        let mut state = self.state.write().await;
        for delivery in &deliveries {
            state.deliveries.insert(delivery.id, delivery.clone());
            state.delivery_order.push(delivery.id);
        }
        Ok(deliveries)
    }

    async fn find_delivery(&self, id: DeliveryId) -> Result<Option<DeliveryRecord>> {
        let state = self.state.read().await;
        let Some(delivery) = state.deliveries.get(&id).cloned() else {
            return Ok(None);
        };
        let webhook = state
            .webhooks
            .iter()
            .find(|w| w.id == delivery.webhook_id)
            .cloned()
            .ok_or_else(|| {
                CoreError::Database(format!("webhook missing for delivery {id}"))
            })?;
        let payload =
            delivery.payload_id.and_then(|pid| state.payloads.get(&pid).cloned());
        Ok(Some(DeliveryRecord { delivery, webhook, payload }))
    }

    async fn record_attempt(
        &self,
        delivery_id: DeliveryId,
        task_id: Option<String>,
    ) -> Result<DeliveryAttempt> {
        let mut state = self.state.write().await;
        let delivery = state
            .deliveries
            .get_mut(&delivery_id)
            .ok_or_else(|| CoreError::NotFound(format!("delivery not found: {delivery_id}")))?;
        delivery.attempt_count += 1;

        let attempt = DeliveryAttempt {
            id: AttemptId::new(),
            delivery_id,
            task_id,
            request_headers: None,
            response_headers: None,
            response_status_code: None,
            response_body: String::new(),
            duration: None,
            status: DeliveryStatus::Pending,
            created_at: Utc::now(),
        };
        state.attempts.push(attempt.clone());
        Ok(attempt)
    }

    async fn update_attempt(
        &self,
        attempt_id: AttemptId,
        response: &WebhookResponse,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let attempt = state
            .attempts
            .iter_mut()
            .find(|a| a.id == attempt_id)
            .ok_or_else(|| CoreError::NotFound(format!("attempt not found: {attempt_id}")))?;
        attempt.request_headers = response.request_headers.clone();
        attempt.response_headers = response.response_headers.clone();
        attempt.response_status_code = response.status_code.map(i32::from);
        attempt.response_body = response.content.clone();
        attempt.duration = Some(response.duration.as_secs_f64());
        attempt.status = response.delivery_status();
        Ok(())
    }

    async fn update_delivery_status(&self, id: DeliveryId, status: DeliveryStatus) -> Result<()> {
        let mut state = self.state.write().await;
        let delivery = state
            .deliveries
            .get_mut(&id)
            .ok_or_else(|| CoreError::NotFound(format!("delivery not found: {id}")))?;
        delivery.status = status;
        Ok(())
    }

    async fn clear_if_successful(&self, id: DeliveryId) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(delivery) = state.deliveries.get_mut(&id) {
            if delivery.status == DeliveryStatus::Success {
                delivery.payload_id = None;
            }
        }
        Ok(())
    }

    async fn set_next_attempt(&self, id: DeliveryId, run_after: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.write().await;
        let delivery = state
            .deliveries
            .get_mut(&id)
            .ok_or_else(|| CoreError::NotFound(format!("delivery not found: {id}")))?;
        delivery.next_attempt_at = Some(run_after);
        Ok(())
    }

    async fn claim_due_deliveries(
        &self,
        now: DateTime<Utc>,
        batch: usize,
    ) -> Result<Vec<DeliveryId>> {
        let mut state = self.state.write().await;
        let due: Vec<DeliveryId> = state
            .delivery_order
            .iter()
            .copied()
            .filter(|id| {
                state.deliveries.get(id).is_some_and(|d| {
                    d.status == DeliveryStatus::Pending
                        && d.next_attempt_at.is_none_or(|at| at <= now)
                })
            })
            .take(batch)
            .collect();
        for id in &due {
            if let Some(delivery) = state.deliveries.get_mut(id) {
                delivery.next_attempt_at = Some(now + chrono::Duration::seconds(CLAIM_LEASE_SECS));
            }
        }
        Ok(due)
    }

    async fn attempts_for_delivery(&self, id: DeliveryId) -> Result<Vec<DeliveryAttempt>> {
        let state = self.state.read().await;
        Ok(state.attempts.iter().filter(|a| a.delivery_id == id).cloned().collect())
    }
}
