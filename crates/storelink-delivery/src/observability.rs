//! Diagnostic event buffering and delivery to observability webhooks.
//!
//! Delivery attempts (and retry schedules) are reported into a bounded ring
//! buffer. A periodic reporter drains the buffer and forwards batches to
//! every webhook subscribed to the observability event type, reusing the
//! transport dispatcher. Queue-like transports bound message size per call,
//! so they receive events one at a time; HTTP targets get the whole batch
//! in a single request.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use storelink_core::{
    DeliveryAttempt, DeliveryStore, EventType, Webhook, WebhookId,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::transport::TransportDispatcher;

/// One diagnostic event describing a delivery attempt outcome.
#[derive(Debug, Clone, Serialize)]
pub struct ObservabilityEvent {
    /// Record discriminator for consumers.
    pub kind: &'static str,
    /// Attempt identifier.
    pub attempt_id: String,
    /// Delivery the attempt belonged to.
    pub delivery_id: String,
    /// Event type the delivery carries.
    pub event_type: String,
    /// Webhook the delivery targets.
    pub webhook_id: String,
    /// Attempt outcome.
    pub status: String,
    /// HTTP status code, when the transport produced one.
    pub response_status_code: Option<i32>,
    /// Transport call duration in seconds.
    pub duration: Option<f64>,
    /// When the next retry fires, for failed attempts that will be retried.
    pub next_retry: Option<DateTime<Utc>>,
    /// When the attempt was made.
    pub attempted_at: DateTime<Utc>,
}

impl ObservabilityEvent {
    /// Builds a diagnostic record from an attempt row.
    pub fn from_attempt(
        attempt: &DeliveryAttempt,
        event_type: EventType,
        webhook_id: WebhookId,
        next_retry: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            kind: "event_delivery_attempt",
            attempt_id: attempt.id.to_string(),
            delivery_id: attempt.delivery_id.to_string(),
            event_type: event_type.as_str().to_string(),
            webhook_id: webhook_id.to_string(),
            status: attempt.status.to_string(),
            response_status_code: attempt.response_status_code,
            duration: attempt.duration,
            next_retry,
            attempted_at: attempt.created_at,
        }
    }
}

/// Bounded ring buffer of diagnostic events.
///
/// Overflow drops the oldest event and counts the drop; reporting must
/// never block or fail delivery processing.
pub struct ObservabilityBuffer {
    events: Mutex<VecDeque<ObservabilityEvent>>,
    capacity: usize,
    dropped: AtomicU64,
}

impl ObservabilityBuffer {
    /// Creates a buffer holding at most `capacity` events.
    pub fn new(capacity: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
        }
    }

    /// Reports a delivery attempt outcome.
    pub fn report_delivery_attempt(
        &self,
        attempt: &DeliveryAttempt,
        event_type: EventType,
        webhook_id: WebhookId,
        next_retry: Option<DateTime<Utc>>,
    ) {
        self.push(ObservabilityEvent::from_attempt(attempt, event_type, webhook_id, next_retry));
    }

    /// Appends an event, dropping the oldest on overflow.
    pub fn push(&self, event: ObservabilityEvent) {
        let mut events = self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if events.len() >= self.capacity {
            events.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        events.push_back(event);
    }

    /// Removes and returns up to `max` buffered events, oldest first.
    pub fn pop_batch(&self, max: usize) -> Vec<ObservabilityEvent> {
        let mut events = self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let take = max.min(events.len());
        events.drain(..take).collect()
    }

    /// Number of currently buffered events.
    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }

    /// True when no events are buffered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total events dropped to overflow since startup.
    pub fn dropped_total(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Sends a batch of diagnostic events to each observability webhook.
///
/// Per-webhook failures are logged with dropped-event counts and never
/// propagate; one bad webhook must not starve the others.
pub async fn send_observability_events(
    dispatcher: &TransportDispatcher,
    domain: &str,
    webhooks: &[Webhook],
    events: &[ObservabilityEvent],
) {
    let event_type = EventType::Observability;

    for webhook in webhooks {
        let scheme = match TransportDispatcher::scheme_for(&webhook.target_url) {
            Ok(scheme) => scheme,
            Err(e) => {
                error!(
                    webhook_id = %webhook.id,
                    target_url = %webhook.target_url,
                    dropped_events = events.len(),
                    error = %e,
                    "observability webhook has unusable target"
                );
                continue;
            },
        };

        let mut failed = 0usize;
        if scheme.is_queue() {
            // Queue transports bound message size per call.
            for event in events {
                let message = match serde_json::to_vec(event) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!(error = %e, "failed to serialize observability event");
                        failed += 1;
                        continue;
                    },
                };
                match dispatcher
                    .dispatch(
                        &webhook.target_url,
                        Bytes::from(message),
                        domain,
                        webhook.secret_key.as_deref(),
                        event_type,
                    )
                    .await
                {
                    Ok(response) if response.is_success() => {},
                    _ => failed += 1,
                }
            }
        } else {
            let message = match serde_json::to_vec(events) {
                Ok(message) => message,
                Err(e) => {
                    warn!(error = %e, "failed to serialize observability batch");
                    continue;
                },
            };
            match dispatcher
                .dispatch(
                    &webhook.target_url,
                    Bytes::from(message),
                    domain,
                    webhook.secret_key.as_deref(),
                    event_type,
                )
                .await
            {
                Ok(response) if response.is_success() => {},
                _ => failed = events.len(),
            }
        }

        if failed > 0 {
            warn!(
                webhook_id = %webhook.id,
                target_url = %webhook.target_url,
                dropped_events = failed,
                total_events = events.len(),
                "observability events dropped for webhook"
            );
        } else {
            debug!(
                webhook_id = %webhook.id,
                events = events.len(),
                "observability events delivered"
            );
        }
    }
}

/// Periodic flush task for the observability buffer.
pub struct ObservabilityReporter {
    store: Arc<dyn DeliveryStore>,
    dispatcher: Arc<TransportDispatcher>,
    buffer: Arc<ObservabilityBuffer>,
    domain: String,
    interval: Duration,
    batch_size: usize,
    cancel: CancellationToken,
}

impl ObservabilityReporter {
    /// Creates a reporter flushing every `interval`.
    pub fn new(
        store: Arc<dyn DeliveryStore>,
        dispatcher: Arc<TransportDispatcher>,
        buffer: Arc<ObservabilityBuffer>,
        domain: String,
        interval: Duration,
        batch_size: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self { store, dispatcher, buffer, domain, interval, batch_size, cancel }
    }

    /// Runs the flush loop until cancelled.
    pub async fn run(self) {
        info!(interval_secs = self.interval.as_secs(), "observability reporter starting");
        loop {
            tokio::select! {
                () = tokio::time::sleep(self.interval) => {
                    self.flush().await;
                },
                () = self.cancel.cancelled() => {
                    // Final drain so buffered diagnostics survive shutdown.
                    self.flush().await;
                    break;
                },
            }
        }
        info!("observability reporter stopped");
    }

    /// Drains the buffer to all observability webhooks, one batch at a time.
    pub async fn flush(&self) {
        let webhooks = match self.store.webhooks_for_event(EventType::Observability).await {
            Ok(webhooks) => webhooks,
            Err(e) => {
                warn!(error = %e, "failed to load observability webhooks");
                return;
            },
        };
        if webhooks.is_empty() {
            return;
        }

        loop {
            let events = self.buffer.pop_batch(self.batch_size);
            if events.is_empty() {
                break;
            }
            send_observability_events(&self.dispatcher, &self.domain, &webhooks, &events).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use storelink_core::{AttemptId, DeliveryId, DeliveryStatus};

    use super::*;

    fn attempt() -> DeliveryAttempt {
        DeliveryAttempt {
            id: AttemptId::new(),
            delivery_id: DeliveryId::new(),
            task_id: None,
            request_headers: None,
            response_headers: None,
            response_status_code: Some(500),
            response_body: "oops".to_string(),
            duration: Some(0.2),
            status: DeliveryStatus::Failed,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn buffer_drops_oldest_on_overflow() {
        let buffer = ObservabilityBuffer::new(2);
        for _ in 0..3 {
            buffer.report_delivery_attempt(
                &attempt(),
                EventType::OrderCreated,
                WebhookId::new(),
                None,
            );
        }

        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.dropped_total(), 1);
    }

    #[test]
    fn pop_batch_drains_oldest_first() {
        let buffer = ObservabilityBuffer::new(10);
        let first = attempt();
        let second = attempt();
        buffer.report_delivery_attempt(&first, EventType::OrderCreated, WebhookId::new(), None);
        buffer.report_delivery_attempt(&second, EventType::OrderCreated, WebhookId::new(), None);

        let batch = buffer.pop_batch(1);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].attempt_id, first.id.to_string());
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn event_carries_retry_schedule() {
        let next_retry = Utc::now() + chrono::Duration::seconds(20);
        let event = ObservabilityEvent::from_attempt(
            &attempt(),
            EventType::OrderCreated,
            WebhookId::new(),
            Some(next_retry),
        );
        assert_eq!(event.kind, "event_delivery_attempt");
        assert_eq!(event.next_retry, Some(next_retry));
        assert_eq!(event.status, "failed");
    }
}
