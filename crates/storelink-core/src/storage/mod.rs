//! Persistence boundary for payloads, deliveries, and attempts.
//!
//! The delivery engine, sync coordinator, and scheduler all operate against
//! the [`DeliveryStore`] trait. Production uses the Postgres implementation;
//! tests use the in-memory one for deterministic behavior without a
//! database. The deliveries table doubles as the durable work queue: workers
//! claim due pending rows, and re-queueing a retry is a timestamp update.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    error::Result,
    event_types::EventType,
    models::{
        AttemptId, DeliveryAttempt, DeliveryId, DeliveryStatus, EventDelivery, EventPayload,
        PayloadId, Webhook, WebhookId, WebhookResponse,
    },
};

pub mod memory;
pub mod pg;

pub use memory::MemoryDeliveryStore;
pub use pg::PgDeliveryStore;

/// Lease applied to a claimed delivery's `next_attempt_at`.
///
/// Keeps concurrent claimers off a delivery while one worker processes it,
/// without a distributed lock. Processing overwrites the lease; a worker
/// crash surfaces the delivery again once the lease expires.
pub const CLAIM_LEASE_SECS: i64 = 60;

/// A delivery joined with its webhook and (possibly cleared) payload.
#[derive(Debug, Clone)]
pub struct DeliveryRecord {
    /// The delivery row.
    pub delivery: EventDelivery,
    /// The target webhook registration.
    pub webhook: Webhook,
    /// The payload, absent once cleared after a terminal success.
    pub payload: Option<EventPayload>,
}

/// Storage operations required by the delivery pipeline.
#[async_trait]
pub trait DeliveryStore: Send + Sync {
    /// Persists a webhook registration. Used by fixtures and the admin
    /// surface; the delivery pipeline itself only reads registrations.
    async fn create_webhook(&self, webhook: &Webhook) -> Result<()>;

    /// Flips a registration's active flag.
    ///
    /// Disabling a webhook short-circuits future delivery attempts before
    /// any network call.
    async fn set_webhook_active(&self, id: WebhookId, is_active: bool) -> Result<()>;

    /// Active webhooks subscribed to `event_type`, in registration order.
    ///
    /// Registration order determines precedence for sync fan-out.
    async fn webhooks_for_event(&self, event_type: EventType) -> Result<Vec<Webhook>>;

    /// Persists rendered payload bodies in one batch operation.
    async fn create_payloads(&self, bodies: Vec<String>) -> Result<Vec<EventPayload>>;

    /// Creates one pending delivery per `(webhook, payload)` pair in one
    /// batch operation.
    ///
    /// Payloads must already exist; fan-out therefore costs two round
    /// trips regardless of webhook count.
    async fn create_deliveries(
        &self,
        event_type: EventType,
        pairs: &[(WebhookId, PayloadId)],
    ) -> Result<Vec<EventDelivery>>;

    /// Loads a delivery with its webhook and payload.
    ///
    /// Returns `Ok(None)` when the row no longer exists, e.g. a scheduled
    /// retry racing a manual purge. Callers treat that as a soft failure.
    async fn find_delivery(&self, id: DeliveryId) -> Result<Option<DeliveryRecord>>;

    /// Inserts a pending attempt row immediately before a send and bumps
    /// the delivery's attempt count.
    ///
    /// A crash between this insert and the response still leaves an
    /// auditable attempt.
    async fn record_attempt(
        &self,
        delivery_id: DeliveryId,
        task_id: Option<String>,
    ) -> Result<DeliveryAttempt>;

    /// Attaches the transport outcome to a pending attempt row.
    async fn update_attempt(&self, attempt_id: AttemptId, response: &WebhookResponse)
        -> Result<()>;

    /// Sets the delivery's status.
    async fn update_delivery_status(&self, id: DeliveryId, status: DeliveryStatus) -> Result<()>;

    /// Detaches the payload reference after a terminal success.
    ///
    /// No-op for deliveries in any other state.
    async fn clear_if_successful(&self, id: DeliveryId) -> Result<()>;

    /// Re-queues a delivery to run at `run_after`.
    ///
    /// The delivery stays pending; workers will not claim it before the
    /// given instant.
    async fn set_next_attempt(&self, id: DeliveryId, run_after: DateTime<Utc>) -> Result<()>;

    /// Claims up to `batch` due pending deliveries for processing.
    ///
    /// A claimed delivery will not be returned to concurrent claimers until
    /// its processing writes a new state.
    async fn claim_due_deliveries(
        &self,
        now: DateTime<Utc>,
        batch: usize,
    ) -> Result<Vec<DeliveryId>>;

    /// All attempts for a delivery, oldest first.
    async fn attempts_for_delivery(&self, id: DeliveryId) -> Result<Vec<DeliveryAttempt>>;
}
