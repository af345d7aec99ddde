//! Work-queue abstraction for async deliveries.
//!
//! Call sites depend on the [`Scheduler`] interface rather than a
//! process-wide task registry. The concrete implementation re-queues
//! through the durable store: the deliveries table is the queue, and
//! workers claim due rows.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use storelink_core::{DeliveryId, DeliveryStore};

use crate::error::Result;

/// Enqueues a delivery to run at (or after) a given instant.
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Queues `delivery_id` to be attempted once `run_after` has passed.
    async fn enqueue(&self, delivery_id: DeliveryId, run_after: DateTime<Utc>) -> Result<()>;
}

/// [`Scheduler`] backed by the durable delivery store.
pub struct StoreScheduler {
    store: Arc<dyn DeliveryStore>,
}

impl StoreScheduler {
    /// Creates a scheduler writing through the given store.
    pub fn new(store: Arc<dyn DeliveryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Scheduler for StoreScheduler {
    async fn enqueue(&self, delivery_id: DeliveryId, run_after: DateTime<Utc>) -> Result<()> {
        self.store.set_next_attempt(delivery_id, run_after).await?;
        Ok(())
    }
}
