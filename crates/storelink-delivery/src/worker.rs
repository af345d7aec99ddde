//! Delivery workers: claim due deliveries and push them through the
//! transport with bounded retries.
//!
//! Each worker loops claim → process → record. Parallelism comes from
//! running independent workers; within one delivery execution everything is
//! sequential. A delivery's outcome is always captured in its attempt and
//! delivery rows — transport failures never escape a task execution.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use storelink_core::{
    DeliveryId, DeliveryStatus, DeliveryStore, WebhookResponse,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    error::Result,
    observability::ObservabilityBuffer,
    retry::{RetryDecision, RetryPolicy},
    scheduler::Scheduler,
    transport::TransportDispatcher,
};

/// Configuration for the delivery worker pool.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Number of concurrent delivery workers.
    pub worker_count: usize,
    /// Maximum deliveries to claim per poll.
    pub batch_size: usize,
    /// How often idle workers poll for due deliveries.
    pub poll_interval: Duration,
    /// Maximum time to wait for workers during graceful shutdown.
    pub shutdown_timeout: Duration,
    /// Retry policy applied to failed deliveries.
    pub retry_policy: RetryPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_count: crate::DEFAULT_WORKER_COUNT,
            batch_size: crate::DEFAULT_BATCH_SIZE,
            poll_interval: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(30),
            retry_policy: RetryPolicy::default(),
        }
    }
}

/// One delivery worker processing claimed deliveries to completion.
pub struct DeliveryWorker {
    id: usize,
    store: Arc<dyn DeliveryStore>,
    dispatcher: Arc<TransportDispatcher>,
    scheduler: Arc<dyn Scheduler>,
    buffer: Arc<ObservabilityBuffer>,
    domain: String,
    config: WorkerConfig,
    cancel: CancellationToken,
}

impl DeliveryWorker {
    /// Creates a worker over the shared pipeline components.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: usize,
        store: Arc<dyn DeliveryStore>,
        dispatcher: Arc<TransportDispatcher>,
        scheduler: Arc<dyn Scheduler>,
        buffer: Arc<ObservabilityBuffer>,
        domain: String,
        config: WorkerConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self { id, store, dispatcher, scheduler, buffer, domain, config, cancel }
    }

    /// Claims and processes due deliveries until cancelled.
    pub async fn run(&self) -> Result<()> {
        info!(worker_id = self.id, "delivery worker starting");

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let claimed = match self
                .store
                .claim_due_deliveries(Utc::now(), self.config.batch_size)
                .await
            {
                Ok(claimed) => claimed,
                Err(e) => {
                    error!(worker_id = self.id, error = %e, "failed to claim deliveries");
                    tokio::select! {
                        () = tokio::time::sleep(Duration::from_secs(5)) => continue,
                        () = self.cancel.cancelled() => break,
                    }
                },
            };

            if claimed.is_empty() {
                tokio::select! {
                    () = tokio::time::sleep(self.config.poll_interval) => continue,
                    () = self.cancel.cancelled() => break,
                }
            }

            debug!(worker_id = self.id, batch = claimed.len(), "processing claimed deliveries");
            for delivery_id in claimed {
                if self.cancel.is_cancelled() {
                    break;
                }
                if let Err(e) = self.send_webhook_request(delivery_id).await {
                    error!(
                        worker_id = self.id,
                        delivery_id = %delivery_id,
                        error = %e,
                        "delivery task failed"
                    );
                }
            }
        }

        info!(worker_id = self.id, "delivery worker stopped");
        Ok(())
    }

    /// Executes one delivery attempt: the body of a background task.
    ///
    /// Guard clauses run before any attempt row is written: a purged
    /// delivery row is logged and dropped (soft failure, nothing to
    /// requeue), and an inactive webhook fails the delivery without a
    /// network call. Otherwise the attempt row is created first, the
    /// transport is invoked, and the outcome decides between terminal
    /// success, a scheduled retry, and terminal failure.
    pub async fn send_webhook_request(&self, delivery_id: DeliveryId) -> Result<()> {
        let task_id = Uuid::new_v4().to_string();

        let Some(record) = self.store.find_delivery(delivery_id).await? else {
            error!(delivery_id = %delivery_id, "event delivery not found");
            return Ok(());
        };
        let delivery = &record.delivery;
        let webhook = &record.webhook;

        if !webhook.is_active {
            self.store.update_delivery_status(delivery_id, DeliveryStatus::Failed).await?;
            info!(
                delivery_id = %delivery_id,
                webhook_id = %webhook.id,
                "webhook is disabled, delivery failed without attempt"
            );
            return Ok(());
        }

        let mut attempt = self.store.record_attempt(delivery_id, Some(task_id)).await?;
        let attempt_number = u32::try_from(delivery.attempt_count).unwrap_or(0) + 1;

        let Some(payload) = &record.payload else {
            let response = WebhookResponse::failed(
                format!("event delivery {delivery_id} has no payload"),
                Duration::ZERO,
            );
            self.store.update_attempt(attempt.id, &response).await?;
            self.store.update_delivery_status(delivery_id, DeliveryStatus::Failed).await?;
            attempt.status = DeliveryStatus::Failed;
            self.buffer.report_delivery_attempt(
                &attempt,
                delivery.event_type,
                webhook.id,
                None,
            );
            return Ok(());
        };

        let dispatched = self
            .dispatcher
            .dispatch(
                &webhook.target_url,
                payload.body.clone().into_bytes().into(),
                &self.domain,
                webhook.secret_key.as_deref(),
                delivery.event_type,
            )
            .await;

        let response = match dispatched {
            Ok(response) => response,
            Err(e) if e.is_configuration() => {
                // Operator error: capture into the records, never retry.
                let response = WebhookResponse::failed(e.to_string(), Duration::ZERO);
                self.store.update_attempt(attempt.id, &response).await?;
                self.store.update_delivery_status(delivery_id, DeliveryStatus::Failed).await?;
                attempt.status = DeliveryStatus::Failed;
                self.buffer.report_delivery_attempt(
                    &attempt,
                    delivery.event_type,
                    webhook.id,
                    None,
                );
                error!(
                    delivery_id = %delivery_id,
                    webhook_id = %webhook.id,
                    error = %e,
                    "webhook misconfigured, delivery failed"
                );
                return Ok(());
            },
            Err(e) => return Err(e),
        };

        self.store.update_attempt(attempt.id, &response).await?;
        attempt.status = response.delivery_status();
        attempt.response_status_code = response.status_code.map(i32::from);
        attempt.duration = Some(response.duration.as_secs_f64());

        if response.is_success() {
            self.store.update_delivery_status(delivery_id, DeliveryStatus::Success).await?;
            self.store.clear_if_successful(delivery_id).await?;
            self.buffer.report_delivery_attempt(
                &attempt,
                delivery.event_type,
                webhook.id,
                None,
            );
            info!(
                delivery_id = %delivery_id,
                webhook_id = %webhook.id,
                event_type = %delivery.event_type,
                attempt_number,
                "payload delivered"
            );
            return Ok(());
        }

        match self.config.retry_policy.decide(attempt_number) {
            RetryDecision::Retry { delay } => {
                let next_retry = Utc::now()
                    + chrono::Duration::from_std(delay)
                        .unwrap_or_else(|_| chrono::Duration::seconds(i32::MAX.into()));
                self.scheduler.enqueue(delivery_id, next_retry).await?;
                self.buffer.report_delivery_attempt(
                    &attempt,
                    delivery.event_type,
                    webhook.id,
                    Some(next_retry),
                );
                info!(
                    delivery_id = %delivery_id,
                    webhook_id = %webhook.id,
                    attempt_number,
                    next_retry = %next_retry,
                    response = %response.content,
                    "delivery failed, retry scheduled"
                );
            },
            RetryDecision::GiveUp => {
                self.store.update_delivery_status(delivery_id, DeliveryStatus::Failed).await?;
                self.buffer.report_delivery_attempt(
                    &attempt,
                    delivery.event_type,
                    webhook.id,
                    None,
                );
                warn!(
                    delivery_id = %delivery_id,
                    webhook_id = %webhook.id,
                    target_url = %webhook.target_url,
                    attempt_number,
                    "delivery failed, retry limit exceeded"
                );
            },
        }

        Ok(())
    }
}

/// Supervises a fixed set of delivery workers.
pub struct WorkerPool {
    handles: Vec<JoinHandle<Result<()>>>,
    cancel: CancellationToken,
    shutdown_timeout: Duration,
}

impl WorkerPool {
    /// Spawns `config.worker_count` workers over the shared components.
    pub fn spawn(
        store: Arc<dyn DeliveryStore>,
        dispatcher: Arc<TransportDispatcher>,
        scheduler: Arc<dyn Scheduler>,
        buffer: Arc<ObservabilityBuffer>,
        domain: String,
        config: WorkerConfig,
        cancel: CancellationToken,
    ) -> Self {
        let mut handles = Vec::with_capacity(config.worker_count);
        for worker_id in 0..config.worker_count {
            let worker = DeliveryWorker::new(
                worker_id,
                store.clone(),
                dispatcher.clone(),
                scheduler.clone(),
                buffer.clone(),
                domain.clone(),
                config.clone(),
                cancel.clone(),
            );
            handles.push(tokio::spawn(async move { worker.run().await }));
        }

        info!(worker_count = handles.len(), "delivery worker pool started");
        Self { handles, cancel, shutdown_timeout: config.shutdown_timeout }
    }

    /// Signals cancellation and waits for in-flight deliveries to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();

        let join_all = async {
            for (worker_id, handle) in self.handles.into_iter().enumerate() {
                match handle.await {
                    Ok(Ok(())) => {},
                    Ok(Err(e)) => {
                        warn!(worker_id, error = %e, "worker finished with error during shutdown");
                    },
                    Err(e) => {
                        error!(worker_id, error = %e, "worker task panicked");
                    },
                }
            }
        };

        if tokio::time::timeout(self.shutdown_timeout, join_all).await.is_err() {
            warn!("worker shutdown timeout exceeded, abandoning remaining workers");
        } else {
            info!("delivery worker pool stopped");
        }
    }
}
