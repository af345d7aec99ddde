//! Postgres-backed store.
//!
//! The deliveries table is the durable work queue. Claiming uses
//! `FOR UPDATE SKIP LOCKED` so independent workers drain due deliveries
//! without contending; fan-out inserts are batched with `UNNEST` so creating
//! N deliveries costs two round trips.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::{
    error::{CoreError, Result},
    event_types::EventType,
    models::{
        AttemptId, DeliveryAttempt, DeliveryId, DeliveryStatus, EventDelivery, EventPayload,
        PayloadId, Webhook, WebhookId, WebhookResponse,
    },
    storage::{DeliveryRecord, DeliveryStore, CLAIM_LEASE_SECS},
};

/// Production [`DeliveryStore`] backed by a Postgres pool.
#[derive(Clone)]
pub struct PgDeliveryStore {
    pool: PgPool,
}

impl PgDeliveryStore {
    /// Creates a store over an existing connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Returns the underlying pool, e.g. for health checks.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn load_events(&self, webhook_ids: &[Uuid]) -> Result<HashMap<Uuid, Vec<EventType>>> {
        let rows = sqlx::query(
            r"
            SELECT webhook_id, event_type
            FROM webhook_event_subscriptions
            WHERE webhook_id = ANY($1)
            ",
        )
        .bind(webhook_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut by_webhook: HashMap<Uuid, Vec<EventType>> = HashMap::new();
        for row in rows {
            let webhook_id: Uuid = row.try_get("webhook_id")?;
            let event_type: EventType = row.try_get("event_type")?;
            by_webhook.entry(webhook_id).or_default().push(event_type);
        }
        Ok(by_webhook)
    }

    fn webhook_from_row(row: &sqlx::postgres::PgRow, events: Vec<EventType>) -> Result<Webhook> {
        Ok(Webhook {
            id: row.try_get("id").map(WebhookId).map_err(CoreError::from)?,
            app_name: row.try_get("app_name")?,
            target_url: row.try_get("target_url")?,
            secret_key: row.try_get("secret_key")?,
            subscription_query: row.try_get("subscription_query")?,
            is_active: row.try_get("is_active")?,
            events,
            created_at: row.try_get("created_at")?,
        })
    }

    fn delivery_from_row(row: &sqlx::postgres::PgRow) -> Result<EventDelivery> {
        Ok(EventDelivery {
            id: row.try_get("id").map(DeliveryId).map_err(CoreError::from)?,
            event_type: row.try_get("event_type")?,
            status: row.try_get("status")?,
            webhook_id: row.try_get("webhook_id").map(WebhookId).map_err(CoreError::from)?,
            payload_id: row
                .try_get::<Option<Uuid>, _>("payload_id")
                .map_err(CoreError::from)?
                .map(PayloadId),
            attempt_count: row.try_get("attempt_count")?,
            next_attempt_at: row.try_get("next_attempt_at")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn attempt_from_row(row: &sqlx::postgres::PgRow) -> Result<DeliveryAttempt> {
        let request_headers: Option<sqlx::types::Json<HashMap<String, String>>> =
            row.try_get("request_headers")?;
        let response_headers: Option<sqlx::types::Json<HashMap<String, String>>> =
            row.try_get("response_headers")?;

        Ok(DeliveryAttempt {
            id: row.try_get("id").map(AttemptId).map_err(CoreError::from)?,
            delivery_id: row.try_get("delivery_id").map(DeliveryId).map_err(CoreError::from)?,
            task_id: row.try_get("task_id")?,
            request_headers: request_headers.map(|h| h.0),
            response_headers: response_headers.map(|h| h.0),
            response_status_code: row.try_get("response_status_code")?,
            response_body: row.try_get("response_body")?,
            duration: row.try_get("duration")?,
            status: row.try_get("status")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl DeliveryStore for PgDeliveryStore {
    async fn create_webhook(&self, webhook: &Webhook) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r"
            INSERT INTO webhooks (
                id, app_name, target_url, secret_key, subscription_query,
                is_active, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            ",
        )
        .bind(webhook.id.0)
        .bind(&webhook.app_name)
        .bind(&webhook.target_url)
        .bind(&webhook.secret_key)
        .bind(&webhook.subscription_query)
        .bind(webhook.is_active)
        .bind(webhook.created_at)
        .execute(&mut *tx)
        .await?;

        for event_type in &webhook.events {
            sqlx::query(
                r"
                INSERT INTO webhook_event_subscriptions (webhook_id, event_type)
                VALUES ($1, $2)
                ",
            )
            .bind(webhook.id.0)
            .bind(event_type)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn set_webhook_active(&self, id: WebhookId, is_active: bool) -> Result<()> {
        let result = sqlx::query("UPDATE webhooks SET is_active = $1 WHERE id = $2")
            .bind(is_active)
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!("webhook not found: {id}")));
        }
        Ok(())
    }

    async fn webhooks_for_event(&self, event_type: EventType) -> Result<Vec<Webhook>> {
        let rows = sqlx::query(
            r"
            SELECT w.id, w.app_name, w.target_url, w.secret_key,
                   w.subscription_query, w.is_active, w.created_at
            FROM webhooks w
            JOIN webhook_event_subscriptions s ON s.webhook_id = w.id
            WHERE w.is_active AND s.event_type = $1
            ORDER BY w.created_at ASC
            ",
        )
        .bind(event_type)
        .fetch_all(&self.pool)
        .await?;

        let ids: Vec<Uuid> = rows
            .iter()
            .map(|row| row.try_get::<Uuid, _>("id").map_err(CoreError::from))
            .collect::<Result<_>>()?;
        let mut events = self.load_events(&ids).await?;

        rows.iter()
            .map(|row| {
                let id: Uuid = row.try_get("id")?;
                Self::webhook_from_row(row, events.remove(&id).unwrap_or_default())
            })
            .collect()
    }

    async fn create_payloads(&self, bodies: Vec<String>) -> Result<Vec<EventPayload>> {
        let payloads: Vec<EventPayload> = bodies.into_iter().map(EventPayload::new).collect();
        if payloads.is_empty() {
            return Ok(payloads);
        }

        let ids: Vec<Uuid> = payloads.iter().map(|p| p.id.0).collect();
        let texts: Vec<String> = payloads.iter().map(|p| p.body.clone()).collect();
        let stamps: Vec<DateTime<Utc>> = payloads.iter().map(|p| p.created_at).collect();

        sqlx::query(
            r"
            INSERT INTO event_payloads (id, body, created_at)
            SELECT * FROM UNNEST($1::uuid[], $2::text[], $3::timestamptz[])
            ",
        )
        .bind(&ids)
        .bind(&texts)
        .bind(&stamps)
        .execute(&self.pool)
        .await?;

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
        if deliveries.is_empty() {
            return Ok(deliveries);
        }

        let ids: Vec<Uuid> = deliveries.iter().map(|d| d.id.0).collect();
        let webhook_ids: Vec<Uuid> = deliveries.iter().map(|d| d.webhook_id.0).collect();
        let payload_ids: Vec<Uuid> =
            deliveries.iter().filter_map(|d| d.payload_id.map(|p| p.0)).collect();
        let stamps: Vec<DateTime<Utc>> = deliveries.iter().map(|d| d.created_at).collect();

        sqlx::query(
            r"
            INSERT INTO event_deliveries (
                id, event_type, status, webhook_id, payload_id,
                attempt_count, next_attempt_at, created_at
            )
            SELECT ids, $1, 'pending', whs, pls, 0, NULL, ts
            FROM UNNEST($2::uuid[], $3::uuid[], $4::uuid[], $5::timestamptz[])
                AS t(ids, whs, pls, ts)
            ",
        )
        .bind(event_type)
        .bind(&ids)
        .bind(&webhook_ids)
        .bind(&payload_ids)
        .bind(&stamps)
        .execute(&self.pool)
        .await?;

        Ok(deliveries)
    }

    async fn find_delivery(&self, id: DeliveryId) -> Result<Option<DeliveryRecord>> {
        let Some(delivery_row) = sqlx::query(
            r"
            SELECT id, event_type, status, webhook_id, payload_id,
                   attempt_count, next_attempt_at, created_at
            FROM event_deliveries
            WHERE id = $1
            ",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };
        let delivery = Self::delivery_from_row(&delivery_row)?;

        let webhook_row = sqlx::query(
            r"
            SELECT id, app_name, target_url, secret_key, subscription_query,
                   is_active, created_at
            FROM webhooks
            WHERE id = $1
            ",
        )
        .bind(delivery.webhook_id.0)
        .fetch_one(&self.pool)
        .await?;
        let events = self
            .load_events(&[delivery.webhook_id.0])
            .await?
            .remove(&delivery.webhook_id.0)
            .unwrap_or_default();
        let webhook = Self::webhook_from_row(&webhook_row, events)?;

        let payload = match delivery.payload_id {
            Some(payload_id) => sqlx::query(
                "SELECT id, body, created_at FROM event_payloads WHERE id = $1",
            )
            .bind(payload_id.0)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| -> Result<EventPayload> {
                Ok(EventPayload {
                    id: row.try_get("id").map(PayloadId).map_err(CoreError::from)?,
                    body: row.try_get("body")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .transpose()?,
            None => None,
        };

        Ok(Some(DeliveryRecord { delivery, webhook, payload }))
    }

    async fn record_attempt(
        &self,
        delivery_id: DeliveryId,
        task_id: Option<String>,
    ) -> Result<DeliveryAttempt> {
        let mut tx = self.pool.begin().await?;

        let bumped = sqlx::query(
            "UPDATE event_deliveries SET attempt_count = attempt_count + 1 WHERE id = $1",
        )
        .bind(delivery_id.0)
        .execute(&mut *tx)
        .await?;
        if bumped.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!("delivery not found: {delivery_id}")));
        }

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

        sqlx::query(
            r"
            INSERT INTO delivery_attempts (
                id, delivery_id, task_id, response_body, status, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6)
            ",
        )
        .bind(attempt.id.0)
        .bind(attempt.delivery_id.0)
        .bind(&attempt.task_id)
        .bind(&attempt.response_body)
        .bind(attempt.status)
        .bind(attempt.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(attempt)
    }

    async fn update_attempt(
        &self,
        attempt_id: AttemptId,
        response: &WebhookResponse,
    ) -> Result<()> {
        sqlx::query(
            r"
            UPDATE delivery_attempts
            SET request_headers = $1, response_headers = $2,
                response_status_code = $3, response_body = $4,
                duration = $5, status = $6
            WHERE id = $7
            ",
        )
        .bind(response.request_headers.as_ref().map(sqlx::types::Json))
        .bind(response.response_headers.as_ref().map(sqlx::types::Json))
        .bind(response.status_code.map(i32::from))
        .bind(&response.content)
        .bind(response.duration.as_secs_f64())
        .bind(response.delivery_status())
        .bind(attempt_id.0)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_delivery_status(&self, id: DeliveryId, status: DeliveryStatus) -> Result<()> {
        sqlx::query("UPDATE event_deliveries SET status = $1 WHERE id = $2")
            .bind(status)
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn clear_if_successful(&self, id: DeliveryId) -> Result<()> {
        sqlx::query(
            "UPDATE event_deliveries SET payload_id = NULL WHERE id = $1 AND status = 'success'",
        )
        .bind(id.0)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_next_attempt(&self, id: DeliveryId, run_after: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE event_deliveries SET next_attempt_at = $1 WHERE id = $2")
            .bind(run_after)
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn claim_due_deliveries(
        &self,
        now: DateTime<Utc>,
        batch: usize,
    ) -> Result<Vec<DeliveryId>> {
        let lease_until = now + chrono::Duration::seconds(CLAIM_LEASE_SECS);
        let rows = sqlx::query(
            r"
            UPDATE event_deliveries
            SET next_attempt_at = $1
            WHERE id IN (
                SELECT id FROM event_deliveries
                WHERE status = 'pending'
                  AND (next_attempt_at IS NULL OR next_attempt_at <= $2)
                ORDER BY created_at ASC
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id
            ",
        )
        .bind(lease_until)
        .bind(now)
        .bind(i64::try_from(batch).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                row.try_get::<Uuid, _>("id").map(DeliveryId).map_err(CoreError::from)
            })
            .collect()
    }

    async fn attempts_for_delivery(&self, id: DeliveryId) -> Result<Vec<DeliveryAttempt>> {
        let rows = sqlx::query(
            r"
            SELECT id, delivery_id, task_id, request_headers, response_headers,
                   response_status_code, response_body, duration, status, created_at
            FROM delivery_attempts
            WHERE delivery_id = $1
            ORDER BY created_at ASC
            ",
        )
        .bind(id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::attempt_from_row).collect()
    }
}
