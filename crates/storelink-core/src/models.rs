//! Durable record types of the delivery pipeline.
//!
//! A domain event fans out to webhooks as one [`EventPayload`] shared by (or
//! rendered per) webhook, one [`EventDelivery`] per webhook, and one
//! [`DeliveryAttempt`] per network call made in service of a delivery.
//! Attempt rows are append-only; the delivery status always reflects the
//! latest attempt's outcome.

use std::{collections::HashMap, fmt, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event_types::EventType;

type PgDb = sqlx::Postgres;
type PgValueRef<'r> = sqlx::postgres::PgValueRef<'r>;
type PgTypeInfo = sqlx::postgres::PgTypeInfo;
type PgArgumentBuffer = sqlx::postgres::PgArgumentBuffer;
type EncodeResult =
    Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync + 'static>>;
type BoxDynError = sqlx::error::BoxDynError;

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Creates a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl sqlx::Type<PgDb> for $name {
            fn type_info() -> PgTypeInfo {
                <Uuid as sqlx::Type<PgDb>>::type_info()
            }
        }

        impl<'r> sqlx::Decode<'r, PgDb> for $name {
            fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
                Ok(Self(<Uuid as sqlx::Decode<PgDb>>::decode(value)?))
            }
        }

        impl sqlx::Encode<'_, PgDb> for $name {
            fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
                <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
            }
        }
    };
}

uuid_id! {
    /// Strongly-typed webhook registration identifier.
    WebhookId
}

uuid_id! {
    /// Strongly-typed event payload identifier.
    PayloadId
}

uuid_id! {
    /// Strongly-typed event delivery identifier.
    DeliveryId
}

uuid_id! {
    /// Strongly-typed delivery attempt identifier.
    AttemptId
}

/// Delivery and attempt lifecycle status.
///
/// Status strictly advances `pending -> {success, failed}`. A failed async
/// delivery may be re-queued for another attempt, but its terminal status is
/// written only once retries are exhausted or an attempt succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Created and waiting for (another) delivery attempt.
    Pending,
    /// Terminal: the latest attempt was accepted by the target.
    Success,
    /// Terminal: retries exhausted or a non-retryable condition occurred.
    Failed,
}

impl DeliveryStatus {
    /// Returns true for the terminal states.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl sqlx::Type<PgDb> for DeliveryStatus {
    fn type_info() -> PgTypeInfo {
        <&str as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for DeliveryStatus {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        match s {
            "pending" => Ok(Self::Pending),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("invalid delivery status: {s}").into()),
        }
    }
}

impl sqlx::Encode<'_, PgDb> for DeliveryStatus {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <String as sqlx::Encode<PgDb>>::encode_by_ref(&self.to_string(), buf)
    }
}

/// Webhook registration describing where and how to deliver.
///
/// The target URL scheme selects the wire transport at dispatch time. A
/// configured subscription query switches payload rendering from the fixed
/// per-event-type schema to the webhook's own query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Webhook {
    /// Unique identifier for this registration.
    pub id: WebhookId,

    /// Name of the app that owns this webhook.
    pub app_name: String,

    /// Delivery target. Scheme must be one of `http`, `https`, `awssqs`,
    /// `gcpubsub`.
    pub target_url: String,

    /// Secret used to sign outgoing payloads. Unsigned when absent.
    pub secret_key: Option<String>,

    /// Per-webhook subscription query defining the payload shape.
    ///
    /// Presence selects subscription-based rendering over the fixed schema.
    pub subscription_query: Option<String>,

    /// Inactive webhooks are skipped before any network call.
    pub is_active: bool,

    /// Event types this webhook is subscribed to.
    pub events: Vec<EventType>,

    /// When this registration was created.
    pub created_at: DateTime<Utc>,
}

impl Webhook {
    /// Creates an active registration subscribed to the given events.
    pub fn new(
        app_name: impl Into<String>,
        target_url: impl Into<String>,
        events: Vec<EventType>,
    ) -> Self {
        Self {
            id: WebhookId::new(),
            app_name: app_name.into(),
            target_url: target_url.into(),
            secret_key: None,
            subscription_query: None,
            is_active: true,
            events,
            created_at: Utc::now(),
        }
    }
}

/// Immutable serialized snapshot of a domain event at dispatch time.
///
/// One payload may be shared by many deliveries (fixed-schema fan-out) or
/// owned by a single delivery (subscription rendering).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventPayload {
    /// Unique identifier for this payload.
    pub id: PayloadId,

    /// JSON body as persisted text.
    pub body: String,

    /// When the payload was rendered.
    pub created_at: DateTime<Utc>,
}

impl EventPayload {
    /// Creates a payload from a rendered JSON body.
    pub fn new(body: impl Into<String>) -> Self {
        Self { id: PayloadId::new(), body: body.into(), created_at: Utc::now() }
    }
}

/// One intended delivery of a payload to one webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventDelivery {
    /// Unique identifier for this delivery.
    pub id: DeliveryId,

    /// Event type this delivery carries.
    pub event_type: EventType,

    /// Current lifecycle status.
    pub status: DeliveryStatus,

    /// Target webhook registration.
    pub webhook_id: WebhookId,

    /// Payload reference.
    ///
    /// Detached after a terminal success so payload bodies can be collected
    /// independently of delivery history retention.
    pub payload_id: Option<PayloadId>,

    /// Number of attempts made so far.
    pub attempt_count: i32,

    /// When the next attempt is due. `None` means due immediately.
    pub next_attempt_at: Option<DateTime<Utc>>,

    /// When the delivery was created.
    pub created_at: DateTime<Utc>,
}

impl EventDelivery {
    /// Creates a pending delivery of `payload_id` to `webhook_id`.
    pub fn new(event_type: EventType, webhook_id: WebhookId, payload_id: PayloadId) -> Self {
        Self {
            id: DeliveryId::new(),
            event_type,
            status: DeliveryStatus::Pending,
            webhook_id,
            payload_id: Some(payload_id),
            attempt_count: 0,
            next_attempt_at: None,
            created_at: Utc::now(),
        }
    }
}

/// One concrete network attempt made in service of a delivery.
///
/// Created in pending state immediately before the send so that a crash
/// mid-attempt still leaves an auditable row. Response fields are attached
/// once, when the transport call returns; rows are never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    /// Unique identifier for this attempt.
    pub id: AttemptId,

    /// Delivery this attempt was made for.
    pub delivery_id: DeliveryId,

    /// Background task execution id, when dispatched asynchronously.
    pub task_id: Option<String>,

    /// Headers sent with the request.
    pub request_headers: Option<HashMap<String, String>>,

    /// Headers received in the response.
    pub response_headers: Option<HashMap<String, String>>,

    /// HTTP status code, when the transport produced one.
    pub response_status_code: Option<i32>,

    /// Response body or transport error description.
    pub response_body: String,

    /// Wall-clock seconds spent in the transport call.
    pub duration: Option<f64>,

    /// Outcome of this attempt.
    pub status: DeliveryStatus,

    /// When the attempt row was created.
    pub created_at: DateTime<Utc>,
}

/// Normalized outcome of one transport call. Not persisted as its own
/// entity; its fields are attached to the pending [`DeliveryAttempt`].
#[derive(Debug, Clone, Default)]
pub struct WebhookResponse {
    /// Response body text, or an error description for failed calls.
    pub content: String,

    /// Headers sent with the request, when known.
    pub request_headers: Option<HashMap<String, String>>,

    /// Headers received, when the target responded.
    pub response_headers: Option<HashMap<String, String>>,

    /// HTTP status code, when the transport produced one.
    pub status_code: Option<u16>,

    /// Wall-clock duration of the transport call only.
    pub duration: Duration,

    /// Whether the target accepted the message.
    pub status: ResponseStatus,
}

/// Outcome classification of a transport call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseStatus {
    /// The target accepted the message.
    #[default]
    Success,
    /// The call failed; `content` carries the error detail.
    Failed,
}

impl WebhookResponse {
    /// Builds a successful response with the given content.
    pub fn success(content: impl Into<String>, duration: Duration) -> Self {
        Self {
            content: content.into(),
            duration,
            status: ResponseStatus::Success,
            ..Self::default()
        }
    }

    /// Builds a failed response carrying an error description.
    pub fn failed(content: impl Into<String>, duration: Duration) -> Self {
        Self {
            content: content.into(),
            duration,
            status: ResponseStatus::Failed,
            ..Self::default()
        }
    }

    /// Returns true when the target accepted the message.
    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }

    /// Delivery status this response maps to.
    pub fn delivery_status(&self) -> DeliveryStatus {
        match self.status {
            ResponseStatus::Success => DeliveryStatus::Success,
            ResponseStatus::Failed => DeliveryStatus::Failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivery_status_display_matches_storage_format() {
        assert_eq!(DeliveryStatus::Pending.to_string(), "pending");
        assert_eq!(DeliveryStatus::Success.to_string(), "success");
        assert_eq!(DeliveryStatus::Failed.to_string(), "failed");
    }

    #[test]
    fn terminal_states_identified() {
        assert!(!DeliveryStatus::Pending.is_terminal());
        assert!(DeliveryStatus::Success.is_terminal());
        assert!(DeliveryStatus::Failed.is_terminal());
    }

    #[test]
    fn new_delivery_is_pending_with_payload() {
        let webhook = Webhook::new("app", "https://example.com/hook", vec![]);
        let payload = EventPayload::new("{}");
        let delivery = EventDelivery::new(EventType::OrderCreated, webhook.id, payload.id);

        assert_eq!(delivery.status, DeliveryStatus::Pending);
        assert_eq!(delivery.payload_id, Some(payload.id));
        assert_eq!(delivery.attempt_count, 0);
    }

    #[test]
    fn response_maps_to_delivery_status() {
        let ok = WebhookResponse::success("", Duration::from_millis(5));
        let bad = WebhookResponse::failed("boom", Duration::ZERO);

        assert_eq!(ok.delivery_status(), DeliveryStatus::Success);
        assert_eq!(bad.delivery_status(), DeliveryStatus::Failed);
    }
}
