//! Error taxonomy for delivery operations.
//!
//! Transport-level failures are not errors here: they surface as failed
//! [`storelink_core::WebhookResponse`] values and are absorbed into the
//! attempt/delivery records. Only configuration mistakes, rendering
//! contract violations, and store failures propagate as `DeliveryError`.

use storelink_core::{CoreError, EventType};
use thiserror::Error;

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Errors raised by the delivery pipeline.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Target URL scheme has no registered transport.
    ///
    /// A misconfigured webhook an operator must fix; never retried.
    #[error("unknown webhook scheme: {scheme:?}")]
    UnknownScheme {
        /// The unrecognized scheme, as written in the target URL.
        scheme: String,
    },

    /// Target URL could not be parsed at all.
    #[error("invalid webhook target url: {0}")]
    InvalidTargetUrl(String),

    /// A sync call was made without a webhook to call.
    ///
    /// Distinct from "no provider answered": callers reach this only when
    /// they skipped resolving webhooks for the event type first.
    #[error("no webhook found for sync event: {event_type}")]
    MissingWebhook {
        /// The sync event type that had no webhook supplied.
        event_type: EventType,
    },

    /// Subscription rendering produced no data for a sync call.
    ///
    /// Sync callers require an authoritative answer, so an empty render is
    /// a hard, retryable failure rather than a skip.
    #[error("subscription query produced no payload for event: {event_type}")]
    EmptyRender {
        /// The event type whose rendering came back empty.
        event_type: EventType,
    },

    /// The referenced delivery row no longer exists.
    #[error("event delivery not found: {0}")]
    DeliveryNotFound(String),

    /// Persistence failed beneath the pipeline.
    #[error("store error: {0}")]
    Store(#[from] CoreError),

    /// Unexpected internal failure.
    #[error("internal delivery error: {0}")]
    Internal(String),
}

impl DeliveryError {
    /// Returns true for operator-fixable configuration mistakes that must
    /// never be retried.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::UnknownScheme { .. } | Self::InvalidTargetUrl(_))
    }
}
