//! Core domain models and persistence for webhook event delivery.
//!
//! Defines the durable record types of the delivery pipeline — payloads,
//! deliveries, attempts, webhook registrations — together with the
//! `DeliveryStore` persistence boundary that the delivery engine and the
//! sync coordinator operate against.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod event_types;
pub mod models;
pub mod storage;

pub use error::{CoreError, Result};
pub use event_types::EventType;
pub use models::{
    AttemptId, DeliveryAttempt, DeliveryId, DeliveryStatus, EventDelivery, EventPayload,
    PayloadId, ResponseStatus, Webhook, WebhookId, WebhookResponse,
};
pub use storage::{DeliveryRecord, DeliveryStore};
