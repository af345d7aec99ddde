//! Test fixtures and doubles shared by the delivery pipeline tests.

#![forbid(unsafe_code)]

pub mod fixtures;

pub use fixtures::{seed_delivery, ScriptedExecutor, WebhookBuilder};
