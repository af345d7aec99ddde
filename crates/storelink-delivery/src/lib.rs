//! Webhook delivery engine.
//!
//! Implements the event delivery pipeline for the commerce platform:
//! payload rendering (fixed-schema or per-webhook subscription queries),
//! multi-transport dispatch (HTTP/S, AWS SQS, Google Cloud Pub/Sub),
//! background delivery workers with exponential-backoff retries, the
//! synchronous "first acceptable answer" coordinator for payment/tax/
//! shipping integrations, and the observability event batcher.
//!
//! # Architecture
//!
//! ```text
//! domain event ─▶ fan-out ─▶ DeliveryStore (payloads, deliveries)
//!                                │
//!                  Scheduler ◀───┘          sync event
//!                     │                         │
//!                WorkerPool ─▶ Transport ◀─ SyncCoordinator
//!                     │        Dispatcher       │
//!                     └──▶ ObservabilityBuffer ◀┘
//! ```
//!
//! Workers own the retry state machine; every attempt — success, failure,
//! scheduled retry — is recorded durably and reported to the observability
//! buffer.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod fanout;
pub mod headers;
pub mod observability;
pub mod render;
pub mod retry;
pub mod scheduler;
pub mod signing;
pub mod sync;
pub mod transport;
pub mod worker;

pub use error::{DeliveryError, Result};
pub use fanout::trigger_webhooks_async;
pub use observability::{ObservabilityBuffer, ObservabilityReporter};
pub use render::{
    FixedPayloads, PayloadRenderer, RenderContext, Requestor, SubscriptionExecutor,
};
pub use retry::{RetryDecision, RetryPolicy};
pub use scheduler::{Scheduler, StoreScheduler};
pub use sync::SyncCoordinator;
pub use transport::{TransportConfig, TransportDispatcher, WebhookScheme};
pub use worker::{DeliveryWorker, WorkerConfig, WorkerPool};

/// Default number of concurrent delivery workers.
pub const DEFAULT_WORKER_COUNT: usize = 3;

/// Default batch size for claiming due deliveries.
pub const DEFAULT_BATCH_SIZE: usize = 10;
