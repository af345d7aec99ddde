//! Wire transports and scheme-based dispatch.
//!
//! A webhook's target URL scheme selects the transport: `http`/`https` post
//! directly, `awssqs` enqueues onto an SQS queue, `gcpubsub` publishes to a
//! Pub/Sub topic. The mapping is a closed enum built at compile time; an
//! unknown scheme is a configuration error raised to the caller, never a
//! silent no-op.
//!
//! Transport-level failures never raise. Every transport returns a
//! normalized [`WebhookResponse`], failed calls carrying whatever partial
//! response data was available.

use std::{fmt, str::FromStr, time::Duration};

use bytes::Bytes;
use storelink_core::{EventType, WebhookResponse};
use tracing::debug;
use url::Url;

use crate::{
    error::{DeliveryError, Result},
    signing::signature_for_payload,
};

pub mod http;
pub mod pubsub;
pub mod sqs;

/// Supported target URL schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookScheme {
    /// Plain HTTP POST.
    Http,
    /// HTTPS POST.
    Https,
    /// AWS SQS enqueue.
    AwsSqs,
    /// Google Cloud Pub/Sub publish.
    GcPubSub,
}

impl WebhookScheme {
    /// Queue-like transports bound message size per call; batch senders
    /// must send item-at-a-time over these.
    pub fn is_queue(self) -> bool {
        matches!(self, Self::AwsSqs | Self::GcPubSub)
    }

    /// Direct HTTP transports; the only schemes sync calls may use.
    pub fn is_http(self) -> bool {
        matches!(self, Self::Http | Self::Https)
    }
}

impl fmt::Display for WebhookScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http => write!(f, "http"),
            Self::Https => write!(f, "https"),
            Self::AwsSqs => write!(f, "awssqs"),
            Self::GcPubSub => write!(f, "gcpubsub"),
        }
    }
}

impl FromStr for WebhookScheme {
    type Err = DeliveryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "https" => Ok(Self::Https),
            "awssqs" => Ok(Self::AwsSqs),
            "gcpubsub" => Ok(Self::GcPubSub),
            other => Err(DeliveryError::UnknownScheme { scheme: other.to_string() }),
        }
    }
}

/// Transport configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// HTTP timeout for async background deliveries.
    pub timeout: Duration,
    /// HTTP timeout for sync calls serving a live request. Shorter than the
    /// async timeout so a slow provider cannot stall the request path.
    pub sync_timeout: Duration,
    /// User agent sent on HTTP deliveries.
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            sync_timeout: Duration::from_secs(10),
            user_agent: "storelink-webhooks/1.0".to_string(),
        }
    }
}

/// Maps target URL schemes to concrete transports and performs the send.
pub struct TransportDispatcher {
    config: TransportConfig,
    http: http::HttpTransport,
}

impl TransportDispatcher {
    /// Creates a dispatcher with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error when the HTTP client cannot be constructed.
    pub fn new(config: TransportConfig) -> Result<Self> {
        let http = http::HttpTransport::new(&config)?;
        Ok(Self { config, http })
    }

    /// Creates a dispatcher with default configuration.
    pub fn with_defaults() -> Result<Self> {
        Self::new(TransportConfig::default())
    }

    /// Configured async HTTP timeout.
    pub fn timeout(&self) -> Duration {
        self.config.timeout
    }

    /// Configured sync HTTP timeout.
    pub fn sync_timeout(&self) -> Duration {
        self.config.sync_timeout
    }

    /// Parses and validates a target URL, returning its scheme.
    ///
    /// # Errors
    ///
    /// [`DeliveryError::InvalidTargetUrl`] for unparseable URLs,
    /// [`DeliveryError::UnknownScheme`] for schemes with no transport.
    pub fn scheme_for(target_url: &str) -> Result<WebhookScheme> {
        let url = Url::parse(target_url)
            .map_err(|e| DeliveryError::InvalidTargetUrl(format!("{target_url}: {e}")))?;
        url.scheme().parse()
    }

    /// Signs `message` and delivers it to `target_url` over the transport
    /// selected by the URL scheme, using the async timeout.
    ///
    /// # Errors
    ///
    /// Raises only for configuration mistakes (unparseable URL, unknown
    /// scheme); transport failures are returned as failed responses.
    pub async fn dispatch(
        &self,
        target_url: &str,
        message: Bytes,
        domain: &str,
        secret: Option<&str>,
        event_type: EventType,
    ) -> Result<WebhookResponse> {
        self.dispatch_with_timeout(target_url, message, domain, secret, event_type, self.config.timeout)
            .await
    }

    /// As [`dispatch`](Self::dispatch) with an explicit HTTP timeout.
    pub async fn dispatch_with_timeout(
        &self,
        target_url: &str,
        message: Bytes,
        domain: &str,
        secret: Option<&str>,
        event_type: EventType,
        timeout: Duration,
    ) -> Result<WebhookResponse> {
        let url = Url::parse(target_url)
            .map_err(|e| DeliveryError::InvalidTargetUrl(format!("{target_url}: {e}")))?;
        let scheme: WebhookScheme = url.scheme().parse()?;
        let signature = signature_for_payload(&message, secret);

        debug!(%scheme, %event_type, target_url, "dispatching webhook message");

        let response = match scheme {
            WebhookScheme::Http | WebhookScheme::Https => {
                self.http.send(&url, message, domain, &signature, event_type, timeout).await
            },
            WebhookScheme::AwsSqs => {
                sqs::send(&url, message, domain, &signature, event_type).await?
            },
            WebhookScheme::GcPubSub => {
                pubsub::send(&url, message, domain, &signature, event_type).await
            },
        };
        Ok(response)
    }
}
