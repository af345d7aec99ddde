//! Wire-format header and attribute names.
//!
//! HTTP deliveries emit every app header twice: the legacy `X-`-prefixed
//! form and the plain form, for receivers that have not migrated yet. Queue
//! transports use the attribute names their consumers already expect.

/// Legacy `X-`-prefixed HTTP header names.
pub mod deprecated {
    /// Event type header (legacy form).
    pub const EVENT_TYPE: &str = "X-Saleor-Event";
    /// Originating domain header (legacy form).
    pub const DOMAIN: &str = "X-Saleor-Domain";
    /// Payload signature header (legacy form).
    pub const SIGNATURE: &str = "X-Saleor-Signature";
    /// Canonical API URL header (legacy form).
    pub const API_URL: &str = "X-Saleor-Api-Url";
}

/// Event type header.
pub const EVENT_TYPE: &str = "Saleor-Event";
/// Originating domain header.
pub const DOMAIN: &str = "Saleor-Domain";
/// Payload signature header.
pub const SIGNATURE: &str = "Saleor-Signature";
/// Canonical API URL header.
pub const API_URL: &str = "Saleor-Api-Url";

/// SQS message attribute names.
pub mod sqs {
    /// Originating domain attribute.
    pub const DOMAIN: &str = "SaleorDomain";
    /// Canonical API URL attribute.
    pub const API_URL: &str = "SaleorApiUrl";
    /// Event type attribute.
    pub const EVENT_TYPE: &str = "EventType";
    /// Payload signature attribute; omitted for unsigned payloads.
    pub const SIGNATURE: &str = "Signature";
}

/// Pub/Sub publish attribute names.
pub mod pubsub {
    /// Originating domain attribute.
    pub const DOMAIN: &str = "saleorDomain";
    /// Canonical API URL attribute.
    pub const API_URL: &str = "saleorApiUrl";
    /// Event type attribute.
    pub const EVENT_TYPE: &str = "eventType";
    /// Payload signature attribute.
    pub const SIGNATURE: &str = "signature";
}

/// Canonical GraphQL API URL for a tenant domain.
///
/// Receivers use this to call back into the right tenant when verifying
/// provenance or fetching further data.
pub fn api_url_for(domain: &str) -> String {
    format!("https://{domain}/graphql/")
}
