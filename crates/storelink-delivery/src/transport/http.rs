//! Direct HTTP/HTTPS webhook delivery.

use std::{collections::HashMap, time::Duration};

use bytes::Bytes;
use storelink_core::{EventType, WebhookResponse};
use tracing::warn;
use url::Url;

use crate::{
    error::{DeliveryError, Result},
    headers,
    transport::TransportConfig,
};

/// POSTs signed payloads to HTTP(S) targets.
///
/// One pooled client serves all endpoints. Per-call timeouts override the
/// client default so sync and async deliveries can share the pool.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub(crate) fn new(config: &TransportConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| DeliveryError::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Sends one signed POST, normalizing every outcome into a
    /// [`WebhookResponse`].
    ///
    /// Request-level failures (timeout, connection refused, DNS) synthesize
    /// a failed response carrying the error text and the request headers
    /// that were sent; they never raise.
    pub(crate) async fn send(
        &self,
        url: &Url,
        message: Bytes,
        domain: &str,
        signature: &str,
        event_type: EventType,
        timeout: Duration,
    ) -> WebhookResponse {
        let request_headers = build_headers(domain, signature, event_type);

        let mut request = self
            .client
            .post(url.clone())
            .timeout(timeout)
            .body(message);
        for (name, value) in &request_headers {
            request = request.header(name, value);
        }

        let started = std::time::Instant::now();
        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                let duration = started.elapsed();
                warn!(url = %url, error = %e, "webhook request failed");
                let mut failed = WebhookResponse::failed(e.to_string(), duration);
                failed.request_headers = Some(request_headers);
                failed.status_code = e.status().map(|s| s.as_u16());
                return failed;
            },
        };

        let status_code = response.status().as_u16();
        let ok = response.status().is_success();
        let response_headers = collect_headers(response.headers());
        let content = match response.text().await {
            Ok(text) => text,
            Err(e) => format!("[failed to read response body: {e}]"),
        };
        let duration = started.elapsed();

        WebhookResponse {
            content,
            request_headers: Some(request_headers),
            response_headers: Some(response_headers),
            status_code: Some(status_code),
            duration,
            status: if ok {
                storelink_core::ResponseStatus::Success
            } else {
                storelink_core::ResponseStatus::Failed
            },
        }
    }
}

/// App headers for one delivery. The legacy `X-` forms are emitted next to
/// the plain forms for receivers that have not migrated.
fn build_headers(
    domain: &str,
    signature: &str,
    event_type: EventType,
) -> HashMap<String, String> {
    let api_url = headers::api_url_for(domain);
    let mut map = HashMap::new();
    map.insert("Content-Type".to_string(), "application/json".to_string());
    map.insert(headers::deprecated::EVENT_TYPE.to_string(), event_type.as_str().to_string());
    map.insert(headers::deprecated::DOMAIN.to_string(), domain.to_string());
    map.insert(headers::deprecated::SIGNATURE.to_string(), signature.to_string());
    map.insert(headers::deprecated::API_URL.to_string(), api_url.clone());
    map.insert(headers::EVENT_TYPE.to_string(), event_type.as_str().to_string());
    map.insert(headers::DOMAIN.to_string(), domain.to_string());
    map.insert(headers::SIGNATURE.to_string(), signature.to_string());
    map.insert(headers::API_URL.to_string(), api_url);
    map
}

fn collect_headers(header_map: &reqwest::header::HeaderMap) -> HashMap<String, String> {
    header_map
        .iter()
        .filter_map(|(name, value)| {
            value.to_str().ok().map(|v| (name.to_string(), v.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_carry_both_forms() {
        let built = build_headers("shop.example.com", "deadbeef", EventType::OrderCreated);

        assert_eq!(built.get("Saleor-Event").map(String::as_str), Some("order_created"));
        assert_eq!(built.get("X-Saleor-Event").map(String::as_str), Some("order_created"));
        assert_eq!(built.get("Saleor-Domain").map(String::as_str), Some("shop.example.com"));
        assert_eq!(built.get("X-Saleor-Signature").map(String::as_str), Some("deadbeef"));
        assert_eq!(
            built.get("Saleor-Api-Url").map(String::as_str),
            Some("https://shop.example.com/graphql/")
        );
        assert_eq!(built.get("Content-Type").map(String::as_str), Some("application/json"));
    }
}
