//! Google Cloud Pub/Sub webhook delivery.
//!
//! Target URLs use the `gcpubsub` scheme; the URL path names the topic:
//! `gcpubsub://cloud.google.com/projects/my-project/topics/my-topic`.
//! Credentials come from the ambient service account, resolved by the
//! client library.

use std::collections::HashMap;

use bytes::Bytes;
use google_cloud_googleapis::pubsub::v1::PubsubMessage;
use google_cloud_pubsub::client::{Client, ClientConfig};
use storelink_core::{EventType, WebhookResponse};
use url::Url;

use crate::headers;

/// Publishes one signed message and waits synchronously for the publish
/// result, so delivery status reflects the broker's acknowledgement.
///
/// All failures (auth, oversized message, broker rejection) are returned as
/// a failed [`WebhookResponse`]; Pub/Sub has no partial-response data to
/// preserve.
pub(crate) async fn send(
    url: &Url,
    message: Bytes,
    domain: &str,
    signature: &str,
    event_type: EventType,
) -> WebhookResponse {
    let topic_name = url.path().trim_start_matches('/').to_string();

    let mut attributes = HashMap::new();
    attributes.insert(headers::pubsub::DOMAIN.to_string(), domain.to_string());
    attributes.insert(headers::pubsub::API_URL.to_string(), headers::api_url_for(domain));
    attributes.insert(headers::pubsub::EVENT_TYPE.to_string(), event_type.as_str().to_string());
    attributes.insert(headers::pubsub::SIGNATURE.to_string(), signature.to_string());

    let started = std::time::Instant::now();

    let config = match ClientConfig::default().with_auth().await {
        Ok(config) => config,
        Err(e) => {
            return WebhookResponse::failed(
                format!("pubsub auth failed: {e}"),
                started.elapsed(),
            )
        },
    };
    let client = match Client::new(config).await {
        Ok(client) => client,
        Err(e) => {
            return WebhookResponse::failed(
                format!("pubsub client failed: {e}"),
                started.elapsed(),
            )
        },
    };

    let topic = client.topic(&topic_name);
    let publisher = topic.new_publisher(None);
    let awaiter = publisher
        .publish(PubsubMessage {
            data: message.to_vec().into(),
            attributes,
            ..Default::default()
        })
        .await;

    match awaiter.get().await {
        Ok(message_id) => WebhookResponse::success(message_id, started.elapsed()),
        Err(e) => WebhookResponse::failed(e.to_string(), started.elapsed()),
    }
}
