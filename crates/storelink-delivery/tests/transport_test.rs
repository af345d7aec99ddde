//! Transport dispatch: scheme routing, header emission, signing, and
//! failed-response synthesis.

use bytes::Bytes;
use storelink_core::EventType;
use storelink_delivery::{
    signing::signature_for_payload, DeliveryError, TransportDispatcher,
};
use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

const DOMAIN: &str = "shop.example.com";

#[tokio::test]
async fn unknown_scheme_raises_without_any_network_call() {
    let dispatcher = TransportDispatcher::with_defaults().unwrap();

    let err = dispatcher
        .dispatch(
            "ftp://example.com/feed",
            Bytes::from_static(b"{}"),
            DOMAIN,
            None,
            EventType::OrderCreated,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, DeliveryError::UnknownScheme { ref scheme } if scheme == "ftp"));
    assert!(err.is_configuration());
}

#[tokio::test]
async fn unparseable_target_raises_invalid_url() {
    let dispatcher = TransportDispatcher::with_defaults().unwrap();

    let err = dispatcher
        .dispatch(
            "no scheme at all",
            Bytes::from_static(b"{}"),
            DOMAIN,
            None,
            EventType::OrderCreated,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, DeliveryError::InvalidTargetUrl(_)));
}

#[tokio::test]
async fn http_delivery_emits_signed_app_headers() {
    let payload = br#"{"order":{"id":42}}"#;
    let signature = signature_for_payload(payload, Some("hunter2"));

    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .and(matchers::path("/hook"))
        .and(matchers::header("Content-Type", "application/json"))
        .and(matchers::header("Saleor-Event", "order_created"))
        .and(matchers::header("X-Saleor-Event", "order_created"))
        .and(matchers::header("Saleor-Domain", DOMAIN))
        .and(matchers::header("X-Saleor-Domain", DOMAIN))
        .and(matchers::header("Saleor-Signature", signature.as_str()))
        .and(matchers::header("X-Saleor-Signature", signature.as_str()))
        .and(matchers::header("Saleor-Api-Url", "https://shop.example.com/graphql/"))
        .and(matchers::body_bytes(payload.to_vec()))
        .respond_with(ResponseTemplate::new(200).set_body_string("accepted"))
        .expect(1)
        .mount(&server)
        .await;

    let dispatcher = TransportDispatcher::with_defaults().unwrap();
    let response = dispatcher
        .dispatch(
            &format!("{}/hook", server.uri()),
            Bytes::from_static(payload),
            DOMAIN,
            Some("hunter2"),
            EventType::OrderCreated,
        )
        .await
        .unwrap();

    assert!(response.is_success());
    assert_eq!(response.status_code, Some(200));
    assert_eq!(response.content, "accepted");
    assert!(response.duration > std::time::Duration::ZERO);
    assert!(response.request_headers.is_some());

    server.verify().await;
}

#[tokio::test]
async fn non_2xx_response_is_a_failed_response_not_an_error() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let dispatcher = TransportDispatcher::with_defaults().unwrap();
    let response = dispatcher
        .dispatch(
            &format!("{}/hook", server.uri()),
            Bytes::from_static(b"{}"),
            DOMAIN,
            None,
            EventType::OrderUpdated,
        )
        .await
        .unwrap();

    assert!(!response.is_success());
    assert_eq!(response.status_code, Some(503));
    assert_eq!(response.content, "maintenance");
    assert!(response.response_headers.is_some());
}

#[tokio::test]
async fn connection_failure_synthesizes_failed_response() {
    // Port 9 is discard; nothing listens there in test environments.
    let dispatcher = TransportDispatcher::with_defaults().unwrap();
    let response = dispatcher
        .dispatch(
            "http://127.0.0.1:9/hook",
            Bytes::from_static(b"{}"),
            DOMAIN,
            None,
            EventType::OrderCreated,
        )
        .await
        .unwrap();

    assert!(!response.is_success());
    assert!(response.status_code.is_none());
    assert!(!response.content.is_empty());
    // The headers we attempted to send are preserved for the audit trail.
    assert!(response.request_headers.is_some());
}

#[tokio::test]
async fn unsigned_payloads_send_empty_signature_header() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .and(matchers::header("Saleor-Signature", ""))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let dispatcher = TransportDispatcher::with_defaults().unwrap();
    let response = dispatcher
        .dispatch(
            &format!("{}/hook", server.uri()),
            Bytes::from_static(b"{}"),
            DOMAIN,
            None,
            EventType::OrderCreated,
        )
        .await
        .unwrap();

    assert!(response.is_success());
    server.verify().await;
}
