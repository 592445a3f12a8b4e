//! Tests for the shared records and error messages.

use crate::*;
use std::collections::HashSet;

#[test]
fn test_request_builder_defaults() {
    let request = HttpRequest::new("GET", "/hello");
    assert_eq!(request.method, "GET");
    assert_eq!(request.path, "/hello");
    assert_eq!(request.url, "/hello");
    assert_eq!(request.content_length, -1);
    assert_eq!(request.headers_count(), 0);
    assert!(request.body.is_empty());
}

#[test]
fn test_request_with_body_sets_content_length() {
    let request = HttpRequest::new("POST", "/submit").with_body("abc");
    assert_eq!(request.content_length, 3);
    assert_eq!(request.body, "abc");
}

#[test]
fn test_request_reports_stored_header_count() {
    let mut headers = HeaderTable::with_capacity(50);
    for i in 0..60 {
        headers.push(format!("X-{}", i), "v");
    }
    let request = HttpRequest::new("GET", "/").with_headers(headers);
    assert_eq!(request.headers_count(), 50);
}

#[test]
fn test_short_not_found() {
    let response = HttpResponse::not_found();
    assert!(response.is_short_not_found());
    assert_eq!(response.headers_count, 0);
}

#[test]
fn test_404_with_body_is_not_short() {
    let response = HttpResponse {
        status_code: 404,
        body: Some("custom".into()),
        headers: HeaderTable::with_capacity(10),
        headers_count: 0,
    };
    assert!(!response.is_short_not_found());
}

#[test]
fn test_message_type_codes() {
    for ty in [
        MessageType::Text,
        MessageType::Binary,
        MessageType::Close,
        MessageType::Ping,
        MessageType::Pong,
    ] {
        assert_eq!(MessageType::from_code(ty.code()), Some(ty));
    }
    assert_eq!(MessageType::Text.code(), 1);
    assert_eq!(MessageType::from_code(3), None);
}

#[test]
fn test_client_ids_are_unique() {
    let ids: HashSet<_> = (0..500).map(|_| ClientId::generate()).collect();
    assert_eq!(ids.len(), 500);
}

#[test]
fn test_websocket_event_lossy_text() {
    let event = WebSocketEvent::new(ClientId::from("c1"), MessageType::Binary, vec![b'h', 0xff, b'i']);
    assert_eq!(event.payload_text(), "h\u{fffd}i");
}

#[test]
fn test_error_messages() {
    let err = BridgeError::type_error(2, "response body", "string", "http hook return");
    assert_eq!(
        err.to_string(),
        "Argument 2 (response body) must be a string in function http hook return"
    );

    let err = BridgeError::Arity {
        context: "http hook return".into(),
        expected: 3,
        got: 1,
    };
    assert_eq!(
        err.to_string(),
        "Not enough arguments in function http hook return. Expected are 3 got 1."
    );

    let err = BridgeError::UnknownServer(ServerId(7));
    assert_eq!(err.to_string(), "Server with ID 7 not found");

    assert!(BridgeError::UnknownClient(ClientId::from("gone")).is_disconnect());
    let lagged = BridgeError::ClientLagged(ClientId::from("slow"));
    assert!(lagged.is_disconnect());
    assert_eq!(
        lagged.to_string(),
        "Client with ID slow fell behind and was disconnected"
    );
    assert!(!BridgeError::InterpreterShutDown.is_disconnect());
}
