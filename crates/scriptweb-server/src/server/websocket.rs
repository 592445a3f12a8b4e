// Copyright 2025 Scriptweb Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! WebSocket upgrade and per-client message loop.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use hyper::body::Incoming;
use hyper::header::{self, HeaderMap, HeaderName, HeaderValue};
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use scriptweb_common::{ClientId, MessageType, WebSocketEvent};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::server::http_server::{empty, plain_response, ConnectionContext, ResponseBody};

pub(crate) fn is_upgrade_request<B>(req: &Request<B>) -> bool {
    header_has_token(req.headers(), header::CONNECTION, "upgrade")
        && header_has_token(req.headers(), header::UPGRADE, "websocket")
}

fn header_has_token(headers: &HeaderMap, name: HeaderName, token: &str) -> bool {
    headers.get_all(name).iter().any(|value| {
        value
            .to_str()
            .map(|v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case(token)))
            .unwrap_or(false)
    })
}

/// Answers the handshake and spawns the client loop on the upgraded
/// connection.
pub(crate) fn accept(
    context: Arc<ConnectionContext>,
    mut req: Request<Incoming>,
    path: String,
) -> Response<ResponseBody> {
    let server = context.record.id();

    let version_ok = req
        .headers()
        .get(header::SEC_WEBSOCKET_VERSION)
        .map(|v| v.as_bytes() == b"13")
        .unwrap_or(false);
    let accept_key = match req.headers().get(header::SEC_WEBSOCKET_KEY) {
        Some(key) if version_ok => derive_accept_key(key.as_bytes()),
        _ => return plain_response(StatusCode::BAD_REQUEST, "Bad Request"),
    };
    let accept_value = match HeaderValue::from_str(&accept_key) {
        Ok(value) => value,
        Err(_) => return plain_response(StatusCode::BAD_REQUEST, "Bad Request"),
    };

    tokio::spawn(async move {
        match hyper::upgrade::on(&mut req).await {
            Ok(upgraded) => {
                let stream =
                    WebSocketStream::from_raw_socket(TokioIo::new(upgraded), Role::Server, None)
                        .await;
                run_client(stream, context, path).await;
            }
            Err(e) => tracing::error!(%server, "websocket upgrade failed: {}", e),
        }
    });

    let mut response = Response::new(empty());
    *response.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
    let headers = response.headers_mut();
    headers.insert(header::CONNECTION, HeaderValue::from_static("Upgrade"));
    headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
    headers.insert(header::SEC_WEBSOCKET_ACCEPT, accept_value);
    response
}

async fn run_client<S>(stream: WebSocketStream<S>, context: Arc<ConnectionContext>, path: String)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let server = context.record.id();
    let client = ClientId::generate();
    let (outbound_tx, mut outbound) = mpsc::channel(context.config.websocket_queue_capacity);
    context
        .record
        .add_client(client.clone(), path.clone(), outbound_tx);
    tracing::info!(%server, %client, path = %path, "websocket client connected");

    let (mut sink, mut source) = stream.split();
    loop {
        tokio::select! {
            message = outbound.recv() => {
                let Some(message) = message else { break };
                let closing = matches!(message, Message::Close(_));
                if let Err(e) = sink.send(message).await {
                    tracing::debug!(%server, %client, "websocket write failed: {}", e);
                    break;
                }
                if closing {
                    break;
                }
            }
            inbound = source.next() => match inbound {
                Some(Ok(message)) => {
                    let Some(event) = into_event(&client, message) else { continue };
                    if event.message_type == MessageType::Close {
                        break;
                    }
                    deliver(&context, &path, event).await;
                }
                Some(Err(e)) => {
                    tracing::debug!(%server, %client, "websocket read failed: {}", e);
                    break;
                }
                None => break,
            }
        }
    }

    context.record.remove_client(&client);
    tracing::info!(%server, %client, "websocket client disconnected");
}

fn into_event(client: &ClientId, message: Message) -> Option<WebSocketEvent> {
    let (message_type, payload) = match message {
        Message::Text(text) => (MessageType::Text, text.into_bytes()),
        Message::Binary(data) => (MessageType::Binary, data),
        Message::Ping(data) => (MessageType::Ping, data),
        Message::Pong(data) => (MessageType::Pong, data),
        Message::Close(_) => (MessageType::Close, Vec::new()),
        Message::Frame(_) => return None,
    };
    Some(WebSocketEvent::new(client.clone(), message_type, payload))
}

/// Hands one message to the dispatcher and waits for it, so messages from a
/// client reach the script in order.
async fn deliver(context: &Arc<ConnectionContext>, path: &str, event: WebSocketEvent) {
    let server = context.record.id();
    let Some(dispatcher) = context.dispatcher.upgrade() else {
        tracing::warn!(%server, "dropped websocket event: interpreter is gone");
        return;
    };

    let path = path.to_string();
    let outcome = tokio::task::spawn_blocking(move || {
        dispatcher.deliver_websocket_message(server, &path, event)
    })
    .await;

    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(%server, "dropped websocket event: {}", e),
        Err(e) => tracing::error!(%server, "websocket callable task failed: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upgrade_detection() {
        let req = Request::builder()
            .header("connection", "keep-alive, Upgrade")
            .header("upgrade", "WebSocket")
            .body(())
            .unwrap();
        assert!(is_upgrade_request(&req));

        let req = Request::builder()
            .header("connection", "keep-alive")
            .body(())
            .unwrap();
        assert!(!is_upgrade_request(&req));
    }

    #[test]
    fn test_into_event_maps_message_types() {
        let client = ClientId::from("c-1");

        let event = into_event(&client, Message::Text("hi".to_string())).unwrap();
        assert_eq!(event.message_type.code(), 1);
        assert_eq!(event.payload, b"hi");

        let event = into_event(&client, Message::Binary(vec![1, 2])).unwrap();
        assert_eq!(event.message_type, MessageType::Binary);

        let event = into_event(&client, Message::Close(None)).unwrap();
        assert_eq!(event.message_type.code(), 8);
    }
}
