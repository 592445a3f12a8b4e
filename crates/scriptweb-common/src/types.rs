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

use std::fmt;

use crate::headers::HeaderTable;

/// Identifier of a server started through the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServerId(pub u32);

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque key for a registered script callable.
///
/// Only meaningful for the interpreter instance that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallbackHandle(u32);

impl CallbackHandle {
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for CallbackHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identifier of a connected WebSocket client.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientId(String);

impl ClientId {
    /// Generates a fresh random (UUID v4) client id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl From<String> for ClientId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for ClientId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which route table a path is registered in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteKind {
    Http,
    WebSocket,
}

impl fmt::Display for RouteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteKind::Http => f.write_str("http"),
            RouteKind::WebSocket => f.write_str("websocket"),
        }
    }
}

/// WebSocket message discriminator, using the RFC 6455 opcode numbers
/// scripts receive as the second callable argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl MessageType {
    pub fn code(self) -> i32 {
        match self {
            MessageType::Text => 1,
            MessageType::Binary => 2,
            MessageType::Close => 8,
            MessageType::Ping => 9,
            MessageType::Pong => 10,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(MessageType::Text),
            2 => Some(MessageType::Binary),
            8 => Some(MessageType::Close),
            9 => Some(MessageType::Ping),
            10 => Some(MessageType::Pong),
            _ => None,
        }
    }
}

/// An inbound HTTP request as handed to a script callable.
///
/// Built once by the server and only read afterwards. Missing fields are
/// empty strings; `content_length` is `-1` when unknown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub url: String,
    pub proto: String,
    pub content_length: i64,
    pub host: String,
    pub remote_addr: String,
    pub body: String,
    pub headers: HeaderTable,
}

impl HttpRequest {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            method: method.into(),
            url: path.clone(),
            path,
            proto: "HTTP/1.1".to_string(),
            content_length: -1,
            host: String::new(),
            remote_addr: String::new(),
            body: String::new(),
            headers: HeaderTable::with_capacity(0),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_proto(mut self, proto: impl Into<String>) -> Self {
        self.proto = proto.into();
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_remote_addr(mut self, remote_addr: impl Into<String>) -> Self {
        self.remote_addr = remote_addr.into();
        self
    }

    /// Sets the body and the matching content length.
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self.content_length = self.body.len() as i64;
        self
    }

    pub fn with_content_length(mut self, content_length: i64) -> Self {
        self.content_length = content_length;
        self
    }

    pub fn with_headers(mut self, headers: HeaderTable) -> Self {
        self.headers = headers;
        self
    }

    /// Number of headers stored, never more than the table capacity.
    pub fn headers_count(&self) -> usize {
        self.headers.len()
    }
}

/// Response built from a callable's return values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status_code: u16,
    /// `None` means the callable returned only a short status (404).
    pub body: Option<String>,
    pub headers: HeaderTable,
    /// Header entries the callable returned, including those dropped for
    /// capacity.
    pub headers_count: usize,
}

impl HttpResponse {
    /// The bare short-circuit response for a callable that returned only 404.
    pub fn not_found() -> Self {
        Self {
            status_code: 404,
            body: None,
            headers: HeaderTable::with_capacity(0),
            headers_count: 0,
        }
    }

    /// True when the server should answer with its own plain 404 page.
    pub fn is_short_not_found(&self) -> bool {
        self.status_code == 404 && self.body.is_none() && self.headers.is_empty()
    }
}

/// A single WebSocket message on its way into a callable.
///
/// The bridge takes the event by value, so the payload and client id are
/// released exactly once, inside the call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebSocketEvent {
    pub client: ClientId,
    pub message_type: MessageType,
    pub payload: Vec<u8>,
}

impl WebSocketEvent {
    pub fn new(client: ClientId, message_type: MessageType, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            client,
            message_type,
            payload: payload.into(),
        }
    }

    /// Payload as text; invalid UTF-8 is replaced.
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}
