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

//! Network side of the bridge.
//!
//! A thin hyper/tungstenite server. Each server owns a TCP listener,
//! optionally wrapped in rustls, and hands every matched request or
//! WebSocket message to an [`EventDispatcher`].

mod files;
mod http_server;
mod router;
pub mod table;
mod tls;
mod websocket;

use scriptweb_common::{HttpRequest, HttpResponse, Result, ServerId, WebSocketEvent};

pub use router::normalize_path;
pub use table::ServerTable;

/// Receives events from the server side.
///
/// Implementations may block; the server always calls them from a blocking
/// thread, never from an async task.
pub trait EventDispatcher: Send + Sync {
    /// Delivers an HTTP request received on `path` and returns the response
    /// to send.
    fn deliver_http_request(
        &self,
        server: ServerId,
        path: &str,
        request: HttpRequest,
    ) -> Result<HttpResponse>;

    /// Delivers one WebSocket message received on `path`.
    fn deliver_websocket_message(
        &self,
        server: ServerId,
        path: &str,
        event: WebSocketEvent,
    ) -> Result<()>;
}
