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

//! Scriptweb Common Types
//!
//! This crate provides the records that cross the boundary between the
//! network server and the script interpreter, plus the error taxonomy shared
//! by every bridge operation.
//!
//! # Overview
//!
//! Scriptweb runs a JavaScript file that registers request handlers on one or
//! more web servers. The server side is concurrent; the interpreter is not.
//! Everything that flows between the two is one of the owned records defined
//! here:
//!
//! - **[`HttpRequest`]**: what the server hands to an HTTP callable
//! - **[`HttpResponse`]**: what the codec builds from the callable's return values
//! - **[`WebSocketEvent`]**: a single inbound WebSocket message, moved into the bridge
//! - **[`HeaderTable`]**: bounded, ordered header storage used by both directions
//!
//! # Example
//!
//! ```
//! use scriptweb_common::{HeaderTable, HttpRequest};
//!
//! let mut headers = HeaderTable::with_capacity(2);
//! headers.push("Accept", "text/html");
//! headers.push("Host", "example.com");
//! headers.push("X-Dropped", "over capacity");
//!
//! let request = HttpRequest::new("GET", "/").with_headers(headers);
//! assert_eq!(request.headers_count(), 2);
//! ```

pub mod error;
pub mod headers;
pub mod types;

#[cfg(test)]
mod tests;

pub use error::{BridgeError, Result};
pub use headers::{HeaderTable, MAX_HEADER_FIELD_LEN};
pub use types::{
    CallbackHandle, ClientId, HttpRequest, HttpResponse, MessageType, RouteKind, ServerId,
    WebSocketEvent,
};
