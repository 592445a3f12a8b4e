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

//! Per-server route tables.
//!
//! HTTP and WebSocket routes match the request path exactly. Static file
//! routes match by prefix, longest prefix first. Each kind has its own
//! table, so one path may carry both a WebSocket and an HTTP callable.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use scriptweb_common::{BridgeError, CallbackHandle, Result, RouteKind};

/// What a request path resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Route {
    Http(CallbackHandle),
    WebSocket(CallbackHandle),
    Files { prefix: String, directory: PathBuf },
    NotFound,
}

#[derive(Debug, Default)]
pub(crate) struct RouteTable {
    http: HashMap<String, CallbackHandle>,
    websocket: HashMap<String, CallbackHandle>,
    files: BTreeMap<String, PathBuf>,
}

/// An empty route path means the root.
pub fn normalize_path(path: &str) -> String {
    if path.is_empty() {
        "/".to_string()
    } else {
        path.to_string()
    }
}

impl RouteTable {
    pub(crate) fn insert(
        &mut self,
        kind: RouteKind,
        path: &str,
        handle: CallbackHandle,
    ) -> Result<()> {
        let path = normalize_path(path);
        let table = match kind {
            RouteKind::Http => &mut self.http,
            RouteKind::WebSocket => &mut self.websocket,
        };
        if table.contains_key(&path) {
            return Err(BridgeError::DuplicateRoute(path));
        }
        table.insert(path, handle);
        Ok(())
    }

    pub(crate) fn insert_files(&mut self, prefix: &str, directory: PathBuf) -> Result<()> {
        let prefix = normalize_path(prefix);
        if self.files.contains_key(&prefix) {
            return Err(BridgeError::DuplicateRoute(prefix));
        }
        self.files.insert(prefix, directory);
        Ok(())
    }

    pub(crate) fn handle(&self, kind: RouteKind, path: &str) -> Option<CallbackHandle> {
        let table = match kind {
            RouteKind::Http => &self.http,
            RouteKind::WebSocket => &self.websocket,
        };
        table.get(path).copied()
    }

    /// Resolves a request path. WebSocket routes only match upgrade
    /// requests.
    pub(crate) fn resolve(&self, path: &str, is_upgrade: bool) -> Route {
        if is_upgrade {
            if let Some(handle) = self.websocket.get(path) {
                return Route::WebSocket(*handle);
            }
        }
        if let Some(handle) = self.http.get(path) {
            return Route::Http(*handle);
        }
        // Keys are ordered, so walking backwards finds the longest match first
        self.files
            .iter()
            .rev()
            .find(|(prefix, _)| prefix_matches(prefix, path))
            .map(|(prefix, directory)| Route::Files {
                prefix: prefix.clone(),
                directory: directory.clone(),
            })
            .unwrap_or(Route::NotFound)
    }

    /// Every callable handle bound in this table.
    pub(crate) fn handles(&self) -> Vec<CallbackHandle> {
        self.http
            .values()
            .chain(self.websocket.values())
            .copied()
            .collect()
    }

    pub(crate) fn clear(&mut self) {
        self.http.clear();
        self.websocket.clear();
        self.files.clear();
    }
}

fn prefix_matches(prefix: &str, path: &str) -> bool {
    if prefix.ends_with('/') {
        path.starts_with(prefix)
    } else {
        path == prefix
            || (path.starts_with(prefix) && path.as_bytes().get(prefix.len()) == Some(&b'/'))
    }
}
