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

//! Handle table for script callables.
//!
//! The registry lives inside the interpreter's host data, so every handle it
//! issues is scoped to exactly one interpreter. It holds strong references;
//! a registered function stays alive until it is released.

use std::collections::HashMap;
use std::sync::Arc;

use boa_engine::object::JsObject;
use boa_engine::JsData;
use boa_gc::{Finalize, GcRefCell, Trace};
use scriptweb_common::{BridgeError, CallbackHandle, Result};

use crate::server::ServerTable;

#[derive(Debug, Trace, Finalize)]
pub struct CallbackRegistry {
    callables: HashMap<u32, JsObject>,
    next_handle: u32,
    released: bool,
}

impl Default for CallbackRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self {
            callables: HashMap::new(),
            // 0 is never issued
            next_handle: 1,
            released: false,
        }
    }

    /// Stores `callable` under a fresh handle.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::InterpreterShutDown`] once `release_all` has run
    /// - [`BridgeError::AllocationFailure`] if the handle space is exhausted
    pub fn register(&mut self, callable: JsObject) -> Result<CallbackHandle> {
        if self.released {
            return Err(BridgeError::InterpreterShutDown);
        }
        let raw = self.next_handle;
        self.next_handle = raw
            .checked_add(1)
            .ok_or_else(|| BridgeError::AllocationFailure("callback handles exhausted".into()))?;
        self.callables.insert(raw, callable);
        Ok(CallbackHandle::from_raw(raw))
    }

    /// Returns the callable registered under `handle`.
    pub fn lookup(&self, handle: CallbackHandle) -> Result<JsObject> {
        self.callables
            .get(&handle.raw())
            .cloned()
            .ok_or(BridgeError::UnknownHandle(handle))
    }

    /// Drops a single registration. Returns `false` if it was not present.
    pub fn release(&mut self, handle: CallbackHandle) -> bool {
        self.callables.remove(&handle.raw()).is_some()
    }

    /// Drops every registration and refuses new ones. Returns how many were
    /// released; a second call releases nothing.
    pub fn release_all(&mut self) -> usize {
        self.released = true;
        let count = self.callables.len();
        self.callables.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.callables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callables.is_empty()
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}

/// Per-interpreter data reachable from native bindings through
/// `Context::get_data`.
#[derive(Trace, Finalize, JsData)]
pub(crate) struct HostState {
    pub(crate) registry: GcRefCell<CallbackRegistry>,
    #[unsafe_ignore_trace]
    pub(crate) servers: Arc<ServerTable>,
}

impl HostState {
    pub(crate) fn new(servers: Arc<ServerTable>) -> Self {
        Self {
            registry: GcRefCell::new(CallbackRegistry::new()),
            servers,
        }
    }
}
