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

//! Scriptweb Server
//!
//! Lets a JavaScript program run HTTP(S) and WebSocket servers. The script
//! registers functions against paths; the server calls them back as requests
//! and messages arrive, one call at a time.

pub mod config;
pub mod runtime;
pub mod server;

pub use config::BridgeConfig;
pub use runtime::{GateStats, ScriptContext};
pub use server::{EventDispatcher, ServerTable};
