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

use std::path::PathBuf;

use thiserror::Error;

use crate::types::{CallbackHandle, ClientId, ServerId};

/// Every failure a bridge operation can report.
///
/// Marshaling and registry failures are returned to the caller as values;
/// none of them is allowed to take the process down.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// A script called a `webserver.*` function with the wrong kind of value.
    #[error("Argument {position} ({name}) must be a {expected} in function {function}")]
    ArgumentType {
        position: usize,
        name: String,
        expected: String,
        function: String,
    },

    /// A callable returned fewer values than its contract requires.
    #[error("Not enough arguments in function {context}. Expected are {expected} got {got}.")]
    Arity {
        context: String,
        expected: usize,
        got: usize,
    },

    /// A value returned by a callable has the wrong kind.
    #[error("Argument {position} ({name}) must be a {expected} in function {context}")]
    Type {
        position: usize,
        name: String,
        expected: String,
        context: String,
    },

    /// The callable itself threw.
    #[error("Error when calling hook function: {0}")]
    InterpreterCall(String),

    #[error("Callback handle {0} is not registered")]
    UnknownHandle(CallbackHandle),

    #[error("Server with ID {0} not found")]
    UnknownServer(ServerId),

    #[error("Client with ID {0} not found")]
    UnknownClient(ClientId),

    #[error("Client with ID {0} fell behind and was disconnected")]
    ClientLagged(ClientId),

    #[error("No route registered for path {0}")]
    UnknownRoute(String),

    #[error("Path {0} exists already!")]
    DuplicateRoute(String),

    #[error("No path or no clients at '{0}'")]
    NoClients(String),

    #[error("Failed to create server at {address}, reason {reason}")]
    Bind { address: String, reason: String },

    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    #[error("Directory {} not found", .0.display())]
    DirectoryNotFound(PathBuf),

    /// A call was attempted after the interpreter began teardown.
    #[error("Interpreter has been shut down")]
    InterpreterShutDown,

    #[error("Allocation failure: {0}")]
    AllocationFailure(String),

    #[error("Script evaluation error: {0}")]
    ScriptLoad(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    pub fn argument_type(position: usize, name: &str, expected: &str, function: &str) -> Self {
        BridgeError::ArgumentType {
            position,
            name: name.to_string(),
            expected: expected.to_string(),
            function: function.to_string(),
        }
    }

    pub fn type_error(position: usize, name: &str, expected: &str, context: &str) -> Self {
        BridgeError::Type {
            position,
            name: name.to_string(),
            expected: expected.to_string(),
            context: context.to_string(),
        }
    }

    /// True for failures a server should treat as a missing client rather
    /// than a fault.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            BridgeError::UnknownClient(_) | BridgeError::ClientLagged(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
