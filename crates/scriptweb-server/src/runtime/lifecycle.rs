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

//! The thread that owns the interpreter.
//!
//! A Boa `Context` cannot leave the thread it was created on, so it lives on
//! a dedicated thread and every interaction is shipped to it as a job.

use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};

use boa_engine::Context;
use scriptweb_common::{BridgeError, Result};

use crate::runtime::bindings;
use crate::runtime::gate::InvocationGate;
use crate::runtime::registry::HostState;
use crate::server::ServerTable;

pub(crate) type Job = Box<dyn FnOnce(&mut Context) + Send>;

pub(crate) enum Command {
    Run(Job),
    Shutdown,
}

/// Marks the gate dead when the interpreter thread exits, including by
/// panic, so later calls fail fast instead of waiting on a dead channel.
struct TeardownSentinel {
    gate: Arc<InvocationGate>,
}

impl Drop for TeardownSentinel {
    fn drop(&mut self) {
        if self.gate.mark_dead() {
            tracing::warn!("interpreter thread exited while still accepting calls");
        }
        tracing::info!("interpreter thread stopped");
    }
}

pub(crate) struct InterpreterThread {
    sender: mpsc::Sender<Command>,
    handle: JoinHandle<()>,
}

impl InterpreterThread {
    /// Starts the thread and waits until the bindings are installed.
    pub(crate) fn spawn(gate: Arc<InvocationGate>, servers: Arc<ServerTable>) -> Result<Self> {
        let (sender, commands) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);

        let handle = thread::Builder::new()
            .name("script-interpreter".to_string())
            .spawn(move || interpreter_main(gate, servers, commands, ready_tx))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self { sender, handle }),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(BridgeError::InterpreterShutDown)
            }
        }
    }

    pub(crate) fn sender(&self) -> mpsc::Sender<Command> {
        self.sender.clone()
    }

    /// Asks the thread to finish its queue and exit, then joins it.
    pub(crate) fn shutdown(self) {
        let _ = self.sender.send(Command::Shutdown);
        if self.handle.join().is_err() {
            tracing::warn!("interpreter thread panicked");
        }
    }
}

fn interpreter_main(
    gate: Arc<InvocationGate>,
    servers: Arc<ServerTable>,
    commands: mpsc::Receiver<Command>,
    ready: mpsc::SyncSender<Result<()>>,
) {
    let _sentinel = TeardownSentinel { gate };

    let mut ctx = Context::default();
    ctx.insert_data(HostState::new(servers));
    if let Err(e) = bindings::install_webserver_bindings(&mut ctx) {
        let _ = ready.send(Err(e));
        return;
    }
    let _ = ready.send(Ok(()));
    drop(ready);

    while let Ok(command) = commands.recv() {
        match command {
            Command::Run(job) => job(&mut ctx),
            Command::Shutdown => break,
        }
    }

    let released = ctx
        .get_data::<HostState>()
        .map(|state| state.registry.borrow_mut().release_all())
        .unwrap_or(0);
    tracing::debug!(released, "released script callables");
}

/// Drains pending promise jobs and drops objects kept alive for them.
pub(crate) fn settle(ctx: &mut Context) {
    if let Err(e) = ctx.run_jobs() {
        tracing::warn!("pending script job failed: {}", e);
    }
    ctx.clear_kept_objects();
}
