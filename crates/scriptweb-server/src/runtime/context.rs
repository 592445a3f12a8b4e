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

use std::path::Path;
use std::sync::{mpsc, Arc, Mutex, MutexGuard, PoisonError, Weak};

use boa_engine::{Context, Source};
use scriptweb_common::{
    BridgeError, CallbackHandle, HttpRequest, HttpResponse, Result, RouteKind, ServerId,
    WebSocketEvent,
};
use tokio::runtime::Handle;

use crate::config::BridgeConfig;
use crate::runtime::codec;
use crate::runtime::gate::{GateStats, InvocationGate};
use crate::runtime::lifecycle::{self, Command, InterpreterThread};
use crate::runtime::registry::HostState;
use crate::server::{EventDispatcher, ServerTable};

/// A scripting interpreter with the `webserver` bindings installed.
///
/// Servers started by the script run on the tokio runtime the context was
/// created with. Their requests are handed back to the script one at a time,
/// whatever the number of connections.
///
/// Dropping the context closes it.
pub struct ScriptContext {
    inner: Arc<Interpreter>,
}

pub(crate) struct Interpreter {
    gate: Arc<InvocationGate>,
    servers: Arc<ServerTable>,
    worker: Mutex<Option<InterpreterThread>>,
    config: BridgeConfig,
}

impl ScriptContext {
    /// Create a context whose servers run on the current tokio runtime.
    pub fn new(config: BridgeConfig) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| BridgeError::Config(format!("no tokio runtime available: {}", e)))?;
        Self::with_runtime(runtime, config)
    }

    /// Create a context whose servers run on `runtime`.
    pub fn with_runtime(runtime: Handle, config: BridgeConfig) -> Result<Self> {
        config.validate()?;

        let gate = Arc::new(InvocationGate::new());
        let inner = Arc::new_cyclic(|weak: &Weak<Interpreter>| {
            let dispatcher: Weak<dyn EventDispatcher> = weak.clone();
            Interpreter {
                gate,
                servers: Arc::new(ServerTable::new(runtime, dispatcher, config.clone())),
                worker: Mutex::new(None),
                config,
            }
        });

        let worker = InterpreterThread::spawn(inner.gate.clone(), inner.servers.clone())?;
        *inner.lock_worker() = Some(worker);

        tracing::debug!("script context ready");
        Ok(Self { inner })
    }

    /// Evaluate script source in the interpreter.
    pub fn load_script(&self, source: &str) -> Result<()> {
        self.evaluate(source).map(|_| ())
    }

    /// Read and evaluate a script file.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            BridgeError::ScriptLoad(format!("Failed to load script {}: {}", path.display(), e))
        })?;
        tracing::info!(path = %path.display(), "loading script");
        self.load_script(&source)
    }

    /// Evaluate `source` and return the result converted to a string.
    pub fn evaluate(&self, source: &str) -> Result<String> {
        let source = source.to_string();
        self.inner.run(move |ctx| {
            let value = ctx
                .eval(Source::from_bytes(source.as_bytes()))
                .map_err(|e| BridgeError::ScriptLoad(codec::describe_error(&e, ctx)))?;
            value
                .to_string(ctx)
                .map(|s| s.to_std_string_escaped())
                .map_err(|e| BridgeError::ScriptLoad(e.to_string()))
        })
    }

    /// The servers started by this context's script.
    pub fn servers(&self) -> &Arc<ServerTable> {
        &self.inner.servers
    }

    /// Stop one server and release the callables it held.
    pub fn stop_server(&self, server: ServerId) -> Result<()> {
        let handles = self.inner.servers.stop(server)?;
        self.inner.release_handles(handles)
    }

    /// Stop every server started by the script.
    pub fn stop_all(&self) -> Result<()> {
        let handles = self.inner.servers.stop_all();
        self.inner.release_handles(handles)
    }

    /// Number of callables the script currently has registered.
    pub fn registered_callbacks(&self) -> Result<usize> {
        self.inner.run(|ctx| {
            let state = host_state(ctx)?;
            let count = state.registry.borrow().len();
            Ok(count)
        })
    }

    /// Counters from the invocation gate. `peak` above 1 would mean two
    /// calls overlapped in the interpreter.
    pub fn gate_stats(&self) -> GateStats {
        self.inner.gate.stats()
    }

    /// True once [`close`](Self::close) has run or the interpreter thread
    /// has gone away.
    pub fn is_closed(&self) -> bool {
        !self.inner.gate.is_alive()
    }

    /// Stop all servers and tear the interpreter down.
    ///
    /// Waits for an in-flight call to finish. Calls made afterwards fail
    /// with [`BridgeError::InterpreterShutDown`]. Closing twice is a no-op.
    pub fn close(&self) {
        self.inner.close();
    }

    /// The dispatcher the servers of this context deliver to.
    pub fn dispatcher(&self) -> Arc<dyn EventDispatcher> {
        self.inner.clone()
    }
}

impl Drop for ScriptContext {
    fn drop(&mut self) {
        self.inner.close();
    }
}

impl Interpreter {
    fn lock_worker(&self) -> MutexGuard<'_, Option<InterpreterThread>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `job` on the interpreter thread and waits for its result.
    ///
    /// The gate is held for the whole round trip.
    fn run<T, F>(&self, job: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Context) -> Result<T> + Send + 'static,
    {
        let _guard = self.gate.acquire()?;
        let sender = self
            .lock_worker()
            .as_ref()
            .map(InterpreterThread::sender)
            .ok_or(BridgeError::InterpreterShutDown)?;

        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        let job = Box::new(move |ctx: &mut Context| {
            let result = job(ctx);
            lifecycle::settle(ctx);
            let _ = reply_tx.send(result);
        });
        sender
            .send(Command::Run(job))
            .map_err(|_| BridgeError::InterpreterShutDown)?;

        reply_rx
            .recv()
            .map_err(|_| BridgeError::InterpreterShutDown)?
    }

    fn release_handles(&self, handles: Vec<CallbackHandle>) -> Result<()> {
        if handles.is_empty() {
            return Ok(());
        }
        self.run(move |ctx| {
            let state = host_state(ctx)?;
            let mut registry = state.registry.borrow_mut();
            for handle in handles {
                registry.release(handle);
            }
            Ok(())
        })
    }

    fn close(&self) {
        let was_alive = self.gate.mark_dead();
        let stopped = self.servers.stop_all();

        let worker = self.lock_worker().take();
        if let Some(worker) = worker {
            worker.shutdown();
        }

        if was_alive {
            tracing::info!(routes = stopped.len(), "script context closed");
        }
    }
}

impl EventDispatcher for Interpreter {
    fn deliver_http_request(
        &self,
        server: ServerId,
        path: &str,
        request: HttpRequest,
    ) -> Result<HttpResponse> {
        let handle = self.servers.route_handle(server, path, RouteKind::Http)?;
        let config = self.config.clone();
        tracing::debug!(%server, path, %handle, "calling http callable");

        self.run(move |ctx| {
            let callable = host_state(ctx)?.registry.borrow().lookup(handle)?;
            codec::invoke_http(&callable, &request, &config, ctx)
        })
    }

    fn deliver_websocket_message(
        &self,
        server: ServerId,
        path: &str,
        event: WebSocketEvent,
    ) -> Result<()> {
        let handle = self.servers.route_handle(server, path, RouteKind::WebSocket)?;
        tracing::debug!(%server, path, %handle, client = %event.client, "calling websocket callable");

        self.run(move |ctx| {
            let callable = host_state(ctx)?.registry.borrow().lookup(handle)?;
            codec::invoke_websocket(&callable, event, ctx)
        })
    }
}

fn host_state(ctx: &Context) -> Result<&HostState> {
    ctx.get_data::<HostState>()
        .ok_or(BridgeError::InterpreterShutDown)
}
