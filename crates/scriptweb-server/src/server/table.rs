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

//! Server handle table.
//!
//! Maps [`ServerId`]s to running servers. Every operation here is
//! non-blocking: listeners are bound synchronously, connection work is
//! spawned on the tokio runtime the table was created with, and stopping a
//! server only signals its tasks. That makes the table safe to call from
//! inside a script invocation, where the interpreter thread must never wait
//! on the server.

use std::collections::HashMap;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use scriptweb_common::{BridgeError, CallbackHandle, ClientId, Result, RouteKind, ServerId};
use tokio::runtime::Handle;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

use crate::config::BridgeConfig;
use crate::server::http_server::{self, ConnectionContext};
use crate::server::router::{normalize_path, Route, RouteTable};
use crate::server::{tls, EventDispatcher};

pub(crate) struct ClientSlot {
    path: String,
    sender: mpsc::Sender<Message>,
}

/// One running server: its routes, its connected WebSocket clients and the
/// signal that stops it.
pub(crate) struct ServerRecord {
    id: ServerId,
    local_addr: SocketAddr,
    tls: bool,
    routes: RwLock<RouteTable>,
    clients: Mutex<HashMap<ClientId, ClientSlot>>,
    shutdown: watch::Sender<bool>,
}

impl ServerRecord {
    pub(crate) fn id(&self) -> ServerId {
        self.id
    }

    pub(crate) fn resolve(&self, path: &str, is_upgrade: bool) -> Route {
        self.routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .resolve(path, is_upgrade)
    }

    pub(crate) fn add_client(
        &self,
        client: ClientId,
        path: String,
        sender: mpsc::Sender<Message>,
    ) {
        self.lock_clients().insert(client, ClientSlot { path, sender });
    }

    pub(crate) fn remove_client(&self, client: &ClientId) {
        self.lock_clients().remove(client);
    }

    fn lock_clients(&self) -> std::sync::MutexGuard<'_, HashMap<ClientId, ClientSlot>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues `message` without waiting. A client whose queue is full is
    /// dropped from the table, which ends its socket task once the queue
    /// drains.
    fn send_to(&self, client: &ClientId, message: Message) -> Result<()> {
        let mut clients = self.lock_clients();
        let slot = clients
            .get(client)
            .ok_or_else(|| BridgeError::UnknownClient(client.clone()))?;
        match slot.sender.try_send(message) {
            Ok(()) => Ok(()),
            Err(TrySendError::Closed(_)) => Err(BridgeError::UnknownClient(client.clone())),
            Err(TrySendError::Full(_)) => {
                clients.remove(client);
                tracing::warn!(server = %self.id, %client, "websocket client queue full, disconnecting");
                Err(BridgeError::ClientLagged(client.clone()))
            }
        }
    }

    /// Signals every task of this server to wind down and returns the
    /// callable handles its routes held.
    fn shutdown(&self) -> Vec<CallbackHandle> {
        let close = Message::Close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: "".into(),
        }));
        for (client, slot) in self.lock_clients().drain() {
            // a full or closed queue ends the socket task once the sender drops
            if slot.sender.try_send(close.clone()).is_err() {
                tracing::debug!(server = %self.id, %client, "close frame not queued at shutdown");
            }
        }

        let _ = self.shutdown.send(true);

        let mut routes = self.routes.write().unwrap_or_else(PoisonError::into_inner);
        let handles = routes.handles();
        routes.clear();
        handles
    }
}

/// Table of servers started through the bridge.
pub struct ServerTable {
    runtime: Handle,
    dispatcher: Weak<dyn EventDispatcher>,
    config: BridgeConfig,
    next_id: AtomicU32,
    servers: RwLock<HashMap<ServerId, Arc<ServerRecord>>>,
}

impl ServerTable {
    /// Creates an empty table. Server tasks are spawned on `runtime`;
    /// inbound events are delivered to `dispatcher` while it is alive.
    pub fn new(runtime: Handle, dispatcher: Weak<dyn EventDispatcher>, config: BridgeConfig) -> Self {
        Self {
            runtime,
            dispatcher,
            config,
            next_id: AtomicU32::new(0),
            servers: RwLock::new(HashMap::new()),
        }
    }

    /// Binds `address` and starts serving on it.
    ///
    /// `address` may omit the host (`":8080"`), in which case every
    /// interface is used. TLS is enabled when both `cert` and `key` are
    /// given.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::TlsConfig`] if only one of `cert`/`key` is given or
    ///   either cannot be loaded
    /// - [`BridgeError::Bind`] if the address is malformed or in use
    pub fn start(&self, address: &str, cert: Option<&Path>, key: Option<&Path>) -> Result<ServerId> {
        let acceptor = match (cert, key) {
            (Some(cert), Some(key)) => Some(tls::load_acceptor(cert, key)?),
            (None, None) => None,
            _ => {
                return Err(BridgeError::TlsConfig(
                    "certificate and key must be supplied together".to_string(),
                ))
            }
        };

        let bind_error = |reason: String| BridgeError::Bind {
            address: address.to_string(),
            reason,
        };

        let socket_addr = resolve_address(address).map_err(|e| bind_error(e.to_string()))?;
        let std_listener =
            std::net::TcpListener::bind(socket_addr).map_err(|e| bind_error(e.to_string()))?;
        std_listener
            .set_nonblocking(true)
            .map_err(|e| bind_error(e.to_string()))?;
        let local_addr = std_listener
            .local_addr()
            .map_err(|e| bind_error(e.to_string()))?;

        let listener = {
            let _guard = self.runtime.enter();
            tokio::net::TcpListener::from_std(std_listener).map_err(|e| bind_error(e.to_string()))?
        };

        let id = ServerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (shutdown, shutdown_rx) = watch::channel(false);
        let record = Arc::new(ServerRecord {
            id,
            local_addr,
            tls: acceptor.is_some(),
            routes: RwLock::new(RouteTable::default()),
            clients: Mutex::new(HashMap::new()),
            shutdown,
        });

        self.write_servers().insert(id, record.clone());

        let context = Arc::new(ConnectionContext {
            record,
            dispatcher: self.dispatcher.clone(),
            config: self.config.clone(),
        });
        self.runtime.spawn(http_server::accept_loop(
            listener,
            acceptor,
            context,
            shutdown_rx,
        ));

        tracing::info!(server = %id, %local_addr, tls = cert.is_some(), "server started");
        Ok(id)
    }

    /// Binds `handle` to `path` on a running server.
    pub fn register_route(
        &self,
        server: ServerId,
        path: &str,
        handle: CallbackHandle,
        kind: RouteKind,
    ) -> Result<()> {
        let record = self.record(server)?;
        let mut routes = record.routes.write().unwrap_or_else(PoisonError::into_inner);
        routes.insert(kind, path, handle)?;
        tracing::debug!(%server, path, %kind, %handle, "route registered");
        Ok(())
    }

    /// Serves files from `directory` under the path prefix `path`.
    pub fn serve_static_files(
        &self,
        server: ServerId,
        path: &str,
        directory: impl Into<PathBuf>,
    ) -> Result<()> {
        let directory = directory.into();
        let record = self.record(server)?;
        if !directory.is_dir() {
            return Err(BridgeError::DirectoryNotFound(directory));
        }
        let mut routes = record.routes.write().unwrap_or_else(PoisonError::into_inner);
        routes.insert_files(path, directory)?;
        Ok(())
    }

    /// Looks up the callable bound to `path` on a running server.
    pub fn route_handle(&self, server: ServerId, path: &str, kind: RouteKind) -> Result<CallbackHandle> {
        let record = self.record(server)?;
        let routes = record.routes.read().unwrap_or_else(PoisonError::into_inner);
        routes
            .handle(kind, path)
            .ok_or_else(|| BridgeError::UnknownRoute(path.to_string()))
    }

    /// Queues a text message for one WebSocket client.
    ///
    /// [`BridgeError::UnknownClient`] means the client has disconnected.
    pub fn write_to_client(&self, server: ServerId, client: &ClientId, message: &str) -> Result<()> {
        self.record(server)?
            .send_to(client, Message::Text(message.to_string()))
    }

    /// Queues a text message for every client connected on `path`. Returns
    /// the number of clients reached.
    pub fn broadcast(&self, server: ServerId, path: &str, message: &str) -> Result<usize> {
        let path = normalize_path(path);
        let record = self.record(server)?;
        let mut clients = record.lock_clients();

        let mut reached = 0;
        let mut lagged = Vec::new();
        for (client, slot) in clients.iter().filter(|(_, slot)| slot.path == path) {
            match slot.sender.try_send(Message::Text(message.to_string())) {
                Ok(()) => reached += 1,
                Err(TrySendError::Full(_)) => lagged.push(client.clone()),
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!(%server, %client, "broadcast skipped closed client")
                }
            }
        }
        for client in lagged {
            clients.remove(&client);
            tracing::warn!(%server, %client, "websocket client queue full, disconnecting");
        }

        if reached == 0 {
            return Err(BridgeError::NoClients(path));
        }
        Ok(reached)
    }

    /// Connected WebSocket clients with the path each is attached to.
    pub fn clients(&self, server: ServerId) -> Result<Vec<(ClientId, String)>> {
        let record = self.record(server)?;
        let clients = record.lock_clients();
        Ok(clients
            .iter()
            .map(|(id, slot)| (id.clone(), slot.path.clone()))
            .collect())
    }

    /// Stops a server and returns the callable handles its routes held.
    ///
    /// Stopping an already stopped server succeeds with no handles. Stopping
    /// an id this table never issued is [`BridgeError::UnknownServer`].
    pub fn stop(&self, server: ServerId) -> Result<Vec<CallbackHandle>> {
        let removed = self.write_servers().remove(&server);
        match removed {
            Some(record) => {
                let handles = record.shutdown();
                tracing::info!(%server, "server shut down");
                Ok(handles)
            }
            None if server.0 < self.next_id.load(Ordering::SeqCst) => Ok(Vec::new()),
            None => Err(BridgeError::UnknownServer(server)),
        }
    }

    /// Stops every running server. Returns the handles they held.
    pub fn stop_all(&self) -> Vec<CallbackHandle> {
        let records: Vec<_> = self.write_servers().drain().map(|(_, r)| r).collect();
        let mut handles = Vec::new();
        for record in records {
            handles.extend(record.shutdown());
            tracing::info!(server = %record.id, "server shut down");
        }
        handles
    }

    pub fn local_addr(&self, server: ServerId) -> Result<SocketAddr> {
        Ok(self.record(server)?.local_addr)
    }

    pub fn is_tls(&self, server: ServerId) -> Result<bool> {
        Ok(self.record(server)?.tls)
    }

    pub fn is_running(&self, server: ServerId) -> bool {
        self.read_servers().contains_key(&server)
    }

    pub fn server_ids(&self) -> Vec<ServerId> {
        let mut ids: Vec<_> = self.read_servers().keys().copied().collect();
        ids.sort();
        ids
    }

    fn record(&self, server: ServerId) -> Result<Arc<ServerRecord>> {
        self.read_servers()
            .get(&server)
            .cloned()
            .ok_or(BridgeError::UnknownServer(server))
    }

    fn read_servers(&self) -> std::sync::RwLockReadGuard<'_, HashMap<ServerId, Arc<ServerRecord>>> {
        self.servers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_servers(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<ServerId, Arc<ServerRecord>>> {
        self.servers.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Resolves a listen address. A bare `":port"` listens on all interfaces.
fn resolve_address(address: &str) -> std::io::Result<SocketAddr> {
    let full = if address.starts_with(':') {
        format!("0.0.0.0{}", address)
    } else {
        address.to_string()
    };
    full.to_socket_addrs()?.next().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("no address found for {}", address),
        )
    })
}
