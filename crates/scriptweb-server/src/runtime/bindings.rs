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

//! Script-facing `webserver` object.
//!
//! # JavaScript API
//!
//! | Function | Success | Failure |
//! |----------|---------|---------|
//! | `startWebserver(address)` | `[id]` | `[-1, msg]` |
//! | `startSecureWebserver(address, certFile, keyFile)` | `[id]` | `[-1, msg]` |
//! | `serve(id, path, fn)` | `[true]` | `[false, msg]` |
//! | `serveWebSocket(id, path, fn)` | `[true]` | `[false, msg]` |
//! | `writeWebSocket(id, client, message)` | `[true]` | `[false, msg]` |
//! | `broadcastWebSocket(id, path, message)` | `[true]` | `[false, msg]` |
//! | `getWebSocketClients(id)` | `[[{id, path}, ...]]` | `[false, msg]` |
//! | `serveFiles(id, path, directory)` | `[true]` | `[false, msg]` |
//! | `stopWebserver(id)` | `[true]` | `[false, msg]` |
//!
//! Passing a value of the wrong kind throws a `TypeError` instead of
//! returning a failure pair.

use std::fmt::Display;
use std::path::Path;
use std::sync::Arc;

use boa_engine::object::builtins::JsArray;
use boa_engine::object::{FunctionObjectBuilder, JsObject};
use boa_engine::property::Attribute;
use boa_engine::{
    js_string, Context, JsError, JsNativeError, JsResult, JsString, JsValue, NativeFunction,
};
use scriptweb_common::{BridgeError, ClientId, RouteKind, ServerId};

use crate::runtime::registry::HostState;
use crate::server::ServerTable;

type Binding = fn(&JsValue, &[JsValue], &mut Context) -> JsResult<JsValue>;

const BINDINGS: [(&str, usize, Binding); 9] = [
    ("startWebserver", 1, start_webserver),
    ("startSecureWebserver", 3, start_secure_webserver),
    ("serve", 3, serve),
    ("serveWebSocket", 3, serve_web_socket),
    ("writeWebSocket", 3, write_web_socket),
    ("broadcastWebSocket", 3, broadcast_web_socket),
    ("getWebSocketClients", 1, get_web_socket_clients),
    ("serveFiles", 3, serve_files),
    ("stopWebserver", 1, stop_webserver),
];

/// Registers the global `webserver` object. Expects [`HostState`] to be
/// attached to `ctx` already.
pub(crate) fn install_webserver_bindings(ctx: &mut Context) -> scriptweb_common::Result<()> {
    let webserver = JsObject::with_object_proto(ctx.intrinsics());

    for (name, length, function) in BINDINGS {
        let function = FunctionObjectBuilder::new(ctx.realm(), NativeFunction::from_fn_ptr(function))
            .name(JsString::from(name))
            .length(length)
            .build();
        webserver
            .set(JsString::from(name), function, false, ctx)
            .map_err(|e| BridgeError::AllocationFailure(e.to_string()))?;
    }

    ctx.register_global_property(js_string!("webserver"), webserver, Attribute::all())
        .map_err(|e| BridgeError::AllocationFailure(e.to_string()))?;

    Ok(())
}

fn host_state(ctx: &Context) -> JsResult<&HostState> {
    ctx.get_data::<HostState>().ok_or_else(|| {
        JsNativeError::error()
            .with_message("webserver bindings are not attached to this interpreter")
            .into()
    })
}

fn server_table(ctx: &Context) -> JsResult<Arc<ServerTable>> {
    host_state(ctx).map(|state| state.servers.clone())
}

fn argument_error(position: usize, name: &str, expected: &str, function: &str) -> JsError {
    JsNativeError::typ()
        .with_message(BridgeError::argument_type(position, name, expected, function).to_string())
        .into()
}

fn string_arg(args: &[JsValue], position: usize, name: &str, function: &str) -> JsResult<String> {
    args.get(position - 1)
        .and_then(|value| value.as_string().map(|s| s.to_std_string_escaped()))
        .ok_or_else(|| argument_error(position, name, "string", function))
}

fn integer_arg(args: &[JsValue], position: usize, name: &str, function: &str) -> JsResult<i64> {
    args.get(position - 1)
        .and_then(JsValue::as_number)
        .filter(|n| n.is_finite())
        .map(|n| n.trunc() as i64)
        .ok_or_else(|| argument_error(position, name, "integer", function))
}

fn function_arg(args: &[JsValue], position: usize, name: &str, function: &str) -> JsResult<JsObject> {
    match args.get(position - 1).and_then(|value| value.as_object()) {
        Some(object) if object.is_callable() => Ok(object.clone()),
        _ => Err(argument_error(position, name, "function", function)),
    }
}

fn server_arg(args: &[JsValue], function: &str) -> JsResult<Result<ServerId, String>> {
    let raw = integer_arg(args, 1, "server id", function)?;
    Ok(u32::try_from(raw)
        .map(ServerId)
        .map_err(|_| format!("Server with ID {} not found", raw)))
}

fn tuple(values: impl IntoIterator<Item = JsValue>, ctx: &mut Context) -> JsValue {
    JsArray::from_iter(values, ctx).into()
}

fn reply(outcome: Result<JsValue, String>, sentinel: JsValue, ctx: &mut Context) -> JsValue {
    match outcome {
        Ok(value) => tuple([value], ctx),
        Err(message) => tuple([sentinel, JsString::from(message.as_str()).into()], ctx),
    }
}

fn message<E: Display>(error: E) -> String {
    error.to_string()
}

fn start_webserver(_this: &JsValue, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    let address = string_arg(args, 1, "address", "startWebserver")?;
    let outcome = server_table(ctx)?
        .start(&address, None, None)
        .map(|id| JsValue::new(id.0))
        .map_err(message);
    Ok(reply(outcome, JsValue::new(-1), ctx))
}

fn start_secure_webserver(
    _this: &JsValue,
    args: &[JsValue],
    ctx: &mut Context,
) -> JsResult<JsValue> {
    let address = string_arg(args, 1, "address", "startSecureWebserver")?;
    let cert = string_arg(args, 2, "certFile", "startSecureWebserver")?;
    let key = string_arg(args, 3, "keyFile", "startSecureWebserver")?;
    let outcome = server_table(ctx)?
        .start(&address, Some(Path::new(&cert)), Some(Path::new(&key)))
        .map(|id| JsValue::new(id.0))
        .map_err(message);
    Ok(reply(outcome, JsValue::new(-1), ctx))
}

fn serve(_this: &JsValue, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    register_route(args, RouteKind::Http, "serve", ctx)
}

fn serve_web_socket(_this: &JsValue, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    register_route(args, RouteKind::WebSocket, "serveWebSocket", ctx)
}

/// Registers the callable first so that the route never points at a handle
/// that does not exist; a rejected route gives the handle back.
fn register_route(
    args: &[JsValue],
    kind: RouteKind,
    function: &str,
    ctx: &mut Context,
) -> JsResult<JsValue> {
    let server = server_arg(args, function)?;
    let path = string_arg(args, 2, "path", function)?;
    let callable = function_arg(args, 3, "hook function", function)?;

    let outcome = {
        let state = host_state(ctx)?;
        server.and_then(|server| {
            let registered = state.registry.borrow_mut().register(callable);
            let handle = registered.map_err(message)?;
            state
                .servers
                .register_route(server, &path, handle, kind)
                .map_err(|e| {
                    state.registry.borrow_mut().release(handle);
                    message(e)
                })
        })
    };

    Ok(reply(outcome.map(|()| JsValue::new(true)), JsValue::new(false), ctx))
}

fn write_web_socket(_this: &JsValue, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    let server = server_arg(args, "writeWebSocket")?;
    let client = string_arg(args, 2, "client", "writeWebSocket")?;
    let text = string_arg(args, 3, "message", "writeWebSocket")?;

    let servers = server_table(ctx)?;
    let outcome = server.and_then(|server| {
        servers
            .write_to_client(server, &ClientId::from(client), &text)
            .map(|()| JsValue::new(true))
            .map_err(message)
    });
    Ok(reply(outcome, JsValue::new(false), ctx))
}

fn broadcast_web_socket(
    _this: &JsValue,
    args: &[JsValue],
    ctx: &mut Context,
) -> JsResult<JsValue> {
    let server = server_arg(args, "broadcastWebSocket")?;
    let path = string_arg(args, 2, "path", "broadcastWebSocket")?;
    let text = string_arg(args, 3, "message", "broadcastWebSocket")?;

    let servers = server_table(ctx)?;
    let outcome = server.and_then(|server| {
        servers
            .broadcast(server, &path, &text)
            .map(|_| JsValue::new(true))
            .map_err(message)
    });
    Ok(reply(outcome, JsValue::new(false), ctx))
}

fn get_web_socket_clients(
    _this: &JsValue,
    args: &[JsValue],
    ctx: &mut Context,
) -> JsResult<JsValue> {
    let server = server_arg(args, "getWebSocketClients")?;
    let servers = server_table(ctx)?;

    let clients = match server.and_then(|server| servers.clients(server).map_err(message)) {
        Ok(clients) => clients,
        Err(e) => return Ok(reply(Err(e), JsValue::new(false), ctx)),
    };

    let mut entries = Vec::with_capacity(clients.len());
    for (client, path) in clients {
        let entry = JsObject::with_object_proto(ctx.intrinsics());
        entry.create_data_property_or_throw(js_string!("id"), JsString::from(client.as_str()), ctx)?;
        entry.create_data_property_or_throw(js_string!("path"), JsString::from(path.as_str()), ctx)?;
        entries.push(JsValue::from(entry));
    }
    let list = tuple(entries, ctx);
    Ok(reply(Ok(list), JsValue::new(false), ctx))
}

fn serve_files(_this: &JsValue, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    let server = server_arg(args, "serveFiles")?;
    let path = string_arg(args, 2, "path", "serveFiles")?;
    let directory = string_arg(args, 3, "directory", "serveFiles")?;

    let servers = server_table(ctx)?;
    let outcome = server.and_then(|server| {
        servers
            .serve_static_files(server, &path, Path::new(&directory))
            .map(|()| JsValue::new(true))
            .map_err(message)
    });
    Ok(reply(outcome, JsValue::new(false), ctx))
}

/// Stops the server and drops the callables its routes held.
fn stop_webserver(_this: &JsValue, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    let server = server_arg(args, "stopWebserver")?;

    let outcome = {
        let state = host_state(ctx)?;
        server.and_then(|server| state.servers.stop(server).map_err(message)).map(|handles| {
            let mut registry = state.registry.borrow_mut();
            for handle in handles {
                registry.release(handle);
            }
            JsValue::new(true)
        })
    };
    Ok(reply(outcome, JsValue::new(false), ctx))
}
