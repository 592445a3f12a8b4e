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

//! HTTP/1.1 connection handling.
//!
//! The accept loop spawns a task per connection. Each request is resolved
//! against the server's route table and either upgraded to a WebSocket,
//! handed to the dispatcher on a blocking thread, served from disk, or
//! answered with the plain 404 page.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};

use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full, LengthLimitError, Limited};
use hyper::body::{Bytes, Incoming};
use hyper::header::{self, HeaderName, HeaderValue};
use hyper::http::request::Parts;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::{TokioIo, TokioTimer};
use scriptweb_common::{BridgeError, HeaderTable, HttpRequest, HttpResponse};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_rustls::TlsAcceptor;

use crate::config::BridgeConfig;
use crate::server::router::Route;
use crate::server::table::ServerRecord;
use crate::server::{files, websocket, EventDispatcher};

/// Response bodies are boxed so static files can stream from disk.
pub(crate) type ResponseBody = UnsyncBoxBody<Bytes, std::io::Error>;

pub(crate) fn full(body: impl Into<Bytes>) -> ResponseBody {
    Full::new(body.into())
        .map_err(|never| match never {})
        .boxed_unsync()
}

pub(crate) fn empty() -> ResponseBody {
    Empty::<Bytes>::new().map_err(|never| match never {}).boxed_unsync()
}

/// State shared by every connection of one server.
pub(crate) struct ConnectionContext {
    pub(crate) record: Arc<ServerRecord>,
    pub(crate) dispatcher: Weak<dyn EventDispatcher>,
    pub(crate) config: BridgeConfig,
}

/// Accepts connections until the server's shutdown signal fires.
pub(crate) async fn accept_loop(
    listener: TcpListener,
    acceptor: Option<TlsAcceptor>,
    context: Arc<ConnectionContext>,
    mut shutdown: watch::Receiver<bool>,
) {
    let server = context.record.id();
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => {
                let (stream, remote) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::error!(%server, "failed to accept connection: {}", e);
                        continue;
                    }
                };
                tokio::spawn(serve_stream(
                    stream,
                    remote,
                    acceptor.clone(),
                    context.clone(),
                    shutdown.clone(),
                ));
            }
        }
    }
    tracing::debug!(%server, "listener closed");
}

async fn serve_stream(
    stream: TcpStream,
    remote: SocketAddr,
    acceptor: Option<TlsAcceptor>,
    context: Arc<ConnectionContext>,
    shutdown: watch::Receiver<bool>,
) {
    match acceptor {
        Some(acceptor) => match acceptor.accept(stream).await {
            Ok(tls_stream) => serve_connection(tls_stream, remote, context, shutdown).await,
            Err(e) => tracing::debug!(%remote, "TLS handshake failed: {}", e),
        },
        None => serve_connection(stream, remote, context, shutdown).await,
    }
}

async fn serve_connection<S>(
    stream: S,
    remote: SocketAddr,
    context: Arc<ConnectionContext>,
    mut shutdown: watch::Receiver<bool>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let grace = context.config.shutdown_grace;
    let read_timeout = context.config.read_timeout;

    let service = service_fn(move |req| {
        let context = context.clone();
        async move { Ok::<_, Infallible>(handle_request(context, remote, req).await) }
    });

    let mut builder = http1::Builder::new();
    builder
        .timer(TokioTimer::new())
        .header_read_timeout(read_timeout);
    let conn = builder
        .serve_connection(TokioIo::new(stream), service)
        .with_upgrades();
    tokio::pin!(conn);

    tokio::select! {
        result = conn.as_mut() => {
            if let Err(e) = result {
                tracing::debug!(%remote, "connection error: {}", e);
            }
        }
        _ = shutdown.changed() => {
            conn.as_mut().graceful_shutdown();
            match tokio::time::timeout(grace, conn.as_mut()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::debug!(%remote, "connection error during drain: {}", e),
                Err(_) => tracing::debug!(%remote, "connection did not drain in time"),
            }
        }
    }
}

async fn handle_request(
    context: Arc<ConnectionContext>,
    remote: SocketAddr,
    req: Request<Incoming>,
) -> Response<ResponseBody> {
    let path = req.uri().path().to_string();
    let route = context
        .record
        .resolve(&path, websocket::is_upgrade_request(&req));

    match route {
        Route::WebSocket(_) => websocket::accept(context, req, path),
        Route::Http(_) => dispatch_http(context, remote, req, path).await,
        Route::Files { prefix, directory } => files::serve(req, &prefix, &directory).await,
        Route::NotFound => not_found(),
    }
}

async fn dispatch_http(
    context: Arc<ConnectionContext>,
    remote: SocketAddr,
    req: Request<Incoming>,
    path: String,
) -> Response<ResponseBody> {
    let server = context.record.id();
    let (parts, body) = req.into_parts();

    let body = match Limited::new(body, context.config.max_body_bytes).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
            return plain_response(StatusCode::PAYLOAD_TOO_LARGE, "Payload Too Large");
        }
        Err(e) => {
            tracing::debug!(%server, %remote, "failed to read request body: {}", e);
            return plain_response(StatusCode::BAD_REQUEST, "Bad Request");
        }
    };

    let request = build_request(&parts, &path, remote, &body, &context.config);

    let Some(dispatcher) = context.dispatcher.upgrade() else {
        return plain_response(StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable");
    };

    let outcome = tokio::task::spawn_blocking(move || {
        dispatcher.deliver_http_request(server, &path, request)
    })
    .await;

    match outcome {
        Ok(Ok(response)) => into_response(response),
        Ok(Err(e)) => error_response(&e),
        Err(e) => {
            tracing::error!(%server, "http callable task failed: {}", e);
            plain_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
        }
    }
}

/// Copies the parts of a hyper request a callable can see.
///
/// Header values with several occurrences are joined with `|`. The `Host`
/// header is reported through `host` only.
fn build_request(
    parts: &Parts,
    path: &str,
    remote: SocketAddr,
    body: &[u8],
    config: &BridgeConfig,
) -> HttpRequest {
    let mut headers = HeaderTable::with_capacity(config.request_header_capacity)
        .with_field_limit(config.max_header_field_len);
    for name in parts.headers.keys() {
        if name == header::HOST {
            continue;
        }
        let joined = parts
            .headers
            .get_all(name)
            .iter()
            .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
            .collect::<Vec<_>>()
            .join("|");
        headers.push(canonical_header_name(name.as_str()), joined);
    }
    if headers.is_truncated() {
        tracing::warn!(
            stored = headers.len(),
            received = headers.attempted(),
            "request headers over capacity were dropped"
        );
    }

    let host = parts
        .headers
        .get(header::HOST)
        .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
        .or_else(|| parts.uri.authority().map(|a| a.to_string()))
        .unwrap_or_default();

    let content_length = parts
        .headers
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<i64>().ok())
        .unwrap_or_else(|| {
            if parts.headers.contains_key(header::TRANSFER_ENCODING) {
                -1
            } else {
                body.len() as i64
            }
        });

    HttpRequest::new(parts.method.as_str(), path)
        .with_url(parts.uri.to_string())
        .with_proto(format!("{:?}", parts.version))
        .with_host(host)
        .with_remote_addr(remote.to_string())
        .with_body(String::from_utf8_lossy(body))
        .with_content_length(content_length)
        .with_headers(headers)
}

/// `content-type` becomes `Content-Type`.
fn canonical_header_name(name: &str) -> String {
    name.split('-')
        .map(|segment| {
            let mut chars = segment.chars();
            match chars.next() {
                Some(first) => {
                    first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

fn into_response(response: HttpResponse) -> Response<ResponseBody> {
    if response.is_short_not_found() {
        return not_found();
    }

    let status = match StatusCode::from_u16(response.status_code) {
        Ok(status) => status,
        Err(_) => {
            return plain_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!(
                    "Internal Server Error: invalid status code {}",
                    response.status_code
                ),
            )
        }
    };

    if response.headers_count > response.headers.len() {
        tracing::warn!(
            stored = response.headers.len(),
            returned = response.headers_count,
            "response headers over capacity were dropped"
        );
    }

    let mut http_response = Response::new(full(response.body.unwrap_or_default()));
    *http_response.status_mut() = status;
    let headers = http_response.headers_mut();
    for (name, value) in response.headers.iter() {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => tracing::warn!(header = name, "skipping invalid response header"),
        }
    }
    http_response
}

fn error_response(error: &BridgeError) -> Response<ResponseBody> {
    match error {
        BridgeError::UnknownRoute(_) => not_found(),
        BridgeError::InterpreterShutDown | BridgeError::UnknownServer(_) => {
            plain_response(StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable")
        }
        other => {
            tracing::error!("http callable failed: {}", other);
            plain_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Internal Server Error: {}", other),
            )
        }
    }
}

pub(crate) fn plain_response(status: StatusCode, body: impl Into<String>) -> Response<ResponseBody> {
    let mut response = Response::new(full(body.into()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

pub(crate) fn not_found() -> Response<ResponseBody> {
    let mut response = plain_response(StatusCode::NOT_FOUND, "404 page not found\n");
    response.headers_mut().insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts(builder: hyper::http::request::Builder) -> Parts {
        builder.body(()).unwrap().into_parts().0
    }

    fn remote() -> SocketAddr {
        "10.0.0.7:51234".parse().unwrap()
    }

    async fn body_text(response: Response<ResponseBody>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_canonical_header_name() {
        assert_eq!(canonical_header_name("content-type"), "Content-Type");
        assert_eq!(canonical_header_name("x-forwarded-for"), "X-Forwarded-For");
        assert_eq!(canonical_header_name("accept"), "Accept");
    }

    #[test]
    fn test_build_request_fields() {
        let parts = parts(
            Request::builder()
                .method("POST")
                .uri("/submit?draft=1")
                .header("host", "example.com")
                .header("content-length", "5")
                .header("accept", "text/html")
                .header("accept", "application/json"),
        );

        let request = build_request(&parts, "/submit", remote(), b"hello", &BridgeConfig::default());
        assert_eq!(request.method, "POST");
        assert_eq!(request.path, "/submit");
        assert_eq!(request.url, "/submit?draft=1");
        assert_eq!(request.proto, "HTTP/1.1");
        assert_eq!(request.host, "example.com");
        assert_eq!(request.remote_addr, "10.0.0.7:51234");
        assert_eq!(request.content_length, 5);
        assert_eq!(request.body, "hello");
        assert_eq!(request.headers.get("Accept"), Some("text/html|application/json"));
        // Host is not repeated in the header table
        assert!(request.headers.get("Host").is_none());
    }

    #[test]
    fn test_build_request_caps_headers() {
        let mut builder = Request::builder().uri("/");
        for i in 0..60 {
            builder = builder.header(format!("x-h-{}", i), "v");
        }
        let parts = parts(builder);

        let request = build_request(&parts, "/", remote(), b"", &BridgeConfig::default());
        assert_eq!(request.headers_count(), 50);
        assert_eq!(request.headers.attempted(), 60);
    }

    #[test]
    fn test_chunked_request_has_unknown_length() {
        let parts = parts(
            Request::builder()
                .uri("/")
                .header("transfer-encoding", "chunked"),
        );
        let request = build_request(&parts, "/", remote(), b"abc", &BridgeConfig::default());
        assert_eq!(request.content_length, -1);
    }

    #[tokio::test]
    async fn test_short_not_found_uses_plain_page() {
        let response = into_response(HttpResponse::not_found());
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_text(response).await, "404 page not found\n");
    }

    #[tokio::test]
    async fn test_into_response_copies_headers() {
        let mut headers = HeaderTable::with_capacity(10);
        headers.push("Content-Type", "application/json");
        headers.push("bad header name", "x");
        let response = into_response(HttpResponse {
            status_code: 201,
            body: Some("{}".into()),
            headers,
            headers_count: 2,
        });

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()["content-type"], "application/json");
        assert_eq!(response.headers().len(), 1);
        assert_eq!(body_text(response).await, "{}");
    }

    #[tokio::test]
    async fn test_invalid_status_code_is_500() {
        let response = into_response(HttpResponse {
            status_code: 42,
            body: Some(String::new()),
            headers: HeaderTable::with_capacity(1),
            headers_count: 0,
        });
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body_text(response).await.contains("invalid status code 42"));
    }

    #[tokio::test]
    async fn test_error_response_mapping() {
        let response = error_response(&BridgeError::InterpreterCall("boom".into()));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body_text(response).await,
            "Internal Server Error: Error when calling hook function: boom"
        );

        let response = error_response(&BridgeError::InterpreterShutDown);
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let response = error_response(&BridgeError::UnknownRoute("/gone".into()));
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
