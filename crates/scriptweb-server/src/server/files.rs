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

use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use tower::ServiceExt;
use tower_http::services::ServeDir;

use crate::server::http_server::{plain_response, ResponseBody};

/// Serves a file from `directory` for a request under `prefix`.
pub(crate) async fn serve(
    req: Request<Incoming>,
    prefix: &str,
    directory: &Path,
) -> Response<ResponseBody> {
    let (mut parts, body) = req.into_parts();

    let stripped = strip_prefix(parts.uri.path(), prefix);
    let rewritten = match parts.uri.query() {
        Some(query) => format!("{}?{}", stripped, query),
        None => stripped,
    };
    parts.uri = match rewritten.parse() {
        Ok(uri) => uri,
        Err(_) => return plain_response(StatusCode::BAD_REQUEST, "Bad Request"),
    };

    let response = match ServeDir::new(directory)
        .oneshot(Request::from_parts(parts, body))
        .await
    {
        Ok(response) => response,
        Err(never) => match never {},
    };

    let (parts, body) = response.into_parts();
    let directory = directory.display().to_string();
    let body = body
        .map_err(move |e| {
            tracing::error!(directory = %directory, "failed to read file: {}", e);
            e
        })
        .boxed_unsync();
    Response::from_parts(parts, body)
}

fn strip_prefix(path: &str, prefix: &str) -> String {
    let rest = path.strip_prefix(prefix).unwrap_or(path);
    if rest.starts_with('/') {
        rest.to_string()
    } else {
        format!("/{}", rest)
    }
}
