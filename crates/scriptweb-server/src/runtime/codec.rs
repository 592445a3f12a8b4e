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

//! Marshaling between bridge records and JavaScript values.
//!
//! # Request shape
//!
//! An HTTP callable receives one object:
//!
//! | Field | Type |
//! |-------|------|
//! | `method`, `path`, `url`, `proto`, `host`, `remoteAddr`, `body` | string |
//! | `contentLength` | number (`-1` if unknown) |
//! | `Headers` | object, header name to value |
//! | `headersCount` | number of entries in `Headers` |
//!
//! # Return values
//!
//! A callable returns its values as an array: `[status, body, headers]`.
//! A bare `404` (or `[404]`) asks the server for its plain not-found page.
//! Any other non-array value counts as a single returned value and
//! `undefined` as none.

use boa_engine::object::builtins::JsArray;
use boa_engine::object::JsObject;
use boa_engine::property::PropertyKey;
use boa_engine::{Context, JsError, JsString, JsValue};
use scriptweb_common::{BridgeError, HeaderTable, HttpRequest, HttpResponse, Result, WebSocketEvent};

use crate::config::BridgeConfig;

/// Name reported in errors about an HTTP callable's return values.
pub const HTTP_HOOK_CONTEXT: &str = "http hook return";

const SHORT_STATUS: u16 = 404;

/// Builds the request object passed to an HTTP callable.
///
/// Never fails on field contents; an error here means the interpreter
/// could not allocate the object.
pub fn encode_request(request: &HttpRequest, ctx: &mut Context) -> Result<JsValue> {
    let headers = JsObject::with_object_proto(ctx.intrinsics());
    for (name, value) in request.headers.iter() {
        headers
            .create_data_property_or_throw(JsString::from(name), JsString::from(value), ctx)
            .map_err(|e| BridgeError::AllocationFailure(e.to_string()))?;
    }

    let headers_count = i32::try_from(request.headers_count()).unwrap_or(i32::MAX);
    let fields: [(&str, JsValue); 10] = [
        ("method", JsString::from(request.method.as_str()).into()),
        ("path", JsString::from(request.path.as_str()).into()),
        ("url", JsString::from(request.url.as_str()).into()),
        ("proto", JsString::from(request.proto.as_str()).into()),
        ("contentLength", JsValue::new(request.content_length as f64)),
        ("host", JsString::from(request.host.as_str()).into()),
        ("remoteAddr", JsString::from(request.remote_addr.as_str()).into()),
        ("body", JsString::from(request.body.as_str()).into()),
        ("Headers", headers.into()),
        ("headersCount", JsValue::new(headers_count)),
    ];

    let object = JsObject::with_object_proto(ctx.intrinsics());
    for (key, value) in fields {
        object
            .create_data_property_or_throw(JsString::from(key), value, ctx)
            .map_err(|e| BridgeError::AllocationFailure(e.to_string()))?;
    }
    Ok(object.into())
}

/// Number of positional values an HTTP callable can return.
const HTTP_RETURN_VALUES: usize = 3;

/// Splits a callable's return value into at most `limit` positional values.
///
/// Array elements past `limit` are never read, so the length a script
/// reports for its array does not decide how much is allocated here.
pub fn returned_values(value: &JsValue, limit: usize, ctx: &mut Context) -> Result<Vec<JsValue>> {
    if value.is_undefined() {
        return Ok(Vec::new());
    }

    let array = match value.as_object() {
        Some(object) if object.is_array() => JsArray::from_object(object.clone())
            .map_err(|e| BridgeError::InterpreterCall(e.to_string()))?,
        _ => return Ok(std::iter::once(value.clone()).take(limit).collect()),
    };

    let length = array
        .length(ctx)
        .map_err(|e| BridgeError::InterpreterCall(e.to_string()))?;
    let count = usize::try_from(length).map_or(limit, |length| length.min(limit));

    let mut values = Vec::with_capacity(count);
    for i in 0..count {
        values.push(
            array
                .get(i, ctx)
                .map_err(|e| BridgeError::InterpreterCall(e.to_string()))?,
        );
    }
    Ok(values)
}

/// Parses the values returned by an HTTP callable.
///
/// # Errors
///
/// - [`BridgeError::Arity`] if fewer than three values were returned and
///   the first is not a lone `404`
/// - [`BridgeError::Type`] if a value has the wrong kind
pub fn decode_http_result(
    values: &[JsValue],
    config: &BridgeConfig,
    ctx: &mut Context,
) -> Result<HttpResponse> {
    let arity = |got: usize| BridgeError::Arity {
        context: HTTP_HOOK_CONTEXT.to_string(),
        expected: HTTP_RETURN_VALUES,
        got,
    };

    let status_code = match values.first() {
        Some(value) => decode_status(value)?,
        None => return Err(arity(0)),
    };
    if values.len() == 1 && status_code == SHORT_STATUS {
        return Ok(HttpResponse::not_found());
    }
    if values.len() < HTTP_RETURN_VALUES {
        return Err(arity(values.len()));
    }

    let body = decode_body(&values[1], ctx)?;
    let headers = decode_headers(&values[2], config, ctx)?;

    Ok(HttpResponse {
        status_code,
        body: Some(body),
        headers_count: headers.attempted(),
        headers,
    })
}

fn decode_status(value: &JsValue) -> Result<u16> {
    value
        .as_number()
        .filter(|n| n.is_finite())
        .map(f64::trunc)
        .filter(|n| (0.0..=f64::from(u16::MAX)).contains(n))
        .map(|n| n as u16)
        .ok_or_else(|| BridgeError::type_error(1, "status code", "integer", HTTP_HOOK_CONTEXT))
}

fn decode_body(value: &JsValue, ctx: &mut Context) -> Result<String> {
    if !(value.is_string() || value.is_number()) {
        return Err(BridgeError::type_error(
            2,
            "response body",
            "string",
            HTTP_HOOK_CONTEXT,
        ));
    }
    value
        .to_string(ctx)
        .map(|s| s.to_std_string_escaped())
        .map_err(|e| BridgeError::InterpreterCall(e.to_string()))
}

fn decode_headers(value: &JsValue, config: &BridgeConfig, ctx: &mut Context) -> Result<HeaderTable> {
    let object = match value.as_object() {
        Some(object) if !object.is_callable() => object.clone(),
        _ => {
            return Err(BridgeError::type_error(
                3,
                "header table",
                "object",
                HTTP_HOOK_CONTEXT,
            ))
        }
    };

    let mut headers = HeaderTable::with_capacity(config.response_header_capacity)
        .with_field_limit(config.max_header_field_len);

    let keys = object
        .own_property_keys(ctx)
        .map_err(|e| BridgeError::InterpreterCall(e.to_string()))?;
    for key in keys {
        let name = match &key {
            PropertyKey::String(s) => s.to_std_string_escaped(),
            PropertyKey::Index(i) => i.get().to_string(),
            PropertyKey::Symbol(_) => continue,
        };
        let value = object
            .get(key, ctx)
            .and_then(|v| v.to_string(ctx))
            .map_err(|e| BridgeError::InterpreterCall(e.to_string()))?;
        headers.push(name, value.to_std_string_escaped());
    }
    Ok(headers)
}

/// Calls an HTTP callable with `request` and parses what it returns.
pub fn invoke_http(
    callable: &JsObject,
    request: &HttpRequest,
    config: &BridgeConfig,
    ctx: &mut Context,
) -> Result<HttpResponse> {
    let argument = encode_request(request, ctx)?;
    let returned = callable
        .call(&JsValue::undefined(), &[argument], ctx)
        .map_err(|e| BridgeError::InterpreterCall(describe_error(&e, ctx)))?;
    let values = returned_values(&returned, HTTP_RETURN_VALUES, ctx)?;
    decode_http_result(&values, config, ctx)
}

/// Calls a WebSocket callable as `(clientId, messageType, payload)`.
///
/// The event is consumed whatever the outcome. The callable's return value
/// is ignored.
pub fn invoke_websocket(callable: &JsObject, event: WebSocketEvent, ctx: &mut Context) -> Result<()> {
    let payload = event.payload_text();
    let WebSocketEvent {
        client,
        message_type,
        ..
    } = event;

    let args = [
        JsString::from(client.as_str()).into(),
        JsValue::new(message_type.code()),
        JsString::from(payload.as_str()).into(),
    ];
    callable
        .call(&JsValue::undefined(), &args, ctx)
        .map(|_| ())
        .map_err(|e| BridgeError::InterpreterCall(describe_error(&e, ctx)))
}

/// Renders a thrown value the way the script would see it (`Error: boom`).
pub(crate) fn describe_error(error: &JsError, ctx: &mut Context) -> String {
    error
        .to_opaque(ctx)
        .to_string(ctx)
        .map(|s| s.to_std_string_escaped())
        .unwrap_or_else(|_| error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use boa_engine::Source;

    fn function(ctx: &mut Context, source: &str) -> JsObject {
        ctx.eval(Source::from_bytes(source))
            .unwrap()
            .as_object()
            .unwrap()
            .clone()
    }

    fn sample_request() -> HttpRequest {
        let mut headers = HeaderTable::with_capacity(50);
        headers.push("Accept", "text/plain");
        headers.push("X-Trace", "abc");
        HttpRequest::new("POST", "/echo")
            .with_url("/echo?x=1")
            .with_host("localhost:8080")
            .with_remote_addr("127.0.0.1:4000")
            .with_body("ping")
            .with_headers(headers)
    }

    #[test]
    fn test_encode_request_fields() {
        let mut ctx = Context::default();
        let inspect = function(
            &mut ctx,
            "(function(r) { return [r.method, r.path, r.url, r.proto, r.contentLength, r.host, \
             r.remoteAddr, r.body, r.Headers['X-Trace'], r.headersCount].join(','); })",
        );

        let request = encode_request(&sample_request(), &mut ctx).unwrap();
        let result = inspect.call(&JsValue::undefined(), &[request], &mut ctx).unwrap();
        assert_eq!(
            result.to_string(&mut ctx).unwrap().to_std_string_escaped(),
            "POST,/echo,/echo?x=1,HTTP/1.1,4,localhost:8080,127.0.0.1:4000,ping,abc,2"
        );
    }

    #[test]
    fn test_echo_round_trip() {
        let mut ctx = Context::default();
        let echo = function(&mut ctx, "(function(r) { return [200, r.body, {}]; })");

        let response = invoke_http(&echo, &sample_request(), &BridgeConfig::default(), &mut ctx).unwrap();
        assert_eq!(response.status_code, 200);
        assert_eq!(response.body.as_deref(), Some("ping"));
        assert_eq!(response.headers_count, 0);
    }

    #[test]
    fn test_bare_404_is_short_not_found() {
        let mut ctx = Context::default();
        for source in ["(function() { return 404; })", "(function() { return [404]; })"] {
            let callable = function(&mut ctx, source);
            let response =
                invoke_http(&callable, &sample_request(), &BridgeConfig::default(), &mut ctx).unwrap();
            assert_eq!(response.status_code, 404);
            assert!(response.body.is_none());
            assert_eq!(response.headers_count, 0);
        }
    }

    #[test]
    fn test_404_with_body_is_a_full_response() {
        let mut ctx = Context::default();
        let callable = function(&mut ctx, "(function() { return [404, 'nope', {}]; })");
        let response =
            invoke_http(&callable, &sample_request(), &BridgeConfig::default(), &mut ctx).unwrap();
        assert_eq!(response.body.as_deref(), Some("nope"));
        assert!(!response.is_short_not_found());
    }

    #[test]
    fn test_too_few_values_is_arity_error() {
        let mut ctx = Context::default();
        let callable = function(&mut ctx, "(function() { return [200]; })");
        let err = invoke_http(&callable, &sample_request(), &BridgeConfig::default(), &mut ctx)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Not enough arguments in function http hook return. Expected are 3 got 1."
        );

        let callable = function(&mut ctx, "(function() {})");
        let err = invoke_http(&callable, &sample_request(), &BridgeConfig::default(), &mut ctx)
            .unwrap_err();
        assert!(matches!(err, BridgeError::Arity { got: 0, .. }));
    }

    #[test]
    fn test_wrong_kinds_are_type_errors() {
        let mut ctx = Context::default();
        let cases = [
            ("(function() { return ['200', 'ok', {}]; })", 1, "status code"),
            ("(function() { return [200, {}, {}]; })", 2, "response body"),
            ("(function() { return [200, 'ok', 'nope']; })", 3, "header table"),
            ("(function() { return [200, 'ok', null]; })", 3, "header table"),
            ("(function() { return [70000, 'ok', {}]; })", 1, "status code"),
        ];
        for (source, expected_position, expected_name) in cases {
            let callable = function(&mut ctx, source);
            let err = invoke_http(&callable, &sample_request(), &BridgeConfig::default(), &mut ctx)
                .unwrap_err();
            match err {
                BridgeError::Type { position, name, context, .. } => {
                    assert_eq!(position, expected_position, "{}", source);
                    assert_eq!(name, expected_name);
                    assert_eq!(context, HTTP_HOOK_CONTEXT);
                }
                other => panic!("expected type error for {}, got {:?}", source, other),
            }
        }
    }

    #[test]
    fn test_numeric_body_and_header_values_are_stringified() {
        let mut ctx = Context::default();
        let callable = function(
            &mut ctx,
            "(function() { return [201.9, 42, {'X-Count': 7}]; })",
        );
        let response =
            invoke_http(&callable, &sample_request(), &BridgeConfig::default(), &mut ctx).unwrap();
        assert_eq!(response.status_code, 201);
        assert_eq!(response.body.as_deref(), Some("42"));
        assert_eq!(response.headers.get("X-Count"), Some("7"));
    }

    #[test]
    fn test_response_headers_over_capacity() {
        let mut ctx = Context::default();
        let callable = function(
            &mut ctx,
            "(function() { var h = {}; for (var i = 0; i < 15; i++) { h['X-' + i] = 'v' + i; } \
             return [200, 'ok', h]; })",
        );
        let response =
            invoke_http(&callable, &sample_request(), &BridgeConfig::default(), &mut ctx).unwrap();
        assert_eq!(response.headers.len(), 10);
        assert_eq!(response.headers_count, 15);
        assert_eq!(response.headers.get("X-0"), Some("v0"));
        assert_eq!(response.headers.get("X-9"), Some("v9"));
    }

    #[test]
    fn test_huge_sparse_array_reads_only_three_values() {
        let mut ctx = Context::default();
        let callable = function(
            &mut ctx,
            "(function() { var a = new Array(4294967295); a[0] = 200; a[1] = 'ok'; a[2] = {}; \
             return a; })",
        );
        let response =
            invoke_http(&callable, &sample_request(), &BridgeConfig::default(), &mut ctx).unwrap();
        assert_eq!(response.status_code, 200);
        assert_eq!(response.body.as_deref(), Some("ok"));

        let callable = function(&mut ctx, "(function() { var a = new Array(4294967295); return a; })");
        let err = invoke_http(&callable, &sample_request(), &BridgeConfig::default(), &mut ctx)
            .unwrap_err();
        assert!(matches!(err, BridgeError::Type { position: 1, .. }));
    }

    #[test]
    fn test_returned_values_respects_limit() {
        let mut ctx = Context::default();
        let value = ctx
            .eval(Source::from_bytes("[1, 2, 3, 4, 5]"))
            .unwrap();
        assert_eq!(returned_values(&value, 3, &mut ctx).unwrap().len(), 3);
        assert_eq!(returned_values(&JsValue::new(7), 3, &mut ctx).unwrap().len(), 1);
        assert!(returned_values(&JsValue::undefined(), 3, &mut ctx).unwrap().is_empty());
    }

    #[test]
    fn test_thrown_error_is_interpreter_call_error() {
        let mut ctx = Context::default();
        let callable = function(&mut ctx, "(function() { throw new Error('boom'); })");
        let err = invoke_http(&callable, &sample_request(), &BridgeConfig::default(), &mut ctx)
            .unwrap_err();
        assert_eq!(err.to_string(), "Error when calling hook function: Error: boom");
    }

    #[test]
    fn test_invoke_websocket_passes_three_arguments() {
        let mut ctx = Context::default();
        ctx.eval(Source::from_bytes("var seen = null;")).unwrap();
        let callable = function(
            &mut ctx,
            "(function(id, type, msg) { seen = id + '|' + type + '|' + msg; return 'ignored'; })",
        );

        let event = WebSocketEvent::new(
            scriptweb_common::ClientId::from("client-1"),
            scriptweb_common::MessageType::Text,
            "hello",
        );
        invoke_websocket(&callable, event, &mut ctx).unwrap();

        let seen = ctx.eval(Source::from_bytes("seen")).unwrap();
        assert_eq!(
            seen.to_string(&mut ctx).unwrap().to_std_string_escaped(),
            "client-1|1|hello"
        );
    }

    #[test]
    fn test_invoke_websocket_reports_errors() {
        let mut ctx = Context::default();
        let callable = function(&mut ctx, "(function() { throw 'bad message'; })");
        let event = WebSocketEvent::new(
            scriptweb_common::ClientId::from("client-2"),
            scriptweb_common::MessageType::Binary,
            vec![1u8, 2, 3],
        );
        let err = invoke_websocket(&callable, event, &mut ctx).unwrap_err();
        assert_eq!(err.to_string(), "Error when calling hook function: bad message");
    }
}
