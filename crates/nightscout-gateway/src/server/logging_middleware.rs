//! HTTP request/response logging
//!
//! One entry and one exit line per request, correlated by trace id.
//! SSE responses are passed through untouched.

use axum::{
    body::Body,
    extract::Request,
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use http_body_util::BodyExt;
use tracing::{debug, warn, Instrument};

use super::mcp_middleware::SESSION_HEADER;
use crate::logging::{RequestSpan, TraceContext};

/// Maximum body size to log (64KB)
const MAX_BODY_LOG_SIZE: usize = 64 * 1024;

/// Headers shown at DEBUG
const LOGGED_HEADERS: &[&str] = &[
    "authorization",
    "content-type",
    "accept",
    "user-agent",
    SESSION_HEADER,
    "mcp-protocol-version",
];

/// Headers whose values never reach the log
const SENSITIVE_HEADERS: &[&str] = &["authorization", "cookie", "set-cookie"];

fn redact_headers_compact(headers: &HeaderMap) -> String {
    headers
        .iter()
        .filter(|(name, _)| LOGGED_HEADERS.contains(&name.as_str()))
        .map(|(name, value)| {
            if SENSITIVE_HEADERS.contains(&name.as_str()) {
                format!("{}=[REDACTED]", name)
            } else {
                format!("{}={:?}", name, value)
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Compact rendering of a small body
pub fn format_body(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return "[empty]".to_string();
    }
    if bytes.len() > MAX_BODY_LOG_SIZE {
        return format!("[{} bytes]", bytes.len());
    }

    match std::str::from_utf8(bytes) {
        Ok(text) => match serde_json::from_str::<serde_json::Value>(text) {
            Ok(json) => serde_json::to_string(&json).unwrap_or_else(|_| text.to_string()),
            Err(_) if text.len() > 200 => {
                let cut = (0..=200).rev().find(|i| text.is_char_boundary(*i)).unwrap_or(0);
                format!("{}...", &text[..cut])
            }
            Err(_) => text.to_string(),
        },
        Err(_) => format!("[binary: {} bytes]", bytes.len()),
    }
}

/// One-line summary of a JSON-RPC response (or batch)
fn format_mcp_response(bytes: &[u8]) -> Option<String> {
    let json: serde_json::Value = serde_json::from_slice(bytes).ok()?;

    if let Some(items) = json.as_array() {
        let errors = items.iter().filter(|r| r.get("error").is_some()).count();
        return Some(format!("batch: {} responses, {} errors", items.len(), errors));
    }

    if let Some(error) = json.get("error") {
        let code = error.get("code").and_then(|c| c.as_i64()).unwrap_or(0);
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("unknown");
        return Some(format!("error: {} ({})", message, code));
    }

    let result = json.get("result")?;
    if let Some(tools) = result.get("tools").and_then(|t| t.as_array()) {
        return Some(format!("tools: {}", tools.len()));
    }
    if let Some(prompts) = result.get("prompts").and_then(|p| p.as_array()) {
        return Some(format!("prompts: {}", prompts.len()));
    }
    if let Some(content) = result.get("content").and_then(|c| c.as_array()) {
        let failed = result
            .get("isError")
            .and_then(|e| e.as_bool())
            .unwrap_or(false);
        return Some(format!(
            "content: {} items{}",
            content.len(),
            if failed { " (isError)" } else { "" }
        ));
    }
    if let Some(version) = result.get("protocolVersion").and_then(|v| v.as_str()) {
        let name = result
            .get("serverInfo")
            .and_then(|s| s.get("name"))
            .and_then(|n| n.as_str())
            .unwrap_or("?");
        return Some(format!("initialized: {} ({})", name, version));
    }

    match result.as_object() {
        Some(map) if !map.is_empty() => Some(format!(
            "result: {{{}}}",
            map.keys().map(String::as_str).collect::<Vec<_>>().join(", ")
        )),
        _ => Some("ok".to_string()),
    }
}

/// JSON-RPC method of a body, or of the first element of a batch
pub fn extract_mcp_method(bytes: &[u8]) -> Option<String> {
    let json: serde_json::Value = serde_json::from_slice(bytes).ok()?;
    let first = match &json {
        serde_json::Value::Array(items) => items.first()?,
        single => single,
    };
    first
        .get("method")
        .and_then(|m| m.as_str())
        .map(String::from)
}

fn is_event_stream(response: &Response) -> bool {
    response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("text/event-stream"))
}

/// Logging middleware for requests and responses
pub async fn http_logging_middleware(request: Request, next: Next) -> Result<Response, StatusCode> {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let headers = request.headers().clone();

    let session_id = headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    let ctx = TraceContext::new(&method, &path).with_session(session_id);
    let span = RequestSpan::enter(&ctx);

    async move {
        debug!(
            trace_id = %ctx.trace_id,
            headers = %redact_headers_compact(&headers),
            "Request headers"
        );

        let (parts, body) = request.into_parts();
        let body_bytes = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                warn!(trace_id = %ctx.trace_id, "Failed to read request body: {}", e);
                return Err(StatusCode::BAD_REQUEST);
            }
        };

        let ctx = ctx.with_mcp_method(extract_mcp_method(&body_bytes));
        RequestSpan::log_entry(&ctx);

        let request = Request::from_parts(parts, Body::from(body_bytes));
        let response = next.run(request).await;
        let status = response.status().as_u16();

        if is_event_stream(&response) {
            RequestSpan::log_exit(&ctx, status, Some("event-stream"));
            return Ok(response);
        }

        let (parts, body) = response.into_parts();
        let body_bytes = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                warn!(trace_id = %ctx.trace_id, "Failed to read response body: {}", e);
                return Err(StatusCode::INTERNAL_SERVER_ERROR);
            }
        };

        if ctx.path == "/mcp" {
            let summary = format_mcp_response(&body_bytes);
            RequestSpan::log_exit(&ctx, status, summary.as_deref());
        } else {
            if !body_bytes.is_empty() {
                debug!(
                    trace_id = %ctx.trace_id,
                    body = %format_body(&body_bytes),
                    "Response body"
                );
            }
            RequestSpan::log_exit(&ctx, status, None);
        }

        Ok(Response::from_parts(parts, Body::from(body_bytes)))
    }
    .instrument(span)
    .await
}
