//! Session and auth gate in front of the rmcp `/mcp` service
//!
//! Only the initialize request of a new session is authenticated. Every
//! later request is routed by its `Mcp-Session-Id` header alone: the resolved
//! [`McpSession`] rides along in the request extensions, which rmcp hands to
//! the handler. Rejections are answered here with JSON-RPC envelopes so rmcp
//! only ever sees well-formed traffic for sessions that exist.

use std::sync::Arc;

use axum::body::{to_bytes, Body, Bytes};
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, Method, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use rmcp::model::{ClientJsonRpcMessage, ClientRequest, ErrorData};
use serde_json::Value;
use tracing::{debug, info};

use super::errors::GatewayError;
use super::logging_middleware::extract_mcp_method;
use super::state::AppState;
use crate::mcp::McpSession;
use crate::session::{CloseReason, SessionIdentity};

/// Session header, lowercase as `HeaderName` requires
pub const SESSION_HEADER: &str = "mcp-session-id";

/// Largest accepted POST body
const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

pub async fn mcp_session_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let result = if method == Method::POST {
        gate_post(&state, request, next).await
    } else if method == Method::GET {
        gate_get(&state, request, next).await
    } else if method == Method::DELETE {
        terminate(&state, request.headers()).await
    } else {
        // CORS preflight and anything rmcp answers on its own
        Ok(next.run(request).await)
    };
    result.unwrap_or_else(IntoResponse::into_response)
}

async fn gate_post(
    state: &AppState,
    request: Request<Body>,
    next: Next,
) -> Result<Response, GatewayError> {
    require_json(request.headers())?;
    if !accepts_json(request.headers()) || !accepts_event_stream(request.headers()) {
        return Err(GatewayError::NotAcceptable(
            "both application/json and text/event-stream",
        ));
    }

    let (mut parts, body) = request.into_parts();
    let bytes = to_bytes(body, MAX_BODY_BYTES).await.map_err(|e| {
        GatewayError::Protocol(ErrorData::parse_error(
            format!("Failed to read request body: {}", e),
            None,
        ))
    })?;
    let message = parse_message(&bytes).map_err(GatewayError::Protocol)?;

    if !parts.headers.contains_key(header::CONTENT_TYPE) {
        parts.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
    }

    if let Some(id) = session_id(&parts.headers) {
        let session = state
            .registry
            .get(id)
            .ok_or(GatewayError::SessionNotFound)?;
        debug!(
            "[Router] {} -> session {} ({})",
            extract_mcp_method(&bytes).as_deref().unwrap_or("-"),
            id,
            session.identity().username
        );
        parts.extensions.insert(session);
    } else {
        match initialize_kind(&message) {
            Initialize::Valid => {}
            Initialize::Malformed => {
                return Err(GatewayError::Protocol(ErrorData::invalid_params(
                    "Invalid initialize params",
                    None,
                )))
            }
            Initialize::No => return Err(GatewayError::SessionNotFound),
        }

        let user = state
            .verifier
            .authenticate(&parts.headers)
            .await
            .map_err(|e| GatewayError::auth(e, state.resource_metadata_url()))?;
        info!("[Router] Initializing a session for {}", user.username);
        parts
            .extensions
            .insert(Arc::new(SessionIdentity::from(user)));
    }

    Ok(next
        .run(Request::from_parts(parts, Body::from(bytes)))
        .await)
}

/// `GET /mcp`: one standalone notification stream per session
async fn gate_get(
    state: &AppState,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, GatewayError> {
    let session = known_session(state, request.headers())?;
    if !accepts_event_stream(request.headers()) {
        return Err(GatewayError::NotAcceptable("text/event-stream"));
    }
    let guard = session
        .attach_stream()
        .map_err(|_| GatewayError::StreamConflict)?;

    request.extensions_mut().insert(session);
    let response = next.run(request).await;
    if !response.status().is_success() {
        return Ok(response);
    }

    // The slot is held for as long as the body is being streamed
    let (parts, body) = response.into_parts();
    let stream = async_stream::stream! {
        let _held = guard;
        let mut events = body.into_data_stream();
        while let Some(chunk) = events.next().await {
            yield chunk;
        }
    };
    Ok(Response::from_parts(parts, Body::from_stream(stream)))
}

/// `DELETE /mcp`
async fn terminate(state: &AppState, headers: &HeaderMap) -> Result<Response, GatewayError> {
    let session = known_session(state, headers)?;
    state
        .sessions
        .terminate(session.id(), CloseReason::ClientTerminated)
        .await;
    Ok(StatusCode::OK.into_response())
}

/// Single JSON-RPC message. Batches and `null` ids are refused up front:
/// a `null` id would otherwise read as a notification.
fn parse_message(bytes: &Bytes) -> Result<ClientJsonRpcMessage, ErrorData> {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|e| ErrorData::parse_error(format!("Parse error: {}", e), None))?;

    match &value {
        Value::Array(_) => {
            return Err(ErrorData::invalid_request(
                "Batch requests are not supported",
                None,
            ))
        }
        Value::Object(object) if object.get("id") == Some(&Value::Null) => {
            return Err(ErrorData::invalid_request(
                "Request id must be a string or number",
                None,
            ))
        }
        Value::Object(_) => {}
        _ => {
            return Err(ErrorData::invalid_request(
                "Expected a JSON-RPC message object",
                None,
            ))
        }
    }

    serde_json::from_value(value)
        .map_err(|e| ErrorData::invalid_request(format!("Invalid JSON-RPC message: {}", e), None))
}

#[derive(Debug, PartialEq, Eq)]
enum Initialize {
    Valid,
    /// `initialize` whose params did not parse
    Malformed,
    No,
}

fn initialize_kind(message: &ClientJsonRpcMessage) -> Initialize {
    let ClientJsonRpcMessage::Request(request) = message else {
        return Initialize::No;
    };
    match &request.request {
        ClientRequest::InitializeRequest(_) => Initialize::Valid,
        ClientRequest::CustomRequest(custom) if custom.method == "initialize" => {
            Initialize::Malformed
        }
        _ => Initialize::No,
    }
}

fn known_session(state: &AppState, headers: &HeaderMap) -> Result<Arc<McpSession>, GatewayError> {
    session_id(headers)
        .and_then(|id| state.registry.get(id))
        .ok_or(GatewayError::InvalidSession)
}

fn session_id(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn accepts(headers: &HeaderMap, media_type: &str) -> bool {
    headers
        .get_all(header::ACCEPT)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.contains(media_type))
}

fn accepts_event_stream(headers: &HeaderMap) -> bool {
    accepts(headers, "text/event-stream")
}

fn accepts_json(headers: &HeaderMap) -> bool {
    accepts(headers, "application/json")
}

/// A missing content type is tolerated; anything else must be JSON
fn require_json(headers: &HeaderMap) -> Result<(), GatewayError> {
    let Some(content_type) = headers.get(header::CONTENT_TYPE) else {
        return Ok(());
    };
    let essence = content_type
        .to_str()
        .ok()
        .and_then(|v| v.split(';').next())
        .map(str::trim)
        .unwrap_or_default();

    if essence.eq_ignore_ascii_case("application/json") {
        Ok(())
    } else {
        Err(GatewayError::UnsupportedMediaType)
    }
}
