//! Session lookups on rmcp request extensions
//!
//! The `/mcp` middleware stores the resolved session (or, on `initialize`,
//! the authenticated identity) in the HTTP request extensions. rmcp hands the
//! request parts to the handler, so both are reachable from any context.

use std::sync::Arc;

use axum::http::request::Parts;
use rmcp::model::{ErrorData, Extensions};

use super::McpSession;
use crate::session::SessionIdentity;

fn parts(extensions: &Extensions) -> Option<&Parts> {
    extensions.get::<Parts>()
}

/// Session the request was routed to, if it carried a known session id
pub fn session(extensions: &Extensions) -> Option<Arc<McpSession>> {
    parts(extensions)?.extensions.get::<Arc<McpSession>>().cloned()
}

/// Like [`session`], as a protocol error when missing
pub fn require_session(extensions: &Extensions) -> Result<Arc<McpSession>, ErrorData> {
    session(extensions)
        .ok_or_else(|| ErrorData::invalid_request("Session not initialized", None))
}

/// Identity authenticated for an `initialize` request
pub fn identity(extensions: &Extensions) -> Option<Arc<SessionIdentity>> {
    parts(extensions)?
        .extensions
        .get::<Arc<SessionIdentity>>()
        .cloned()
}
