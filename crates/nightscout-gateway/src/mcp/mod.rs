//! MCP protocol handling on top of rmcp
//!
//! - `handler`: rmcp `ServerHandler` for tools, prompts and logging
//! - `session`: per-session state and tool execution
//! - `context`: session and identity lookup on request extensions
//! - `notifier`: `notifications/message` delivery

mod context;
mod handler;
mod notifier;
mod session;

use rmcp::model::ErrorCode;

pub use handler::{negotiate_protocol_version, NightscoutHandler, SERVER_NAME};
pub use notifier::{Delivery, LogSink, Notifier, LOGGER_NAME};
pub use session::{McpSession, StreamConflict, StreamGuard};

/// Generic server error (session closed, request cancelled)
pub const SERVER_ERROR: ErrorCode = ErrorCode(-32000);
/// Missing or invalid bearer token
pub const UNAUTHORIZED: ErrorCode = ErrorCode(-32001);

#[cfg(test)]
pub(crate) fn test_session(username: &str) -> std::sync::Arc<McpSession> {
    test_session_with(
        username,
        std::sync::Arc::new(crate::tools::OperationRegistry::new()),
    )
}

#[cfg(test)]
pub(crate) fn test_session_with(
    username: &str,
    operations: std::sync::Arc<crate::tools::OperationRegistry>,
) -> std::sync::Arc<McpSession> {
    use crate::session::SessionIdentity;

    McpSession::new(
        uuid::Uuid::new_v4().to_string().into(),
        std::sync::Arc::new(SessionIdentity {
            username: username.to_string(),
            client_id: "test-app-client".to_string(),
            scopes: vec!["openid".to_string()],
            expires_at: None,
            authenticated_at: chrono::Utc::now(),
        }),
        operations,
        rmcp::model::ProtocolVersion::LATEST,
    )
}
