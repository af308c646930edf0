//! Session identity, lifecycle and the process-wide session table

mod manager;
mod registry;

pub use manager::{RegistrySessionManager, SessionManagerError};
pub use registry::SessionRegistry;

use std::fmt;

use chrono::{DateTime, Utc};

use crate::auth::AuthenticatedUser;

/// Opaque UUIDv4 string, sent to clients in `Mcp-Session-Id`
pub use rmcp::transport::streamable_http_server::SessionId;

/// Lifecycle state of one session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Initialized and reachable through the registry
    Active,
    /// Terminal
    Closed,
}

/// Why a session was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// `DELETE /mcp`
    ClientTerminated,
    /// Graceful server shutdown
    Shutdown,
    /// The transport under the session ended on its own
    TransportClosed,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CloseReason::ClientTerminated => "client terminated",
            CloseReason::Shutdown => "server shutdown",
            CloseReason::TransportClosed => "transport closed",
        })
    }
}

/// Authenticated identity bound to a session at initialization.
///
/// Never changes for the lifetime of the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    pub username: String,
    pub client_id: String,
    pub scopes: Vec<String>,
    /// Token expiry (seconds since epoch), informational only
    pub expires_at: Option<i64>,
    pub authenticated_at: DateTime<Utc>,
}

impl From<AuthenticatedUser> for SessionIdentity {
    fn from(user: AuthenticatedUser) -> Self {
        Self {
            username: user.username,
            client_id: user.credential.client_id,
            scopes: user.credential.scopes,
            expires_at: user.credential.expires_at,
            authenticated_at: Utc::now(),
        }
    }
}
