//! Nightscout MCP Gateway
//!
//! Streamable HTTP MCP server, built on rmcp, that provides:
//! - Bearer token verification against the Cognito issuer's JWKS
//! - Per-session identity binding at initialization
//! - A concurrent session registry keyed by `Mcp-Session-Id`
//! - Glucose and carb tools executed against the user's own Nightscout site

pub mod auth;
pub mod logging;
pub mod mcp;
pub mod server;
pub mod session;
pub mod tools;

pub use auth::{AuthError, AuthenticatedUser, IssuerKeyCache, KeySetProvider, TokenVerifier};
pub use mcp::{McpSession, NightscoutHandler, Notifier};
pub use server::{AppState, GatewayConfig, GatewayError, GatewayServer, SESSION_HEADER};
pub use session::{
    CloseReason, RegistrySessionManager, SessionId, SessionIdentity, SessionRegistry, SessionState,
};
pub use tools::{NightscoutSites, OperationRegistry, ToolContext, ToolError, ToolHandler};
