//! Shared state handed to every route

use std::sync::Arc;

use crate::auth::TokenVerifier;
use crate::session::{RegistrySessionManager, SessionRegistry};
use crate::tools::OperationRegistry;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    /// Transport sessions rmcp drives; shares `registry`
    pub sessions: Arc<RegistrySessionManager>,
    pub verifier: Arc<TokenVerifier>,
    pub operations: Arc<OperationRegistry>,
    /// Public base URL, without trailing slash
    pub public_url: String,
}

impl AppState {
    pub fn mcp_url(&self) -> String {
        format!("{}/mcp", self.public_url)
    }

    /// Advertised in the bearer challenge of every 401
    pub fn resource_metadata_url(&self) -> String {
        format!("{}/.well-known/oauth-protected-resource", self.public_url)
    }
}
