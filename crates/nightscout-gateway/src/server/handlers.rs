//! Unauthenticated discovery endpoints

use axum::{extract::State, Json};
use serde::Serialize;
use tracing::debug;

use super::errors::GatewayError;
use super::state::AppState;

const SCOPES: &[&str] = &["openid", "email", "profile"];

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

pub async fn health() -> Json<HealthResponse> {
    debug!("[Router] Health check");
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// OAuth Authorization Server Metadata (RFC 8414), pointing at the hosted UI
#[derive(Debug, Serialize)]
pub struct OAuthServerMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub userinfo_endpoint: String,
    pub response_types_supported: Vec<String>,
    pub grant_types_supported: Vec<String>,
    pub scopes_supported: Vec<String>,
    pub code_challenge_methods_supported: Vec<String>,
}

pub async fn oauth_metadata(
    State(state): State<AppState>,
) -> Result<Json<OAuthServerMetadata>, GatewayError> {
    let config = state.verifier.config();
    let hosted = config.hosted_domain_url()?;

    Ok(Json(OAuthServerMetadata {
        issuer: config.issuer()?,
        authorization_endpoint: format!("{}/oauth2/authorize", hosted),
        token_endpoint: format!("{}/oauth2/token", hosted),
        userinfo_endpoint: format!("{}/oauth2/userInfo", hosted),
        response_types_supported: vec!["code".to_string()],
        grant_types_supported: vec![
            "authorization_code".to_string(),
            "refresh_token".to_string(),
        ],
        scopes_supported: strings(SCOPES),
        code_challenge_methods_supported: vec!["S256".to_string()],
    }))
}

/// OAuth Protected Resource Metadata (RFC 9728)
#[derive(Debug, Serialize)]
pub struct ProtectedResourceMetadata {
    pub resource: String,
    pub authorization_servers: Vec<String>,
    pub scopes_supported: Vec<String>,
    pub resource_name: String,
}

pub async fn resource_metadata(
    State(state): State<AppState>,
) -> Result<Json<ProtectedResourceMetadata>, GatewayError> {
    Ok(Json(ProtectedResourceMetadata {
        resource: state.mcp_url(),
        authorization_servers: vec![state.verifier.config().issuer()?],
        scopes_supported: strings(SCOPES),
        resource_name: "Nightscout MCP Server".to_string(),
    }))
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}
