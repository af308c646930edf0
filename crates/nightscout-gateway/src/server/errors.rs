//! HTTP error mapping
//!
//! Every rejection leaves the server as a JSON-RPC error envelope with
//! `id: null`. Internal details are logged, never returned.

use std::any::Any;

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use nightscout_core::ConfigError;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{error, warn};

use rmcp::model::{ErrorCode, ErrorData};

use crate::auth::AuthError;
use crate::mcp::{SERVER_ERROR, UNAUTHORIZED};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Unauthorized: {error}")]
    Unauthorized {
        error: AuthError,
        /// Protected resource metadata URL for the bearer challenge
        resource_metadata: String,
    },

    #[error(transparent)]
    Configuration(#[from] ConfigError),

    #[error("Bad Request: No valid session ID provided")]
    SessionNotFound,

    #[error("Invalid or missing session ID")]
    InvalidSession,

    #[error("{}", .0.message)]
    Protocol(ErrorData),

    #[error("Unsupported Media Type: Content-Type must be application/json")]
    UnsupportedMediaType,

    #[error("Not Acceptable: Client must accept {0}")]
    NotAcceptable(&'static str),

    #[error("Conflict: Only one notification stream is allowed per session")]
    StreamConflict,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl GatewayError {
    /// Auth failure at session creation. Misconfiguration is not the client's fault.
    pub fn auth(error: AuthError, resource_metadata: impl Into<String>) -> Self {
        match error {
            AuthError::Configuration(config) => GatewayError::Configuration(config),
            error => GatewayError::Unauthorized {
                error,
                resource_metadata: resource_metadata.into(),
            },
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            GatewayError::SessionNotFound
            | GatewayError::InvalidSession
            | GatewayError::Protocol(_) => StatusCode::BAD_REQUEST,
            GatewayError::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            GatewayError::NotAcceptable(_) => StatusCode::NOT_ACCEPTABLE,
            GatewayError::StreamConflict => StatusCode::CONFLICT,
            GatewayError::Configuration(_) | GatewayError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn rpc_error(&self) -> ErrorData {
        match self {
            GatewayError::Unauthorized { error, .. } => ErrorData::new(
                UNAUTHORIZED,
                self.to_string(),
                Some(json!({ "error": error.code() })),
            ),
            GatewayError::Configuration(_) => ErrorData::new(
                ErrorCode::INTERNAL_ERROR,
                "Server configuration error",
                Some(json!({ "error": "configuration_error" })),
            ),
            GatewayError::Internal(_) => ErrorData::internal_error("Internal Server Error", None),
            GatewayError::Protocol(error) => error.clone(),
            GatewayError::SessionNotFound
            | GatewayError::InvalidSession
            | GatewayError::UnsupportedMediaType
            | GatewayError::NotAcceptable(_)
            | GatewayError::StreamConflict => ErrorData::new(SERVER_ERROR, self.to_string(), None),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            GatewayError::Configuration(e) => error!("[Router] Configuration error: {}", e),
            GatewayError::Internal(e) => error!("[Router] Internal error: {:#}", e),
            GatewayError::Unauthorized { error, .. } => {
                warn!("[Auth] Rejected session request: {}", error)
            }
            other => warn!("[Router] {} {}", status.as_u16(), other),
        }

        let body = json!({
            "jsonrpc": "2.0",
            "error": self.rpc_error(),
            "id": Value::Null,
        });
        let mut response = (status, Json(body)).into_response();

        if let GatewayError::Unauthorized {
            error,
            resource_metadata,
        } = &self
        {
            let challenge = format!(
                "Bearer error=\"invalid_token\", error_description=\"{}\", resource_metadata=\"{}\"",
                error, resource_metadata
            );
            if let Ok(value) = HeaderValue::from_str(&challenge) {
                response
                    .headers_mut()
                    .insert(header::WWW_AUTHENTICATE, value);
            }
        }
        response
    }
}

/// Response for a panicking handler
pub(crate) fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");

    GatewayError::Internal(anyhow::anyhow!("handler panicked: {}", detail)).into_response()
}
