//! Bearer token authentication for MCP clients
//!
//! Access tokens are JWTs signed by the Cognito user pool. Signing keys come
//! from the issuer's published JWKS document and are cached per issuer by
//! [`IssuerKeyCache`]; verification results are never cached.

mod jwks;
mod verifier;


pub use jwks::{IssuerKeyCache, KeySetError, KeySetProvider, RemoteKeySet};
pub use verifier::{
    bearer_token, AuthenticatedUser, TokenVerifier, VerifiedCredential, CLOCK_SKEW_LEEWAY_SECS,
};

use nightscout_core::ConfigError;
use thiserror::Error;

/// Authentication failures
///
/// Everything except `Configuration` is the client's fault and answers 401.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error(transparent)]
    Configuration(#[from] ConfigError),

    #[error("Invalid or expired token")]
    InvalidToken,

    #[error("Invalid token type; expected access token")]
    WrongTokenType,

    #[error("Token client_id does not match configured application client")]
    ClientMismatch,

    #[error("Could not determine client_id from token or configuration")]
    MissingClientId,

    #[error("Missing Authorization header")]
    MissingAuth,

    #[error("Invalid Authorization header format")]
    MalformedAuth,

    #[error("Unable to determine username from token")]
    NoUsername,
}

impl AuthError {
    /// Server-side misconfiguration rather than a bad credential
    pub fn is_configuration(&self) -> bool {
        matches!(self, AuthError::Configuration(_))
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::Configuration(_) => "configuration_error",
            AuthError::InvalidToken => "invalid_token",
            AuthError::WrongTokenType => "wrong_token_type",
            AuthError::ClientMismatch => "client_mismatch",
            AuthError::MissingClientId => "missing_client_id",
            AuthError::MissingAuth => "missing_auth",
            AuthError::MalformedAuth => "malformed_auth",
            AuthError::NoUsername => "no_username",
        }
    }
}
