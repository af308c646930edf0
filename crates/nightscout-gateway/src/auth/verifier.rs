//! Access token verification

use std::sync::Arc;

use axum::http::{header, HeaderMap};
use jsonwebtoken::{decode, decode_header, Algorithm, Validation};
use nightscout_core::CognitoConfig;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::jwks::KeySetProvider;
use super::AuthError;

/// Tolerated clock skew for `exp` and `nbf`
pub const CLOCK_SKEW_LEEWAY_SECS: u64 = 60;

/// Username claims in priority order
const USERNAME_CLAIMS: &[&str] = &["username", "cognito:username", "sub"];

type Claims = Map<String, Value>;

/// Result of verifying an access token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedCredential {
    pub token: String,
    pub client_id: String,
    pub scopes: Vec<String>,
    /// `exp` claim (seconds since epoch)
    pub expires_at: Option<i64>,
}

/// Verified credential plus the human-readable username it belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub username: String,
    pub credential: VerifiedCredential,
}

/// Extract the token from `Authorization: Bearer <token>`.
///
/// The scheme is matched case-insensitively.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or(AuthError::MissingAuth)?
        .to_str()
        .map_err(|_| AuthError::MalformedAuth)?;

    let (scheme, token) = value
        .trim()
        .split_once(char::is_whitespace)
        .ok_or(AuthError::MalformedAuth)?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AuthError::MalformedAuth);
    }

    let token = token.trim();
    if token.is_empty() {
        return Err(AuthError::MalformedAuth);
    }
    Ok(token)
}

/// Verifies access tokens issued by the configured user pool
pub struct TokenVerifier {
    config: CognitoConfig,
    keys: Arc<dyn KeySetProvider>,
}

impl TokenVerifier {
    pub fn new(config: CognitoConfig, keys: Arc<dyn KeySetProvider>) -> Self {
        Self { config, keys }
    }

    pub fn config(&self) -> &CognitoConfig {
        &self.config
    }

    /// Verify a raw access token
    pub async fn verify(&self, token: &str) -> Result<VerifiedCredential, AuthError> {
        let claims = self.decode_claims(token).await?;
        self.credential_from_claims(token, &claims)
    }

    /// Verify the request's bearer token and resolve its username
    pub async fn username_from_headers(&self, headers: &HeaderMap) -> Result<String, AuthError> {
        let token = bearer_token(headers)?;
        let claims = self.decode_claims(token).await?;
        username_from_claims(&claims)
    }

    /// Full check used when a session is created: access-token rules and
    /// username resolution over a single decode.
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<AuthenticatedUser, AuthError> {
        let token = bearer_token(headers)?;
        let claims = self.decode_claims(token).await?;
        let credential = self.credential_from_claims(token, &claims)?;
        let username = username_from_claims(&claims)?;

        debug!(
            "[Auth] Authenticated {} (client {}, {} scopes)",
            username,
            credential.client_id,
            credential.scopes.len()
        );
        Ok(AuthenticatedUser {
            username,
            credential,
        })
    }

    /// Signature, issuer and time checks
    async fn decode_claims(&self, token: &str) -> Result<Claims, AuthError> {
        let issuer = self.config.issuer()?;

        let header = decode_header(token).map_err(|e| {
            warn!("[Auth] Malformed JWT header: {}", e);
            AuthError::InvalidToken
        })?;

        let key = self
            .keys
            .decoding_key(&issuer, header.kid.as_deref())
            .await
            .map_err(|e| {
                warn!("[Auth] No verification key: {}", e);
                AuthError::InvalidToken
            })?;

        let data = decode::<Claims>(token, &key, &validation(&issuer)).map_err(|e| {
            warn!("[Auth] JWT verification failed: {}", e);
            AuthError::InvalidToken
        })?;

        Ok(data.claims)
    }

    fn credential_from_claims(
        &self,
        token: &str,
        claims: &Claims,
    ) -> Result<VerifiedCredential, AuthError> {
        if claims.get("token_use").and_then(Value::as_str) != Some("access") {
            return Err(AuthError::WrongTokenType);
        }

        let from_token = claims
            .get("client_id")
            .and_then(Value::as_str)
            .or_else(|| audience(claims));

        if let (Some(expected), Some(actual)) = (self.config.app_client_id.as_deref(), from_token) {
            if expected != actual {
                warn!("[Auth] Token issued for client {}, expected {}", actual, expected);
                return Err(AuthError::ClientMismatch);
            }
        }

        let client_id = from_token
            .map(String::from)
            .or_else(|| self.config.app_client_id.clone())
            .ok_or(AuthError::MissingClientId)?;

        let scopes = claims
            .get("scope")
            .and_then(Value::as_str)
            .map(|scope| scope.split_whitespace().map(String::from).collect())
            .unwrap_or_default();

        Ok(VerifiedCredential {
            token: token.to_string(),
            client_id,
            scopes,
            expires_at: claims.get("exp").and_then(Value::as_i64),
        })
    }
}

fn validation(issuer: &str) -> Validation {
    let mut validation = Validation::new(Algorithm::RS256);
    validation.set_issuer(&[issuer]);
    validation.set_required_spec_claims(&["exp", "iss"]);
    validation.leeway = CLOCK_SKEW_LEEWAY_SECS;
    validation.validate_nbf = true;
    // Cognito access tokens carry client_id instead of aud
    validation.validate_aud = false;
    validation
}

fn audience(claims: &Claims) -> Option<&str> {
    match claims.get("aud")? {
        Value::String(aud) => Some(aud.as_str()),
        Value::Array(values) => values.first().and_then(Value::as_str),
        _ => None,
    }
}

fn username_from_claims(claims: &Claims) -> Result<String, AuthError> {
    USERNAME_CLAIMS
        .iter()
        .find_map(|name| {
            claims
                .get(*name)
                .and_then(Value::as_str)
                .filter(|value| !value.is_empty())
        })
        .map(String::from)
        .ok_or(AuthError::NoUsername)
}
