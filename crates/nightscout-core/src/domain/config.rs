//! Identity provider configuration
//!
//! The gateway trusts access tokens issued by a single Cognito user pool.
//! Everything here is read from the environment once at startup.

use thiserror::Error;

/// Region used when `COGNITO_REGION` is not set
pub const DEFAULT_COGNITO_REGION: &str = "eu-west-1";

/// Configuration errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is not configured")]
    Missing(&'static str),

    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Cognito user pool settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CognitoConfig {
    /// AWS region of the user pool
    pub region: String,
    /// User pool identifier (e.g. `eu-west-1_AbCdEf`)
    pub user_pool_id: Option<String>,
    /// Expected app client id; tokens for other clients are rejected when set
    pub app_client_id: Option<String>,
    /// Hosted UI domain, with or without `https://`
    pub domain: Option<String>,
    /// Explicit issuer URL, for local emulators of the identity provider
    pub issuer_override: Option<String>,
}

impl Default for CognitoConfig {
    fn default() -> Self {
        Self {
            region: DEFAULT_COGNITO_REGION.to_string(),
            user_pool_id: None,
            app_client_id: None,
            domain: None,
            issuer_override: None,
        }
    }
}

impl CognitoConfig {
    /// Read `COGNITO_*` variables from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        Self {
            region: get("COGNITO_REGION").unwrap_or_else(|| DEFAULT_COGNITO_REGION.to_string()),
            user_pool_id: get("COGNITO_USER_POOL_ID"),
            app_client_id: get("COGNITO_APP_CLIENT_ID"),
            domain: get("COGNITO_DOMAIN"),
            issuer_override: get("COGNITO_ISSUER_URL"),
        }
    }

    /// Issuer URL that every accepted token must carry in its `iss` claim
    pub fn issuer(&self) -> Result<String, ConfigError> {
        if let Some(issuer) = &self.issuer_override {
            return Ok(issuer.trim_end_matches('/').to_string());
        }

        let pool = self
            .user_pool_id
            .as_deref()
            .ok_or(ConfigError::Missing("COGNITO_USER_POOL_ID"))?;

        Ok(format!(
            "https://cognito-idp.{}.amazonaws.com/{}",
            self.region, pool
        ))
    }

    /// Published key set location for the issuer
    pub fn jwks_url(&self) -> Result<String, ConfigError> {
        Ok(format!("{}/.well-known/jwks.json", self.issuer()?))
    }

    /// Hosted UI base URL, always `https://` prefixed
    pub fn hosted_domain_url(&self) -> Result<String, ConfigError> {
        let domain = self
            .domain
            .as_deref()
            .ok_or(ConfigError::Missing("COGNITO_DOMAIN"))?
            .trim_end_matches('/');

        if domain.starts_with("https://") || domain.starts_with("http://") {
            Ok(domain.to_string())
        } else {
            Ok(format!("https://{}", domain))
        }
    }
}
