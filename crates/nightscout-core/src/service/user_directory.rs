//! Per-user Nightscout site lookup
//!
//! Tool calls know only the authenticated username. The directory maps it to
//! the user's Nightscout site URL and access token.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::domain::NightscoutSite;

/// Directory lookup errors
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("User '{0}' is not registered")]
    UnknownUser(String),

    #[error("Missing custom:nightscout_base_url")]
    MissingBaseUrl,

    #[error("Missing custom:nightscout_token")]
    MissingToken,

    #[error("User directory lookup failed: {0}")]
    Provider(String),

    #[error("Failed to read user directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid user directory {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Resolves the Nightscout site belonging to a user
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn nightscout_site(&self, username: &str) -> Result<NightscoutSite, DirectoryError>;
}

/// User attributes as stored in the directory file.
///
/// Accepts both plain keys and the `custom:` attribute names of the user pool.
#[derive(Debug, Clone, Default, Deserialize)]
struct UserAttributes {
    #[serde(default, alias = "custom:nightscout_base_url")]
    nightscout_base_url: Option<String>,
    #[serde(default, alias = "custom:nightscout_token")]
    nightscout_token: Option<String>,
}

/// Directory loaded once from a JSON document
#[derive(Debug, Clone, Default)]
pub struct StaticUserDirectory {
    users: HashMap<String, UserAttributes>,
}

impl StaticUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `{ "<username>": { "nightscout_base_url": ..., "nightscout_token": ... } }`
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, DirectoryError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| DirectoryError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let directory = Self::from_json_str(&content).map_err(|source| DirectoryError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        info!(
            "[Directory] Loaded {} users from {}",
            directory.len(),
            path.display()
        );
        Ok(directory)
    }

    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        Ok(Self {
            users: serde_json::from_str(json)?,
        })
    }

    /// Register a user's site
    pub fn with_user(mut self, username: impl Into<String>, site: NightscoutSite) -> Self {
        self.users.insert(
            username.into(),
            UserAttributes {
                nightscout_base_url: Some(site.base_url),
                nightscout_token: Some(site.access_token),
            },
        );
        self
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[async_trait]
impl UserDirectory for StaticUserDirectory {
    async fn nightscout_site(&self, username: &str) -> Result<NightscoutSite, DirectoryError> {
        let attrs = self
            .users
            .get(username)
            .ok_or_else(|| DirectoryError::UnknownUser(username.to_string()))?;

        resolve_site(
            username,
            attrs.nightscout_base_url.as_deref(),
            attrs.nightscout_token.as_deref(),
        )
    }
}

/// Site from the two custom attributes. Empty values count as missing.
pub(crate) fn resolve_site(
    username: &str,
    base_url: Option<&str>,
    token: Option<&str>,
) -> Result<NightscoutSite, DirectoryError> {
    let base_url = base_url.filter(|v| !v.is_empty()).ok_or_else(|| {
        warn!("[Directory] Missing nightscout base URL for user {}", username);
        DirectoryError::MissingBaseUrl
    })?;
    let token = token.filter(|v| !v.is_empty()).ok_or_else(|| {
        warn!("[Directory] Missing nightscout token for user {}", username);
        DirectoryError::MissingToken
    })?;

    debug!("[Directory] Resolved Nightscout site for {}", username);
    Ok(NightscoutSite::new(base_url, token))
}
