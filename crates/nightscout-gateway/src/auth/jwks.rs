//! Issuer signing key cache
//!
//! One [`RemoteKeySet`] per issuer, created lazily and kept for the process
//! lifetime. Each key set refetches when its keys are older than
//! [`KEY_SET_MAX_AGE`], or when a token names an unknown `kid` and the last
//! fetch is older than [`REFETCH_COOLDOWN`]. Fetches are single-flight.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::DecodingKey;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Keys older than this are refetched before use
pub const KEY_SET_MAX_AGE: Duration = Duration::from_secs(10 * 60);

/// Minimum gap between fetches triggered by an unknown `kid`
pub const REFETCH_COOLDOWN: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum KeySetError {
    #[error("failed to fetch key set from {url}: {message}")]
    Fetch { url: String, message: String },

    #[error("no signing key matches kid {0:?}")]
    UnknownKey(Option<String>),
}

/// Source of verification keys, injected into the token verifier
#[async_trait]
pub trait KeySetProvider: Send + Sync {
    async fn decoding_key(
        &self,
        issuer: &str,
        kid: Option<&str>,
    ) -> Result<DecodingKey, KeySetError>;
}

struct KeyEntry {
    kid: Option<String>,
    key: DecodingKey,
}

struct CachedKeys {
    keys: Vec<KeyEntry>,
    fetched_at: Instant,
}

impl CachedKeys {
    fn find(&self, kid: Option<&str>) -> Option<DecodingKey> {
        match kid {
            Some(kid) => self
                .keys
                .iter()
                .find(|entry| entry.kid.as_deref() == Some(kid))
                .map(|entry| entry.key.clone()),
            // Tokens without kid are only accepted against a single-key set
            None if self.keys.len() == 1 => Some(self.keys[0].key.clone()),
            None => None,
        }
    }
}

/// JWKS document of one issuer
pub struct RemoteKeySet {
    jwks_url: String,
    http: reqwest::Client,
    cache: RwLock<Option<CachedKeys>>,
    refresh: Mutex<()>,
    fetches: AtomicUsize,
}

impl RemoteKeySet {
    pub fn new(http: reqwest::Client, jwks_url: impl Into<String>) -> Self {
        Self {
            jwks_url: jwks_url.into(),
            http,
            cache: RwLock::new(None),
            refresh: Mutex::new(()),
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn jwks_url(&self) -> &str {
        &self.jwks_url
    }

    /// Number of completed remote fetches
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::Relaxed)
    }

    pub async fn key_for(&self, kid: Option<&str>) -> Result<DecodingKey, KeySetError> {
        if let Some(key) = self.cached_key(kid).await {
            return Ok(key);
        }

        let _refresh = self.refresh.lock().await;

        // Another task may have refreshed while we waited
        if let Some(key) = self.cached_key(kid).await {
            return Ok(key);
        }

        if self.fetched_within(REFETCH_COOLDOWN).await {
            return Err(KeySetError::UnknownKey(kid.map(String::from)));
        }

        let keys = self.fetch().await?;
        let found = keys.find(kid);
        *self.cache.write().await = Some(keys);

        found.ok_or_else(|| KeySetError::UnknownKey(kid.map(String::from)))
    }

    async fn cached_key(&self, kid: Option<&str>) -> Option<DecodingKey> {
        let cache = self.cache.read().await;
        cache
            .as_ref()
            .filter(|cached| cached.fetched_at.elapsed() < KEY_SET_MAX_AGE)
            .and_then(|cached| cached.find(kid))
    }

    async fn fetched_within(&self, window: Duration) -> bool {
        let cache = self.cache.read().await;
        cache
            .as_ref()
            .is_some_and(|cached| cached.fetched_at.elapsed() < window)
    }

    async fn fetch(&self) -> Result<CachedKeys, KeySetError> {
        let fetch_error = |message: String| KeySetError::Fetch {
            url: self.jwks_url.clone(),
            message,
        };

        debug!("[Auth] Fetching signing keys from {}", self.jwks_url);
        let response = self
            .http
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|e| fetch_error(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(fetch_error(format!("HTTP {}", status)));
        }

        let set: JwkSet = response
            .json()
            .await
            .map_err(|e| fetch_error(e.to_string()))?;

        let keys: Vec<KeyEntry> = set
            .keys
            .iter()
            .filter_map(|jwk| match DecodingKey::from_jwk(jwk) {
                Ok(key) => Some(KeyEntry {
                    kid: jwk.common.key_id.clone(),
                    key,
                }),
                Err(e) => {
                    warn!(
                        "[Auth] Skipping unusable key {:?}: {}",
                        jwk.common.key_id, e
                    );
                    None
                }
            })
            .collect();

        self.fetches.fetch_add(1, Ordering::Relaxed);
        info!(
            "[Auth] Loaded {} signing keys from {}",
            keys.len(),
            self.jwks_url
        );

        Ok(CachedKeys {
            keys,
            fetched_at: Instant::now(),
        })
    }
}

/// Process-wide map of issuer → key set
///
/// At most one [`RemoteKeySet`] exists per issuer.
pub struct IssuerKeyCache {
    http: reqwest::Client,
    sets: DashMap<String, Arc<RemoteKeySet>>,
}

impl IssuerKeyCache {
    pub fn new() -> Self {
        Self::with_http(reqwest::Client::new())
    }

    pub fn with_http(http: reqwest::Client) -> Self {
        Self {
            http,
            sets: DashMap::new(),
        }
    }

    /// Key set for `issuer`, created on first use
    pub fn key_set(&self, issuer: &str) -> Arc<RemoteKeySet> {
        self.sets
            .entry(issuer.to_string())
            .or_insert_with(|| {
                debug!("[Auth] Creating key set for issuer {}", issuer);
                Arc::new(RemoteKeySet::new(
                    self.http.clone(),
                    format!("{}/.well-known/jwks.json", issuer),
                ))
            })
            .value()
            .clone()
    }

    /// Number of issuers seen so far
    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}

impl Default for IssuerKeyCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeySetProvider for IssuerKeyCache {
    async fn decoding_key(
        &self,
        issuer: &str,
        kid: Option<&str>,
    ) -> Result<DecodingKey, KeySetError> {
        self.key_set(issuer).key_for(kid).await
    }
}
