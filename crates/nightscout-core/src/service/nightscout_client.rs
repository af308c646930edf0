//! Nightscout REST client
//!
//! Exchanges the site's access token for a short-lived JWT once per client
//! instance, then uses it as a bearer token for the v1 API.

use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::{CarbTreatment, GlucoseEntry, NightscoutSite, TreatmentResponse};

/// Entry count requested when the caller gives no limit
pub const DEFAULT_ENTRY_LIMIT: u32 = 1000;

/// Errors from the Nightscout API
#[derive(Debug, Error)]
pub enum NightscoutError {
    #[error("Failed to get JWT token: {status} {reason}")]
    Authorization { status: u16, reason: String },

    #[error("Failed to fetch entries: {status} {reason}")]
    Entries { status: u16, reason: String },

    #[error("Failed to add treatment: {status} {reason} - {body}")]
    Treatment {
        status: u16,
        reason: String,
        body: String,
    },

    #[error("Nightscout request failed: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Deserialize)]
struct AuthorizationResponse {
    token: String,
}

/// Client bound to one user's Nightscout site
pub struct NightscoutClient {
    site: NightscoutSite,
    http: reqwest::Client,
    jwt: Mutex<Option<String>>,
}

impl NightscoutClient {
    pub fn new(site: NightscoutSite) -> Self {
        Self::with_http(reqwest::Client::new(), site)
    }

    /// Reuse an existing connection pool
    pub fn with_http(http: reqwest::Client, site: NightscoutSite) -> Self {
        Self {
            site,
            http,
            jwt: Mutex::new(None),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.site.base_url
    }

    /// JWT for the v1 API, fetched on first use
    pub async fn jwt_token(&self) -> Result<String, NightscoutError> {
        let mut cached = self.jwt.lock().await;
        if let Some(token) = cached.as_ref() {
            return Ok(token.clone());
        }

        let url = format!(
            "{}/api/v2/authorization/request/{}",
            self.site.base_url, self.site.access_token
        );
        let response = self.http.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(NightscoutError::Authorization {
                status: status.as_u16(),
                reason: reason(status),
            });
        }

        let body: AuthorizationResponse = response.json().await?;
        debug!("[Nightscout] Obtained JWT for {}", self.site.base_url);
        *cached = Some(body.token.clone());
        Ok(body.token)
    }

    /// Sensor entries with `start_ms <= date <= end_ms`
    pub async fn get_entries(
        &self,
        start_ms: i64,
        end_ms: i64,
        limit: u32,
    ) -> Result<Vec<GlucoseEntry>, NightscoutError> {
        let token = self.jwt_token().await?;
        let url = format!("{}/api/v1/entries.json", self.site.base_url);

        let response = self
            .http
            .get(&url)
            .bearer_auth(&token)
            .query(&[
                ("find[date][$gte]", start_ms.to_string()),
                ("find[date][$lte]", end_ms.to_string()),
                ("count", limit.to_string()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(NightscoutError::Entries {
                status: status.as_u16(),
                reason: reason(status),
            });
        }

        let data: serde_json::Value = response.json().await?;
        let entries = match data {
            serde_json::Value::Array(items) => items
                .into_iter()
                .filter_map(|item| serde_json::from_value(item).ok())
                .collect(),
            _ => Vec::new(),
        };

        debug!(
            "[Nightscout] Fetched {} entries from {}",
            entries.len(),
            self.site.base_url
        );
        Ok(entries)
    }

    /// Store a carbohydrate treatment
    pub async fn add_treatment(
        &self,
        treatment: &CarbTreatment,
    ) -> Result<TreatmentResponse, NightscoutError> {
        let token = self.jwt_token().await?;
        let url = format!("{}/api/v1/treatments/", self.site.base_url);

        let response = self
            .http
            .post(&url)
            .bearer_auth(&token)
            .json(treatment)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NightscoutError::Treatment {
                status: status.as_u16(),
                reason: reason(status),
                body,
            });
        }

        Ok(response.json().await?)
    }
}

fn reason(status: StatusCode) -> String {
    status.canonical_reason().unwrap_or("Unknown").to_string()
}
