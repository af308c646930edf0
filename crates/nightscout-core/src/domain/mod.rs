//! Core domain types

pub mod config;
pub mod glucose;
pub mod treatment;

pub use config::{CognitoConfig, ConfigError, DEFAULT_COGNITO_REGION};
pub use glucose::{format_entries, GlucoseEntry, GlucoseReading, GlucoseReport, GlucoseUnit};
pub use treatment::{
    CarbTreatment, TreatmentEventType, TreatmentRecord, TreatmentResponse, DEFAULT_ENTERED_BY,
};

/// Location and credential of one user's Nightscout site
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NightscoutSite {
    /// Base URL without trailing slash
    pub base_url: String,
    /// API access token (the `token` query parameter of Nightscout)
    pub access_token: String,
}

impl NightscoutSite {
    pub fn new(base_url: impl Into<String>, access_token: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token: access_token.into(),
        }
    }
}
