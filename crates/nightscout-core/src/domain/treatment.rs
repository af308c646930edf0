//! Carbohydrate treatments (`/api/v1/treatments`)

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `enteredBy` value used when the caller does not supply one
pub const DEFAULT_ENTERED_BY: &str = "MCP Server";

/// Treatment event types accepted by the carb tool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TreatmentEventType {
    #[default]
    #[serde(rename = "Carb Correction")]
    CarbCorrection,
    #[serde(rename = "Meal Bolus")]
    MealBolus,
    #[serde(rename = "Snack Bolus")]
    SnackBolus,
}

impl TreatmentEventType {
    pub const ALL: [TreatmentEventType; 3] = [
        TreatmentEventType::CarbCorrection,
        TreatmentEventType::MealBolus,
        TreatmentEventType::SnackBolus,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TreatmentEventType::CarbCorrection => "Carb Correction",
            TreatmentEventType::MealBolus => "Meal Bolus",
            TreatmentEventType::SnackBolus => "Snack Bolus",
        }
    }
}

impl std::fmt::Display for TreatmentEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Treatment body posted to Nightscout
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CarbTreatment {
    #[serde(rename = "eventType")]
    pub event_type: TreatmentEventType,
    pub carbs: f64,
    /// RFC 3339 timestamp of intake
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(rename = "enteredBy")]
    pub entered_by: String,
}

/// Stored treatment as echoed back by Nightscout
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TreatmentRecord {
    #[serde(default, rename = "_id")]
    pub id: Option<String>,
    #[serde(default, rename = "eventType")]
    pub event_type: Option<String>,
    /// Number or numeric string, depending on the uploader
    #[serde(default)]
    pub carbs: Option<Value>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default, rename = "enteredBy")]
    pub entered_by: Option<String>,
}

impl TreatmentRecord {
    /// Carbs as a number, if the stored value parses as one
    pub fn carbs_value(&self) -> Option<f64> {
        match self.carbs.as_ref()? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// Nightscout answers a POST with either the stored document or an array of them
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum TreatmentResponse {
    Many(Vec<TreatmentRecord>),
    One(TreatmentRecord),
}

impl TreatmentResponse {
    pub fn into_first(self) -> Option<TreatmentRecord> {
        match self {
            TreatmentResponse::Many(records) => records.into_iter().next(),
            TreatmentResponse::One(record) => Some(record),
        }
    }
}
