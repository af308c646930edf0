//! Glucose entries and the compact report returned to MCP clients

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// mg/dL per mmol/L
pub const MGDL_PER_MMOLL: f64 = 18.0;

/// A sensor glucose entry as stored by Nightscout (`/api/v1/entries.json`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlucoseEntry {
    /// Sensor glucose value in mg/dL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sgv: Option<f64>,
    /// Milliseconds since the Unix epoch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<f64>,
    #[serde(default, rename = "dateString", skip_serializing_if = "Option::is_none")]
    pub date_string: Option<String>,
    /// Trend arrow name (`Flat`, `FortyFiveUp`, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<String>,
    /// Uploader UTC offset in minutes
    #[serde(default, rename = "utcOffset", skip_serializing_if = "Option::is_none")]
    pub utc_offset: Option<i32>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub entry_type: Option<String>,
}

/// Unit used for reported readings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GlucoseUnit {
    #[serde(rename = "mmol/l")]
    MmolL,
    #[serde(rename = "mg/dl")]
    MgDl,
}

impl GlucoseUnit {
    /// Convert an mg/dL value into this unit
    pub fn from_mgdl(self, mgdl: f64) -> f64 {
        match self {
            GlucoseUnit::MgDl => mgdl.round(),
            GlucoseUnit::MmolL => (mgdl / MGDL_PER_MMOLL * 10.0).round() / 10.0,
        }
    }
}

/// One reading in the compact report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlucoseReading {
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<String>,
    #[serde(rename = "dateString")]
    pub date_string: String,
}

/// Compact report shape of the `get_glucose_entries` tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlucoseReport {
    pub unit: GlucoseUnit,
    #[serde(rename = "utcOffset")]
    pub utc_offset: i32,
    pub blood_glucose_readings: Vec<GlucoseReading>,
    pub count: usize,
    #[serde(rename = "startDate")]
    pub start_date: i64,
    #[serde(rename = "endDate")]
    pub end_date: i64,
}

/// Shape raw entries into a report.
///
/// Entries without a glucose value are skipped. Readings come out oldest first.
pub fn format_entries(
    entries: &[GlucoseEntry],
    unit: GlucoseUnit,
    start_date: i64,
    end_date: i64,
) -> GlucoseReport {
    let mut with_values: Vec<&GlucoseEntry> = entries.iter().filter(|e| e.sgv.is_some()).collect();
    with_values.sort_by(|a, b| {
        a.date
            .unwrap_or_default()
            .total_cmp(&b.date.unwrap_or_default())
    });

    let utc_offset = with_values
        .iter()
        .find_map(|e| e.utc_offset)
        .unwrap_or(0);

    let readings: Vec<GlucoseReading> = with_values
        .iter()
        .filter_map(|entry| {
            let sgv = entry.sgv?;
            Some(GlucoseReading {
                value: unit.from_mgdl(sgv),
                direction: entry.direction.clone(),
                date_string: entry
                    .date_string
                    .clone()
                    .or_else(|| entry.date.and_then(|ms| millis_to_rfc3339(ms as i64)))
                    .unwrap_or_default(),
            })
        })
        .collect();

    GlucoseReport {
        unit,
        utc_offset,
        count: readings.len(),
        blood_glucose_readings: readings,
        start_date,
        end_date,
    }
}

fn millis_to_rfc3339(ms: i64) -> Option<String> {
    DateTime::<Utc>::from_timestamp_millis(ms).map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
}
