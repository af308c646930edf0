//! `get_glucose_entries`

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use nightscout_core::{format_entries, GlucoseUnit, DEFAULT_ENTRY_LIMIT};
use rmcp::model::{CallToolResult, Content, Tool};
use serde_json::{json, Map, Value};
use tracing::{debug, error, info};

use super::{optional_str, schema, NightscoutSites, ToolContext, ToolError, ToolHandler};

const DAY_MS: i64 = 24 * 60 * 60 * 1000;
const MAX_LIMIT: u64 = 10_000;
const FETCH_FAILED: &str = "Failed to fetch glucose entries";

pub struct GetGlucoseEntriesTool {
    sites: Arc<NightscoutSites>,
}

impl GetGlucoseEntriesTool {
    pub fn new(sites: Arc<NightscoutSites>) -> Self {
        Self { sites }
    }
}

/// Query window and size after defaults are applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct EntryQuery {
    start_ms: i64,
    end_ms: i64,
    limit: u32,
}

impl EntryQuery {
    fn from_arguments(arguments: &Map<String, Value>, now_ms: i64) -> Result<Self, ToolError> {
        let start_ms = match optional_str(arguments, "startDate")? {
            Some(value) => parse_instant(value)
                .ok_or_else(|| ToolError::InvalidArguments(format!("invalid startDate: {}", value)))?,
            None => now_ms - DAY_MS,
        };
        let end_ms = match optional_str(arguments, "endDate")? {
            Some(value) => parse_instant(value)
                .ok_or_else(|| ToolError::InvalidArguments(format!("invalid endDate: {}", value)))?,
            None => now_ms,
        };
        if start_ms > end_ms {
            return Err(ToolError::InvalidArguments(
                "startDate must not be after endDate".to_string(),
            ));
        }

        let limit = match arguments.get("limit") {
            None | Some(Value::Null) => DEFAULT_ENTRY_LIMIT,
            Some(value) => value
                .as_u64()
                .filter(|n| (1..=MAX_LIMIT).contains(n))
                .and_then(|n| u32::try_from(n).ok())
                .ok_or_else(|| {
                    ToolError::InvalidArguments(format!(
                        "limit must be an integer between 1 and {}",
                        MAX_LIMIT
                    ))
                })?,
        };

        Ok(Self {
            start_ms,
            end_ms,
            limit,
        })
    }
}

/// Milliseconds since the epoch, RFC 3339 or a plain `YYYY-MM-DD` (UTC midnight)
fn parse_instant(value: &str) -> Option<i64> {
    let value = value.trim();
    if let Ok(ms) = value.parse::<i64>() {
        return Some(ms);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.timestamp_millis());
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp_millis())
}

#[async_trait]
impl ToolHandler for GetGlucoseEntriesTool {
    fn name(&self) -> &'static str {
        "get_glucose_entries"
    }

    fn definition(&self) -> Tool {
        let mut tool = Tool::new(
            self.name(),
            "Retrieves blood glucose entries from NightScout for the last 24 hours by default, \
             or within a specified date range.",
            schema(json!({
                "type": "object",
                "properties": {
                    "startDate": {
                        "type": "string",
                        "description": "ISO 8601 date string or timestamp (defaults to 24 hours ago)"
                    },
                    "endDate": {
                        "type": "string",
                        "description": "ISO 8601 date string or timestamp (defaults to now)"
                    },
                    "limit": {
                        "type": "integer",
                        "minimum": 1,
                        "maximum": MAX_LIMIT,
                        "description": "Maximum number of entries (default 1000)"
                    }
                }
            })),
        );
        tool.output_schema = Some(schema(json!({
            "type": "object",
            "properties": {
                "unit": { "type": "string", "enum": ["mmol/l", "mg/dl"] },
                "utcOffset": { "type": "number" },
                "blood_glucose_readings": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "value": { "type": "number" },
                            "direction": { "type": "string" },
                            "dateString": { "type": "string" }
                        },
                        "required": ["value", "dateString"]
                    }
                },
                "count": { "type": "number" },
                "startDate": { "type": "number" },
                "endDate": { "type": "number" }
            },
            "required": ["unit", "utcOffset", "blood_glucose_readings", "count", "startDate", "endDate"]
        })));
        tool
    }

    async fn call(
        &self,
        arguments: Map<String, Value>,
        ctx: ToolContext,
    ) -> Result<CallToolResult, ToolError> {
        let query = EntryQuery::from_arguments(&arguments, Utc::now().timestamp_millis())?;
        debug!(
            "[Tool] get_glucose_entries for {}: {}..{} limit {}",
            ctx.username(),
            query.start_ms,
            query.end_ms,
            query.limit
        );

        match self.fetch(&query, &ctx).await {
            Ok(result) => Ok(result),
            Err(e) => {
                error!("[Tool] Error fetching glucose entries for {}: {}", ctx.username(), e);
                ctx.notifier
                    .error(format!("Failed to fetch entries: {}", e.detail()))
                    .await;
                Err(e)
            }
        }
    }
}

impl GetGlucoseEntriesTool {
    async fn fetch(&self, query: &EntryQuery, ctx: &ToolContext) -> Result<CallToolResult, ToolError> {
        let failed = |e: &dyn std::fmt::Display| ToolError::upstream(FETCH_FAILED, e);

        ctx.notifier.info("Fetching Nightscout credentials").await;
        let client = self
            .sites
            .client_for(ctx.username())
            .await
            .map_err(|e| failed(&e))?;

        let entries = client
            .get_entries(query.start_ms, query.end_ms, query.limit)
            .await
            .map_err(|e| failed(&e))?;

        info!(
            "[Tool] Fetched {} entries for {}",
            entries.len(),
            ctx.username()
        );
        ctx.notifier
            .info(format!("Fetched {} entries", entries.len()))
            .await;

        let report = format_entries(&entries, GlucoseUnit::MmolL, query.start_ms, query.end_ms);
        let structured = serde_json::to_value(&report).map_err(|e| failed(&e))?;

        let mut result = CallToolResult::success(vec![Content::text(structured.to_string())]);
        result.structured_content = Some(structured);
        Ok(result)
    }
}
