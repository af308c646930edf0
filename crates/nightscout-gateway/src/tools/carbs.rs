//! `add_carb_treatment`

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use nightscout_core::{CarbTreatment, TreatmentEventType, DEFAULT_ENTERED_BY};
use rmcp::model::{CallToolResult, Content, Tool};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{debug, error, info};

use super::{optional_str, schema, NightscoutSites, ToolContext, ToolError, ToolHandler};

const ADD_FAILED: &str = "Failed to add carb treatment";

pub struct AddCarbTreatmentTool {
    sites: Arc<NightscoutSites>,
}

impl AddCarbTreatmentTool {
    pub fn new(sites: Arc<NightscoutSites>) -> Self {
        Self { sites }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct TreatmentSummary {
    success: bool,
    #[serde(rename = "treatmentId")]
    treatment_id: String,
    #[serde(rename = "eventType")]
    event_type: String,
    carbs: f64,
    created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    notes: Option<String>,
    #[serde(rename = "enteredBy", skip_serializing_if = "Option::is_none")]
    entered_by: Option<String>,
}

/// Carbs as a positive number; numeric strings are accepted
fn parse_carbs(arguments: &Map<String, Value>) -> Result<f64, ToolError> {
    let carbs = match arguments.get("carbs") {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        None | Some(Value::Null) => {
            return Err(ToolError::InvalidArguments("carbs is required".to_string()))
        }
        Some(_) => None,
    };

    carbs
        .filter(|c| c.is_finite() && *c > 0.0)
        .ok_or_else(|| ToolError::InvalidArguments("carbs must be a positive number".to_string()))
}

fn parse_event_type(arguments: &Map<String, Value>) -> Result<TreatmentEventType, ToolError> {
    match optional_str(arguments, "eventType")? {
        None => Ok(TreatmentEventType::default()),
        Some(value) => TreatmentEventType::ALL
            .into_iter()
            .find(|event_type| event_type.as_str() == value)
            .ok_or_else(|| {
                let allowed: Vec<&str> = TreatmentEventType::ALL.iter().map(|t| t.as_str()).collect();
                ToolError::InvalidArguments(format!(
                    "eventType must be one of: {}",
                    allowed.join(", ")
                ))
            }),
    }
}

fn treatment_from_arguments(arguments: &Map<String, Value>) -> Result<CarbTreatment, ToolError> {
    Ok(CarbTreatment {
        event_type: parse_event_type(arguments)?,
        carbs: parse_carbs(arguments)?,
        created_at: optional_str(arguments, "created_at")?
            .map(String::from)
            .unwrap_or_else(|| Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
        notes: optional_str(arguments, "notes")?.map(String::from),
        entered_by: optional_str(arguments, "enteredBy")?
            .unwrap_or(DEFAULT_ENTERED_BY)
            .to_string(),
    })
}

#[async_trait]
impl ToolHandler for AddCarbTreatmentTool {
    fn name(&self) -> &'static str {
        "add_carb_treatment"
    }

    fn definition(&self) -> Tool {
        let event_types: Vec<&str> = TreatmentEventType::ALL.iter().map(|t| t.as_str()).collect();

        let mut tool = Tool::new(
            self.name(),
            "Adds a carbohydrate treatment entry to NightScout. \
             This records carbohydrate intake without insulin.",
            schema(json!({
                "type": "object",
                "properties": {
                    "carbs": {
                        "type": "number",
                        "exclusiveMinimum": 0,
                        "description": "Amount of carbohydrates in grams (must be positive)"
                    },
                    "eventType": {
                        "type": "string",
                        "enum": event_types,
                        "description": "Type of carbohydrate event (defaults to \"Carb Correction\")"
                    },
                    "created_at": {
                        "type": "string",
                        "description": "ISO 8601 date string for when the carbs were consumed (defaults to current time)"
                    },
                    "notes": {
                        "type": "string",
                        "description": "Optional notes about the carbohydrate intake"
                    },
                    "enteredBy": {
                        "type": "string",
                        "description": "Name of person entering the data (defaults to \"MCP Server\")"
                    }
                },
                "required": ["carbs"]
            })),
        );
        tool.output_schema = Some(schema(json!({
            "type": "object",
            "properties": {
                "success": { "type": "boolean" },
                "treatmentId": { "type": "string" },
                "eventType": { "type": "string" },
                "carbs": { "type": "number" },
                "created_at": { "type": "string" },
                "notes": { "type": "string" },
                "enteredBy": { "type": "string" }
            },
            "required": ["success", "treatmentId", "eventType", "carbs", "created_at"]
        })));
        tool
    }

    async fn call(
        &self,
        arguments: Map<String, Value>,
        ctx: ToolContext,
    ) -> Result<CallToolResult, ToolError> {
        let treatment = treatment_from_arguments(&arguments)?;
        debug!(
            "[Tool] add_carb_treatment for {}: {}g {}",
            ctx.username(),
            treatment.carbs,
            treatment.event_type
        );

        match self.submit(&treatment, &ctx).await {
            Ok(result) => Ok(result),
            Err(e) => {
                error!("[Tool] Error adding carb treatment for {}: {}", ctx.username(), e);
                ctx.notifier
                    .error(format!("Failed to add treatment: {}", e.detail()))
                    .await;
                Err(e)
            }
        }
    }
}

impl AddCarbTreatmentTool {
    async fn submit(
        &self,
        treatment: &CarbTreatment,
        ctx: &ToolContext,
    ) -> Result<CallToolResult, ToolError> {
        let failed = |e: &dyn std::fmt::Display| ToolError::upstream(ADD_FAILED, e);

        ctx.notifier.info("Fetching Nightscout credentials").await;
        let client = self
            .sites
            .client_for(ctx.username())
            .await
            .map_err(|e| failed(&e))?;

        ctx.notifier
            .info(format!("Adding {}g carbs to Nightscout", treatment.carbs))
            .await;
        let record = client
            .add_treatment(treatment)
            .await
            .map_err(|e| failed(&e))?
            .into_first()
            .ok_or_else(|| failed(&"No treatment data returned from Nightscout"))?;

        let summary = TreatmentSummary {
            success: true,
            treatment_id: record.id.clone().unwrap_or_else(|| "unknown".to_string()),
            event_type: record
                .event_type
                .clone()
                .unwrap_or_else(|| treatment.event_type.to_string()),
            carbs: record
                .carbs_value()
                .filter(|c| *c != 0.0)
                .unwrap_or(treatment.carbs),
            created_at: record
                .created_at
                .clone()
                .unwrap_or_else(|| treatment.created_at.clone()),
            notes: record.notes.clone().or_else(|| treatment.notes.clone()),
            entered_by: record
                .entered_by
                .clone()
                .or_else(|| Some(treatment.entered_by.clone())),
        };

        info!(
            "[Tool] Added treatment {} for {}",
            summary.treatment_id,
            ctx.username()
        );
        ctx.notifier
            .info(format!("Successfully added treatment {}", summary.treatment_id))
            .await;

        let structured = serde_json::to_value(&summary).map_err(|e| failed(&e))?;
        let text = serde_json::to_string_pretty(&summary).map_err(|e| failed(&e))?;

        let mut result = CallToolResult::success(vec![Content::text(text)]);
        result.structured_content = Some(structured);
        Ok(result)
    }
}
