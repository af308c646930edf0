//! `estimate-carbs` prompt

use rmcp::model::{GetPromptResult, Prompt, PromptArgument};
use serde_json::{json, Map, Value};
use tracing::debug;

use super::{optional_str, PromptHandler, ToolError};

pub struct EstimateCarbsPrompt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CarbUnits {
    Grams,
    Exchanges,
    Both,
}

impl CarbUnits {
    fn parse(value: Option<&str>) -> Result<Self, ToolError> {
        match value {
            None | Some("grams") => Ok(CarbUnits::Grams),
            Some("exchanges") => Ok(CarbUnits::Exchanges),
            Some("both") => Ok(CarbUnits::Both),
            Some(other) => Err(ToolError::InvalidArguments(format!(
                "units must be grams, exchanges or both, got {}",
                other
            ))),
        }
    }

    fn grams(self) -> bool {
        matches!(self, CarbUnits::Grams | CarbUnits::Both)
    }

    fn exchanges(self) -> bool {
        matches!(self, CarbUnits::Exchanges | CarbUnits::Both)
    }
}

fn prompt_text(food_description: &str, units: CarbUnits, include_confidence: bool) -> String {
    let mut text = String::from(
        "You are a nutrition expert specializing in carbohydrate estimation for diabetes management. \
         Please analyze the following food description and provide an accurate carbohydrate estimate.\n\n",
    );
    text.push_str(&format!("Food Description: {}\n\n", food_description));
    text.push_str("Please provide:\n");
    text.push_str("1. Total carbohydrate estimate");
    if units.grams() {
        text.push_str(" in grams");
    }
    if units == CarbUnits::Both {
        text.push_str(" AND");
    }
    if units.exchanges() {
        text.push_str(" in carbohydrate exchanges (15g = 1 exchange)");
    }
    text.push_str("\n2. Breakdown of individual components if multiple items are mentioned\n");
    text.push_str("3. Key assumptions made (e.g., serving sizes, preparation methods)\n");
    if include_confidence {
        text.push_str("4. Confidence level (high/medium/low) based on specificity of the description\n");
    }
    text.push_str(
        "\nFormat your response clearly with the total at the top, followed by the detailed breakdown.\n",
    );
    text.push_str(
        "Be conservative in your estimates when dealing with ambiguous descriptions to help avoid hyperglycemia.",
    );
    text
}

impl PromptHandler for EstimateCarbsPrompt {
    fn name(&self) -> &'static str {
        "estimate-carbs"
    }

    fn definition(&self) -> Prompt {
        let arguments: Option<Vec<PromptArgument>> = serde_json::from_value(json!([
            {
                "name": "foodDescription",
                "description": "Description of the food or meal (e.g., \"a medium apple\", \
                                \"bowl of pasta with tomato sauce\")",
                "required": true
            },
            {
                "name": "units",
                "description": "Preferred unit for carbohydrate estimation (grams, exchanges, or both)",
                "required": false
            },
            {
                "name": "confidence",
                "description": "Include confidence level in the estimate (true/false)",
                "required": false
            }
        ]))
        .ok();

        Prompt::new(
            self.name(),
            Some("Estimate the carbohydrate content of a food item or meal based on a description"),
            arguments,
        )
    }

    fn render(&self, arguments: &Map<String, Value>) -> Result<GetPromptResult, ToolError> {
        let food_description = optional_str(arguments, "foodDescription")?
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                ToolError::InvalidArguments("foodDescription is required".to_string())
            })?;
        let units = CarbUnits::parse(optional_str(arguments, "units")?)?;
        let include_confidence = optional_str(arguments, "confidence")? != Some("false");

        debug!(
            "[Tool] estimate-carbs prompt ({:?}, confidence {})",
            units, include_confidence
        );

        serde_json::from_value(json!({
            "description": "Carbohydrate estimate request",
            "messages": [{
                "role": "user",
                "content": {
                    "type": "text",
                    "text": prompt_text(food_description, units, include_confidence)
                }
            }]
        }))
        .map_err(|e| ToolError::upstream("Failed to build prompt", e))
    }
}
