//! Operations exposed to an established session
//!
//! Tools run as the session's authenticated user. Failures are reported to
//! the client as `isError` results, never as protocol errors.

mod carbs;
mod glucose;
mod prompts;

pub use carbs::AddCarbTreatmentTool;
pub use glucose::GetGlucoseEntriesTool;
pub use prompts::EstimateCarbsPrompt;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use nightscout_core::{DirectoryError, NightscoutClient, UserDirectory};
use rmcp::model::{CallToolResult, GetPromptResult, JsonObject, Prompt, Tool};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::mcp::Notifier;
use crate::session::SessionIdentity;

/// Tool and prompt failures
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("{context}: {message}")]
    Upstream { context: &'static str, message: String },
}

impl ToolError {
    pub fn upstream(context: &'static str, error: impl std::fmt::Display) -> Self {
        ToolError::Upstream {
            context,
            message: error.to_string(),
        }
    }

    /// The failure without its context prefix
    pub fn detail(&self) -> &str {
        match self {
            ToolError::InvalidArguments(message) | ToolError::Upstream { message, .. } => message,
        }
    }
}

/// Per-call context: who is calling and where notifications go
#[derive(Clone)]
pub struct ToolContext {
    pub identity: Arc<SessionIdentity>,
    pub notifier: Notifier,
}

impl ToolContext {
    pub fn username(&self) -> &str {
        &self.identity.username
    }
}

#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn name(&self) -> &'static str;

    fn definition(&self) -> Tool;

    async fn call(
        &self,
        arguments: Map<String, Value>,
        ctx: ToolContext,
    ) -> Result<CallToolResult, ToolError>;
}

pub trait PromptHandler: Send + Sync {
    fn name(&self) -> &'static str;

    fn definition(&self) -> Prompt;

    fn render(&self, arguments: &Map<String, Value>) -> Result<GetPromptResult, ToolError>;
}

/// Resolves a username to a Nightscout client
pub struct NightscoutSites {
    directory: Arc<dyn UserDirectory>,
    http: reqwest::Client,
}

impl NightscoutSites {
    pub fn new(directory: Arc<dyn UserDirectory>) -> Self {
        Self::with_http(directory, reqwest::Client::new())
    }

    pub fn with_http(directory: Arc<dyn UserDirectory>, http: reqwest::Client) -> Self {
        Self { directory, http }
    }

    pub async fn client_for(&self, username: &str) -> Result<NightscoutClient, DirectoryError> {
        let site = self.directory.nightscout_site(username).await?;
        debug!("[Tool] Nightscout site for {} is {}", username, site.base_url);
        Ok(NightscoutClient::with_http(self.http.clone(), site))
    }
}

/// Named tools and prompts offered to every session
#[derive(Default)]
pub struct OperationRegistry {
    tools: BTreeMap<&'static str, Arc<dyn ToolHandler>>,
    prompts: BTreeMap<&'static str, Arc<dyn PromptHandler>>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Glucose and carb tools plus the carb estimation prompt
    pub fn nightscout(sites: Arc<NightscoutSites>) -> Self {
        Self::new()
            .with_tool(GetGlucoseEntriesTool::new(sites.clone()))
            .with_tool(AddCarbTreatmentTool::new(sites))
            .with_prompt(EstimateCarbsPrompt)
    }

    pub fn with_tool(mut self, tool: impl ToolHandler + 'static) -> Self {
        self.tools.insert(tool.name(), Arc::new(tool));
        self
    }

    pub fn with_prompt(mut self, prompt: impl PromptHandler + 'static) -> Self {
        self.prompts.insert(prompt.name(), Arc::new(prompt));
        self
    }

    pub fn tool(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.tools.get(name).cloned()
    }

    pub fn prompt(&self, name: &str) -> Option<Arc<dyn PromptHandler>> {
        self.prompts.get(name).cloned()
    }

    pub fn tools(&self) -> Vec<Tool> {
        self.tools.values().map(|tool| tool.definition()).collect()
    }

    pub fn prompts(&self) -> Vec<Prompt> {
        self.prompts.values().map(|prompt| prompt.definition()).collect()
    }
}

/// JSON object literal as a schema
pub(crate) fn schema(value: Value) -> Arc<JsonObject> {
    match value {
        Value::Object(map) => Arc::new(map),
        _ => Arc::new(JsonObject::new()),
    }
}

/// Optional string argument; an explicit `null` counts as absent
pub(crate) fn optional_str<'a>(
    arguments: &'a Map<String, Value>,
    name: &str,
) -> Result<Option<&'a str>, ToolError> {
    match arguments.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(other) => Err(ToolError::InvalidArguments(format!(
            "{} must be a string, got {}",
            name, other
        ))),
    }
}
