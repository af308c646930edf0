//! Nightscout MCP Handler
//!
//! Implements rmcp's `ServerHandler`. Each session's request handling runs
//! against the [`McpSession`] the `/mcp` middleware resolved for it.

use std::sync::Arc;

use rmcp::model::{
    CallToolRequestParams, CallToolResult, ErrorCode, GetPromptRequestParams, GetPromptResult,
    Implementation, InitializeRequestParams, InitializeResult, ListPromptsResult,
    ListResourceTemplatesResult, ListResourcesResult, ListToolsResult, PaginatedRequestParams,
    PromptsCapability, ProtocolVersion, ReadResourceRequestParams, ReadResourceResult,
    ServerCapabilities, ServerInfo, SetLevelRequestParams, ToolsCapability,
};
use rmcp::service::{NotificationContext, RequestContext};
use rmcp::{ErrorData as McpError, RoleServer, ServerHandler};
use tracing::{debug, info};

use super::context::{identity, require_session, session};
use super::{McpSession, Notifier};
use crate::tools::OperationRegistry;

/// Name reported in `serverInfo`
pub const SERVER_NAME: &str = "nightscout-mcp-server";

/// Protocol revisions this server can speak
const KNOWN_VERSIONS: [ProtocolVersion; 3] = [
    ProtocolVersion::V_2024_11_05,
    ProtocolVersion::V_2025_03_26,
    ProtocolVersion::V_2025_06_18,
];

/// Echo the client's revision when we know it, else answer with ours
pub fn negotiate_protocol_version(client: &ProtocolVersion) -> ProtocolVersion {
    if KNOWN_VERSIONS.contains(client) {
        return client.clone();
    }
    debug!(
        client_version = %client,
        ours = %ProtocolVersion::LATEST,
        "Unknown client protocol version, answering with ours"
    );
    ProtocolVersion::LATEST
}

#[derive(Clone)]
pub struct NightscoutHandler {
    operations: Arc<OperationRegistry>,
}

impl NightscoutHandler {
    pub fn new(operations: Arc<OperationRegistry>) -> Self {
        Self { operations }
    }

    fn notifier(session: &Arc<McpSession>, context: &RequestContext<RoleServer>) -> Notifier {
        Notifier::new(session.clone(), Arc::new(context.peer.clone()))
    }
}

impl ServerHandler for NightscoutHandler {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder()
                .enable_logging()
                .enable_prompts_with(PromptsCapability {
                    list_changed: Some(false),
                })
                .enable_tools_with(ToolsCapability {
                    list_changed: Some(false),
                })
                .build(),
            server_info: Implementation {
                name: SERVER_NAME.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                ..Default::default()
            },
            instructions: Some(
                "Reads blood glucose entries from and records carbohydrate treatments in \
                 the authenticated user's Nightscout site."
                    .to_string(),
            ),
        }
    }

    async fn initialize(
        &self,
        params: InitializeRequestParams,
        context: RequestContext<RoleServer>,
    ) -> Result<InitializeResult, McpError> {
        if session(&context.extensions).is_some() {
            return Err(McpError::invalid_request(
                "Session already initialized",
                None,
            ));
        }
        let identity = identity(&context.extensions)
            .ok_or_else(|| McpError::invalid_request("Unauthenticated initialize", None))?;

        if context.peer.peer_info().is_none() {
            context.peer.set_peer_info(params.clone());
        }

        let protocol_version = negotiate_protocol_version(&params.protocol_version);
        debug!(
            user = %identity.username,
            client = %params.client_info.name,
            protocol_version = %protocol_version,
            "Client initializing"
        );

        Ok(InitializeResult {
            protocol_version,
            ..self.get_info()
        })
    }

    async fn on_initialized(&self, context: NotificationContext<RoleServer>) {
        if let Some(identity) = identity(&context.extensions) {
            info!("[Session] Client ready for {}", identity.username);
        }
    }

    async fn list_tools(
        &self,
        _params: Option<PaginatedRequestParams>,
        context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        require_session(&context.extensions)?;
        Ok(ListToolsResult::with_all_items(self.operations.tools()))
    }

    async fn call_tool(
        &self,
        params: CallToolRequestParams,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let session = require_session(&context.extensions)?;
        info!(
            tool = %params.name,
            user = %session.identity().username,
            "call_tool"
        );

        let notifier = Self::notifier(&session, &context);
        let tool_name = params.name.clone();
        tokio::select! {
            _ = context.ct.cancelled() => {
                debug!("[Tool] {} cancelled by the client", tool_name);
                Err(McpError::new(super::SERVER_ERROR, "Request cancelled", None))
            }
            result = session.call_tool(params, notifier) => result,
        }
    }

    async fn list_prompts(
        &self,
        _params: Option<PaginatedRequestParams>,
        context: RequestContext<RoleServer>,
    ) -> Result<ListPromptsResult, McpError> {
        require_session(&context.extensions)?;
        Ok(ListPromptsResult::with_all_items(self.operations.prompts()))
    }

    async fn get_prompt(
        &self,
        params: GetPromptRequestParams,
        context: RequestContext<RoleServer>,
    ) -> Result<GetPromptResult, McpError> {
        require_session(&context.extensions)?.get_prompt(params)
    }

    async fn list_resources(
        &self,
        _params: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListResourcesResult, McpError> {
        Err(not_offered("resources/list"))
    }

    async fn list_resource_templates(
        &self,
        _params: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListResourceTemplatesResult, McpError> {
        Err(not_offered("resources/templates/list"))
    }

    async fn read_resource(
        &self,
        _params: ReadResourceRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> Result<ReadResourceResult, McpError> {
        Err(not_offered("resources/read"))
    }

    async fn set_level(
        &self,
        params: SetLevelRequestParams,
        context: RequestContext<RoleServer>,
    ) -> Result<(), McpError> {
        require_session(&context.extensions)?.set_log_level(params.level);
        Ok(())
    }
}

/// No resources capability is advertised
fn not_offered(method: &str) -> McpError {
    McpError::new(
        ErrorCode::METHOD_NOT_FOUND,
        format!("Method not found: {}", method),
        None,
    )
}
