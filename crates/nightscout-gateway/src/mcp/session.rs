//! Per-session state
//!
//! One [`McpSession`] exists per initialized MCP connection. It is created
//! once the `initialize` handshake succeeds, is bound to the identity that
//! authenticated that handshake, and runs the session's tool and prompt
//! calls until closed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rmcp::model::{
    CallToolRequestParams, CallToolResult, Content, ErrorData, GetPromptRequestParams,
    GetPromptResult, LoggingLevel, ProtocolVersion,
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::notifier::{severity, Notifier};
use super::SERVER_ERROR;
use crate::session::{CloseReason, SessionId, SessionIdentity, SessionState};
use crate::tools::{OperationRegistry, ToolContext};

/// A standalone notification stream is already attached to the session
#[derive(Debug, Error)]
#[error("session already has an open notification stream")]
pub struct StreamConflict;

pub struct McpSession {
    id: SessionId,
    identity: Arc<SessionIdentity>,
    operations: Arc<OperationRegistry>,
    protocol_version: ProtocolVersion,
    closed: AtomicBool,
    cancel: CancellationToken,
    stream_attached: AtomicBool,
    log_level: Mutex<LoggingLevel>,
    created_at: DateTime<Utc>,
    started: Instant,
}

impl McpSession {
    pub fn new(
        id: SessionId,
        identity: Arc<SessionIdentity>,
        operations: Arc<OperationRegistry>,
        protocol_version: ProtocolVersion,
    ) -> Arc<Self> {
        info!(
            "[Session] Initialized {} for {} (client {}, protocol {})",
            id, identity.username, identity.client_id, protocol_version
        );
        Arc::new(Self {
            id,
            identity,
            operations,
            protocol_version,
            closed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            stream_attached: AtomicBool::new(false),
            log_level: Mutex::new(LoggingLevel::Debug),
            created_at: Utc::now(),
            started: Instant::now(),
        })
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn identity(&self) -> &SessionIdentity {
        &self.identity
    }

    pub fn identity_arc(&self) -> Arc<SessionIdentity> {
        self.identity.clone()
    }

    pub fn operations(&self) -> &OperationRegistry {
        &self.operations
    }

    pub fn protocol_version(&self) -> &ProtocolVersion {
        &self.protocol_version
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn state(&self) -> SessionState {
        if self.is_closed() {
            SessionState::Closed
        } else {
            SessionState::Active
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Cancelled when the session closes
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Close the session. Returns `false` if it was already closed.
    ///
    /// Callers deregister first; see [`crate::SessionRegistry::close`].
    pub fn close(&self, reason: CloseReason) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.cancel.cancel();

        info!(
            "[Session] Closed {} for {} ({}, {:.1}s)",
            self.id,
            self.identity.username,
            reason,
            self.started.elapsed().as_secs_f64()
        );
        true
    }

    /// Claim the standalone notification stream (`GET /mcp`).
    ///
    /// The claim is released when the returned guard drops.
    pub fn attach_stream(self: &Arc<Self>) -> Result<StreamGuard, StreamConflict> {
        if self.stream_attached.swap(true, Ordering::SeqCst) {
            return Err(StreamConflict);
        }
        debug!("[Session] Notification stream attached to {}", self.id);
        Ok(StreamGuard {
            session: self.clone(),
        })
    }

    pub fn has_stream(&self) -> bool {
        self.stream_attached.load(Ordering::SeqCst)
    }

    pub(crate) fn should_emit(&self, level: &LoggingLevel) -> bool {
        severity(level) >= severity(&self.log_level.lock())
    }

    pub fn set_log_level(&self, level: LoggingLevel) {
        debug!("[Session] {} log level set to {:?}", self.id, level);
        *self.log_level.lock() = level;
    }

    /// Run a tool as this session's user.
    ///
    /// Tool failures become `isError` results. Closing the session while the
    /// tool runs abandons it and answers with a session error.
    pub async fn call_tool(
        &self,
        params: CallToolRequestParams,
        notifier: Notifier,
    ) -> Result<CallToolResult, ErrorData> {
        if self.is_closed() {
            return Err(session_closed());
        }

        let tool = self.operations.tool(&params.name).ok_or_else(|| {
            ErrorData::invalid_params(format!("Unknown tool: {}", params.name), None)
        })?;

        let ctx = ToolContext {
            identity: self.identity.clone(),
            notifier,
        };
        let arguments = params.arguments.unwrap_or_default();
        let started = Instant::now();

        let outcome = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                warn!("[Tool] {} aborted: session {} closed", params.name, self.id);
                return Err(session_closed());
            }
            outcome = tool.call(arguments, ctx) => outcome,
        };

        Ok(match outcome {
            Ok(result) => {
                debug!(
                    "[Tool] {} for {} completed in {}ms",
                    params.name,
                    self.identity.username,
                    started.elapsed().as_millis()
                );
                result
            }
            Err(e) => {
                warn!(
                    "[Tool] {} for {} failed: {}",
                    params.name, self.identity.username, e
                );
                CallToolResult::error(vec![Content::text(e.to_string())])
            }
        })
    }

    pub fn get_prompt(&self, params: GetPromptRequestParams) -> Result<GetPromptResult, ErrorData> {
        if self.is_closed() {
            return Err(session_closed());
        }

        let prompt = self.operations.prompt(&params.name).ok_or_else(|| {
            ErrorData::invalid_params(format!("Unknown prompt: {}", params.name), None)
        })?;

        prompt
            .render(&params.arguments.unwrap_or_default())
            .map_err(|e| ErrorData::invalid_params(e.to_string(), None))
    }
}

impl Drop for McpSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Holds the session's standalone stream slot
pub struct StreamGuard {
    session: Arc<McpSession>,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.session.stream_attached.store(false, Ordering::SeqCst);
        debug!(
            "[Session] Notification stream detached from {}",
            self.session.id
        );
    }
}

pub(crate) fn session_closed() -> ErrorData {
    ErrorData::new(SERVER_ERROR, "Session closed", None)
}
