//! rmcp session manager over the [`SessionRegistry`]
//!
//! rmcp drives the Streamable HTTP transport and asks this manager for a
//! session's message channels. Each transport session is a local rmcp
//! session worker; the gateway-level [`McpSession`] record exists only once
//! the `initialize` handshake has answered successfully.

use std::sync::Arc;

use dashmap::DashMap;
use futures::Stream;
use rmcp::model::{
    ClientJsonRpcMessage, ClientRequest, JsonRpcResponse, ServerJsonRpcMessage, ServerResult,
};
use rmcp::transport::streamable_http_server::session::local::{
    create_local_session, EventIdParseError, LocalSessionHandle, LocalSessionWorker,
    SessionConfig, SessionError,
};
use rmcp::transport::streamable_http_server::session::ServerSseMessage;
use rmcp::transport::streamable_http_server::SessionManager;
use rmcp::transport::WorkerTransport;
use thiserror::Error;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use super::{CloseReason, SessionId, SessionIdentity, SessionRegistry};
use crate::mcp::{negotiate_protocol_version, McpSession};
use crate::tools::OperationRegistry;

#[derive(Debug, Error)]
pub enum SessionManagerError {
    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),
    #[error("Session error: {0}")]
    Session(#[from] SessionError),
    #[error("Invalid event id: {0}")]
    InvalidEventId(#[from] EventIdParseError),
    #[error("Initialize request for {0} carries no authenticated identity")]
    Unauthenticated(SessionId),
}

pub struct RegistrySessionManager {
    registry: Arc<SessionRegistry>,
    operations: Arc<OperationRegistry>,
    /// Transport handles of every live session, initialized or not
    handles: DashMap<SessionId, LocalSessionHandle>,
    config: SessionConfig,
}

impl RegistrySessionManager {
    pub fn new(registry: Arc<SessionRegistry>, operations: Arc<OperationRegistry>) -> Self {
        Self {
            registry,
            operations,
            handles: DashMap::new(),
            config: SessionConfig::default(),
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    fn handle(&self, id: &SessionId) -> Result<LocalSessionHandle, SessionManagerError> {
        self.handles
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| SessionManagerError::SessionNotFound(id.clone()))
    }

    /// Close the session record, then its transport
    pub async fn terminate(&self, id: &SessionId, reason: CloseReason) -> bool {
        let closed = self.registry.close(id, reason);
        if let Some((_, handle)) = self.handles.remove(id) {
            if let Err(e) = handle.close().await {
                debug!("[Session] Transport of {} already stopped: {}", id, e);
            }
        }
        closed
    }

    /// Close every session. Used on graceful shutdown.
    pub async fn shutdown(&self) -> usize {
        let closed = self.registry.close_all();
        let handles: Vec<LocalSessionHandle> = self
            .handles
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        self.handles.clear();

        for handle in handles {
            let _ = handle.close().await;
        }
        closed.len()
    }
}

/// Authenticated identity the `/mcp` middleware attached to an initialize request
fn initialize_identity(message: &ClientJsonRpcMessage) -> Option<Arc<SessionIdentity>> {
    let ClientJsonRpcMessage::Request(request) = message else {
        return None;
    };
    let ClientRequest::InitializeRequest(initialize) = &request.request else {
        return None;
    };
    initialize
        .extensions
        .get::<axum::http::request::Parts>()?
        .extensions
        .get::<Arc<SessionIdentity>>()
        .cloned()
}

/// Rewrite an unknown client protocol version before the handshake sees it.
///
/// rmcp answers with the lower of the two versions, so an unknown older
/// version would otherwise be echoed back.
fn normalize_protocol_version(message: &mut ClientJsonRpcMessage) {
    if let ClientJsonRpcMessage::Request(request) = message {
        if let ClientRequest::InitializeRequest(initialize) = &mut request.request {
            let negotiated = negotiate_protocol_version(&initialize.params.protocol_version);
            initialize.params.protocol_version = negotiated;
        }
    }
}

impl SessionManager for RegistrySessionManager {
    type Error = SessionManagerError;
    type Transport = WorkerTransport<LocalSessionWorker>;

    async fn create_session(&self) -> Result<(SessionId, Self::Transport), Self::Error> {
        let id = self.registry.allocate_id();
        let (handle, worker) = create_local_session(id.clone(), self.config.clone());
        self.handles.insert(id.clone(), handle);
        debug!("[Session] Transport created for {}", id);
        Ok((id, WorkerTransport::spawn(worker)))
    }

    async fn initialize_session(
        &self,
        id: &SessionId,
        mut message: ClientJsonRpcMessage,
    ) -> Result<ServerJsonRpcMessage, Self::Error> {
        let handle = self.handle(id)?;
        let identity = initialize_identity(&message)
            .ok_or_else(|| SessionManagerError::Unauthenticated(id.clone()))?;
        normalize_protocol_version(&mut message);

        let response = handle.initialize(message).await?;

        // Only a successful handshake publishes the session
        let negotiated = match &response {
            ServerJsonRpcMessage::Response(JsonRpcResponse {
                result: ServerResult::InitializeResult(result),
                ..
            }) => Some(result.protocol_version.clone()),
            _ => None,
        };

        match negotiated {
            Some(protocol_version) => {
                let session = McpSession::new(
                    id.clone(),
                    identity,
                    self.operations.clone(),
                    protocol_version,
                );
                self.registry.insert(session);
            }
            None => warn!(
                "[Session] Handshake for {} ({}) refused",
                id, identity.username
            ),
        }
        Ok(response)
    }

    async fn has_session(&self, id: &SessionId) -> Result<bool, Self::Error> {
        Ok(self.registry.contains(id))
    }

    async fn close_session(&self, id: &SessionId) -> Result<(), Self::Error> {
        if self.terminate(id, CloseReason::TransportClosed).await {
            info!("[Session] Transport of {} ended", id);
        }
        Ok(())
    }

    async fn create_stream(
        &self,
        id: &SessionId,
        message: ClientJsonRpcMessage,
    ) -> Result<impl Stream<Item = ServerSseMessage> + Send + Sync + 'static, Self::Error> {
        let handle = self.handle(id)?;
        let receiver = handle.establish_request_wise_channel().await?;
        handle
            .push_message(message, receiver.http_request_id)
            .await?;
        Ok(ReceiverStream::new(receiver.inner))
    }

    async fn accept_message(
        &self,
        id: &SessionId,
        message: ClientJsonRpcMessage,
    ) -> Result<(), Self::Error> {
        self.handle(id)?.push_message(message, None).await?;
        Ok(())
    }

    async fn create_standalone_stream(
        &self,
        id: &SessionId,
    ) -> Result<impl Stream<Item = ServerSseMessage> + Send + Sync + 'static, Self::Error> {
        let receiver = self.handle(id)?.establish_common_channel().await?;
        Ok(ReceiverStream::new(receiver.inner))
    }

    async fn resume(
        &self,
        id: &SessionId,
        last_event_id: String,
    ) -> Result<impl Stream<Item = ServerSseMessage> + Send + Sync + 'static, Self::Error> {
        let handle = self.handle(id)?;
        let receiver = handle.resume(last_event_id.parse()?).await?;
        Ok(ReceiverStream::new(receiver.inner))
    }
}
