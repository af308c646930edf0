//! Session registry
//!
//! Maps session id → live session. Entries are inserted once a handshake
//! completes and removed on close, before any of the session's in-flight
//! work is cancelled.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{CloseReason, SessionId};
use crate::mcp::McpSession;

#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<McpSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<Arc<McpSession>> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn insert(&self, session: Arc<McpSession>) {
        let id = session.id().clone();
        if self.sessions.insert(id.clone(), session).is_some() {
            warn!("[Session] Replaced existing registry entry {}", id);
        }
        debug!("[Session] Registered {} ({} active)", id, self.len());
    }

    pub fn remove(&self, id: &str) -> Option<Arc<McpSession>> {
        self.sessions.remove(id).map(|(_, session)| session)
    }

    /// Deregister and close. Returns `false` if no live entry existed.
    pub fn close(&self, id: &str, reason: CloseReason) -> bool {
        let Some(session) = self.remove(id) else {
            return false;
        };
        debug!(
            "[Session] Deregistered {} ({}, {} active)",
            id,
            reason,
            self.len()
        );
        session.close(reason)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Fresh UUIDv4 not currently present in the table
    pub fn allocate_id(&self) -> SessionId {
        loop {
            let id = Uuid::new_v4().to_string();
            if !self.sessions.contains_key(id.as_str()) {
                return id.into();
            }
        }
    }

    /// Close every live session. Used on graceful shutdown.
    pub fn close_all(&self) -> Vec<SessionId> {
        // Collect first: closing removes entries from the map
        let ids: Vec<SessionId> = self.sessions.iter().map(|entry| entry.key().clone()).collect();

        let closed: Vec<SessionId> = ids
            .into_iter()
            .filter(|id| self.close(id, CloseReason::Shutdown))
            .collect();

        if !closed.is_empty() {
            info!("[Session] Closed {} sessions on shutdown", closed.len());
        }
        closed
    }
}
