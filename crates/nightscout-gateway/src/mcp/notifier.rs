//! Out-of-band log messages from operations to the client

use std::sync::Arc;

use async_trait::async_trait;
use rmcp::model::{LoggingLevel, LoggingMessageNotificationParam};
use rmcp::service::Peer;
use rmcp::RoleServer;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use super::McpSession;

/// Logger name reported in `notifications/message`
pub const LOGGER_NAME: &str = "nightscout-mcp-server";

/// Where a notification ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Handed to the session's transport
    Sent,
    /// Below the session's log level
    Filtered,
    /// The transport is gone
    Dropped,
}

/// Destination of `notifications/message`
#[async_trait]
pub trait LogSink: Send + Sync {
    /// `true` if the message was accepted
    async fn send(&self, message: LoggingMessageNotificationParam) -> bool;
}

/// Messages go out on the session's standalone stream
#[async_trait]
impl LogSink for Peer<RoleServer> {
    async fn send(&self, message: LoggingMessageNotificationParam) -> bool {
        match self.notify_logging_message(message).await {
            Ok(()) => true,
            Err(e) => {
                debug!("[Session] Log notification not delivered: {}", e);
                false
            }
        }
    }
}

#[async_trait]
impl LogSink for mpsc::UnboundedSender<LoggingMessageNotificationParam> {
    async fn send(&self, message: LoggingMessageNotificationParam) -> bool {
        mpsc::UnboundedSender::send(self, message).is_ok()
    }
}

/// Notification handle passed to operations.
///
/// Applies the session's `logging/setLevel` threshold before anything is sent.
#[derive(Clone)]
pub struct Notifier {
    session: Arc<McpSession>,
    sink: Arc<dyn LogSink>,
}

impl Notifier {
    pub fn new(session: Arc<McpSession>, sink: Arc<dyn LogSink>) -> Self {
        Self { session, sink }
    }

    /// Emit `notifications/message` at `level`
    pub async fn log(&self, level: LoggingLevel, data: impl Into<Value>) -> Delivery {
        if !self.session.should_emit(&level) {
            return Delivery::Filtered;
        }

        let message = LoggingMessageNotificationParam {
            level,
            logger: Some(LOGGER_NAME.to_string()),
            data: data.into(),
        };
        if self.sink.send(message).await {
            Delivery::Sent
        } else {
            debug!(
                "[Session] Transport of {} is gone, notification dropped",
                self.session.id()
            );
            Delivery::Dropped
        }
    }

    pub async fn info(&self, data: impl Into<Value>) -> Delivery {
        self.log(LoggingLevel::Info, data).await
    }

    pub async fn error(&self, data: impl Into<Value>) -> Delivery {
        self.log(LoggingLevel::Error, data).await
    }
}

/// Numeric severity, RFC 5424 order
pub(crate) fn severity(level: &LoggingLevel) -> u8 {
    match level {
        LoggingLevel::Debug => 0,
        LoggingLevel::Info => 1,
        LoggingLevel::Notice => 2,
        LoggingLevel::Warning => 3,
        LoggingLevel::Error => 4,
        LoggingLevel::Critical => 5,
        LoggingLevel::Alert => 6,
        LoggingLevel::Emergency => 7,
    }
}
