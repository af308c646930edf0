//! Trace ids and per-request spans

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use tracing::{info, info_span, Span};

static REQUEST_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Short id for correlating the log lines of one request (6 hex chars)
pub fn generate_trace_id() -> String {
    let counter = REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed);
    let micros = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0);

    format!("{:06x}", counter.wrapping_add(micros) & 0xFF_FFFF)
}

/// Correlation data of one HTTP request
#[derive(Debug, Clone)]
pub struct TraceContext {
    pub trace_id: String,
    pub method: String,
    pub path: String,
    /// JSON-RPC method of the first message in the body
    pub mcp_method: Option<String>,
    /// `Mcp-Session-Id` sent by the client
    pub session_id: Option<String>,
    pub started_at: Instant,
}

impl TraceContext {
    pub fn new(method: &str, path: &str) -> Self {
        Self {
            trace_id: generate_trace_id(),
            method: method.to_string(),
            path: path.to_string(),
            mcp_method: None,
            session_id: None,
            started_at: Instant::now(),
        }
    }

    pub fn with_mcp_method(mut self, method: Option<String>) -> Self {
        self.mcp_method = method;
        self
    }

    pub fn with_session(mut self, session_id: Option<String>) -> Self {
        self.session_id = session_id;
        self
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }

    /// First 8 chars of the session id, `new` before initialization
    pub fn short_session(&self) -> &str {
        self.session_id
            .as_deref()
            .map(|s| &s[..s.len().min(8)])
            .unwrap_or("new")
    }
}

pub struct RequestSpan;

impl RequestSpan {
    /// Span carrying the trace id into every log line of the request
    pub fn enter(ctx: &TraceContext) -> Span {
        info_span!(
            "request",
            trace_id = %ctx.trace_id,
            method = %ctx.method,
            path = %ctx.path,
        )
    }

    pub fn log_entry(ctx: &TraceContext) {
        if ctx.path == "/mcp" {
            info!(
                trace_id = %ctx.trace_id,
                "→ {} {} {} session={}",
                ctx.method,
                ctx.path,
                ctx.mcp_method.as_deref().unwrap_or("-"),
                ctx.short_session()
            );
        } else {
            info!(trace_id = %ctx.trace_id, "→ {} {}", ctx.method, ctx.path);
        }
    }

    pub fn log_exit(ctx: &TraceContext, status: u16, detail: Option<&str>) {
        let elapsed = ctx.elapsed_ms();
        match detail {
            Some(d) => info!(trace_id = %ctx.trace_id, "← {} {} ({}ms)", status, d, elapsed),
            None => info!(trace_id = %ctx.trace_id, "← {} ({}ms)", status, elapsed),
        }
    }
}
