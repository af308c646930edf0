//! Request correlation for log lines
//!
//! Every HTTP request gets a short trace id; entry and exit are logged once.

mod trace_context;

pub use trace_context::{generate_trace_id, RequestSpan, TraceContext};
