//! Prometheus metrics for the conversation runtime
//!
//! All metrics register with the default registry on first use and are
//! served as text from the health server's `/metrics` route.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram, register_histogram_vec,
    CounterVec, Encoder, Gauge, Histogram, HistogramVec, TextEncoder,
};

lazy_static! {
    // ─────────────────────────────────────────────────────────────────────────────
    // Conversation Metrics
    // ─────────────────────────────────────────────────────────────────────────────

    /// Completed turns by terminal outcome.
    ///
    /// Labels:
    /// - outcome: "done", "error" or "cancelled"
    pub static ref TURNS_TOTAL: CounterVec = register_counter_vec!(
        "agent_runtime_turns_total",
        "Conversation turns by terminal outcome",
        &["outcome"]
    ).expect("failed to register TURNS_TOTAL metric");

    /// Wall time from inbound message to terminal message.
    pub static ref TURN_DURATION: Histogram = register_histogram!(
        "agent_runtime_turn_duration_seconds",
        "Time to complete a conversation turn",
        vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]
    ).expect("failed to register TURN_DURATION metric");

    /// Token usage reported by the model.
    ///
    /// Labels:
    /// - direction: "input" or "output"
    pub static ref TOKENS_TOTAL: CounterVec = register_counter_vec!(
        "agent_runtime_tokens_total",
        "Model tokens consumed",
        &["direction"]
    ).expect("failed to register TOKENS_TOTAL metric");

    /// Open Converse streams.
    pub static ref STREAMS_ACTIVE: Gauge = register_gauge!(
        "agent_runtime_streams_active",
        "Open conversation streams"
    ).expect("failed to register STREAMS_ACTIVE metric");

    /// Duration of one model call, first byte to last delta.
    ///
    /// Labels:
    /// - model: model name
    pub static ref LLM_CALL_DURATION: HistogramVec = register_histogram_vec!(
        "agent_runtime_llm_call_duration_seconds",
        "Duration of one model call",
        &["model"],
        vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]
    ).expect("failed to register LLM_CALL_DURATION metric");

    // ─────────────────────────────────────────────────────────────────────────────
    // Tool Dispatch Metrics
    // ─────────────────────────────────────────────────────────────────────────────

    /// Tool executions after retries are settled.
    ///
    /// Labels:
    /// - tool: tool name
    /// - outcome: "success" or "error"
    pub static ref TOOL_CALLS_TOTAL: CounterVec = register_counter_vec!(
        "agent_runtime_tool_calls_total",
        "Tool executions by outcome",
        &["tool", "outcome"]
    ).expect("failed to register TOOL_CALLS_TOTAL metric");

    /// Retries of retryable tool failures.
    pub static ref TOOL_RETRIES_TOTAL: CounterVec = register_counter_vec!(
        "agent_runtime_tool_retries_total",
        "Tool attempts retried after a transient failure",
        &["tool"]
    ).expect("failed to register TOOL_RETRIES_TOTAL metric");

    /// Duration of a single tool attempt.
    pub static ref TOOL_CALL_DURATION: HistogramVec = register_histogram_vec!(
        "agent_runtime_tool_call_duration_seconds",
        "Duration of one tool attempt",
        &["tool"],
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    ).expect("failed to register TOOL_CALL_DURATION metric");

    // ─────────────────────────────────────────────────────────────────────────────
    // Session Store Metrics
    // ─────────────────────────────────────────────────────────────────────────────

    /// Sessions dropped by the in-process store.
    ///
    /// Labels:
    /// - reason: "expired" or "capacity"
    pub static ref SESSION_EVICTIONS: CounterVec = register_counter_vec!(
        "agent_runtime_session_evictions_total",
        "Sessions evicted from the in-process store",
        &["reason"]
    ).expect("failed to register SESSION_EVICTIONS metric");

    /// Sessions currently held by the in-process store.
    pub static ref SESSIONS_CACHED: Gauge = register_gauge!(
        "agent_runtime_sessions_cached",
        "Sessions held by the in-process store"
    ).expect("failed to register SESSIONS_CACHED metric");
}

/// Render every registered metric in the Prometheus text format
pub fn encode_text() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
