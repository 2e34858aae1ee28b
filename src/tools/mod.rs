//! Tool dispatch: executors for the tools an agent may call
//!
//! Tools are declared in a YAML file, one handler per tool. At startup the
//! [`ToolDispatcher`] builds one adapter per handler whose transport it
//! supports and then routes `execute(name, args)` calls with bounded retry.
//!
//! ```text
//! tools.yaml ──load_tools_config──► ToolsConfig
//!                                        │
//!                              ToolDispatcher::initialize
//!                                        │
//!              ┌─────────────────────────┼─────────────────────┐
//!              ▼                         ▼                     ▼
//!       HttpToolAdapter           HttpToolAdapter        (grpc/mcp/openapi:
//!        "get_weather"              "search"              skipped + warned)
//! ```

pub mod config;
pub mod dispatcher;
pub mod http;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use config::{load_tools_config, HandlerConfig, HandlerKind, ToolDefinition, ToolsConfig};
pub use dispatcher::ToolDispatcher;
pub use http::HttpToolAdapter;

/// Timeout applied when a handler's timeout string cannot be parsed
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// Description of a tool as offered to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema of the arguments object
    pub parameters: serde_json::Value,
}

/// Result of a tool call
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    /// Response body that parsed as JSON
    Json(serde_json::Value),
    /// Raw response text
    Text(String),
}

impl ToolOutput {
    /// Text form handed back to the model and the caller
    pub fn to_text(&self) -> String {
        match self {
            ToolOutput::Json(value) => value.to_string(),
            ToolOutput::Text(text) => text.clone(),
        }
    }
}

/// Error type for tool execution
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("no adapter found for tool: {tool}")]
    UnknownTool { tool: String },
    #[error("tool {tool} timed out: {message}")]
    Timeout { tool: String, message: String },
    #[error("tool {tool} request failed: {message}")]
    Transport { tool: String, message: String },
    #[error("tool {tool} returned HTTP {status}: {body}")]
    Status { tool: String, status: u16, body: String },
    #[error("tool {tool} is misconfigured: {message}")]
    Config { tool: String, message: String },
}

impl ToolError {
    /// Transient failures worth another attempt: timeouts, connection
    /// failures and server-side (5xx) statuses
    pub fn is_retryable(&self) -> bool {
        match self {
            ToolError::Timeout { .. } | ToolError::Transport { .. } => true,
            ToolError::Status { status, .. } => *status >= 500,
            ToolError::UnknownTool { .. } | ToolError::Config { .. } => false,
        }
    }

    pub fn tool_name(&self) -> &str {
        match self {
            ToolError::UnknownTool { tool }
            | ToolError::Timeout { tool, .. }
            | ToolError::Transport { tool, .. }
            | ToolError::Status { tool, .. }
            | ToolError::Config { tool, .. } => tool,
        }
    }

    /// JSON payload reported to the model and the caller on failure
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "error": self.to_string(),
            "tool": self.tool_name(),
        })
    }
}

/// A live executor bound to one tool's transport configuration
///
/// Adapters are shared across concurrent `execute` calls.
#[async_trait]
pub trait ToolAdapter: Send + Sync {
    /// Name the adapter is registered under
    fn tool_name(&self) -> &str;

    async fn execute(&self, arguments: &serde_json::Value) -> Result<ToolOutput, ToolError>;

    /// Release the transport; later calls fail with a config error
    async fn close(&self);
}

/// Parse a handler timeout such as `"30s"`, `"2m"`, `"1h"`, `"500ms"` or a
/// bare number of seconds. Anything else yields [`DEFAULT_TOOL_TIMEOUT`].
pub fn parse_timeout(raw: &str) -> Duration {
    let raw = raw.trim();
    let seconds = if let Some(ms) = raw.strip_suffix("ms") {
        ms.trim().parse::<f64>().ok().map(|v| v / 1000.0)
    } else if let Some(s) = raw.strip_suffix('s') {
        s.trim().parse::<f64>().ok()
    } else if let Some(m) = raw.strip_suffix('m') {
        m.trim().parse::<f64>().ok().map(|v| v * 60.0)
    } else if let Some(h) = raw.strip_suffix('h') {
        h.trim().parse::<f64>().ok().map(|v| v * 3600.0)
    } else {
        raw.parse::<f64>().ok()
    };

    match seconds {
        Some(secs) if secs > 0.0 => {
            Duration::try_from_secs_f64(secs).unwrap_or(DEFAULT_TOOL_TIMEOUT)
        }
        _ => DEFAULT_TOOL_TIMEOUT,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timeout_units() {
        assert_eq!(parse_timeout("30s").as_secs_f64(), 30.0);
        assert_eq!(parse_timeout("2m").as_secs_f64(), 120.0);
        assert_eq!(parse_timeout("1h").as_secs_f64(), 3600.0);
        assert_eq!(parse_timeout("1.5s").as_secs_f64(), 1.5);
        assert_eq!(parse_timeout("500ms").as_millis(), 500);
    }

    #[test]
    fn test_parse_timeout_bare_number_is_seconds() {
        assert_eq!(parse_timeout("45").as_secs_f64(), 45.0);
    }

    #[test]
    fn test_parse_timeout_falls_back_to_default() {
        assert_eq!(parse_timeout("soon"), DEFAULT_TOOL_TIMEOUT);
        assert_eq!(parse_timeout("xs"), DEFAULT_TOOL_TIMEOUT);
        assert_eq!(parse_timeout(""), DEFAULT_TOOL_TIMEOUT);
        assert_eq!(parse_timeout("-5s"), DEFAULT_TOOL_TIMEOUT);
        assert_eq!(parse_timeout("0"), DEFAULT_TOOL_TIMEOUT);
    }

    #[test]
    fn test_parse_timeout_out_of_range_uses_default() {
        assert_eq!(parse_timeout("1e20s"), DEFAULT_TOOL_TIMEOUT);
        assert_eq!(parse_timeout("99999999999999999999"), DEFAULT_TOOL_TIMEOUT);
        assert_eq!(parse_timeout("1e300h"), DEFAULT_TOOL_TIMEOUT);
        assert_eq!(parse_timeout("NaN"), DEFAULT_TOOL_TIMEOUT);
        assert_eq!(parse_timeout("infs"), DEFAULT_TOOL_TIMEOUT);
    }

    #[test]
    fn test_retryable_classification() {
        let tool = "t".to_string();
        assert!(ToolError::Timeout { tool: tool.clone(), message: String::new() }.is_retryable());
        assert!(ToolError::Transport { tool: tool.clone(), message: String::new() }.is_retryable());
        assert!(ToolError::Status { tool: tool.clone(), status: 503, body: String::new() }.is_retryable());
        assert!(!ToolError::Status { tool: tool.clone(), status: 404, body: String::new() }.is_retryable());
        assert!(!ToolError::Config { tool: tool.clone(), message: String::new() }.is_retryable());
        assert!(!ToolError::UnknownTool { tool }.is_retryable());
    }

    #[test]
    fn test_output_text_forms() {
        assert_eq!(ToolOutput::Json(serde_json::json!({"a": 1})).to_text(), r#"{"a":1}"#);
        assert_eq!(ToolOutput::Text("plain".into()).to_text(), "plain");
    }
}
