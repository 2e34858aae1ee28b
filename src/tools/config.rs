//! Tool handler configuration (`tools.yaml`)
//!
//! ```yaml
//! handlers:
//!   - name: weather
//!     type: http
//!     endpoint: http://api.weather.example/v1
//!     tool:
//!       name: get_weather
//!       description: Get weather for a location
//!       inputSchema: { type: object }
//!     httpConfig:
//!       method: POST
//!       headers: { X-API-Key: secret }
//!       contentType: application/json
//!     timeout: 30s
//!     retries: 2
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Transport kind of a handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerKind {
    Http,
    Grpc,
    Mcp,
    OpenApi,
    Other(String),
}

impl HandlerKind {
    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "http" => HandlerKind::Http,
            "grpc" => HandlerKind::Grpc,
            "mcp" => HandlerKind::Mcp,
            "openapi" => HandlerKind::OpenApi,
            other => HandlerKind::Other(other.to_string()),
        }
    }
}

/// Tool interface as the model sees it
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "empty_object")]
    pub input_schema: serde_json::Value,
    #[serde(default)]
    pub output_schema: Option<serde_json::Value>,
}

/// HTTP transport settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpConfig {
    /// Overrides the handler endpoint
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default = "default_content_type")]
    pub content_type: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            method: default_method(),
            headers: HashMap::new(),
            content_type: default_content_type(),
        }
    }
}

/// gRPC transport settings (parsed, no adapter yet)
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrpcConfig {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub tls: bool,
    #[serde(default)]
    pub tls_cert_path: Option<String>,
    #[serde(default)]
    pub tls_key_path: Option<String>,
    #[serde(default, rename = "tlsCAPath")]
    pub tls_ca_path: Option<String>,
    #[serde(default)]
    pub tls_insecure_skip_verify: bool,
}

/// MCP transport settings (parsed, no adapter yet)
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpConfig {
    #[serde(default = "default_mcp_transport")]
    pub transport: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub work_dir: Option<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// OpenAPI transport settings (parsed, no adapter yet)
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OpenApiConfig {
    #[serde(rename = "specURL")]
    pub spec_url: String,
    #[serde(default, rename = "baseURL")]
    pub base_url: Option<String>,
    #[serde(default, rename = "operationFilter")]
    pub operation_filter: Vec<String>,
}

/// One tool handler
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandlerConfig {
    pub name: String,
    #[serde(rename = "type", default = "default_kind")]
    pub handler_type: String,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub tool: Option<ToolDefinition>,
    #[serde(default)]
    pub http_config: Option<HttpConfig>,
    #[serde(default)]
    pub grpc_config: Option<GrpcConfig>,
    #[serde(default)]
    pub mcp_config: Option<McpConfig>,
    #[serde(default, rename = "openAPIConfig")]
    pub openapi_config: Option<OpenApiConfig>,
    #[serde(default = "default_timeout")]
    pub timeout: String,
    /// Extra attempts after the first
    #[serde(default)]
    pub retries: u32,
}

impl HandlerConfig {
    /// Minimal HTTP handler with defaults everywhere else
    pub fn http(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            handler_type: default_kind(),
            endpoint: endpoint.into(),
            tool: None,
            http_config: None,
            grpc_config: None,
            mcp_config: None,
            openapi_config: None,
            timeout: default_timeout(),
            retries: 0,
        }
    }

    pub fn kind(&self) -> HandlerKind {
        HandlerKind::parse(&self.handler_type)
    }

    /// Name the tool is called by: the tool block's name, else the handler's
    pub fn tool_name(&self) -> &str {
        self.tool
            .as_ref()
            .map(|tool| tool.name.as_str())
            .unwrap_or(&self.name)
    }
}

/// Complete tools configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ToolsConfig {
    #[serde(default)]
    pub handlers: Vec<HandlerConfig>,
}

impl ToolsConfig {
    /// First handler with this handler name
    pub fn get_handler(&self, name: &str) -> Option<&HandlerConfig> {
        self.handlers.iter().find(|h| h.name == name)
    }

    /// First handler whose effective tool name matches
    pub fn get_tool_handler(&self, tool_name: &str) -> Option<&HandlerConfig> {
        self.handlers.iter().find(|h| h.tool_name() == tool_name)
    }

    /// Parse YAML text; an empty document is an empty configuration
    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text)
    }
}

/// Error loading the tools file
#[derive(Debug, Error)]
pub enum ToolConfigError {
    #[error("tools config not found: {path}")]
    NotFound { path: PathBuf },
    #[error("failed to read tools config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid tools config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Load and parse a tools YAML file
pub fn load_tools_config(path: impl AsRef<Path>) -> Result<ToolsConfig, ToolConfigError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            ToolConfigError::NotFound { path: path.to_path_buf() }
        } else {
            ToolConfigError::Io { path: path.to_path_buf(), source }
        }
    })?;
    ToolsConfig::from_yaml(&text).map_err(|source| ToolConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn empty_object() -> serde_json::Value {
    serde_json::json!({})
}

fn default_method() -> String {
    "POST".to_string()
}

fn default_content_type() -> String {
    "application/json".to_string()
}

fn default_mcp_transport() -> String {
    "stdio".to_string()
}

fn default_kind() -> String {
    "http".to_string()
}

fn default_timeout() -> String {
    "30s".to_string()
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const HTTP_HANDLER: &str = r#"
handlers:
  - name: weather
    type: http
    endpoint: http://api.weather.com/v1
    tool:
      name: get_weather
      description: Get weather for a location
      inputSchema:
        type: object
        properties:
          location:
            type: string
        required:
          - location
    httpConfig:
      method: POST
      headers:
        X-API-Key: test-key
      contentType: application/json
    timeout: 30s
    retries: 2
"#;

    #[test]
    fn test_parse_empty_config() {
        assert!(ToolsConfig::from_yaml("{}").unwrap().handlers.is_empty());
        assert!(ToolsConfig::from_yaml("").unwrap().handlers.is_empty());
    }

    #[test]
    fn test_parse_http_handler() {
        let config = ToolsConfig::from_yaml(HTTP_HANDLER).unwrap();
        assert_eq!(config.handlers.len(), 1);

        let handler = &config.handlers[0];
        assert_eq!(handler.name, "weather");
        assert_eq!(handler.kind(), HandlerKind::Http);
        assert_eq!(handler.endpoint, "http://api.weather.com/v1");
        assert_eq!(handler.timeout, "30s");
        assert_eq!(handler.retries, 2);

        let tool = handler.tool.as_ref().expect("tool block");
        assert_eq!(tool.name, "get_weather");
        assert!(tool.input_schema["properties"]["location"].is_object());
        assert!(tool.output_schema.is_none());

        let http = handler.http_config.as_ref().expect("http block");
        assert_eq!(http.method, "POST");
        assert_eq!(http.headers.get("X-API-Key").map(String::as_str), Some("test-key"));
        assert_eq!(http.content_type, "application/json");
        assert!(http.endpoint.is_none());
    }

    #[test]
    fn test_defaults_for_missing_fields() {
        let config = ToolsConfig::from_yaml("handlers:\n  - name: bare\n").unwrap();
        let handler = &config.handlers[0];
        assert_eq!(handler.kind(), HandlerKind::Http);
        assert_eq!(handler.endpoint, "");
        assert_eq!(handler.timeout, "30s");
        assert_eq!(handler.retries, 0);
        assert_eq!(handler.tool_name(), "bare");
    }

    #[test]
    fn test_reserved_kinds_are_parsed() {
        let yaml = r#"
handlers:
  - name: g
    type: grpc
    endpoint: localhost:50051
    grpcConfig:
      tls: true
      tlsCAPath: /etc/ca.pem
  - name: m
    type: mcp
    mcpConfig:
      command: server
      args: [--stdio]
  - name: o
    type: openapi
    openAPIConfig:
      specURL: http://x/openapi.json
  - name: w
    type: websocket
"#;
        let config = ToolsConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.handlers[0].kind(), HandlerKind::Grpc);
        let grpc = config.handlers[0].grpc_config.as_ref().unwrap();
        assert!(grpc.tls);
        assert_eq!(grpc.tls_ca_path.as_deref(), Some("/etc/ca.pem"));

        let mcp = config.handlers[1].mcp_config.as_ref().unwrap();
        assert_eq!(mcp.transport, "stdio");
        assert_eq!(mcp.args, vec!["--stdio".to_string()]);

        let openapi = config.handlers[2].openapi_config.as_ref().unwrap();
        assert_eq!(openapi.spec_url, "http://x/openapi.json");

        assert_eq!(config.handlers[3].kind(), HandlerKind::Other("websocket".into()));
    }

    #[test]
    fn test_handler_lookups() {
        let mut with_tool = HandlerConfig::http("handler1", "http://test1");
        with_tool.tool = Some(ToolDefinition {
            name: "my_tool".into(),
            description: "Test tool".into(),
            input_schema: serde_json::json!({}),
            output_schema: None,
        });
        let config = ToolsConfig {
            handlers: vec![with_tool, HandlerConfig::http("handler2", "http://test2")],
        };

        assert_eq!(config.get_handler("handler2").unwrap().endpoint, "http://test2");
        assert!(config.get_handler("nonexistent").is_none());
        assert_eq!(config.get_tool_handler("my_tool").unwrap().name, "handler1");
        assert_eq!(config.get_tool_handler("handler2").unwrap().name, "handler2");
        assert!(config.get_tool_handler("handler1").is_none());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(HTTP_HANDLER.as_bytes()).unwrap();
        let config = load_tools_config(file.path()).unwrap();
        assert_eq!(config.handlers[0].tool_name(), "get_weather");
    }

    #[test]
    fn test_file_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_tools_config(dir.path().join("nonexistent.yaml")).unwrap_err();
        assert!(matches!(err, ToolConfigError::NotFound { .. }));
    }
}
