//! HTTP tool adapter
//!
//! Sends the call arguments as the request body to the handler's endpoint
//! and returns the response body, parsed as JSON when it is JSON.

use std::str::FromStr;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Method};
use tracing::debug;

use super::config::{HandlerConfig, HttpConfig};
use super::{parse_timeout, ToolAdapter, ToolError, ToolOutput};

/// Executes one tool over HTTP
pub struct HttpToolAdapter {
    tool_name: String,
    endpoint: String,
    method: Method,
    headers: HeaderMap,
    timeout: Duration,
    client: Mutex<Option<Client>>,
}

impl HttpToolAdapter {
    /// Build an adapter from a handler entry
    ///
    /// Fails when the method, a header or the endpoint cannot be used.
    pub fn new(handler: &HandlerConfig) -> Result<Self, ToolError> {
        let tool_name = handler.tool_name().to_string();
        let http = handler.http_config.clone().unwrap_or_default();
        let config_error = |message: String| ToolError::Config {
            tool: tool_name.clone(),
            message,
        };

        let endpoint = http
            .endpoint
            .clone()
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| handler.endpoint.clone());
        if endpoint.is_empty() {
            return Err(config_error("no endpoint configured".into()));
        }

        let method = Method::from_str(&http.method.to_ascii_uppercase())
            .map_err(|e| config_error(format!("invalid method {:?}: {}", http.method, e)))?;
        let headers = build_headers(&http).map_err(config_error)?;
        let timeout = parse_timeout(&handler.timeout);

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| config_error(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            tool_name,
            endpoint,
            method,
            headers,
            timeout,
            client: Mutex::new(Some(client)),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn client(&self) -> Option<Client> {
        // Client is an Arc internally; clone and release the lock before awaiting
        self.client.lock().ok().and_then(|guard| guard.clone())
    }

    fn error(&self, e: reqwest::Error) -> ToolError {
        let tool = self.tool_name.clone();
        let message = e.to_string();
        if e.is_timeout() {
            ToolError::Timeout { tool, message }
        } else if e.is_builder() {
            ToolError::Config { tool, message }
        } else {
            ToolError::Transport { tool, message }
        }
    }
}

fn build_headers(http: &HttpConfig) -> Result<HeaderMap, String> {
    let mut headers = HeaderMap::new();
    for (name, value) in &http.headers {
        let name = HeaderName::from_str(name)
            .map_err(|e| format!("invalid header name {:?}: {}", name, e))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| format!("invalid value for header {}: {}", name, e))?;
        headers.insert(name, value);
    }

    // contentType always wins over a Content-Type entry in headers
    let content_type = HeaderValue::from_str(&http.content_type)
        .map_err(|e| format!("invalid content type {:?}: {}", http.content_type, e))?;
    headers.insert(CONTENT_TYPE, content_type);
    Ok(headers)
}

#[async_trait]
impl ToolAdapter for HttpToolAdapter {
    fn tool_name(&self) -> &str {
        &self.tool_name
    }

    async fn execute(&self, arguments: &serde_json::Value) -> Result<ToolOutput, ToolError> {
        let client = self.client().ok_or_else(|| ToolError::Config {
            tool: self.tool_name.clone(),
            message: "adapter is closed".into(),
        })?;

        let body = serde_json::to_vec(arguments).map_err(|e| ToolError::Config {
            tool: self.tool_name.clone(),
            message: format!("arguments are not serializable: {}", e),
        })?;

        debug!(tool = %self.tool_name, method = %self.method, endpoint = %self.endpoint, "Calling HTTP tool");

        let response = client
            .request(self.method.clone(), &self.endpoint)
            .headers(self.headers.clone())
            .body(body)
            .send()
            .await
            .map_err(|e| self.error(e))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| self.error(e))?;

        if !status.is_success() {
            return Err(ToolError::Status {
                tool: self.tool_name.clone(),
                status: status.as_u16(),
                body: text,
            });
        }

        Ok(match serde_json::from_str(&text) {
            Ok(value) => ToolOutput::Json(value),
            Err(_) => ToolOutput::Text(text),
        })
    }

    async fn close(&self) {
        if let Ok(mut guard) = self.client.lock() {
            guard.take();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::tools::config::ToolDefinition;

    fn handler(endpoint: String) -> HandlerConfig {
        let mut handler = HandlerConfig::http("weather", endpoint);
        handler.tool = Some(ToolDefinition {
            name: "get_weather".into(),
            description: "Get weather".into(),
            input_schema: json!({"type": "object"}),
            output_schema: None,
        });
        handler
    }

    #[tokio::test]
    async fn test_posts_arguments_and_parses_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/weather"))
            .and(header("content-type", "application/json"))
            .and(body_json(json!({"location": "Paris"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"temp": 21})))
            .expect(1)
            .mount(&server)
            .await;

        let adapter = HttpToolAdapter::new(&handler(format!("{}/weather", server.uri()))).unwrap();
        assert_eq!(adapter.tool_name(), "get_weather");

        let output = adapter.execute(&json!({"location": "Paris"})).await.unwrap();
        assert_eq!(output, ToolOutput::Json(json!({"temp": 21})));
    }

    #[tokio::test]
    async fn test_non_json_body_is_returned_as_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("sunny"))
            .mount(&server)
            .await;

        let adapter = HttpToolAdapter::new(&handler(server.uri())).unwrap();
        let output = adapter.execute(&json!({})).await.unwrap();
        assert_eq!(output, ToolOutput::Text("sunny".into()));
    }

    #[tokio::test]
    async fn test_custom_method_and_headers() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(header("x-api-key", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let mut config = handler(server.uri());
        config.http_config = Some(HttpConfig {
            method: "put".into(),
            headers: HashMap::from([("X-API-Key".to_string(), "secret".to_string())]),
            ..HttpConfig::default()
        });
        let adapter = HttpToolAdapter::new(&config).unwrap();
        assert!(adapter.execute(&json!({})).await.is_ok());
    }

    #[tokio::test]
    async fn test_content_type_setting_beats_header_entry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("content-type", "application/vnd.weather+json"))
            .and(header("x-trace", "abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let mut config = handler(server.uri());
        config.http_config = Some(HttpConfig {
            content_type: "application/vnd.weather+json".into(),
            headers: HashMap::from([
                ("Content-Type".to_string(), "text/plain".to_string()),
                ("X-Trace".to_string(), "abc".to_string()),
            ]),
            ..HttpConfig::default()
        });
        let adapter = HttpToolAdapter::new(&config).unwrap();
        assert!(adapter.execute(&json!({})).await.is_ok());
    }

    #[test]
    fn test_oversized_timeout_falls_back_to_default() {
        let mut config = handler("http://localhost".into());
        config.timeout = "99999999999999999999".into();
        let adapter = HttpToolAdapter::new(&config).unwrap();
        assert_eq!(adapter.timeout(), crate::tools::DEFAULT_TOOL_TIMEOUT);
    }

    #[tokio::test]
    async fn test_http_config_endpoint_overrides_handler() {
        let server = MockServer::start().await;
        Mock::given(path("/override"))
            .respond_with(ResponseTemplate::new(200).set_body_string("hit"))
            .expect(1)
            .mount(&server)
            .await;

        let mut config = handler("http://unused.invalid".into());
        config.http_config = Some(HttpConfig {
            endpoint: Some(format!("{}/override", server.uri())),
            ..HttpConfig::default()
        });
        let adapter = HttpToolAdapter::new(&config).unwrap();
        assert_eq!(adapter.execute(&json!({})).await.unwrap().to_text(), "hit");
    }

    #[tokio::test]
    async fn test_server_error_is_retryable_client_error_is_not() {
        let server = MockServer::start().await;
        Mock::given(path("/fail"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .mount(&server)
            .await;
        Mock::given(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let adapter = HttpToolAdapter::new(&handler(format!("{}/fail", server.uri()))).unwrap();
        let err = adapter.execute(&json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::Status { status: 503, ref body, .. } if body == "busy"));
        assert!(err.is_retryable());

        let adapter = HttpToolAdapter::new(&handler(format!("{}/missing", server.uri()))).unwrap();
        let err = adapter.execute(&json!({})).await.unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_slow_response_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let mut config = handler(server.uri());
        config.timeout = "50ms".into();
        let adapter = HttpToolAdapter::new(&config).unwrap();
        let err = adapter.execute(&json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::Timeout { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_closed_adapter_rejects_calls() {
        let adapter = HttpToolAdapter::new(&handler("http://127.0.0.1:1".into())).unwrap();
        adapter.close().await;
        let err = adapter.execute(&json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::Config { .. }));
    }

    #[test]
    fn test_rejects_bad_configuration() {
        assert!(HttpToolAdapter::new(&HandlerConfig::http("empty", "")).is_err());

        let mut config = handler("http://localhost".into());
        config.http_config = Some(HttpConfig {
            method: "NOT A METHOD".into(),
            ..HttpConfig::default()
        });
        assert!(HttpToolAdapter::new(&config).is_err());
    }
}
