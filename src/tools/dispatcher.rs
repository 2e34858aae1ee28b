//! Tool registry and retrying executor

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use tracing::{debug, info, warn};

use super::config::{HandlerKind, ToolsConfig};
use super::http::HttpToolAdapter;
use super::{ToolAdapter, ToolError, ToolOutput, ToolSpec};
use crate::metrics::{TOOL_CALLS_TOTAL, TOOL_CALL_DURATION, TOOL_RETRIES_TOTAL};
use crate::pack::PromptPack;

/// Routes tool calls by name to their adapters
///
/// Safe for concurrent `execute` calls once initialized.
pub struct ToolDispatcher {
    config: ToolsConfig,
    adapters: RwLock<HashMap<String, Arc<dyn ToolAdapter>>>,
}

impl ToolDispatcher {
    pub fn new(config: ToolsConfig) -> Self {
        Self {
            config,
            adapters: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ToolsConfig {
        &self.config
    }

    /// Build an adapter for every supported handler
    ///
    /// Handlers with an unsupported transport, or whose adapter cannot be
    /// built, are logged and skipped.
    pub async fn initialize(&self) {
        for handler in &self.config.handlers {
            match handler.kind() {
                HandlerKind::Http => match HttpToolAdapter::new(handler) {
                    Ok(adapter) => {
                        info!(
                            tool = %adapter.tool_name(),
                            handler = %handler.name,
                            endpoint = %adapter.endpoint(),
                            "Registered HTTP tool"
                        );
                        self.register(Arc::new(adapter)).await;
                    }
                    Err(e) => warn!(handler = %handler.name, error = %e, "Skipping tool handler"),
                },
                HandlerKind::Grpc | HandlerKind::Mcp | HandlerKind::OpenApi => {
                    warn!(
                        handler = %handler.name,
                        handler_type = %handler.handler_type,
                        "Tool handler type not yet supported, skipping"
                    );
                }
                HandlerKind::Other(kind) => {
                    warn!(handler = %handler.name, handler_type = %kind, "Unknown tool handler type, skipping");
                }
            }
        }
    }

    /// Register an adapter under its tool name; the previous holder of the
    /// name is closed and replaced
    pub async fn register(&self, adapter: Arc<dyn ToolAdapter>) {
        let name = adapter.tool_name().to_string();
        let displaced = self.write_adapters().insert(name.clone(), adapter);
        if let Some(previous) = displaced {
            warn!(tool = %name, "Tool name registered twice, replacing earlier adapter");
            previous.close().await;
        }
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.read_adapters().contains_key(name)
    }

    /// Names of registered tools, sorted
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read_adapters().keys().cloned().collect();
        names.sort();
        names
    }

    /// Specs for registered tools that carry a tool definition in config
    pub fn tool_specs(&self) -> Vec<ToolSpec> {
        let adapters = self.read_adapters();
        self.config
            .handlers
            .iter()
            .filter_map(|h| h.tool.as_ref())
            .filter(|tool| adapters.contains_key(&tool.name))
            .map(|tool| ToolSpec {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: tool.input_schema.clone(),
            })
            .collect()
    }

    /// Tools a prompt may use, in the prompt's declared order
    ///
    /// Schemas come from the pack, else from the handler's `tool` block.
    /// Names without a live adapter or without any schema are dropped.
    pub fn tools_for_prompt(&self, pack: &PromptPack, prompt_name: &str) -> Vec<ToolSpec> {
        let Some(prompt) = pack.get_prompt(prompt_name) else {
            return Vec::new();
        };
        let adapters = self.read_adapters();

        prompt
            .tools
            .iter()
            .filter(|name| adapters.contains_key(name.as_str()))
            .filter_map(|name| {
                if let Some(tool) = pack.tools.get(name) {
                    return Some(ToolSpec {
                        name: name.clone(),
                        description: tool.description.clone(),
                        parameters: tool.parameters.clone(),
                    });
                }
                let definition = self.config.get_tool_handler(name)?.tool.as_ref()?;
                Some(ToolSpec {
                    name: name.clone(),
                    description: definition.description.clone(),
                    parameters: definition.input_schema.clone(),
                })
            })
            .collect()
    }

    /// Execute a tool, retrying retryable failures up to the handler's budget
    ///
    /// Total attempts are at most `retries + 1`. Non-retryable errors are
    /// returned after the first attempt.
    pub async fn execute(
        &self,
        name: &str,
        arguments: &serde_json::Value,
    ) -> Result<ToolOutput, ToolError> {
        let adapter = self
            .read_adapters()
            .get(name)
            .cloned()
            .ok_or_else(|| ToolError::UnknownTool { tool: name.to_string() })?;

        let retries = self
            .config
            .get_tool_handler(name)
            .map(|h| h.retries)
            .unwrap_or(0);

        let mut attempt = 0;
        loop {
            let started = Instant::now();
            let result = adapter.execute(arguments).await;
            TOOL_CALL_DURATION
                .with_label_values(&[name])
                .observe(started.elapsed().as_secs_f64());

            match result {
                Ok(output) => {
                    TOOL_CALLS_TOTAL.with_label_values(&[name, "success"]).inc();
                    debug!(tool = %name, attempt = attempt + 1, "Tool call succeeded");
                    return Ok(output);
                }
                Err(e) if e.is_retryable() && attempt < retries => {
                    attempt += 1;
                    TOOL_RETRIES_TOTAL.with_label_values(&[name]).inc();
                    warn!(
                        tool = %name,
                        attempt,
                        max_retries = retries,
                        error = %e,
                        "Tool call failed, retrying"
                    );
                }
                Err(e) => {
                    TOOL_CALLS_TOTAL.with_label_values(&[name, "error"]).inc();
                    warn!(tool = %name, attempts = attempt + 1, error = %e, "Tool call failed");
                    return Err(e);
                }
            }
        }
    }

    /// Close every adapter and empty the registry
    pub async fn close(&self) {
        let drained: Vec<Arc<dyn ToolAdapter>> =
            self.write_adapters().drain().map(|(_, adapter)| adapter).collect();
        for adapter in drained {
            adapter.close().await;
        }
    }

    fn read_adapters(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<dyn ToolAdapter>>> {
        self.adapters.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_adapters(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<dyn ToolAdapter>>> {
        self.adapters.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
