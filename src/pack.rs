//! Prompt pack: the agent definition loaded at startup
//!
//! A pack is a JSON document naming one or more prompts and the tools they
//! may use:
//!
//! ```json
//! {
//!   "id": "support-pack",
//!   "name": "Support",
//!   "version": "1.0.0",
//!   "prompts": {
//!     "default": {
//!       "system_template": "You help {{customer}}.",
//!       "tools": ["get_weather"],
//!       "parameters": { "temperature": 0.2 },
//!       "tool_policy": { "max_rounds": 3 }
//!     }
//!   },
//!   "tools": {
//!     "get_weather": { "description": "...", "parameters": { "type": "object" } }
//!   }
//! }
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::tools::ToolSpec;

/// Sampling parameters applied to every model call of a prompt
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
}

impl ModelParameters {
    pub fn is_empty(&self) -> bool {
        self.temperature.is_none() && self.max_tokens.is_none() && self.top_p.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ToolPolicy {
    pub max_rounds: usize,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PromptDefinition {
    #[serde(default)]
    pub system_template: String,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub parameters: Option<ModelParameters>,
    #[serde(default)]
    pub tool_policy: Option<ToolPolicy>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PackTool {
    #[serde(default)]
    pub description: String,
    #[serde(default = "empty_object")]
    pub parameters: serde_json::Value,
}

/// Error loading a prompt pack
#[derive(Debug, Error)]
pub enum PackError {
    #[error("failed to read prompt pack {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid prompt pack {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("prompt '{0}' not found in pack")]
    PromptNotFound(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PromptPack {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub prompts: HashMap<String, PromptDefinition>,
    #[serde(default)]
    pub tools: HashMap<String, PackTool>,
}

impl PromptPack {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PackError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| PackError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| PackError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn get_prompt(&self, name: &str) -> Option<&PromptDefinition> {
        self.prompts.get(name)
    }

    /// Prompt lookup that fails with [`PackError::PromptNotFound`]
    pub fn prompt(&self, name: &str) -> Result<&PromptDefinition, PackError> {
        self.get_prompt(name)
            .ok_or_else(|| PackError::PromptNotFound(name.to_string()))
    }

    /// Render a prompt's system template, replacing `{{name}}` placeholders
    ///
    /// Placeholders without a matching variable are left as written.
    pub fn render_system_prompt(
        &self,
        prompt_name: &str,
        variables: &HashMap<String, serde_json::Value>,
    ) -> Result<String, PackError> {
        let prompt = self.prompt(prompt_name)?;
        Ok(render_template(&prompt.system_template, variables))
    }

    /// Tool schemas the pack declares for a prompt, in prompt order
    ///
    /// Names the pack has no schema for are skipped.
    pub fn tools_for_prompt(&self, prompt_name: &str) -> Vec<ToolSpec> {
        let Some(prompt) = self.get_prompt(prompt_name) else {
            return Vec::new();
        };
        prompt
            .tools
            .iter()
            .filter_map(|name| {
                self.tools.get(name).map(|tool| ToolSpec {
                    name: name.clone(),
                    description: tool.description.clone(),
                    parameters: tool.parameters.clone(),
                })
            })
            .collect()
    }

    pub fn parameters(&self, prompt_name: &str) -> ModelParameters {
        self.get_prompt(prompt_name)
            .and_then(|p| p.parameters.clone())
            .unwrap_or_default()
    }

    pub fn max_rounds(&self, prompt_name: &str) -> Option<usize> {
        self.get_prompt(prompt_name)
            .and_then(|p| p.tool_policy.as_ref())
            .map(|policy| policy.max_rounds)
    }

    /// Whether the named prompt can be served
    pub fn is_ready(&self, prompt_name: &str) -> bool {
        self.get_prompt(prompt_name).is_some()
    }
}

fn render_template(template: &str, variables: &HashMap<String, serde_json::Value>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };

        let key = after[..end].trim();
        match variables.get(key) {
            Some(serde_json::Value::String(s)) => out.push_str(s),
            Some(value) => out.push_str(&value.to_string()),
            None => out.push_str(&rest[start..start + 2 + end + 2]),
        }
        rest = &after[end + 2..];
    }

    out.push_str(rest);
    out
}

fn empty_object() -> serde_json::Value {
    serde_json::json!({})
}
