//! Process configuration from environment variables
//!
//! Loaded once before any listener opens and passed explicitly to every
//! component. `from_lookup` takes an arbitrary key lookup so tests never
//! touch the process environment.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::session::memory::DEFAULT_MAX_SESSIONS;

pub const DEFAULT_PROMPTPACK_PATH: &str = "/etc/agent-runtime/pack.json";
pub const DEFAULT_SESSION_TTL_SECS: u64 = 86_400;
pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 5;
pub const DEFAULT_GRPC_PORT: u16 = 9000;
pub const DEFAULT_HEALTH_PORT: u16 = 9001;

/// Error type for configuration loading
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("invalid {name}: {value:?} is not a valid {expected}")]
    Invalid {
        name: &'static str,
        value: String,
        expected: &'static str,
    },
    #[error("{0}")]
    Inconsistent(String),
}

/// Model backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderType {
    Claude,
    OpenAi,
    Gemini,
    Ollama,
    Mock,
}

impl ProviderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::Claude => "claude",
            ProviderType::OpenAi => "openai",
            ProviderType::Gemini => "gemini",
            ProviderType::Ollama => "ollama",
            ProviderType::Mock => "mock",
        }
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "claude" => Ok(ProviderType::Claude),
            "openai" => Ok(ProviderType::OpenAi),
            "gemini" => Ok(ProviderType::Gemini),
            "ollama" => Ok(ProviderType::Ollama),
            "mock" => Ok(ProviderType::Mock),
            _ => Err(()),
        }
    }
}

/// Session backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionType {
    Memory,
    Redis,
}

impl FromStr for SessionType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(SessionType::Memory),
            "redis" => Ok(SessionType::Redis),
            _ => Err(()),
        }
    }
}

/// Provider credentials
#[derive(Clone, Default, PartialEq)]
pub struct ApiKeys {
    pub anthropic: Option<String>,
    pub openai: Option<String>,
    pub google: Option<String>,
}

impl fmt::Debug for ApiKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mask = |key: &Option<String>| key.as_ref().map(|_| "<redacted>");
        f.debug_struct("ApiKeys")
            .field("anthropic", &mask(&self.anthropic))
            .field("openai", &mask(&self.openai))
            .field("google", &mask(&self.google))
            .finish()
    }
}

/// Runtime configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub agent_name: String,
    pub namespace: String,

    pub promptpack_path: String,
    pub prompt_name: String,

    pub session_type: SessionType,
    pub session_url: Option<String>,
    pub session_ttl: Duration,
    pub session_max: usize,
    /// Background sweep of expired in-memory sessions; `None` keeps expiry lazy
    pub session_sweep_interval: Option<Duration>,

    pub provider_type: ProviderType,
    pub provider_model: Option<String>,
    pub provider_base_url: Option<String>,
    pub mock_config_path: Option<String>,
    pub api_keys: ApiKeys,

    pub tools_config_path: Option<String>,
    /// Fallback when the prompt has no tool policy
    pub max_tool_rounds: usize,

    pub grpc_port: u16,
    pub health_port: u16,

    pub otlp_endpoint: Option<String>,
}

impl Config {
    /// Load from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from any key lookup; empty values count as unset
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        let session_type = match get("RUNTIME_SESSION_TYPE") {
            Some(raw) => parse_enum("RUNTIME_SESSION_TYPE", &raw, "session type (memory, redis)")?,
            None => SessionType::Memory,
        };
        let provider_type = match get("RUNTIME_PROVIDER_TYPE") {
            Some(raw) => parse_enum(
                "RUNTIME_PROVIDER_TYPE",
                &raw,
                "provider type (claude, openai, gemini, ollama, mock)",
            )?,
            None => ProviderType::Mock,
        };

        let config = Config {
            agent_name: required("RUNTIME_AGENT_NAME")?,
            namespace: required("RUNTIME_NAMESPACE")?,
            promptpack_path: get("RUNTIME_PROMPTPACK_PATH")
                .unwrap_or_else(|| DEFAULT_PROMPTPACK_PATH.to_string()),
            prompt_name: get("RUNTIME_PROMPT_NAME").unwrap_or_else(|| "default".to_string()),
            session_type,
            session_url: get("RUNTIME_SESSION_URL"),
            session_ttl: Duration::from_secs(parse_number(
                "RUNTIME_SESSION_TTL",
                get("RUNTIME_SESSION_TTL"),
                DEFAULT_SESSION_TTL_SECS,
            )?),
            session_max: parse_number("RUNTIME_SESSION_MAX", get("RUNTIME_SESSION_MAX"), DEFAULT_MAX_SESSIONS)?,
            session_sweep_interval: match parse_number(
                "RUNTIME_SESSION_SWEEP_INTERVAL",
                get("RUNTIME_SESSION_SWEEP_INTERVAL"),
                0u64,
            )? {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            provider_type,
            provider_model: get("RUNTIME_PROVIDER_MODEL"),
            provider_base_url: get("RUNTIME_PROVIDER_BASE_URL"),
            mock_config_path: get("RUNTIME_MOCK_CONFIG"),
            api_keys: ApiKeys {
                anthropic: get("ANTHROPIC_API_KEY"),
                openai: get("OPENAI_API_KEY"),
                google: get("GOOGLE_API_KEY"),
            },
            tools_config_path: get("RUNTIME_TOOLS_CONFIG"),
            max_tool_rounds: parse_number(
                "RUNTIME_MAX_TOOL_ROUNDS",
                get("RUNTIME_MAX_TOOL_ROUNDS"),
                DEFAULT_MAX_TOOL_ROUNDS,
            )?,
            grpc_port: parse_number("RUNTIME_GRPC_PORT", get("RUNTIME_GRPC_PORT"), DEFAULT_GRPC_PORT)?,
            health_port: parse_number("RUNTIME_HEALTH_PORT", get("RUNTIME_HEALTH_PORT"), DEFAULT_HEALTH_PORT)?,
            otlp_endpoint: get("OTEL_EXPORTER_OTLP_ENDPOINT"),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.session_type == SessionType::Redis && self.session_url.is_none() {
            return Err(ConfigError::Inconsistent(
                "RUNTIME_SESSION_URL is required when using Redis sessions".into(),
            ));
        }

        let missing_key = match self.provider_type {
            ProviderType::Claude if self.api_keys.anthropic.is_none() => Some("ANTHROPIC_API_KEY"),
            ProviderType::OpenAi if self.api_keys.openai.is_none() => Some("OPENAI_API_KEY"),
            ProviderType::Gemini if self.api_keys.google.is_none() => Some("GOOGLE_API_KEY"),
            _ => None,
        };
        if let Some(key) = missing_key {
            return Err(ConfigError::Inconsistent(format!(
                "{} is required for the {} provider",
                key, self.provider_type
            )));
        }

        if self.grpc_port != 0 && self.grpc_port == self.health_port {
            return Err(ConfigError::Inconsistent(format!(
                "RUNTIME_GRPC_PORT and RUNTIME_HEALTH_PORT must differ (both {})",
                self.grpc_port
            )));
        }

        Ok(())
    }
}

fn parse_enum<T: FromStr>(
    name: &'static str,
    raw: &str,
    expected: &'static str,
) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::Invalid {
        name,
        value: raw.to_string(),
        expected,
    })
}

fn parse_number<T: FromStr>(
    name: &'static str,
    raw: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match raw {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            name,
            value: raw,
            expected: "non-negative integer",
        }),
    }
}
