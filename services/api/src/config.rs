use livewire_core::{LiveConfig, ReconnectPolicy, reconnect::DEFAULT_JITTER_FACTOR};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub gemini_api_key: String,
    pub gemini_model: String,
    pub log_level: Level,
    pub system_prompt_path: Option<PathBuf>,
    pub auto_reconnect: bool,
    pub reconnect_policy: ReconnectPolicy,
    /// Program and arguments of a stdio MCP tool server.
    pub mcp_server_command: Option<Vec<String>>,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let gemini_api_key = std::env::var("GEMINI_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingVar("GEMINI_API_KEY".to_string()))?;

        let gemini_model = std::env::var("GEMINI_MODEL")
            .unwrap_or_else(|_| livewire_core::DEFAULT_MODEL.to_string());

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let system_prompt_path = std::env::var("SYSTEM_PROMPT_PATH").ok().map(PathBuf::from);

        let auto_reconnect = parse_var("AUTO_RECONNECT", true)?;
        let max_attempts = parse_var("RECONNECT_MAX_ATTEMPTS", 5u32)?;
        let initial_delay_ms = parse_var("RECONNECT_INITIAL_DELAY_MS", 500u64)?;
        let max_delay_ms = parse_var("RECONNECT_MAX_DELAY_MS", 30_000u64)?;
        let reconnect_policy = ReconnectPolicy::new(
            max_attempts,
            Duration::from_millis(initial_delay_ms),
            Duration::from_millis(max_delay_ms),
            DEFAULT_JITTER_FACTOR,
        )
        .map_err(|e| ConfigError::InvalidValue("RECONNECT_*".to_string(), e.to_string()))?;

        let mcp_server_command = std::env::var("MCP_SERVER_COMMAND")
            .ok()
            .map(|cmd| cmd.split_whitespace().map(str::to_string).collect::<Vec<_>>())
            .filter(|parts| !parts.is_empty());

        Ok(Self {
            bind_address,
            gemini_api_key,
            gemini_model,
            log_level,
            system_prompt_path,
            auto_reconnect,
            reconnect_policy,
            mcp_server_command,
        })
    }

    /// The per-session config handed to every `live()` call.
    pub fn live_config(&self) -> LiveConfig {
        LiveConfig {
            auto_reconnect: self.auto_reconnect,
            reconnect_policy: self.reconnect_policy.clone(),
            ..LiveConfig::new(self.gemini_model.clone())
        }
    }
}

fn parse_var<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}
