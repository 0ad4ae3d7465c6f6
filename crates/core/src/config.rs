//! Per-session configuration for live sessions.

use serde::{Deserialize, Serialize};

use crate::error::LiveError;
use crate::reconnect::ReconnectPolicy;

pub const DEFAULT_MODEL: &str = "models/gemini-2.0-flash-live-001";

/// Output modality requested from the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseModality {
    #[default]
    Text,
    Audio,
}

/// Configuration for one `live()` call. Read-only once the session starts.
#[derive(Debug, Clone)]
pub struct LiveConfig {
    pub model: String,
    /// Per-call instructions. The agent-level system prompt is merged in front
    /// of these by [`LiveConfig::with_system_prompt`].
    pub instructions: Option<String>,
    pub auto_reconnect: bool,
    pub reconnect_policy: ReconnectPolicy,
    pub response_modality: ResponseModality,
    pub voice: Option<String>,
}

impl LiveConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), LiveError> {
        if self.model.trim().is_empty() {
            return Err(LiveError::InvalidConfig("model must not be empty".into()));
        }
        Ok(())
    }

    /// Returns the effective config with `system_prompt` folded into the instructions.
    pub fn with_system_prompt(&self, system_prompt: Option<&str>) -> LiveConfig {
        let system_prompt = system_prompt.map(str::trim).filter(|p| !p.is_empty());
        let instructions = self
            .instructions
            .as_deref()
            .map(str::trim)
            .filter(|i| !i.is_empty());

        let merged = match (system_prompt, instructions) {
            (Some(prompt), Some(instructions)) => Some(format!("{prompt}\n\n{instructions}")),
            (Some(prompt), None) => Some(prompt.to_string()),
            (None, Some(instructions)) => Some(instructions.to_string()),
            (None, None) => None,
        };

        LiveConfig {
            instructions: merged,
            ..self.clone()
        }
    }
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            instructions: None,
            auto_reconnect: true,
            reconnect_policy: ReconnectPolicy::default(),
            response_modality: ResponseModality::default(),
            voice: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_goes_first() {
        let config = LiveConfig {
            instructions: Some("Answer in French.".into()),
            ..LiveConfig::default()
        };
        let effective = config.with_system_prompt(Some("You are a tutor."));
        assert_eq!(
            effective.instructions.as_deref(),
            Some("You are a tutor.\n\nAnswer in French.")
        );
        // The original is left untouched.
        assert_eq!(config.instructions.as_deref(), Some("Answer in French."));
    }

    #[test]
    fn merge_handles_missing_parts() {
        let config = LiveConfig::default();
        assert_eq!(config.with_system_prompt(None).instructions, None);
        assert_eq!(
            config.with_system_prompt(Some("  sys  ")).instructions.as_deref(),
            Some("sys")
        );

        let only_instructions = LiveConfig {
            instructions: Some("be brief".into()),
            ..LiveConfig::default()
        };
        assert_eq!(
            only_instructions
                .with_system_prompt(Some("   "))
                .instructions
                .as_deref(),
            Some("be brief")
        );
    }

    #[test]
    fn empty_model_is_rejected() {
        assert!(LiveConfig::new("  ").validate().is_err());
        assert!(LiveConfig::new("models/x").validate().is_ok());
    }

    #[test]
    fn defaults_enable_reconnect() {
        let config = LiveConfig::default();
        assert!(config.auto_reconnect);
        assert_eq!(config.response_modality, ResponseModality::Text);
        assert_eq!(config.model, DEFAULT_MODEL);
    }
}
