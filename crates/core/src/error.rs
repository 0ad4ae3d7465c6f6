//! Error taxonomy for live sessions.

use std::sync::Arc;

use crate::config::LiveConfig;

/// Every failure a live session can surface on its output stream.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LiveError {
    /// The connection to the provider broke (socket reset, handshake failure, ...).
    #[error("transport error: {0}")]
    Transport(String),
    /// A frame could not be decoded or violated the provider protocol.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// Every reconnect attempt allowed by the policy failed.
    #[error("reconnect failed after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },
    /// A send was attempted while no session handle exists.
    #[error("no active session handle")]
    NotConnected,
    /// A tool invocation failed. Only ever carried inside a tool result.
    #[error("tool execution failed: {0}")]
    Tool(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("session closed")]
    Closed,
}

impl LiveError {
    /// Short machine-readable code, used by outer surfaces that serialize errors.
    pub fn code(&self) -> &'static str {
        match self {
            LiveError::Transport(_) => "TRANSPORT",
            LiveError::Protocol(_) => "PROTOCOL",
            LiveError::ReconnectExhausted { .. } => "RECONNECT_EXHAUSTED",
            LiveError::NotConnected => "NOT_CONNECTED",
            LiveError::Tool(_) => "TOOL",
            LiveError::InvalidConfig(_) => "INVALID_CONFIG",
            LiveError::Closed => "CLOSED",
        }
    }
}

/// Decides which errors are transient connectivity failures.
pub type RecoveryPredicate = Arc<dyn Fn(&LiveError) -> bool + Send + Sync>;

/// Classifies failures as recoverable (reconnect) or terminal (propagate).
#[derive(Clone)]
pub struct ErrorClassifier {
    predicate: RecoveryPredicate,
}

impl ErrorClassifier {
    /// Classifier that treats only [`LiveError::Transport`] as transient.
    pub fn new() -> Self {
        Self {
            predicate: Arc::new(|error| matches!(error, LiveError::Transport(_))),
        }
    }

    pub fn with_predicate<F>(predicate: F) -> Self
    where
        F: Fn(&LiveError) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Arc::new(predicate),
        }
    }

    /// Whether `error` means the connection was lost, regardless of policy.
    pub fn is_connection_loss(&self, error: &LiveError) -> bool {
        (self.predicate)(error)
    }

    /// An error is recoverable only when auto-reconnect is on, the provider
    /// can resume natively, and the predicate accepts the error.
    pub fn is_recoverable(
        &self,
        error: &LiveError,
        config: &LiveConfig,
        provider_supports_native_recovery: bool,
    ) -> bool {
        config.auto_reconnect && provider_supports_native_recovery && self.is_connection_loss(error)
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ErrorClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorClassifier").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_are_recoverable_by_default() {
        let classifier = ErrorClassifier::new();
        let config = LiveConfig::default();
        assert!(classifier.is_recoverable(&LiveError::Transport("reset".into()), &config, true));
        assert!(!classifier.is_recoverable(&LiveError::Protocol("bad frame".into()), &config, true));
        assert!(!classifier.is_recoverable(&LiveError::NotConnected, &config, true));
    }

    #[test]
    fn recovery_requires_auto_reconnect_and_native_support() {
        let classifier = ErrorClassifier::new();
        let error = LiveError::Transport("reset".into());

        let mut config = LiveConfig::default();
        assert!(!classifier.is_recoverable(&error, &config, false));

        config.auto_reconnect = false;
        assert!(!classifier.is_recoverable(&error, &config, true));
        assert!(classifier.is_connection_loss(&error));
    }

    #[test]
    fn custom_predicate_widens_the_policy() {
        let classifier = ErrorClassifier::with_predicate(|e| {
            matches!(e, LiveError::Transport(_) | LiveError::Closed)
        });
        assert!(classifier.is_recoverable(&LiveError::Closed, &LiveConfig::default(), true));
    }

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(
            LiveError::ReconnectExhausted { attempts: 2 }.code(),
            "RECONNECT_EXHAUSTED"
        );
        assert_eq!(
            LiveError::ReconnectExhausted { attempts: 2 }.to_string(),
            "reconnect failed after 2 attempts"
        );
    }
}
