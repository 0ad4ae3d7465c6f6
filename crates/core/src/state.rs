//! Orchestrator state model.
//!
//! [`StateMachine`] holds the single current state of a live session and
//! publishes a [`StateChangeEvent`] for every transition. It enforces no
//! transition table; the orchestrator decides which transitions are valid.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use tokio::sync::{broadcast, watch};

/// Default broadcast capacity for state change events.
const DEFAULT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrchestratorState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Resuming,
    Recovered,
    Failed,
    Closed,
}

impl OrchestratorState {
    /// `true` once the session can no longer make progress.
    pub fn is_terminal(self) -> bool {
        matches!(self, OrchestratorState::Failed | OrchestratorState::Closed)
    }
}

impl fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OrchestratorState::Disconnected => "DISCONNECTED",
            OrchestratorState::Connecting => "CONNECTING",
            OrchestratorState::Connected => "CONNECTED",
            OrchestratorState::Reconnecting => "RECONNECTING",
            OrchestratorState::Resuming => "RESUMING",
            OrchestratorState::Recovered => "RECOVERED",
            OrchestratorState::Failed => "FAILED",
            OrchestratorState::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}

/// Record of a single state transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateChangeEvent {
    pub previous: OrchestratorState,
    pub next: OrchestratorState,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

/// Single-writer holder of the current [`OrchestratorState`].
///
/// Reads never block. Publication never blocks either: a subscriber that
/// falls more than `capacity` events behind observes `Lagged` and loses the
/// oldest events.
pub struct StateMachine {
    current: watch::Sender<OrchestratorState>,
    events: broadcast::Sender<StateChangeEvent>,
}

impl StateMachine {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (current, _) = watch::channel(OrchestratorState::Disconnected);
        let (events, _) = broadcast::channel(capacity.max(1));
        Self { current, events }
    }

    /// Swaps in `next` and publishes the transition.
    pub fn transition(
        &self,
        next: OrchestratorState,
        reason: impl Into<String>,
    ) -> StateChangeEvent {
        let previous = self.current.send_replace(next);
        let event = StateChangeEvent {
            previous,
            next,
            reason: reason.into(),
            timestamp: Utc::now(),
        };
        tracing::debug!(%previous, %next, reason = %event.reason, "State transition.");
        // No subscribers is fine.
        let _ = self.events.send(event.clone());
        event
    }

    pub fn current(&self) -> OrchestratorState {
        *self.current.borrow()
    }

    /// Receives every transition published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<StateChangeEvent> {
        self.events.subscribe()
    }

    /// Watch the current state without receiving individual transitions.
    pub fn watch(&self) -> watch::Receiver<OrchestratorState> {
        self.current.subscribe()
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}
