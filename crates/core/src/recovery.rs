//! Reconnect loop for a live session.
//!
//! The driver is entered from three places (connection monitor, upstream
//! send, downstream receive) but only one reconnect sequence runs at a time.
//! Callers pass the generation of the handle they saw fail; if that handle
//! has already been replaced, or a sequence for it already finished, the
//! caller gets the existing outcome instead of starting a new sequence.

use std::sync::Arc;
use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::LiveConfig;
use crate::error::{ErrorClassifier, LiveError};
use crate::event::{LiveEvent, SessionResumptionHandle};
use crate::message::LiveMessage;
use crate::session::{ActiveSession, LiveConnector};
use crate::sink::EventSink;
use crate::state::{OrchestratorState, StateMachine};
use crate::tools::ToolSchema;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// A fresh handle was installed on this attempt.
    Recovered { attempt: u32 },
    /// The failed handle had already been replaced by another caller.
    Superseded,
    /// Reconnecting is disabled or the provider cannot resume sessions.
    NotAttempted,
    Exhausted { attempts: u32 },
    Cancelled,
}

pub(crate) struct RecoveryDriver {
    session_id: Uuid,
    connector: Arc<dyn LiveConnector>,
    config: Arc<LiveConfig>,
    tools: Arc<[ToolSchema]>,
    classifier: ErrorClassifier,
    state: Arc<StateMachine>,
    active: Arc<ActiveSession>,
    resumption: watch::Receiver<Option<SessionResumptionHandle>>,
    events: EventSink,
    cancel: CancellationToken,
    last: Mutex<Option<(u64, RecoveryOutcome)>>,
}

pub(crate) struct RecoveryDeps {
    pub session_id: Uuid,
    pub connector: Arc<dyn LiveConnector>,
    pub config: Arc<LiveConfig>,
    pub tools: Arc<[ToolSchema]>,
    pub classifier: ErrorClassifier,
    pub state: Arc<StateMachine>,
    pub active: Arc<ActiveSession>,
    pub resumption: watch::Receiver<Option<SessionResumptionHandle>>,
    pub events: EventSink,
    pub cancel: CancellationToken,
}

impl RecoveryDriver {
    pub(crate) fn new(deps: RecoveryDeps) -> Self {
        Self {
            session_id: deps.session_id,
            connector: deps.connector,
            config: deps.config,
            tools: deps.tools,
            classifier: deps.classifier,
            state: deps.state,
            active: deps.active,
            resumption: deps.resumption,
            events: deps.events,
            cancel: deps.cancel,
            last: Mutex::new(None),
        }
    }

    /// The predicate alone: `true` even when reconnecting is off.
    pub(crate) fn is_connection_loss(&self, error: &LiveError) -> bool {
        self.classifier.is_connection_loss(error)
    }

    pub(crate) fn is_recoverable(&self, error: &LiveError) -> bool {
        self.classifier
            .is_recoverable(error, &self.config, self.connector.supports_native_recovery())
    }

    /// Sends through the current handle. A recoverable failure drives one
    /// recovery and a single retry against whichever handle is then active.
    pub(crate) async fn send(&self, message: LiveMessage) -> Result<(), LiveError> {
        let bound = self.active.current().ok_or(LiveError::NotConnected)?;
        let error = match bound.handle.send(message.clone()).await {
            Ok(()) => return Ok(()),
            Err(e) if self.is_recoverable(&e) => e,
            Err(e) => return Err(e),
        };

        warn!(session_id = %self.session_id, error = %error, "Send failed, recovering.");
        match self.recover(bound.generation, &error.to_string()).await {
            RecoveryOutcome::Recovered { .. } | RecoveryOutcome::Superseded => {
                let bound = self.active.current().ok_or(LiveError::NotConnected)?;
                bound.handle.send(message).await
            }
            RecoveryOutcome::NotAttempted => Err(error),
            RecoveryOutcome::Exhausted { attempts } => Err(LiveError::ReconnectExhausted { attempts }),
            RecoveryOutcome::Cancelled => Err(LiveError::Closed),
        }
    }

    /// Replaces the handle installed at `failed_generation`.
    ///
    /// The first caller for a generation moves the session to `DISCONNECTED`
    /// and runs the sequence; later callers get the same outcome.
    pub(crate) async fn recover(&self, failed_generation: u64, reason: &str) -> RecoveryOutcome {
        let mut last = self.last.lock().await;
        if self.cancel.is_cancelled() {
            return RecoveryOutcome::Cancelled;
        }
        if self.active.generation() != Some(failed_generation) {
            debug!(session_id = %self.session_id, failed_generation, "Handle already replaced.");
            return RecoveryOutcome::Superseded;
        }
        if let Some((generation, outcome)) = last.as_ref() {
            if *generation == failed_generation {
                return outcome.clone();
            }
        }

        self.state
            .transition(OrchestratorState::Disconnected, reason.to_string());
        let outcome = self.run_attempts(reason).await;
        *last = Some((failed_generation, outcome.clone()));
        outcome
    }

    async fn run_attempts(&self, reason: &str) -> RecoveryOutcome {
        if !self.config.auto_reconnect || !self.connector.supports_native_recovery() {
            info!(
                session_id = %self.session_id,
                auto_reconnect = self.config.auto_reconnect,
                "Reconnect not attempted."
            );
            return RecoveryOutcome::NotAttempted;
        }

        let policy = &self.config.reconnect_policy;
        let max_attempts = policy.max_attempts();
        let mut attempt = 1;
        loop {
            let Some(delay) = policy.delay_for_attempt(attempt) else {
                warn!(
                    session_id = %self.session_id,
                    max_attempts,
                    "Live session reconnect budget exhausted."
                );
                self.state.transition(
                    OrchestratorState::Failed,
                    format!("reconnect failed after {max_attempts} attempts"),
                );
                return RecoveryOutcome::Exhausted {
                    attempts: max_attempts,
                };
            };

            self.state.transition(
                OrchestratorState::Reconnecting,
                format!("attempt {attempt}/{max_attempts}: {reason}"),
            );
            self.events
                .emit(LiveEvent::Reconnecting {
                    attempt,
                    max_attempts,
                    delay,
                })
                .await;
            warn!(
                session_id = %self.session_id,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                "Attempting live session reconnect."
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.cancel.cancelled() => return RecoveryOutcome::Cancelled,
            }

            let resumption = self.resumption.borrow().clone();
            let connected = tokio::select! {
                result = self.connector.connect(&self.config, &self.tools, resumption) => result,
                _ = self.cancel.cancelled() => return RecoveryOutcome::Cancelled,
            };

            match connected {
                Ok(handle) => {
                    if self.cancel.is_cancelled() {
                        let _ = handle.close().await;
                        return RecoveryOutcome::Cancelled;
                    }
                    if let Some(previous) = self.active.install(handle) {
                        if let Err(e) = previous.handle.close().await {
                            debug!(session_id = %self.session_id, error = %e, "Closing replaced handle failed.");
                        }
                    }
                    self.state
                        .transition(OrchestratorState::Resuming, "new session handle installed");
                    self.state.transition(
                        OrchestratorState::Recovered,
                        format!("reconnected on attempt {attempt}"),
                    );
                    info!(session_id = %self.session_id, attempt, "Live session reconnect succeeded.");
                    self.events.emit(LiveEvent::Reconnected { attempt }).await;
                    return RecoveryOutcome::Recovered { attempt };
                }
                Err(e) => {
                    warn!(
                        session_id = %self.session_id,
                        attempt,
                        max_attempts,
                        error = %e,
                        "Live session reconnect attempt failed."
                    );
                    attempt += 1;
                }
            }
        }
    }
}
