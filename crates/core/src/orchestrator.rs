//! Entry point for live sessions.

use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{broadcast, mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{Instrument, info_span};
use uuid::Uuid;

use crate::config::LiveConfig;
use crate::error::{ErrorClassifier, LiveError};
use crate::event::{LiveEvent, SessionResumptionHandle};
use crate::memory::Memory;
use crate::message::LiveMessage;
use crate::multiplexer::Supervisor;
use crate::session::{ActiveSession, LiveConnector};
use crate::sink::{EventSink, OutputItem};
use crate::state::{OrchestratorState, StateChangeEvent, StateMachine};
use crate::tools::ToolEngine;

const DEFAULT_EVENT_BUFFER: usize = 256;

/// Opens live sessions against one provider with a fixed set of collaborators.
#[derive(Clone)]
pub struct LiveOrchestrator {
    connector: Arc<dyn LiveConnector>,
    tools: Arc<dyn ToolEngine>,
    memory: Arc<dyn Memory>,
    system_prompt: Option<String>,
    classifier: ErrorClassifier,
    event_buffer: usize,
}

impl LiveOrchestrator {
    pub fn new(
        connector: Arc<dyn LiveConnector>,
        tools: Arc<dyn ToolEngine>,
        memory: Arc<dyn Memory>,
    ) -> Self {
        Self {
            connector,
            tools,
            memory,
            system_prompt: None,
            classifier: ErrorClassifier::new(),
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }

    /// Prepended to every session's instructions.
    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    /// Decides which errors count as transport failures worth reconnecting for.
    /// `auto_reconnect` and provider support are still required.
    pub fn with_recovery_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&LiveError) -> bool + Send + Sync + 'static,
    {
        self.classifier = ErrorClassifier::with_predicate(predicate);
        self
    }

    /// Capacity of each session's output channel.
    pub fn with_event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity.max(1);
        self
    }

    /// Starts a live session fed by `input`.
    ///
    /// Must be called from within a Tokio runtime. The session runs until the
    /// input ends, the provider ends it, an unrecoverable error occurs, or it
    /// is closed. Dropping the returned [`LiveSession`] closes it.
    pub fn live<S>(&self, input: S, config: LiveConfig) -> Result<LiveSession, LiveError>
    where
        S: Stream<Item = LiveMessage> + Send + 'static,
    {
        config.validate()?;
        let config = Arc::new(config.with_system_prompt(self.system_prompt.as_deref()));

        let session_id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.event_buffer);
        let state = Arc::new(StateMachine::new());
        let state_events = state.subscribe();
        let (resumption, resumption_rx) = watch::channel(None);
        let cancel = CancellationToken::new();

        let span = info_span!("live_session", %session_id, model = %config.model);
        let supervisor = Supervisor {
            session_id,
            connector: self.connector.clone(),
            tools: self.tools.clone(),
            memory: self.memory.clone(),
            classifier: self.classifier.clone(),
            config,
            state: state.clone(),
            active: Arc::new(ActiveSession::new()),
            resumption,
            cancel: cancel.clone(),
            sink: EventSink::new(tx),
        };
        tokio::spawn(supervisor.run(input, state_events).instrument(span));

        Ok(LiveSession {
            id: session_id,
            events: ReceiverStream::new(rx),
            state,
            resumption: resumption_rx,
            _guard: cancel.clone().drop_guard(),
            cancel,
        })
    }
}

/// A running live session.
///
/// Yields output events until the session ends. A normal end (input
/// completed, closed) simply ends the stream; an ended session yields
/// [`LiveEvent::SessionEnded`] last; a failure yields an `Err` last.
pub struct LiveSession {
    id: Uuid,
    events: ReceiverStream<OutputItem>,
    state: Arc<StateMachine>,
    resumption: watch::Receiver<Option<SessionResumptionHandle>>,
    cancel: CancellationToken,
    _guard: DropGuard,
}

impl LiveSession {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> OrchestratorState {
        self.state.current()
    }

    /// State transitions published after this call.
    pub fn subscribe_state(&self) -> broadcast::Receiver<StateChangeEvent> {
        self.state.subscribe()
    }

    /// The last resumable handle the provider issued.
    pub fn resumption_handle(&self) -> Option<SessionResumptionHandle> {
        self.resumption.borrow().clone()
    }

    /// Requests shutdown. The stream ends once cleanup has run.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl Stream for LiveSession {
    type Item = Result<LiveEvent, LiveError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().events).poll_next(cx)
    }
}

impl std::fmt::Debug for LiveSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveSession")
            .field("id", &self.id)
            .field("state", &self.state.current())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MockMemory;
    use crate::session::MockLiveConnector;
    use crate::tools::MockToolEngine;

    #[tokio::test]
    async fn invalid_config_is_rejected_before_connecting() {
        let mut connector = MockLiveConnector::new();
        connector.expect_connect().never();
        let orchestrator = LiveOrchestrator::new(
            Arc::new(connector),
            Arc::new(MockToolEngine::new()),
            Arc::new(MockMemory::new()),
        );

        let err = orchestrator
            .live(futures::stream::empty::<LiveMessage>(), LiveConfig::new(""))
            .unwrap_err();
        assert!(matches!(err, LiveError::InvalidConfig(_)));
    }
}
