//! The tasks behind one live session and the supervisor that owns them.
//!
//! Four tasks run in a `JoinSet` (connection monitor, upstream, downstream,
//! tool worker) plus a relay that republishes state changes. All of them write
//! to one output channel. The first task to finish decides how the session
//! ends; the supervisor then cancels the rest, closes the active handle and
//! moves the state to `CLOSED`. That cleanup runs once, on every exit path.

use futures::{Stream, StreamExt};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, warn};
use uuid::Uuid;

use crate::config::LiveConfig;
use crate::error::{ErrorClassifier, LiveError};
use crate::event::{
    ConnectionState, ContentDelta, LiveEvent, ProviderEvent, SessionEndReason,
    SessionResumptionHandle,
};
use crate::interceptor::ToolCallInterceptor;
use crate::memory::{Memory, record};
use crate::message::{LiveMessage, ToolCall};
use crate::recovery::{RecoveryDeps, RecoveryDriver, RecoveryOutcome};
use crate::session::{ActiveSession, BoundHandle, LiveConnector};
use crate::sink::EventSink;
use crate::state::{OrchestratorState, StateChangeEvent, StateMachine};
use crate::tools::{ToolEngine, ToolSchema};

const TOOL_CALL_BUFFER: usize = 32;

/// How a session ended.
#[derive(Debug)]
pub(crate) enum Termination {
    InputCompleted,
    Ended {
        reason: SessionEndReason,
        recoverable: bool,
    },
    Failed(LiveError),
    Cancelled,
}

impl Termination {
    fn describe(&self) -> String {
        match self {
            Termination::InputCompleted => "input completed".to_string(),
            Termination::Ended { reason, .. } => format!("session ended: {reason}"),
            Termination::Failed(e) => format!("failed: {e}"),
            Termination::Cancelled => "cancelled".to_string(),
        }
    }
}

type HandleSlot = watch::Receiver<Option<BoundHandle>>;

pub(crate) struct Supervisor {
    pub session_id: Uuid,
    pub connector: Arc<dyn LiveConnector>,
    pub tools: Arc<dyn ToolEngine>,
    pub memory: Arc<dyn Memory>,
    pub classifier: ErrorClassifier,
    pub config: Arc<LiveConfig>,
    pub state: Arc<StateMachine>,
    pub active: Arc<ActiveSession>,
    pub resumption: watch::Sender<Option<SessionResumptionHandle>>,
    pub cancel: CancellationToken,
    pub sink: EventSink,
}

/// What each task needs; cloned into every task.
#[derive(Clone)]
struct TaskContext {
    session_id: Uuid,
    memory: Arc<dyn Memory>,
    state: Arc<StateMachine>,
    active: Arc<ActiveSession>,
    driver: Arc<RecoveryDriver>,
    sink: EventSink,
    cancel: CancellationToken,
}

impl Supervisor {
    pub(crate) async fn run<S>(self, input: S, state_events: broadcast::Receiver<StateChangeEvent>)
    where
        S: Stream<Item = LiveMessage> + Send + 'static,
    {
        let relay = tokio::spawn(
            relay_state_changes(state_events, self.sink.clone()).in_current_span(),
        );

        let termination = self.drive(input).await;

        if let Some(bound) = self.active.take() {
            if let Err(e) = bound.handle.close().await {
                warn!(session_id = %self.session_id, error = %e, "Closing session handle failed.");
            }
        }
        self.state
            .transition(OrchestratorState::Closed, termination.describe());
        if let Err(e) = relay.await {
            debug!(session_id = %self.session_id, error = %e, "State relay did not finish cleanly.");
        }

        info!(session_id = %self.session_id, outcome = %termination.describe(), "Live session finished.");
        match termination {
            Termination::InputCompleted | Termination::Cancelled => {}
            Termination::Ended {
                reason,
                recoverable,
            } => {
                self.sink
                    .emit(LiveEvent::SessionEnded {
                        reason,
                        recoverable,
                    })
                    .await;
            }
            Termination::Failed(e) => {
                self.sink.fail(e).await;
            }
        }
    }

    /// Connects, runs the tasks and returns the first termination.
    async fn drive<S>(&self, input: S) -> Termination
    where
        S: Stream<Item = LiveMessage> + Send + 'static,
    {
        self.state
            .transition(OrchestratorState::Connecting, "opening live session");

        let schemas: Arc<[ToolSchema]> = match self.tools.schemas().await {
            Ok(schemas) => schemas.into(),
            Err(e) => {
                warn!(session_id = %self.session_id, error = %e, "Failed to list tools, continuing without.");
                Arc::from(Vec::new())
            }
        };

        let connected = tokio::select! {
            _ = self.cancel.cancelled() => return Termination::Cancelled,
            result = self.connector.connect(&self.config, &schemas, None) => result,
        };
        let handle = match connected {
            Ok(handle) => handle,
            Err(e) => {
                error!(session_id = %self.session_id, error = %e, "Failed to open live session.");
                return Termination::Failed(e);
            }
        };
        self.active.install(handle);
        info!(
            session_id = %self.session_id,
            model = %self.config.model,
            tools = schemas.len(),
            "Live session connected."
        );

        let driver = Arc::new(RecoveryDriver::new(RecoveryDeps {
            session_id: self.session_id,
            connector: self.connector.clone(),
            config: self.config.clone(),
            tools: schemas,
            classifier: self.classifier.clone(),
            state: self.state.clone(),
            active: self.active.clone(),
            resumption: self.resumption.subscribe(),
            events: self.sink.clone(),
            cancel: self.cancel.clone(),
        }));
        let ctx = TaskContext {
            session_id: self.session_id,
            memory: self.memory.clone(),
            state: self.state.clone(),
            active: self.active.clone(),
            driver: driver.clone(),
            sink: self.sink.clone(),
            cancel: self.cancel.clone(),
        };

        let (tool_tx, tool_rx) = mpsc::channel(TOOL_CALL_BUFFER);
        let interceptor = ToolCallInterceptor::new(
            self.session_id,
            self.tools.clone(),
            self.memory.clone(),
            driver,
            self.sink.clone(),
        );

        let mut tasks = JoinSet::new();
        tasks.spawn(monitor_connection(ctx.clone()).in_current_span());
        tasks.spawn(run_upstream(ctx.clone(), input).in_current_span());
        tasks.spawn(
            run_downstream(ctx.clone(), self.resumption.clone(), tool_tx).in_current_span(),
        );
        tasks.spawn(interceptor.run(tool_rx, self.cancel.clone()).in_current_span());

        let termination = tokio::select! {
            joined = tasks.join_next() => match joined {
                Some(Ok(termination)) => termination,
                Some(Err(e)) => {
                    error!(session_id = %self.session_id, error = %e, "Session task aborted.");
                    Termination::Failed(LiveError::Closed)
                }
                None => Termination::Cancelled,
            },
            _ = self.cancel.cancelled() => Termination::Cancelled,
        };

        self.cancel.cancel();
        tasks.shutdown().await;
        termination
    }
}

/// Republishes state changes on the output stream until `CLOSED` goes by.
async fn relay_state_changes(
    mut changes: broadcast::Receiver<StateChangeEvent>,
    sink: EventSink,
) {
    loop {
        match changes.recv().await {
            Ok(change) => {
                let closed = change.next == OrchestratorState::Closed;
                if !sink.emit(LiveEvent::StateChanged { change }).await || closed {
                    return;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "State relay lagged behind.");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

/// Waits until a handle is installed.
async fn next_handle(slot: &mut HandleSlot, cancel: &CancellationToken) -> Option<BoundHandle> {
    loop {
        if let Some(bound) = slot.borrow_and_update().clone() {
            return Some(bound);
        }
        tokio::select! {
            _ = cancel.cancelled() => return None,
            changed = slot.changed() => if changed.is_err() { return None },
        }
    }
}

/// Waits until the handle installed at `generation` has been replaced.
async fn handle_replaced(slot: &mut HandleSlot, generation: u64, cancel: &CancellationToken) -> bool {
    loop {
        if slot.borrow_and_update().as_ref().map(|bound| bound.generation) != Some(generation) {
            return true;
        }
        tokio::select! {
            _ = cancel.cancelled() => return false,
            changed = slot.changed() => if changed.is_err() { return false },
        }
    }
}

/// Maps a recovery outcome to the session's end, or `None` to keep going.
fn recovery_failure(outcome: RecoveryOutcome) -> Option<Termination> {
    match outcome {
        RecoveryOutcome::Recovered { .. } | RecoveryOutcome::Superseded => None,
        RecoveryOutcome::NotAttempted => Some(Termination::Ended {
            reason: SessionEndReason::ConnectionLost,
            recoverable: false,
        }),
        RecoveryOutcome::Exhausted { attempts } => {
            Some(Termination::Failed(LiveError::ReconnectExhausted { attempts }))
        }
        RecoveryOutcome::Cancelled => Some(Termination::Cancelled),
    }
}

async fn monitor_connection(ctx: TaskContext) -> Termination {
    let mut slot = ctx.active.subscribe();
    loop {
        let Some(bound) = next_handle(&mut slot, &ctx.cancel).await else {
            return Termination::Cancelled;
        };
        let mut changes = bound.handle.connection_state_changes();

        loop {
            let change = tokio::select! {
                _ = ctx.cancel.cancelled() => return Termination::Cancelled,
                swapped = slot.changed() => {
                    if swapped.is_err() {
                        return Termination::Cancelled;
                    }
                    if ctx.active.generation() != Some(bound.generation) {
                        break;
                    }
                    continue;
                }
                change = changes.next() => change,
            };

            let Some(change) = change else {
                if !handle_replaced(&mut slot, bound.generation, &ctx.cancel).await {
                    return Termination::Cancelled;
                }
                break;
            };
            if ctx.active.generation() != Some(bound.generation) {
                break;
            }

            match change.current {
                ConnectionState::Connecting => {}
                ConnectionState::Connected => {
                    ctx.state
                        .transition(OrchestratorState::Connected, "provider reported connected");
                    ctx.sink.emit(LiveEvent::Ready).await;
                }
                ConnectionState::Disconnected => {
                    let reason = change
                        .reason
                        .unwrap_or_else(|| "provider reported disconnected".to_string());
                    warn!(session_id = %ctx.session_id, generation = bound.generation, %reason, "Live session disconnected.");
                    let outcome = ctx.driver.recover(bound.generation, &reason).await;
                    if let Some(termination) = recovery_failure(outcome) {
                        return termination;
                    }
                    break;
                }
            }
        }
    }
}

/// Blocks until the current handle is active. Only the upstream pipeline waits here.
async fn wait_for_active(ctx: &TaskContext) -> Result<(), Termination> {
    let mut slot = ctx.active.subscribe();
    let mut states = ctx.state.watch();
    loop {
        let Some(bound) = slot.borrow_and_update().clone() else {
            return Err(Termination::Failed(LiveError::NotConnected));
        };
        if bound.handle.is_active() {
            return Ok(());
        }
        tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(Termination::Cancelled),
            changed = slot.changed() => if changed.is_err() { return Err(Termination::Cancelled) },
            changed = states.changed() => if changed.is_err() { return Err(Termination::Cancelled) },
        }
    }
}

async fn run_upstream<S>(ctx: TaskContext, input: S) -> Termination
where
    S: Stream<Item = LiveMessage> + Send + 'static,
{
    let mut input = Box::pin(input);
    loop {
        let message = tokio::select! {
            _ = ctx.cancel.cancelled() => return Termination::Cancelled,
            next = input.next() => match next {
                Some(message) => message,
                None => {
                    debug!(session_id = %ctx.session_id, "Client input completed.");
                    return Termination::InputCompleted;
                }
            },
        };

        if message.role.is_persisted_on_input() {
            record(&*ctx.memory, ctx.session_id, message.clone()).await;
        }
        if let Err(termination) = wait_for_active(&ctx).await {
            return termination;
        }

        match ctx.driver.send(message).await {
            Ok(()) => {}
            Err(_) if ctx.cancel.is_cancelled() => return Termination::Cancelled,
            Err(e) => {
                error!(session_id = %ctx.session_id, error = %e, "Failed to send message.");
                return Termination::Failed(e);
            }
        }
    }
}

/// Assistant text accumulated over one model turn.
#[derive(Default)]
struct Transcript {
    text: String,
}

impl Transcript {
    fn push(&mut self, delta: &ContentDelta) {
        match delta {
            ContentDelta::Text { text } | ContentDelta::OutputTranscription { text } => {
                self.text.push_str(text)
            }
            ContentDelta::Audio { .. } | ContentDelta::InputTranscription { .. } => {}
        }
    }

    async fn flush(&mut self, ctx: &TaskContext) {
        let text = std::mem::take(&mut self.text);
        if !text.trim().is_empty() {
            record(&*ctx.memory, ctx.session_id, LiveMessage::assistant_text(text)).await;
        }
    }
}

async fn run_downstream(
    ctx: TaskContext,
    resumption: watch::Sender<Option<SessionResumptionHandle>>,
    tool_calls: mpsc::Sender<ToolCall>,
) -> Termination {
    let mut slot = ctx.active.subscribe();
    let mut transcript = Transcript::default();
    loop {
        let Some(bound) = next_handle(&mut slot, &ctx.cancel).await else {
            return Termination::Cancelled;
        };
        let mut events = bound.handle.receive();

        loop {
            let next = tokio::select! {
                _ = ctx.cancel.cancelled() => return Termination::Cancelled,
                swapped = slot.changed() => {
                    if swapped.is_err() {
                        return Termination::Cancelled;
                    }
                    if ctx.active.generation() != Some(bound.generation) {
                        break;
                    }
                    continue;
                }
                next = events.next() => next,
            };

            match next {
                Some(Ok(event)) => {
                    if let Some(termination) =
                        route_event(&ctx, event, &resumption, &tool_calls, &mut transcript).await
                    {
                        return termination;
                    }
                }
                Some(Err(e)) => {
                    if ctx.cancel.is_cancelled() {
                        return Termination::Cancelled;
                    }
                    if !ctx.driver.is_connection_loss(&e) {
                        error!(session_id = %ctx.session_id, error = %e, "Receive failed.");
                        return Termination::Failed(e);
                    }
                    warn!(session_id = %ctx.session_id, error = %e, "Receive failed, recovering.");
                    let outcome = ctx.driver.recover(bound.generation, &e.to_string()).await;
                    if let Some(termination) = recovery_failure(outcome) {
                        return termination;
                    }
                    break;
                }
                None => {
                    if !handle_replaced(&mut slot, bound.generation, &ctx.cancel).await {
                        return Termination::Cancelled;
                    }
                    break;
                }
            }
        }
    }
}

async fn route_event(
    ctx: &TaskContext,
    event: ProviderEvent,
    resumption: &watch::Sender<Option<SessionResumptionHandle>>,
    tool_calls: &mpsc::Sender<ToolCall>,
    transcript: &mut Transcript,
) -> Option<Termination> {
    match event {
        ProviderEvent::ToolCall { call } => {
            debug!(session_id = %ctx.session_id, call_id = %call.id, tool = %call.name, "Tool call requested.");
            ctx.sink
                .emit(LiveEvent::ToolCall { call: call.clone() })
                .await;
            if tool_calls.send(call).await.is_err() {
                return Some(Termination::Cancelled);
            }
        }
        ProviderEvent::SessionResumption { update } => {
            if update.resumable {
                if let Some(handle) = &update.handle {
                    resumption.send_replace(Some(handle.clone()));
                }
            }
            ctx.sink
                .emit(LiveEvent::Content {
                    event: ProviderEvent::SessionResumption { update },
                })
                .await;
        }
        ProviderEvent::ContentDelta { delta } => {
            transcript.push(&delta);
            ctx.sink
                .emit(LiveEvent::Content {
                    event: ProviderEvent::ContentDelta { delta },
                })
                .await;
        }
        ProviderEvent::TurnComplete | ProviderEvent::Interrupted => {
            transcript.flush(ctx).await;
            ctx.sink.emit(LiveEvent::Content { event }).await;
        }
        ProviderEvent::SessionEnded { reason } => {
            transcript.flush(ctx).await;
            info!(session_id = %ctx.session_id, %reason, "Provider ended the session.");
            ctx.sink
                .emit(LiveEvent::Content {
                    event: ProviderEvent::SessionEnded { reason },
                })
                .await;
            return Some(Termination::Ended {
                reason: SessionEndReason::ProviderEnded,
                recoverable: false,
            });
        }
        other => {
            ctx.sink.emit(LiveEvent::Content { event: other }).await;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryMemory;
    use crate::message::Role;

    fn context(memory: Arc<InMemoryMemory>) -> (TaskContext, mpsc::Receiver<Result<LiveEvent, LiveError>>) {
        use crate::session::MockLiveConnector;

        let mut connector = MockLiveConnector::new();
        connector.expect_supports_native_recovery().return_const(false);
        let (tx, rx) = mpsc::channel(16);
        let sink = EventSink::new(tx);
        let state = Arc::new(StateMachine::new());
        let active = Arc::new(ActiveSession::new());
        let cancel = CancellationToken::new();
        let (_, resumption) = watch::channel(None);
        let driver = Arc::new(RecoveryDriver::new(RecoveryDeps {
            session_id: Uuid::new_v4(),
            connector: Arc::new(connector),
            config: Arc::new(LiveConfig::default()),
            tools: Arc::from(Vec::new()),
            classifier: ErrorClassifier::new(),
            state: state.clone(),
            active: active.clone(),
            resumption,
            events: sink.clone(),
            cancel: cancel.clone(),
        }));
        let ctx = TaskContext {
            session_id: Uuid::new_v4(),
            memory,
            state,
            active,
            driver,
            sink,
            cancel,
        };
        (ctx, rx)
    }

    #[tokio::test]
    async fn assistant_turn_is_persisted_on_turn_complete() {
        let memory = Arc::new(InMemoryMemory::new());
        let (ctx, mut events) = context(memory.clone());
        let (resumption, _) = watch::channel(None);
        let (tool_tx, _tool_rx) = mpsc::channel(1);
        let mut transcript = Transcript::default();

        for text in ["Hel", "lo"] {
            let event = ProviderEvent::ContentDelta {
                delta: ContentDelta::Text { text: text.into() },
            };
            assert!(route_event(&ctx, event, &resumption, &tool_tx, &mut transcript).await.is_none());
        }
        assert!(memory.messages(ctx.session_id).await.is_empty());

        route_event(&ctx, ProviderEvent::TurnComplete, &resumption, &tool_tx, &mut transcript).await;
        let stored = memory.messages(ctx.session_id).await;
        assert_eq!(stored, vec![LiveMessage::assistant_text("Hello")]);
        assert_eq!(stored[0].role, Role::Assistant);

        let mut passed_through = 0;
        while let Ok(item) = events.try_recv() {
            assert!(matches!(item, Ok(LiveEvent::Content { .. })));
            passed_through += 1;
        }
        assert_eq!(passed_through, 3);
    }

    #[tokio::test]
    async fn only_resumable_handles_are_retained() {
        use crate::event::ResumptionUpdate;

        let memory = Arc::new(InMemoryMemory::new());
        let (ctx, _events) = context(memory);
        let (resumption, retained) = watch::channel(None);
        let (tool_tx, _tool_rx) = mpsc::channel(1);
        let mut transcript = Transcript::default();

        let update = |handle: &str, resumable| ProviderEvent::SessionResumption {
            update: ResumptionUpdate {
                handle: Some(SessionResumptionHandle::new(handle)),
                resumable,
            },
        };
        route_event(&ctx, update("h-1", true), &resumption, &tool_tx, &mut transcript).await;
        route_event(&ctx, update("h-2", false), &resumption, &tool_tx, &mut transcript).await;

        assert_eq!(
            retained.borrow().as_ref().map(SessionResumptionHandle::as_str),
            Some("h-1")
        );
    }

    #[tokio::test]
    async fn provider_end_terminates_with_reason() {
        let memory = Arc::new(InMemoryMemory::new());
        let (ctx, _events) = context(memory);
        let (resumption, _) = watch::channel(None);
        let (tool_tx, _tool_rx) = mpsc::channel(1);
        let mut transcript = Transcript::default();

        let termination = route_event(
            &ctx,
            ProviderEvent::SessionEnded {
                reason: "server shutdown".into(),
            },
            &resumption,
            &tool_tx,
            &mut transcript,
        )
        .await;
        assert!(matches!(
            termination,
            Some(Termination::Ended {
                reason: SessionEndReason::ProviderEnded,
                recoverable: false
            })
        ));
    }
}
