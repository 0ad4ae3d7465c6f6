#![allow(dead_code)]

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::{ReceiverStream, UnboundedReceiverStream, WatchStream};

use livewire_core::{
    ConnectionState, ConnectionStateChange, ConnectionStateStream, InMemoryMemory, LiveConfig,
    LiveConnector, LiveError, LiveEvent, LiveMessage, LiveOrchestrator, LiveSession,
    OrchestratorState, ProviderEvent, ProviderEventStream, ReconnectPolicy, SessionHandle,
    SessionResumptionHandle, ToolCall, ToolEngine, ToolSchema,
};

const STEP_TIMEOUT: Duration = Duration::from_secs(5);

type EventResult = Result<ProviderEvent, LiveError>;

/// In-process session handle driven by the test.
pub struct FakeHandle {
    state: watch::Sender<ConnectionState>,
    events: mpsc::UnboundedSender<EventResult>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<EventResult>>>,
    sent: Mutex<Vec<LiveMessage>>,
    send_failures: Mutex<VecDeque<LiveError>>,
    closes: AtomicU32,
}

impl FakeHandle {
    pub fn new(initial: ConnectionState) -> Arc<Self> {
        let (state, _) = watch::channel(initial);
        let (events, receiver) = mpsc::unbounded_channel();
        Arc::new(Self {
            state,
            events,
            receiver: Mutex::new(Some(receiver)),
            sent: Mutex::new(Vec::new()),
            send_failures: Mutex::new(VecDeque::new()),
            closes: AtomicU32::new(0),
        })
    }

    pub fn connected() -> Arc<Self> {
        Self::new(ConnectionState::Connected)
    }

    pub fn connecting() -> Arc<Self> {
        Self::new(ConnectionState::Connecting)
    }

    pub fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    pub fn disconnect(&self) {
        self.set_state(ConnectionState::Disconnected);
    }

    pub fn push(&self, event: ProviderEvent) {
        let _ = self.events.send(Ok(event));
    }

    pub fn push_error(&self, error: LiveError) {
        let _ = self.events.send(Err(error));
    }

    pub fn fail_next_send(&self, error: LiveError) {
        self.send_failures.lock().unwrap().push_back(error);
    }

    pub fn sent(&self) -> Vec<LiveMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn closes(&self) -> u32 {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionHandle for FakeHandle {
    async fn send(&self, message: LiveMessage) -> Result<(), LiveError> {
        if let Some(error) = self.send_failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        if !self.is_active() {
            return Err(LiveError::Transport("socket not connected".into()));
        }
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    fn receive(&self) -> ProviderEventStream {
        match self.receiver.lock().unwrap().take() {
            Some(receiver) => Box::pin(UnboundedReceiverStream::new(receiver)),
            None => Box::pin(futures::stream::empty()),
        }
    }

    fn connection_state_changes(&self) -> ConnectionStateStream {
        Box::pin(
            WatchStream::new(self.state.subscribe())
                .map(|current| ConnectionStateChange::new(ConnectionState::Connecting, current)),
        )
    }

    fn is_active(&self) -> bool {
        *self.state.borrow() == ConnectionState::Connected
    }

    async fn close(&self) -> Result<(), LiveError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.state.send_replace(ConnectionState::Disconnected);
        Ok(())
    }
}

/// Hands out prepared connections in order, then refuses.
pub struct ScriptedConnector {
    script: Mutex<VecDeque<Result<Arc<FakeHandle>, LiveError>>>,
    native_recovery: bool,
    connects: AtomicU32,
    resumptions: Mutex<Vec<Option<SessionResumptionHandle>>>,
}

impl ScriptedConnector {
    pub fn new(
        native_recovery: bool,
        script: Vec<Result<Arc<FakeHandle>, LiveError>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            native_recovery,
            connects: AtomicU32::new(0),
            resumptions: Mutex::new(Vec::new()),
        })
    }

    pub fn connects(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn resumptions(&self) -> Vec<Option<SessionResumptionHandle>> {
        self.resumptions.lock().unwrap().clone()
    }
}

#[async_trait]
impl LiveConnector for ScriptedConnector {
    async fn connect(
        &self,
        _config: &LiveConfig,
        _tools: &[ToolSchema],
        resumption: Option<SessionResumptionHandle>,
    ) -> Result<Arc<dyn SessionHandle>, LiveError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.resumptions.lock().unwrap().push(resumption);
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Ok(handle)) => Ok(handle as Arc<dyn SessionHandle>),
            Some(Err(error)) => Err(error),
            None => Err(LiveError::Transport("connection refused".into())),
        }
    }

    fn supports_native_recovery(&self) -> bool {
        self.native_recovery
    }
}

/// Returns a fixed output or a fixed error for every call.
pub struct StubTools {
    outcome: Result<Value, String>,
    delay: Duration,
    calls: Mutex<Vec<ToolCall>>,
}

impl StubTools {
    fn with_outcome(outcome: Result<Value, String>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            outcome,
            delay,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn returning(output: Value) -> Arc<Self> {
        Self::with_outcome(Ok(output), Duration::ZERO)
    }

    pub fn failing(message: &str) -> Arc<Self> {
        Self::with_outcome(Err(message.to_string()), Duration::ZERO)
    }

    /// Records the call, then takes `delay` before returning `output`.
    pub fn slow(output: Value, delay: Duration) -> Arc<Self> {
        Self::with_outcome(Ok(output), delay)
    }

    pub fn calls(&self) -> Vec<ToolCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolEngine for StubTools {
    async fn schemas(&self) -> anyhow::Result<Vec<ToolSchema>> {
        Ok(vec![ToolSchema {
            name: "get_weather".into(),
            description: "Current weather for a city".into(),
            parameters: serde_json::json!({ "type": "object" }),
        }])
    }

    async fn execute(&self, call: &ToolCall) -> anyhow::Result<Value> {
        self.calls.lock().unwrap().push(call.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.outcome.clone().map_err(|message| anyhow::anyhow!(message))
    }
}

pub fn fast_policy(max_attempts: u32) -> ReconnectPolicy {
    ReconnectPolicy::new(
        max_attempts,
        Duration::from_millis(1),
        Duration::from_millis(5),
        0.0,
    )
    .unwrap()
}

pub fn config(auto_reconnect: bool, max_attempts: u32) -> LiveConfig {
    LiveConfig {
        auto_reconnect,
        reconnect_policy: fast_policy(max_attempts),
        ..LiveConfig::default()
    }
}

pub fn orchestrator(
    connector: Arc<ScriptedConnector>,
    tools: Arc<dyn ToolEngine>,
    memory: Arc<InMemoryMemory>,
) -> LiveOrchestrator {
    LiveOrchestrator::new(connector, tools, memory)
}

pub fn input() -> (mpsc::Sender<LiveMessage>, ReceiverStream<LiveMessage>) {
    let (tx, rx) = mpsc::channel(16);
    (tx, ReceiverStream::new(rx))
}

pub type Item = Result<LiveEvent, LiveError>;

pub async fn next_item(session: &mut LiveSession) -> Option<Item> {
    tokio::time::timeout(STEP_TIMEOUT, session.next())
        .await
        .expect("timed out waiting for session output")
}

/// Reads until `done` matches, returning everything read including the match.
pub async fn read_until(session: &mut LiveSession, done: impl Fn(&Item) -> bool) -> Vec<Item> {
    let mut seen = Vec::new();
    loop {
        let item = next_item(session)
            .await
            .expect("session ended before the expected item");
        let matched = done(&item);
        seen.push(item);
        if matched {
            return seen;
        }
    }
}

/// Reads until the stream ends.
pub async fn drain(session: &mut LiveSession) -> Vec<Item> {
    let mut seen = Vec::new();
    while let Some(item) = next_item(session).await {
        seen.push(item);
    }
    seen
}

/// Polls `condition` until it holds.
pub async fn wait_until(condition: impl Fn() -> bool) {
    tokio::time::timeout(STEP_TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition never became true");
}

pub fn is_ready(item: &Item) -> bool {
    matches!(item, Ok(LiveEvent::Ready))
}

pub fn state_sequence(items: &[Item]) -> Vec<OrchestratorState> {
    items
        .iter()
        .filter_map(|item| match item {
            Ok(LiveEvent::StateChanged { change }) => Some(change.next),
            _ => None,
        })
        .collect()
}
