//! Executes tool calls requested by the model and feeds the results back.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, info_span, warn};
use uuid::Uuid;

use crate::error::LiveError;
use crate::event::LiveEvent;
use crate::memory::{Memory, record};
use crate::message::{LiveMessage, ToolCall, ToolResult};
use crate::multiplexer::Termination;
use crate::recovery::RecoveryDriver;
use crate::sink::EventSink;
use crate::tools::ToolEngine;

/// Runs one round trip per call: persist the call, execute it, persist the
/// result, send it through the current handle, then report completion.
///
/// Calls are handled one at a time in arrival order. Results are sent through
/// whatever handle is active when execution finishes, so a reconnect during a
/// long tool call does not lose the result.
pub(crate) struct ToolCallInterceptor {
    session_id: Uuid,
    tools: Arc<dyn ToolEngine>,
    memory: Arc<dyn Memory>,
    driver: Arc<RecoveryDriver>,
    events: EventSink,
}

impl ToolCallInterceptor {
    pub(crate) fn new(
        session_id: Uuid,
        tools: Arc<dyn ToolEngine>,
        memory: Arc<dyn Memory>,
        driver: Arc<RecoveryDriver>,
        events: EventSink,
    ) -> Self {
        Self {
            session_id,
            tools,
            memory,
            driver,
            events,
        }
    }

    pub(crate) async fn handle(&self, call: ToolCall) -> Result<ToolResult, LiveError> {
        record(&*self.memory, self.session_id, LiveMessage::tool_call(call.clone())).await;

        let span = info_span!("tool_call", call_id = %call.id, tool = %call.name);
        let result = match self.tools.execute(&call).instrument(span).await {
            Ok(output) => {
                info!(session_id = %self.session_id, call_id = %call.id, "Tool call succeeded.");
                ToolResult::success(&call, output)
            }
            Err(e) => {
                warn!(session_id = %self.session_id, call_id = %call.id, error = %e, "Tool call failed.");
                ToolResult::failure(&call, format!("{e:#}"))
            }
        };

        record(&*self.memory, self.session_id, LiveMessage::tool_result(result.clone())).await;
        self.driver
            .send(LiveMessage::tool_result(result.clone()))
            .await?;
        self.events
            .emit(LiveEvent::ToolCallCompleted {
                result: result.clone(),
            })
            .await;
        Ok(result)
    }

    /// Worker loop fed by the downstream pipeline.
    pub(crate) async fn run(
        self,
        mut calls: mpsc::Receiver<ToolCall>,
        cancel: CancellationToken,
    ) -> Termination {
        loop {
            let call = tokio::select! {
                _ = cancel.cancelled() => return Termination::Cancelled,
                call = calls.recv() => call,
            };
            let Some(call) = call else {
                // Downstream is gone; its own result ends the session.
                cancel.cancelled().await;
                return Termination::Cancelled;
            };

            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Termination::Cancelled,
                outcome = self.handle(call) => outcome,
            };
            if let Err(e) = outcome {
                if cancel.is_cancelled() {
                    return Termination::Cancelled;
                }
                warn!(session_id = %self.session_id, error = %e, "Could not deliver tool result.");
                return Termination::Failed(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LiveConfig;
    use crate::error::ErrorClassifier;
    use crate::memory::MockMemory;
    use crate::message::{LiveContent, Role};
    use crate::recovery::RecoveryDeps;
    use crate::session::{ActiveSession, MockLiveConnector, MockSessionHandle};
    use crate::state::StateMachine;
    use crate::tools::MockToolEngine;
    use serde_json::json;
    use std::sync::Mutex;
    use tokio::sync::watch;

    fn call() -> ToolCall {
        ToolCall {
            id: "call-1".into(),
            name: "get_weather".into(),
            arguments: json!({ "city": "Oslo" }),
        }
    }

    fn interceptor(
        tools: MockToolEngine,
        memory: MockMemory,
        handle: MockSessionHandle,
    ) -> (ToolCallInterceptor, mpsc::Receiver<Result<LiveEvent, LiveError>>) {
        let mut connector = MockLiveConnector::new();
        connector.expect_supports_native_recovery().return_const(false);

        let active = Arc::new(ActiveSession::new());
        active.install(Arc::new(handle));
        let (tx, rx) = mpsc::channel(16);
        let (_, resumption) = watch::channel(None);
        let events = EventSink::new(tx);
        let driver = Arc::new(RecoveryDriver::new(RecoveryDeps {
            session_id: Uuid::new_v4(),
            connector: Arc::new(connector),
            config: Arc::new(LiveConfig::default()),
            tools: Arc::from(Vec::new()),
            classifier: ErrorClassifier::new(),
            state: Arc::new(StateMachine::new()),
            active,
            resumption,
            events: events.clone(),
            cancel: CancellationToken::new(),
        }));

        (
            ToolCallInterceptor::new(
                Uuid::new_v4(),
                Arc::new(tools),
                Arc::new(memory),
                driver,
                events,
            ),
            rx,
        )
    }

    fn recording_memory(log: Arc<Mutex<Vec<LiveMessage>>>) -> MockMemory {
        let mut memory = MockMemory::new();
        memory.expect_append().returning(move |_, message| {
            log.lock().unwrap().push(message);
            Ok(())
        });
        memory
    }

    #[tokio::test]
    async fn successful_call_round_trip() {
        let mut tools = MockToolEngine::new();
        tools
            .expect_execute()
            .times(1)
            .returning(|_| Ok(json!({ "temp": 21 })));

        let log = Arc::new(Mutex::new(Vec::new()));
        let mut handle = MockSessionHandle::new();
        handle
            .expect_send()
            .withf(|message| {
                matches!(
                    &message.content,
                    LiveContent::ToolResult { result } if result.call_id == "call-1" && !result.is_error
                )
            })
            .times(1)
            .returning(|_| Ok(()));

        let (interceptor, mut events) = interceptor(tools, recording_memory(log.clone()), handle);
        let result = interceptor.handle(call()).await.unwrap();

        assert_eq!(result.output, json!({ "temp": 21 }));
        let persisted: Vec<Role> = log.lock().unwrap().iter().map(|m| m.role).collect();
        assert_eq!(persisted, vec![Role::Assistant, Role::Tool]);
        assert_eq!(
            events.try_recv().unwrap().unwrap(),
            LiveEvent::ToolCallCompleted { result }
        );
    }

    #[tokio::test]
    async fn tool_failure_is_sent_back_as_result() {
        let mut tools = MockToolEngine::new();
        tools
            .expect_execute()
            .returning(|_| Err(anyhow::anyhow!("service unavailable")));

        let mut handle = MockSessionHandle::new();
        handle
            .expect_send()
            .withf(|message| {
                matches!(
                    &message.content,
                    LiveContent::ToolResult { result } if result.is_error
                        && result.output == json!({ "error": "service unavailable" })
                )
            })
            .times(1)
            .returning(|_| Ok(()));

        let log = Arc::new(Mutex::new(Vec::new()));
        let (interceptor, _events) = interceptor(tools, recording_memory(log), handle);
        let result = interceptor.handle(call()).await.unwrap();
        assert!(result.is_error);
        assert_eq!(result.name, "get_weather");
    }

    #[tokio::test]
    async fn undeliverable_result_fails_the_worker() {
        let mut tools = MockToolEngine::new();
        tools.expect_execute().returning(|_| Ok(json!({})));

        let mut handle = MockSessionHandle::new();
        handle
            .expect_send()
            .returning(|_| Err(LiveError::Protocol("rejected".into())));

        let log = Arc::new(Mutex::new(Vec::new()));
        let (interceptor, _events) = interceptor(tools, recording_memory(log), handle);
        let (tx, rx) = mpsc::channel(1);
        tx.send(call()).await.unwrap();

        let termination = interceptor.run(rx, CancellationToken::new()).await;
        assert!(matches!(
            termination,
            Termination::Failed(LiveError::Protocol(ref msg)) if msg == "rejected"
        ));
    }
}
