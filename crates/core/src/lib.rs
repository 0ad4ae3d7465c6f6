//! Orchestration for bidirectional live model sessions.
//!
//! [`LiveOrchestrator::live`] connects to a provider through a
//! [`LiveConnector`], pumps client messages upstream, passes provider events
//! downstream, runs requested tools through a [`ToolEngine`], records the
//! conversation in [`Memory`] and reconnects on transport failures according
//! to a [`ReconnectPolicy`].

pub mod config;
pub mod error;
pub mod event;
mod interceptor;
pub mod memory;
pub mod message;
mod multiplexer;
pub mod orchestrator;
pub mod reconnect;
mod recovery;
pub mod session;
mod sink;
pub mod state;
pub mod tools;

pub use config::{DEFAULT_MODEL, LiveConfig, ResponseModality};
pub use error::{ErrorClassifier, LiveError, RecoveryPredicate};
pub use event::{
    ConnectionState, ConnectionStateChange, ContentDelta, LiveEvent, ProviderEvent,
    ResumptionUpdate, SessionEndReason, SessionResumptionHandle,
};
pub use memory::{InMemoryMemory, Memory};
pub use message::{ControlSignal, LiveContent, LiveMessage, Role, ToolCall, ToolResult};
pub use orchestrator::{LiveOrchestrator, LiveSession};
pub use reconnect::ReconnectPolicy;
pub use recovery::RecoveryOutcome;
pub use session::{
    ActiveSession, BoundHandle, ConnectionStateStream, LiveConnector, ProviderEventStream,
    SessionHandle,
};
pub use state::{OrchestratorState, StateChangeEvent, StateMachine};
pub use tools::{McpToolEngine, NoTools, ToolEngine, ToolSchema};
