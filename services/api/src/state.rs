//! Shared Application State

use crate::config::Config;
use livewire_core::{InMemoryMemory, LiveOrchestrator};
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: LiveOrchestrator,
    pub config: Arc<Config>,
    /// Transcripts of sessions that are still open.
    pub memory: Arc<InMemoryMemory>,
}
