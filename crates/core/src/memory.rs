//! Conversation memory.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

use crate::message::LiveMessage;

/// Append-only conversation store. Failures are logged by the orchestrator
/// and never end a session.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Memory: Send + Sync {
    async fn append(&self, session_id: Uuid, message: LiveMessage) -> Result<()>;
}

/// Keeps transcripts in process, keyed by session.
#[derive(Default)]
pub struct InMemoryMemory {
    sessions: Mutex<HashMap<Uuid, Vec<LiveMessage>>>,
}

impl InMemoryMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages recorded for `session_id`, oldest first.
    pub async fn messages(&self, session_id: Uuid) -> Vec<LiveMessage> {
        self.sessions
            .lock()
            .await
            .get(&session_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Drops the transcript for `session_id`, returning what was stored.
    pub async fn remove(&self, session_id: Uuid) -> Vec<LiveMessage> {
        self.sessions
            .lock()
            .await
            .remove(&session_id)
            .unwrap_or_default()
    }

    /// Number of sessions with a stored transcript.
    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

#[async_trait]
impl Memory for InMemoryMemory {
    async fn append(&self, session_id: Uuid, message: LiveMessage) -> Result<()> {
        self.sessions
            .lock()
            .await
            .entry(session_id)
            .or_default()
            .push(message);
        Ok(())
    }
}

/// Appends `message`, logging instead of failing.
pub(crate) async fn record(memory: &dyn Memory, session_id: Uuid, message: LiveMessage) {
    let role = message.role;
    if let Err(e) = memory.append(session_id, message).await {
        warn!(%session_id, %role, error = %e, "Failed to persist message.");
    }
}
