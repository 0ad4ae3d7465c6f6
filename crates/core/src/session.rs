//! Collaborator seams for provider transports and the active handle slot.

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;

use crate::config::LiveConfig;
use crate::error::LiveError;
use crate::event::{ConnectionStateChange, ProviderEvent, SessionResumptionHandle};
use crate::message::LiveMessage;
use crate::tools::ToolSchema;

/// Events received from a provider session.
pub type ProviderEventStream = Pin<Box<dyn Stream<Item = Result<ProviderEvent, LiveError>> + Send>>;

/// Connection transitions reported by a provider session. The current state
/// is expected as the first item.
pub type ConnectionStateStream = Pin<Box<dyn Stream<Item = ConnectionStateChange> + Send>>;

/// One open transport session with a provider.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionHandle: Send + Sync {
    async fn send(&self, message: LiveMessage) -> Result<(), LiveError>;

    /// The provider's event stream. Meant to be taken once per handle.
    fn receive(&self) -> ProviderEventStream;

    fn connection_state_changes(&self) -> ConnectionStateStream;

    fn is_active(&self) -> bool;

    async fn close(&self) -> Result<(), LiveError>;
}

/// Opens provider sessions.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LiveConnector: Send + Sync {
    /// `resumption` is the last handle the provider issued, if it supports
    /// native recovery and one was seen.
    async fn connect(
        &self,
        config: &LiveConfig,
        tools: &[ToolSchema],
        resumption: Option<SessionResumptionHandle>,
    ) -> Result<Arc<dyn SessionHandle>, LiveError>;

    fn supports_native_recovery(&self) -> bool;
}

/// A handle together with the generation it was installed at.
#[derive(Clone)]
pub struct BoundHandle {
    pub generation: u64,
    pub handle: Arc<dyn SessionHandle>,
}

impl std::fmt::Debug for BoundHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundHandle")
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

/// Holds at most one active session handle.
///
/// Swaps are atomic and bump the generation, so readers can tell whether the
/// handle they were using has been replaced. Readers always go through
/// [`ActiveSession::current`]; nothing caches a handle across a swap.
pub struct ActiveSession {
    slot: watch::Sender<Option<BoundHandle>>,
    generations: AtomicU64,
}

impl ActiveSession {
    pub fn new() -> Self {
        let (slot, _) = watch::channel(None);
        Self {
            slot,
            generations: AtomicU64::new(0),
        }
    }

    /// Installs `handle` and returns the one it replaced.
    pub fn install(&self, handle: Arc<dyn SessionHandle>) -> Option<BoundHandle> {
        let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
        self.slot.send_replace(Some(BoundHandle { generation, handle }))
    }

    pub fn current(&self) -> Option<BoundHandle> {
        self.slot.borrow().clone()
    }

    pub fn generation(&self) -> Option<u64> {
        self.slot.borrow().as_ref().map(|bound| bound.generation)
    }

    /// Empties the slot, returning the handle that was active.
    pub fn take(&self) -> Option<BoundHandle> {
        self.slot.send_replace(None)
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<BoundHandle>> {
        self.slot.subscribe()
    }
}

impl Default for ActiveSession {
    fn default() -> Self {
        Self::new()
    }
}
