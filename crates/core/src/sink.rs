use tokio::sync::mpsc;

use crate::error::LiveError;
use crate::event::LiveEvent;

pub(crate) type OutputItem = Result<LiveEvent, LiveError>;

/// Fan-in side of a session's output stream, cloned into every task.
#[derive(Clone)]
pub(crate) struct EventSink {
    tx: mpsc::Sender<OutputItem>,
}

impl EventSink {
    pub(crate) fn new(tx: mpsc::Sender<OutputItem>) -> Self {
        Self { tx }
    }

    /// Returns `false` once the consumer has gone away.
    pub(crate) async fn emit(&self, event: LiveEvent) -> bool {
        self.tx.send(Ok(event)).await.is_ok()
    }

    pub(crate) async fn fail(&self, error: LiveError) -> bool {
        self.tx.send(Err(error)).await.is_ok()
    }
}
