//! The completion queue between I/O tasks and the tick thread.

use tokio::sync::mpsc;

use crate::IoEvent;

/// Cloneable producer handle given to I/O tasks.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<IoEvent>,
}

impl EventSink {
    /// Enqueues `event`. Dropped silently if the queue is gone, which only
    /// happens after the dispatcher itself was dropped.
    pub fn push(&self, event: IoEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("completion queue closed, event dropped");
        }
    }
}

/// Unbounded FIFO of [`IoEvent`]s, drained without blocking.
#[derive(Debug)]
pub struct CompletionQueue {
    tx: mpsc::UnboundedSender<IoEvent>,
    rx: mpsc::UnboundedReceiver<IoEvent>,
}

impl CompletionQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx }
    }

    /// A new producer handle.
    pub fn sink(&self) -> EventSink {
        EventSink {
            tx: self.tx.clone(),
        }
    }

    /// Pops the oldest event, or `None` if the queue is empty right now.
    pub fn try_next(&mut self) -> Option<IoEvent> {
        self.rx.try_recv().ok()
    }

    /// Waits for the next event and pops it.
    pub async fn next(&mut self) -> Option<IoEvent> {
        self.rx.recv().await
    }
}

impl Default for CompletionQueue {
    fn default() -> Self {
        Self::new()
    }
}
