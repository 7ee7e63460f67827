//! Run-level cancellation
//!
//! Watch-based: a listener created after the trigger still observes it.

use std::sync::Arc;

use tokio::sync::watch;

/// Sending half, owned by the controller
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    /// Create an untriggered signal
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Trigger cancellation. Idempotent.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Whether cancellation was triggered
    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// New listener
    pub fn listener(&self) -> ShutdownListener {
        ShutdownListener {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving half, cloned into every in-flight wait
#[derive(Debug, Clone)]
pub struct ShutdownListener {
    rx: watch::Receiver<bool>,
}

impl ShutdownListener {
    /// Whether cancellation was triggered
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once cancellation is triggered. Pends forever if the sender
    /// is dropped without triggering.
    pub async fn triggered(&mut self) {
        if self.rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
