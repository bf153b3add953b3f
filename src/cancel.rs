//! Cooperative cancellation for in-flight analyses.

use tokio::sync::watch;

/// Cancels every [`CancelSignal`] created from it.
#[derive(Debug)]
pub struct CancelHandle {
    sender: watch::Sender<bool>,
}

impl CancelHandle {
    /// Create a new handle, with no signals cancelled yet.
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self { sender }
    }

    /// Get a signal which will fire when [`CancelHandle::cancel`] is called.
    pub fn signal(&self) -> CancelSignal {
        CancelSignal {
            receiver: self.sender.subscribe(),
        }
    }

    /// Cancel all signals.
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Something an analysis can wait on alongside its own timers.
#[derive(Clone, Debug)]
pub struct CancelSignal {
    receiver: watch::Receiver<bool>,
}

impl CancelSignal {
    /// A signal which never fires.
    #[cfg(test)]
    pub fn never() -> Self {
        // Once the sender is gone, `cancelled` waits forever.
        let (_, receiver) = watch::channel(false);
        Self { receiver }
    }

    /// Has this signal been cancelled?
    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Wait until this signal is cancelled.
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        if receiver.wait_for(|cancelled| *cancelled).await.is_err() {
            // The handle was dropped without cancelling.
            std::future::pending::<()>().await;
        }
    }
}
