//! Coordinated shutdown for casstat tasks.
//!
//! Casstat runs two long-lived tasks, the scraper and the HTTP server, and
//! both observe shutdown only between their own units of work: the scraper
//! between cycles, the server between accepted connections. Everything that
//! participates holds a clone of [`Shutdown`].

use std::sync::Arc;

use tokio::sync::broadcast;

/// Shutdown signal shared by all casstat tasks.
///
/// One logical signal, many observers. Cloning subscribes the clone to the
/// same signal; the signal is sent at most once.
#[derive(Debug)]
pub struct Shutdown {
    /// Singleton sender shared by every clone.
    sender: Arc<broadcast::Sender<()>>,
    /// The receive half, one per clone.
    receiver: broadcast::Receiver<()>,
    /// Whether this clone has already observed the signal.
    received: bool,
}

impl Shutdown {
    /// Create the root `Shutdown`. All other instances should be clones of
    /// this one.
    #[must_use]
    pub fn new() -> Self {
        let (sender, receiver) = broadcast::channel(1);
        Self {
            sender: Arc::new(sender),
            receiver,
            received: false,
        }
    }

    /// Wait until the signal is sent. Returns immediately on every call
    /// after the signal has been observed once.
    pub async fn recv(&mut self) {
        if self.received {
            return;
        }
        // Only one value is ever sent, so the receiver cannot lag. A closed
        // channel means every sender is gone, which also counts as shutdown.
        let _ = self.receiver.recv().await;
        self.received = true;
    }

    /// Send the signal to every clone. Sending twice is harmless.
    pub fn signal(&self) {
        // An error here means there are no receivers left, i.e. every task
        // has already stopped. Nothing to do.
        let _ = self.sender.send(());
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Shutdown {
    fn clone(&self) -> Self {
        Self {
            sender: Arc::clone(&self.sender),
            receiver: self.sender.subscribe(),
            received: self.received,
        }
    }
}
