//! Subscription handle.

use tokio::sync::mpsc;

use crate::Envelope;

type Unsubscribe = Box<dyn FnOnce() + Send + 'static>;

/// A live subscription. Dropping it unsubscribes.
pub struct Subscription {
    subject: String,
    rx: mpsc::UnboundedReceiver<Envelope>,
    unsubscribe: Option<Unsubscribe>,
}

impl Subscription {
    /// Build a subscription from a receiver and the action that detaches it.
    pub fn new(
        subject: impl Into<String>,
        rx: mpsc::UnboundedReceiver<Envelope>,
        unsubscribe: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            subject: subject.into(),
            rx,
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Next message, or `None` once the bus side is gone.
    pub async fn next(&mut self) -> Option<Envelope> {
        self.rx.recv().await
    }

    /// Explicitly unsubscribe. Equivalent to dropping.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("subject", &self.subject)
            .finish_non_exhaustive()
    }
}
