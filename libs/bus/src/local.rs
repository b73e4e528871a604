//! In-process bus.
//!
//! Subjects match exactly. Each subscriber gets its own unbounded queue, so a
//! slow subscriber never blocks a publisher. Publishing to a subject nobody
//! listens on drops the message, as a broker would.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::trace;

use crate::{validate_subject, BusError, Envelope, MessageBus, Subscription};

#[derive(Default)]
struct Routes {
    next_id: u64,
    subscribers: HashMap<String, Vec<(u64, mpsc::UnboundedSender<Envelope>)>>,
}

impl Routes {
    fn remove(&mut self, subject: &str, id: u64) {
        if let Some(subs) = self.subscribers.get_mut(subject) {
            subs.retain(|(sub_id, _)| *sub_id != id);
            if subs.is_empty() {
                self.subscribers.remove(subject);
            }
        }
    }
}

/// Bus shared by everything in one process.
#[derive(Clone, Default)]
pub struct LocalBus {
    routes: Arc<Mutex<Routes>>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscriptions on a subject.
    pub fn subscriber_count(&self, subject: &str) -> usize {
        self.routes
            .lock()
            .subscribers
            .get(subject)
            .map_or(0, Vec::len)
    }

    /// Number of live reply inboxes.
    pub fn open_inboxes(&self) -> usize {
        let prefix = format!("{}.", crate::INBOX_PREFIX);
        self.routes
            .lock()
            .subscribers
            .keys()
            .filter(|subject| subject.starts_with(&prefix))
            .count()
    }

    fn deliver(&self, envelope: Envelope) -> Result<(), BusError> {
        validate_subject(&envelope.subject)?;

        let mut routes = self.routes.lock();
        let Some(subs) = routes.subscribers.get_mut(&envelope.subject) else {
            trace!(subject = %envelope.subject, "No subscribers, dropping message");
            return Ok(());
        };

        subs.retain(|(_, tx)| tx.send(envelope.clone()).is_ok());
        if subs.is_empty() {
            routes.subscribers.remove(&envelope.subject);
        }
        Ok(())
    }
}

#[async_trait]
impl MessageBus for LocalBus {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), BusError> {
        self.deliver(Envelope {
            subject: subject.to_string(),
            reply_to: None,
            payload,
        })
    }

    async fn publish_with_reply(
        &self,
        subject: &str,
        reply_to: &str,
        payload: Bytes,
    ) -> Result<(), BusError> {
        validate_subject(reply_to)?;
        self.deliver(Envelope {
            subject: subject.to_string(),
            reply_to: Some(reply_to.to_string()),
            payload,
        })
    }

    async fn subscribe(&self, subject: &str) -> Result<Subscription, BusError> {
        validate_subject(subject)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let id = {
            let mut routes = self.routes.lock();
            let id = routes.next_id;
            routes.next_id += 1;
            routes
                .subscribers
                .entry(subject.to_string())
                .or_default()
                .push((id, tx));
            id
        };

        let routes: Weak<Mutex<Routes>> = Arc::downgrade(&self.routes);
        let owned_subject = subject.to_string();
        Ok(Subscription::new(subject, rx, move || {
            if let Some(routes) = routes.upgrade() {
                routes.lock().remove(&owned_subject, id);
            }
        }))
    }
}
