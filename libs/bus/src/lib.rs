//! Publish/subscribe message bus.
//!
//! The provisioner and its worker nodes share nothing but this bus. The
//! [`MessageBus`] trait covers the three primitives the provisioner needs:
//!
//! - fire-and-forget `publish` (announcements, broadcasts, purges)
//! - `subscribe` to a subject, returning a [`Subscription`] that stops
//!   receiving when dropped
//! - `request`, which opens a private reply inbox, publishes with that inbox
//!   as the reply address and hands the inbox subscription back to the caller
//!
//! [`LocalBus`] is the in-process implementation. [`NatsBus`] speaks to a
//! NATS server, which is how the provisioner reaches nodes running in other
//! processes.

mod error;
mod local;
mod nats;
mod subscription;

use async_trait::async_trait;
use brokerd_id::RequestId;
use bytes::Bytes;

pub use error::BusError;
pub use local::LocalBus;
pub use nats::{NatsBus, NatsConfig};
pub use subscription::Subscription;

/// Prefix of private reply subjects.
pub const INBOX_PREFIX: &str = "_INBOX";

/// A message delivered to a subscriber.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub subject: String,
    pub reply_to: Option<String>,
    pub payload: Bytes,
}

/// Publish/subscribe transport.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish without a reply address.
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), BusError>;

    /// Publish with a reply address the receiver should answer on.
    async fn publish_with_reply(
        &self,
        subject: &str,
        reply_to: &str,
        payload: Bytes,
    ) -> Result<(), BusError>;

    /// Subscribe to an exact subject.
    async fn subscribe(&self, subject: &str) -> Result<Subscription, BusError>;

    /// Open a reply inbox, publish the request and return the inbox.
    ///
    /// The inbox is subscribed before publishing, so a reply can never be
    /// lost to the race between the two.
    async fn request(
        &self,
        subject: &str,
        request_id: RequestId,
        payload: Bytes,
    ) -> Result<Subscription, BusError> {
        let inbox = format!("{INBOX_PREFIX}.{request_id}");
        let subscription = self.subscribe(&inbox).await?;
        self.publish_with_reply(subject, &inbox, payload).await?;
        Ok(subscription)
    }
}

/// Subjects are non-empty dot-separated tokens without whitespace.
pub(crate) fn validate_subject(subject: &str) -> Result<(), BusError> {
    let valid = !subject.is_empty()
        && !subject.chars().any(char::is_whitespace)
        && subject.split('.').all(|token| !token.is_empty());
    if valid {
        Ok(())
    } else {
        Err(BusError::InvalidSubject(subject.to_string()))
    }
}
