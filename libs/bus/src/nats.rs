//! NATS-backed bus.
//!
//! One client connection carries every publish and subscription. Each
//! [`Subscription`] is fed by a forwarding task; dropping the subscription
//! aborts the task, which drops the NATS subscriber and unsubscribes on the
//! server.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

use crate::{validate_subject, BusError, Envelope, MessageBus, Subscription};

/// Connection settings.
#[derive(Debug, Clone)]
pub struct NatsConfig {
    /// Server URL, or several separated by commas.
    pub url: String,
    /// Client name reported to the server.
    pub name: String,
    pub connect_timeout: Duration,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: "nats://127.0.0.1:4222".to_string(),
            name: "brokerd".to_string(),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl NatsConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }
}

/// Bus over a NATS server connection.
#[derive(Clone)]
pub struct NatsBus {
    client: async_nats::Client,
}

impl NatsBus {
    pub async fn connect(config: &NatsConfig) -> Result<Self, BusError> {
        let client = async_nats::ConnectOptions::new()
            .name(&config.name)
            .connection_timeout(config.connect_timeout)
            .connect(config.url.as_str())
            .await
            .map_err(|e| BusError::Disconnected(format!("{}: {e}", config.url)))?;
        info!(url = %config.url, "Connected to NATS");
        Ok(Self { client })
    }

    pub fn from_client(client: async_nats::Client) -> Self {
        Self { client }
    }

    /// Wait until everything published so far has reached the server.
    pub async fn flush(&self) -> Result<(), BusError> {
        self.client.flush().await.map_err(transport)
    }
}

fn transport(err: impl std::fmt::Display) -> BusError {
    BusError::Transport(err.to_string())
}

#[async_trait]
impl MessageBus for NatsBus {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), BusError> {
        validate_subject(subject)?;
        self.client
            .publish(subject.to_string(), payload)
            .await
            .map_err(transport)
    }

    async fn publish_with_reply(
        &self,
        subject: &str,
        reply_to: &str,
        payload: Bytes,
    ) -> Result<(), BusError> {
        validate_subject(subject)?;
        validate_subject(reply_to)?;
        self.client
            .publish_with_reply(subject.to_string(), reply_to.to_string(), payload)
            .await
            .map_err(transport)
    }

    async fn subscribe(&self, subject: &str) -> Result<Subscription, BusError> {
        validate_subject(subject)?;
        let mut subscriber = self
            .client
            .subscribe(subject.to_string())
            .await
            .map_err(transport)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let owned_subject = subject.to_string();
        let task = tokio::spawn(async move {
            while let Some(message) = subscriber.next().await {
                trace!(subject = %message.subject, "NATS message");
                let envelope = Envelope {
                    subject: message.subject.to_string(),
                    reply_to: message.reply.map(|r| r.to_string()),
                    payload: message.payload,
                };
                if tx.send(envelope).is_err() {
                    break;
                }
            }
            debug!(subject = %owned_subject, "NATS subscription closed");
        });

        Ok(Subscription::new(subject, rx, move || task.abort()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = NatsConfig::new("nats://bus:4222");
        assert_eq!(config.url, "nats://bus:4222");
        assert_eq!(config.name, "brokerd");
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_disconnected() {
        let config = NatsConfig {
            connect_timeout: Duration::from_secs(1),
            ..NatsConfig::new("nats://127.0.0.1:1")
        };
        let err = NatsBus::connect(&config).await.err();
        assert!(matches!(err, Some(BusError::Disconnected(msg)) if msg.contains("127.0.0.1:1")));
    }
}
