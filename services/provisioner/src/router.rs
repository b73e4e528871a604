//! Timeout-bounded request/reply over the bus.
//!
//! Each request gets its own inbox. Exactly one outcome is produced per
//! call: the first reply or a `GatewayTimeout`. The inbox subscription is
//! dropped before the outcome is acted on, so a late reply lands nowhere.
//! No retries happen here.

use std::sync::Arc;
use std::time::Duration;

use brokerd_bus::MessageBus;
use brokerd_id::RequestId;
use brokerd_messages::types::{
    BindResponse, ProvisionResponse, SimpleResponse, UpdateInstanceResponse,
};
use brokerd_messages::{decode, encode, ErrorCode, ErrorResponse};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{BrokerError, BrokerResult};

/// A reply that says whether the node succeeded.
pub trait NodeReply: DeserializeOwned {
    fn success(&self) -> bool;
    fn take_error(&mut self) -> Option<ErrorResponse>;
}

macro_rules! node_reply {
    ($($ty:ty),* $(,)?) => {
        $(
            impl NodeReply for $ty {
                fn success(&self) -> bool {
                    self.success
                }

                fn take_error(&mut self) -> Option<ErrorResponse> {
                    self.error.take()
                }
            }
        )*
    };
}

node_reply!(ProvisionResponse, BindResponse, SimpleResponse, UpdateInstanceResponse);

#[derive(Clone)]
pub struct RequestRouter {
    bus: Arc<dyn MessageBus>,
    timeout: Duration,
}

impl RequestRouter {
    pub fn new(bus: Arc<dyn MessageBus>, timeout: Duration) -> Self {
        Self { bus, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send `request` on `subject` and wait for the raw decoded reply.
    pub async fn request<Req, Resp>(&self, subject: &str, request: &Req) -> BrokerResult<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let payload = encode(request)?;
        let request_id = RequestId::new();
        let mut inbox = self.bus.request(subject, request_id, payload).await?;
        debug!(%subject, %request_id, "Request sent");

        let outcome = tokio::time::timeout(self.timeout, inbox.next()).await;
        inbox.unsubscribe();

        match outcome {
            Ok(Some(envelope)) => Ok(decode(&envelope.payload)?),
            Ok(None) => Err(BrokerError::internal(format!(
                "reply inbox for {subject} closed"
            ))),
            Err(_) => {
                warn!(%subject, %request_id, timeout = ?self.timeout, "Node did not reply in time");
                Err(BrokerError::GatewayTimeout {
                    subject: subject.to_string(),
                    timeout: self.timeout,
                })
            }
        }
    }

    /// Like [`request`](Self::request), and turn `success: false` into the
    /// node's error.
    pub async fn call<Req, Resp>(&self, subject: &str, request: &Req) -> BrokerResult<Resp>
    where
        Req: Serialize + Sync,
        Resp: NodeReply,
    {
        let mut reply: Resp = self.request(subject, request).await?;
        if reply.success() {
            return Ok(reply);
        }
        let error = reply
            .take_error()
            .unwrap_or_else(|| ErrorCode::InternalError.response(None));
        debug!(%subject, code = error.msg.code, "Node reported failure");
        Err(BrokerError::Node(error))
    }

    /// Fire-and-forget publish, for broadcasts.
    pub async fn publish<Req>(&self, subject: &str, message: &Req) -> BrokerResult<()>
    where
        Req: Serialize + Sync,
    {
        let payload = encode(message)?;
        self.bus.publish(subject, payload).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brokerd_bus::LocalBus;
    use brokerd_messages::types::SimpleResponse;

    async fn echo_once(bus: LocalBus, subject: &str, reply: SimpleResponse) {
        let mut sub = bus.subscribe(subject).await.unwrap();
        tokio::spawn(async move {
            if let Some(env) = sub.next().await {
                let to = env.reply_to.unwrap();
                bus.publish(&to, encode(&reply).unwrap()).await.unwrap();
            }
        });
    }

    #[tokio::test(start_paused = true)]
    async fn test_reply_wins() {
        let bus = LocalBus::new();
        echo_once(bus.clone(), "svc.restore.n1", SimpleResponse::ok()).await;
        let router = RequestRouter::new(Arc::new(bus.clone()), Duration::from_secs(5));

        let reply: SimpleResponse = router
            .call("svc.restore.n1", &serde_json::json!({}))
            .await
            .unwrap();
        assert!(reply.success);
        assert_eq!(bus.open_inboxes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silence_times_out_and_unsubscribes() {
        let bus = LocalBus::new();
        let _sink = bus.subscribe("svc.restore.n1").await.unwrap();
        let router = RequestRouter::new(Arc::new(bus.clone()), Duration::from_secs(5));

        let started = tokio::time::Instant::now();
        let err = router
            .call::<_, SimpleResponse>("svc.restore.n1", &serde_json::json!({}))
            .await
            .unwrap_err();

        assert!(matches!(err, BrokerError::GatewayTimeout { .. }));
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert_eq!(bus.open_inboxes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_reply_carries_node_error() {
        let bus = LocalBus::new();
        let node_error = ErrorCode::NotFound.response(Some("inst-9"));
        echo_once(
            bus.clone(),
            "svc.unprovision.n1",
            SimpleResponse::failed(node_error.clone()),
        )
        .await;
        let router = RequestRouter::new(Arc::new(bus), Duration::from_secs(5));

        let err = router
            .call::<_, SimpleResponse>("svc.unprovision.n1", &serde_json::json!({}))
            .await
            .unwrap_err();
        match err {
            BrokerError::Node(resp) => assert_eq!(resp, node_error),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
