//! etcd-backed coordination store.
//!
//! Compare-and-set maps onto a single etcd transaction: the comparison is on
//! the key's value (or on version 0 for "absent"), the success branch is the
//! put or delete.

use async_trait::async_trait;
use etcd_client::{Client, Compare, CompareOp, Txn, TxnOp};
use tracing::debug;

use crate::{CoordinationStore, StoreError};

impl From<etcd_client::Error> for StoreError {
    fn from(err: etcd_client::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// Store talking to an etcd cluster.
#[derive(Clone)]
pub struct EtcdStore {
    client: Client,
}

impl EtcdStore {
    pub async fn connect(endpoints: &[String]) -> Result<Self, StoreError> {
        let client = Client::connect(endpoints, None)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        debug!(endpoints = ?endpoints, "Connected to etcd");
        Ok(Self { client })
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CoordinationStore for EtcdStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut client = self.client.clone();
        let resp = client.get(key, None).await?;
        resp.kvs()
            .first()
            .map(|kv| kv.value_str().map(str::to_owned))
            .transpose()
            .map_err(StoreError::from)
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&str>,
        new: Option<&str>,
    ) -> Result<bool, StoreError> {
        let compare = match expected {
            Some(value) => Compare::value(key, CompareOp::Equal, value),
            None => Compare::version(key, CompareOp::Equal, 0),
        };
        let op = match new {
            Some(value) => TxnOp::put(key, value, None),
            None => TxnOp::delete(key, None),
        };

        let txn = Txn::new().when(vec![compare]).and_then(vec![op]);
        let mut client = self.client.clone();
        let resp = client.txn(txn).await?;
        Ok(resp.succeeded())
    }
}
