//! Shared harness: a provisioner with its workers on a `LocalBus`, fake
//! nodes, and an in-memory canonical store.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use brokerd_bus::LocalBus;
use brokerd_messages::{Credentials, ServiceHandle};
use brokerd_provisioner::handles::MemoryHandleSource;
use brokerd_provisioner::{workers, Config, Provisioner};
use brokerd_testing::FakeNode;
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub const SERVICE: &str = "mysql";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,brokerd_provisioner=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

pub fn test_config() -> Config {
    Config {
        service_name: SERVICE.to_string(),
        ..Config::default()
    }
}

pub struct Harness {
    pub bus: LocalBus,
    pub source: Arc<MemoryHandleSource>,
    pub provisioner: Provisioner,
    shutdown: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
}

impl Harness {
    /// Provisioner with workers running. Nodes started before this see the
    /// initial discover and announce.
    pub async fn start(bus: LocalBus, source: Arc<MemoryHandleSource>, config: Config) -> Self {
        init_tracing();
        let provisioner = Provisioner::new(config, Arc::new(bus.clone()), source.clone());
        let (shutdown, rx) = watch::channel(false);
        let workers = workers::spawn_workers(&provisioner, rx).await.unwrap();
        Self {
            bus,
            source,
            provisioner,
            shutdown,
            workers,
        }
    }

    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        for worker in self.workers {
            let _ = worker.await;
        }
    }
}

pub async fn node(bus: &LocalBus, id: &str, plan: &str, capacity: i64) -> FakeNode {
    let node = FakeNode::start(bus, SERVICE, id, plan).await.unwrap();
    node.set_capacity(capacity);
    node
}

/// Poll `cond` on the (usually paused) clock until it holds.
pub async fn eventually(mut cond: impl FnMut() -> bool) {
    for _ in 0..1_000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not reached");
}

/// Let spawned tasks drain.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

pub fn instance_handle(name: &str, node_id: &str) -> ServiceHandle {
    ServiceHandle {
        service_id: name.to_string(),
        configuration: json!({"plan": "free", "version": "1.0"}),
        credentials: Credentials::new()
            .with("name", name)
            .with("node_id", node_id),
    }
}

pub fn binding_handle(id: &str, instance: &str, node_id: &str, user: &str) -> ServiceHandle {
    ServiceHandle {
        service_id: id.to_string(),
        configuration: json!({
            "plan": "free",
            "version": "1.0",
            "data": {"binding_options": {"privileges": "ro"}}
        }),
        credentials: Credentials::new()
            .with("name", instance)
            .with("node_id", node_id)
            .with("user", user)
            .with("username", user),
    }
}
