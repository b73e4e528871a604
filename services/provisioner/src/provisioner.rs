//! The coordinator handle shared by workers, the ops API and the gateway.

use std::sync::Arc;

use brokerd_bus::MessageBus;
use brokerd_messages::types::{Announcement, DiscoverRequest};
use brokerd_messages::{ServiceHandle, Subjects};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, instrument};

use crate::config::Config;
use crate::error::BrokerResult;
use crate::handles::{HandleSource, HandleStore};
use crate::orphans::{OrphanState, SweepRecord};
use crate::registry::{AnnounceOutcome, NodeRecord, NodeRegistry, NodeSummary, SharedRegistry};
use crate::router::RequestRouter;

/// Provisioner state.
///
/// Cheap to clone. Registry, handle store and orphan state each sit behind
/// their own lock; no lock is ever held across an `.await`.
#[derive(Clone)]
pub struct Provisioner {
    inner: Arc<Inner>,
}

struct Inner {
    config: Config,
    subjects: Subjects,
    bus: Arc<dyn MessageBus>,
    router: RequestRouter,
    registry: SharedRegistry,
    handles: Mutex<HandleStore>,
    source: Arc<dyn HandleSource>,
    orphans: Mutex<OrphanState>,
}

/// Operational snapshot, served on `/varz`.
#[derive(Debug, Clone, Serialize)]
pub struct ProvisionerStats {
    pub service: String,
    pub nodes: Vec<NodeSummary>,
    pub instances: usize,
    pub bindings: usize,
    pub orphan_instances: usize,
    pub orphan_bindings: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sweep: Option<SweepRecord>,
}

impl Provisioner {
    pub fn new(config: Config, bus: Arc<dyn MessageBus>, source: Arc<dyn HandleSource>) -> Self {
        let subjects = Subjects::new(config.service_name.clone());
        let router = RequestRouter::new(bus.clone(), config.node_timeout);
        Self {
            inner: Arc::new(Inner {
                config,
                subjects,
                bus,
                router,
                registry: Arc::new(Mutex::new(NodeRegistry::new())),
                handles: Mutex::new(HandleStore::new()),
                source,
                orphans: Mutex::new(OrphanState::default()),
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn subjects(&self) -> &Subjects {
        &self.inner.subjects
    }

    pub(crate) fn bus(&self) -> &Arc<dyn MessageBus> {
        &self.inner.bus
    }

    pub(crate) fn router(&self) -> &RequestRouter {
        &self.inner.router
    }

    pub(crate) fn registry(&self) -> &SharedRegistry {
        &self.inner.registry
    }

    pub(crate) fn handles(&self) -> &Mutex<HandleStore> {
        &self.inner.handles
    }

    pub(crate) fn source(&self) -> &Arc<dyn HandleSource> {
        &self.inner.source
    }

    pub(crate) fn orphan_state(&self) -> &Mutex<OrphanState> {
        &self.inner.orphans
    }

    pub fn record_announcement(&self, announcement: Announcement) -> AnnounceOutcome {
        self.inner
            .registry
            .lock()
            .announce(announcement, Instant::now())
    }

    /// Drop nodes past the staleness threshold.
    pub fn prune_nodes(&self) -> Vec<String> {
        self.inner
            .registry
            .lock()
            .prune(Instant::now(), self.inner.config.stale_node_threshold)
    }

    pub fn node(&self, node_id: &str) -> Option<NodeRecord> {
        self.inner.registry.lock().get(node_id).cloned()
    }

    pub fn pending_requests(&self, node_id: &str) -> u32 {
        self.inner.registry.lock().pending(node_id)
    }

    pub fn handle(&self, service_id: &str) -> Option<ServiceHandle> {
        self.inner.handles.lock().get(service_id).cloned()
    }

    /// Ask every node to announce now.
    pub async fn discover(&self) -> BrokerResult<()> {
        self.inner
            .router
            .publish(&self.inner.subjects.discover(), &DiscoverRequest::default())
            .await
    }

    /// Reseed the handle store from the canonical source. Returns the number
    /// of handles loaded.
    #[instrument(skip(self))]
    pub async fn refresh_handles(&self) -> BrokerResult<usize> {
        let handles = self.inner.source.fetch_handles().await?;
        let count = handles.len();
        self.inner.handles.lock().replace_all(handles);
        info!(count, "Handles refreshed from canonical store");
        Ok(count)
    }

    pub fn stats(&self) -> ProvisionerStats {
        let nodes = self.inner.registry.lock().summaries();
        let (instances, bindings) = {
            let handles = self.inner.handles.lock();
            (handles.instance_count(), handles.binding_count())
        };
        let orphans = self.inner.orphans.lock();

        ProvisionerStats {
            service: self.inner.config.service_name.clone(),
            nodes,
            instances,
            bindings,
            orphan_instances: orphans.confirmed().instance_count(),
            orphan_bindings: orphans.confirmed().binding_count(),
            last_sweep: orphans.last_sweep().cloned(),
        }
    }
}
