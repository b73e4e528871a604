//! Live worker nodes, rebuilt from announcements.
//!
//! The registry also keeps a per-node count of provision requests in flight.
//! While that count is non-zero the coordinator's own capacity accounting
//! wins over whatever the node announces, because an announcement may have
//! been sent before the node saw the request.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use brokerd_messages::types::Announcement;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq)]
pub struct NodeRecord {
    pub id: String,
    pub plan: String,
    pub available_capacity: i64,
    pub capacity_unit: i64,
    pub supported_versions: BTreeSet<String>,
    pub last_seen: Instant,
    pub last_seen_at: DateTime<Utc>,
}

impl NodeRecord {
    fn from_announcement(announcement: Announcement, now: Instant) -> Self {
        Self {
            id: announcement.id,
            plan: announcement.plan,
            available_capacity: announcement.available_capacity,
            capacity_unit: announcement.capacity_unit,
            supported_versions: announcement.supported_versions.into_iter().collect(),
            last_seen: now,
            last_seen_at: Utc::now(),
        }
    }

    pub fn supports(&self, version: &str) -> bool {
        self.supported_versions.contains(version)
    }
}

/// What an announcement did to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnounceOutcome {
    Added,
    Replaced,
    /// Capacity was ignored because requests are outstanding.
    CapacityKept,
}

/// Snapshot of one node for stats.
#[derive(Debug, Clone, Serialize)]
pub struct NodeSummary {
    pub id: String,
    pub plan: String,
    pub available_capacity: i64,
    pub capacity_unit: i64,
    pub pending_requests: u32,
    pub supported_versions: Vec<String>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: BTreeMap<String, NodeRecord>,
    pending: HashMap<String, u32>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn announce(&mut self, announcement: Announcement, now: Instant) -> AnnounceOutcome {
        let pending = self.pending(&announcement.id);
        let mut record = NodeRecord::from_announcement(announcement, now);

        match self.nodes.get(&record.id) {
            Some(existing) if pending > 0 => {
                debug!(
                    node_id = %record.id,
                    pending,
                    kept = existing.available_capacity,
                    announced = record.available_capacity,
                    "Ignoring announced capacity while requests are outstanding"
                );
                record.available_capacity = existing.available_capacity;
                self.nodes.insert(record.id.clone(), record);
                AnnounceOutcome::CapacityKept
            }
            Some(_) => {
                self.nodes.insert(record.id.clone(), record);
                AnnounceOutcome::Replaced
            }
            None => {
                info!(node_id = %record.id, plan = %record.plan, "Node joined");
                self.nodes.insert(record.id.clone(), record);
                AnnounceOutcome::Added
            }
        }
    }

    /// Drop nodes not heard from within `stale_after`. Returns the removed
    /// ids.
    ///
    /// Pending counters survive the prune: a request sent before the node
    /// went quiet still owns its slot, and its guard releases it whether or
    /// not the node has announced again since.
    pub fn prune(&mut self, now: Instant, stale_after: Duration) -> Vec<String> {
        let stale: Vec<String> = self
            .nodes
            .values()
            .filter(|n| now.saturating_duration_since(n.last_seen) > stale_after)
            .map(|n| n.id.clone())
            .collect();

        for id in &stale {
            self.nodes.remove(id);
            info!(node_id = %id, pending = self.pending(id), "Pruned stale node");
        }
        stale
    }

    pub fn get(&self, id: &str) -> Option<&NodeRecord> {
        self.nodes.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: &str) -> Option<&mut NodeRecord> {
        self.nodes.get_mut(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeRecord> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn pending(&self, id: &str) -> u32 {
        self.pending.get(id).copied().unwrap_or(0)
    }

    pub(crate) fn begin_request(&mut self, id: &str) {
        *self.pending.entry(id.to_string()).or_insert(0) += 1;
    }

    /// Never goes below zero.
    pub(crate) fn end_request(&mut self, id: &str) {
        if let Some(count) = self.pending.get_mut(id) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.pending.remove(id);
            }
        }
    }

    pub fn summaries(&self) -> Vec<NodeSummary> {
        self.nodes
            .values()
            .map(|n| NodeSummary {
                id: n.id.clone(),
                plan: n.plan.clone(),
                available_capacity: n.available_capacity,
                capacity_unit: n.capacity_unit,
                pending_requests: self.pending(&n.id),
                supported_versions: n.supported_versions.iter().cloned().collect(),
                last_seen: n.last_seen_at,
            })
            .collect()
    }
}

pub type SharedRegistry = Arc<Mutex<NodeRegistry>>;

/// An outstanding request to one node.
///
/// Created with the pending counter already incremented; dropping it
/// decrements exactly once, whether the request got a reply, timed out or
/// was abandoned.
#[derive(Debug)]
pub struct PendingGuard {
    registry: SharedRegistry,
    node_id: String,
}

impl PendingGuard {
    /// Caller must already hold the registry lock; takes `&mut` to prove it.
    pub(crate) fn begin(
        registry: &SharedRegistry,
        locked: &mut NodeRegistry,
        node_id: &str,
    ) -> Self {
        locked.begin_request(node_id);
        Self {
            registry: registry.clone(),
            node_id: node_id.to_string(),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.registry.lock().end_request(&self.node_id);
    }
}
