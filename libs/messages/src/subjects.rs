//! Subject naming.
//!
//! All subjects live under the service name. Per-node subjects end with the
//! node id; broadcast subjects do not.

/// Subject builder for one service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subjects {
    service: String,
}

impl Subjects {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Broadcast asking every node to announce itself.
    pub fn discover(&self) -> String {
        format!("{}.discover", self.service)
    }

    /// Periodic node announcements.
    pub fn announce(&self) -> String {
        format!("{}.announce", self.service)
    }

    pub fn provision(&self, node_id: &str) -> String {
        format!("{}.provision.{}", self.service, node_id)
    }

    pub fn unprovision(&self, node_id: &str) -> String {
        format!("{}.unprovision.{}", self.service, node_id)
    }

    pub fn bind(&self, node_id: &str) -> String {
        format!("{}.bind.{}", self.service, node_id)
    }

    pub fn unbind(&self, node_id: &str) -> String {
        format!("{}.unbind.{}", self.service, node_id)
    }

    pub fn restore(&self, node_id: &str) -> String {
        format!("{}.restore.{}", self.service, node_id)
    }

    /// Migration subjects: `{service}.{action}_instance.{node}`.
    pub fn migration(&self, action: &str, node_id: &str) -> String {
        format!("{}.{}_instance.{}", self.service, action, node_id)
    }

    /// Broadcast asking every node to report its local handles.
    pub fn check_orphan(&self) -> String {
        format!("{}.check_orphan", self.service)
    }

    /// Where nodes send their handle reports.
    pub fn node_handles(&self) -> String {
        format!("{}.node_handles", self.service)
    }

    pub fn purge_orphan(&self, node_id: &str) -> String {
        format!("{}.purge_orphan.{}", self.service, node_id)
    }
}
