//! Instance and binding handles.
//!
//! [`HandleStore`] is the provisioner's in-memory view, keyed by
//! `service_id`. It is seeded from a [`HandleSource`], the external canonical
//! store, and kept current by lifecycle operations.

mod http;
mod source;

use std::collections::BTreeMap;

use brokerd_messages::{HandleKind, ServiceHandle};

pub use http::HttpHandleSource;
pub use source::{HandleSource, HandleSourceError, MemoryHandleSource};

#[derive(Debug, Default)]
pub struct HandleStore {
    handles: BTreeMap<String, ServiceHandle>,
}

impl HandleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace everything with a fresh canonical snapshot.
    pub fn replace_all(&mut self, handles: Vec<ServiceHandle>) {
        self.handles = handles
            .into_iter()
            .map(|h| (h.service_id.clone(), h))
            .collect();
    }

    pub fn upsert(&mut self, handle: ServiceHandle) {
        self.handles.insert(handle.service_id.clone(), handle);
    }

    pub fn remove(&mut self, service_id: &str) -> Option<ServiceHandle> {
        self.handles.remove(service_id)
    }

    pub fn get(&self, service_id: &str) -> Option<&ServiceHandle> {
        self.handles.get(service_id)
    }

    pub fn instance(&self, instance_id: &str) -> Option<&ServiceHandle> {
        self.get(instance_id)
            .filter(|h| h.kind() == HandleKind::Instance)
    }

    pub fn binding(&self, binding_id: &str) -> Option<&ServiceHandle> {
        self.get(binding_id)
            .filter(|h| h.kind() == HandleKind::Binding)
    }

    /// Binding handles whose credentials point at `instance_name`.
    pub fn bindings_of(&self, instance_name: &str) -> Vec<ServiceHandle> {
        self.handles
            .values()
            .filter(|h| h.kind() == HandleKind::Binding && h.instance_name() == Some(instance_name))
            .cloned()
            .collect()
    }

    /// Remove an instance and every binding on it. Returns how many handles
    /// went away.
    pub fn remove_instance(&mut self, instance_id: &str) -> usize {
        let before = self.handles.len();
        self.handles.retain(|id, h| {
            id != instance_id
                && !(h.kind() == HandleKind::Binding && h.instance_name() == Some(instance_id))
        });
        before - self.handles.len()
    }

    pub fn all(&self) -> impl Iterator<Item = &ServiceHandle> {
        self.handles.values()
    }

    pub fn instance_count(&self) -> usize {
        self.all().filter(|h| h.kind() == HandleKind::Instance).count()
    }

    pub fn binding_count(&self) -> usize {
        self.all().filter(|h| h.kind() == HandleKind::Binding).count()
    }
}
