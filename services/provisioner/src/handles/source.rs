use std::collections::BTreeMap;

use async_trait::async_trait;
use brokerd_messages::ServiceHandle;
use parking_lot::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HandleSourceError {
    #[error("handle store request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("handle store returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("handle store unavailable: {0}")]
    Unavailable(String),
}

/// The external canonical store of handles.
#[async_trait]
pub trait HandleSource: Send + Sync {
    async fn fetch_handles(&self) -> Result<Vec<ServiceHandle>, HandleSourceError>;

    /// Persist a handle the provisioner rewrote.
    async fn update_handle(&self, handle: &ServiceHandle) -> Result<(), HandleSourceError>;
}

/// In-process canonical store.
#[derive(Debug, Default)]
pub struct MemoryHandleSource {
    handles: Mutex<BTreeMap<String, ServiceHandle>>,
    rejected: Mutex<Vec<String>>,
    offline: Mutex<bool>,
}

impl MemoryHandleSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_handles(handles: impl IntoIterator<Item = ServiceHandle>) -> Self {
        let source = Self::new();
        for handle in handles {
            source.insert(handle);
        }
        source
    }

    pub fn insert(&self, handle: ServiceHandle) {
        self.handles
            .lock()
            .insert(handle.service_id.clone(), handle);
    }

    pub fn remove(&self, service_id: &str) -> Option<ServiceHandle> {
        self.handles.lock().remove(service_id)
    }

    pub fn get(&self, service_id: &str) -> Option<ServiceHandle> {
        self.handles.lock().get(service_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.handles.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.lock().is_empty()
    }

    /// Make updates of this handle fail.
    pub fn reject_updates_for(&self, service_id: &str) {
        self.rejected.lock().push(service_id.to_string());
    }

    /// Make every call fail while set.
    pub fn set_offline(&self, offline: bool) {
        *self.offline.lock() = offline;
    }

    fn check_online(&self) -> Result<(), HandleSourceError> {
        if *self.offline.lock() {
            return Err(HandleSourceError::Unavailable("offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl HandleSource for MemoryHandleSource {
    async fn fetch_handles(&self) -> Result<Vec<ServiceHandle>, HandleSourceError> {
        self.check_online()?;
        Ok(self.handles.lock().values().cloned().collect())
    }

    async fn update_handle(&self, handle: &ServiceHandle) -> Result<(), HandleSourceError> {
        self.check_online()?;
        if self.rejected.lock().contains(&handle.service_id) {
            return Err(HandleSourceError::Status {
                status: 409,
                body: format!("update of {} rejected", handle.service_id),
            });
        }
        self.insert(handle.clone());
        Ok(())
    }
}
