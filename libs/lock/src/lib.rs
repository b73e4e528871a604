//! Lease-based distributed lock.
//!
//! Independent worker processes serialize per-instance lifecycle jobs
//! (snapshot, rollback, delete) through a lock whose only shared state is one
//! key in a remote coordination store. The key holds the absolute expiration
//! of the current lease in unix milliseconds.
//!
//! Every transition on the key goes through
//! [`CoordinationStore::compare_and_set`]; nothing here ever overwrites the
//! key unconditionally.
//!
//! ```ignore
//! let lock = DistributedLock::new("inst-42", store, LockConfig::default());
//! let snapshot = lock.run(|_lease| async { take_snapshot().await }).await?;
//! ```

mod error;
mod etcd;
mod lock;
mod memory;
mod store;

pub use error::{LockError, StoreError};
pub use etcd::EtcdStore;
pub use lock::{lock_key, DistributedLock, Lease, LockConfig, MIN_RENEW_INTERVAL};
pub use memory::InMemoryStore;
pub use store::CoordinationStore;
