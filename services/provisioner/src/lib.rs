//! brokerd provisioner.
//!
//! Routes lifecycle operations for backing-service instances to a pool of
//! worker nodes over a message bus. Nodes announce themselves; the
//! provisioner tracks them, picks one per new instance by plan, version and
//! capacity, and keeps an in-memory view of every instance and binding
//! seeded from an external canonical store.
//!
//! An embedding gateway builds a [`Provisioner`], calls
//! [`workers::spawn_workers`], and serves [`api::create_router`] for
//! operators. The `brokerd` binary does the same from `BROKER_*` variables
//! through [`service::serve`], with nodes reached over NATS.

pub mod api;
pub mod config;
pub mod error;
pub mod handles;
pub mod lifecycle;
pub mod orphans;
pub mod provisioner;
pub mod recovery;
pub mod registry;
pub mod router;
pub mod selector;
pub mod service;
pub mod workers;

pub use config::Config;
pub use error::{BrokerError, BrokerResult};
pub use lifecycle::MigrationAction;
pub use provisioner::{Provisioner, ProvisionerStats};
