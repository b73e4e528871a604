//! Test support for brokerd.
//!
//! [`FakeNode`] stands in for a worker node on a [`brokerd_bus::LocalBus`]:
//! it answers every per-node lifecycle subject, announces itself, reports its
//! handles on `check_orphan`, and records everything it was asked to do.

mod node;

pub use node::{FakeNode, Received};
