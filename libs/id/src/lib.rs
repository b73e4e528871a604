//! # brokerd-id
//!
//! Identifiers minted by the provisioner itself.
//!
//! Instance ids and node ids are chosen by worker nodes and travel as plain
//! strings. Everything the coordinator generates (request correlation ids,
//! binding ids, reconciliation sweep ids) uses a prefixed ULID:
//!
//! - `req_01HV4Z2WQXKJNM8GPQY6VBKC3D`
//! - `bind_01HV4Z3MXNKPQR9HSTZ7WCLD4E`
//! - `swp_01HV4Z4NYPLTRS0JTUA8XDME5F`
//!
//! The prefix keeps the types apart in logs and in the canonical store, and the
//! ULID keeps them sortable by creation time.

mod error;
mod macros;
mod types;

pub use error::{parse_prefixed, IdError};
pub use types::*;
pub use ulid::Ulid;
