//! State management module for the Halldyll design builder.
//!
//! This module persists the [`Database`](crate::store::Database) between
//! runs: stored objects plus the ledger of designs, deployments and change
//! sets. A lock file keeps concurrent processes from interleaving runs.

mod local;
mod lock;
mod store;

pub use local::LocalStateStore;
pub use lock::{LOCK_TTL_SECS, LockInfo, generate_holder_id};
pub use store::StateStore;
