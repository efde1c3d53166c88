//! Object store module.
//!
//! This module provides the persistent data store the builder writes into:
//! - Stored objects, typed references and query predicates
//! - The [`ObjectStore`] trait and its in-memory implementation
//! - The [`Database`] snapshot (objects plus ledger) and its transactions

mod database;
mod memory;
mod object;

pub use database::{Database, SharedDatabase, STATE_VERSION, Transaction};
pub use memory::{MemoryStore, ObjectStore};
pub use object::{Attributes, ObjectId, ObjectRef, Predicate, StoredObject, describe_query};
