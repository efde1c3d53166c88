//! Database snapshot and transactions.
//!
//! The [`Database`] bundles the object store with the ledger tables so that
//! a design run can mutate both and commit or roll back as one unit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{DesignError, Result, StateError};
use crate::ledger::Ledger;

use super::memory::MemoryStore;

/// Current persisted state version.
pub const STATE_VERSION: &str = "1";

/// Objects plus ownership ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Database {
    /// State format version.
    pub version: String,
    /// Stored domain objects.
    pub objects: MemoryStore,
    /// Designs, deployments and change sets.
    pub ledger: Ledger,
    /// Time of the last committed transaction.
    pub last_updated: Option<DateTime<Utc>>,
}

/// Database shared between concurrent tasks.
///
/// Holding the lock for a whole run serializes ownership claims.
pub type SharedDatabase = Arc<tokio::sync::Mutex<Database>>;

impl Database {
    /// Creates an empty database.
    #[must_use]
    pub fn new() -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            objects: MemoryStore::new(),
            ledger: Ledger::default(),
            last_updated: None,
        }
    }

    /// Wraps the database for shared use.
    #[must_use]
    pub fn shared(self) -> SharedDatabase {
        Arc::new(tokio::sync::Mutex::new(self))
    }

    /// Checks the persisted version against [`STATE_VERSION`].
    ///
    /// # Errors
    ///
    /// Returns an error if the versions differ.
    pub fn check_version(&self) -> Result<()> {
        if self.version == STATE_VERSION {
            Ok(())
        } else {
            Err(DesignError::State(StateError::VersionMismatch {
                expected: STATE_VERSION.to_string(),
                found: self.version.clone(),
            }))
        }
    }

    /// Begins a transaction over this database.
    pub fn begin(&mut self) -> Transaction<'_> {
        Transaction::begin(self)
    }
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot transaction over a [`Database`].
///
/// Dropping the transaction without calling [`Transaction::commit`] restores
/// the database to its state at [`Transaction::begin`].
#[derive(Debug)]
pub struct Transaction<'a> {
    db: &'a mut Database,
    snapshot: Option<Database>,
    id: Uuid,
}

impl<'a> Transaction<'a> {
    /// Starts a transaction by snapshotting the database.
    pub fn begin(db: &'a mut Database) -> Self {
        let id = Uuid::new_v4();
        debug!("Begin transaction {id}");
        let snapshot = Some(db.clone());
        Self { db, snapshot, id }
    }

    /// Transaction identifier, used in logs.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Keeps every change made since the transaction began.
    pub fn commit(mut self) {
        self.snapshot = None;
        self.db.last_updated = Some(Utc::now());
        debug!("Committed transaction {}", self.id);
    }

    /// Discards every change made since the transaction began.
    pub fn rollback(mut self) {
        self.restore();
    }

    fn restore(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            *self.db = snapshot;
            warn!("Rolled back transaction {}", self.id);
        }
    }
}

impl Deref for Transaction<'_> {
    type Target = Database;

    fn deref(&self) -> &Self::Target {
        self.db
    }
}

impl DerefMut for Transaction<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.db
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        self.restore();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Attributes, ObjectStore};

    #[test]
    fn test_commit_keeps_changes() {
        let mut db = Database::new();
        let mut tx = db.begin();
        tx.objects.create("site", Attributes::new());
        tx.commit();

        assert_eq!(db.objects.len(), 1);
        assert!(db.last_updated.is_some());
    }

    #[test]
    fn test_drop_rolls_back() {
        let mut db = Database::new();
        {
            let mut tx = db.begin();
            tx.objects.create("site", Attributes::new());
            assert_eq!(tx.objects.len(), 1);
        }
        assert!(db.objects.is_empty());

        let mut tx = db.begin();
        tx.objects.create("site", Attributes::new());
        tx.rollback();
        assert!(db.objects.is_empty());
    }

    #[test]
    fn test_version_check() {
        let mut db = Database::new();
        assert!(db.check_version().is_ok());
        db.version = String::from("0");
        assert!(db.check_version().is_err());
    }
}
