//! Persistence seam for the design database.

use async_trait::async_trait;

use crate::error::Result;
use crate::store::Database;

use super::lock::LockInfo;

/// Backend persisting the [`Database`] between runs.
///
/// Callers hold the lock around load and save so claims made by one run are
/// visible to the next.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Loads the database, `None` before the first save.
    async fn load(&self) -> Result<Option<Database>>;

    /// Replaces the persisted database.
    async fn save(&self, db: &Database) -> Result<()>;

    /// Removes the persisted database and any lock.
    async fn delete(&self) -> Result<()>;

    /// Returns true once a database has been saved.
    async fn exists(&self) -> Result<bool>;

    /// Takes the lock for an operation.
    ///
    /// Fails with `LockedByOther` while an unexpired lock is held.
    async fn acquire_lock(&self, holder: &str, operation: &str) -> Result<LockInfo>;

    /// Releases the lock if `lock_id` still holds it.
    async fn release_lock(&self, lock_id: &str) -> Result<()>;

    /// Removes the lock whoever holds it.
    async fn force_unlock(&self) -> Result<()>;

    /// Current lock, expired or not.
    async fn get_lock_info(&self) -> Result<Option<LockInfo>>;

    /// Returns true while an unexpired lock is held.
    async fn is_locked(&self) -> Result<bool> {
        Ok(self.get_lock_info().await?.is_some_and(|lock| !lock.is_expired()))
    }

    /// Short backend name for display.
    fn backend_type(&self) -> &'static str;

    /// Loads the database, or an empty one on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be read or has another format version.
    async fn load_or_default(&self) -> Result<Database> {
        match self.load().await? {
            Some(db) => {
                db.check_version()?;
                Ok(db)
            }
            None => Ok(Database::new()),
        }
    }
}
