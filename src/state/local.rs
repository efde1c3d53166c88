//! Local file-based state storage backend.
//!
//! The database is written as pretty JSON next to the design definition,
//! with a sibling `state.lock` held for the duration of a run.

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::{DesignError, Result, StateError};
use crate::store::Database;

use super::lock::LockInfo;
use super::store::StateStore;

const LOCK_FILE: &str = "state.lock";

/// State kept in a JSON file.
#[derive(Debug, Clone)]
pub struct LocalStateStore {
    state_path: PathBuf,
    lock_path: PathBuf,
}

impl LocalStateStore {
    /// Store writing to `state_path`, locking through a file beside it.
    #[must_use]
    pub fn with_state_path(state_path: impl Into<PathBuf>) -> Self {
        let state_path = state_path.into();
        let lock_path = state_path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .join(LOCK_FILE);
        Self { state_path, lock_path }
    }

    /// Path of the state file.
    #[must_use]
    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
        let content = match fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(corrupted(path, &e)),
        };
        serde_json::from_str(&content).map(Some).map_err(|e| corrupted(path, &e))
    }

    /// Writes `value` through a temporary file renamed over `path`.
    async fn write_json<T: Serialize + Sync>(path: &Path, value: &T) -> Result<()> {
        let content = serde_json::to_string_pretty(value)
            .map_err(|e| DesignError::State(StateError::serialization(e.to_string())))?;
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir).await.map_err(|e| write_failed(path, &e))?;
        }

        let mut temp = path.as_os_str().to_owned();
        temp.push(".tmp");
        let temp = PathBuf::from(temp);
        let mut file = fs::File::create(&temp).await.map_err(|e| write_failed(&temp, &e))?;
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| write_failed(&temp, &e))?;
        file.sync_all().await.map_err(|e| write_failed(&temp, &e))?;
        fs::rename(&temp, path).await.map_err(|e| write_failed(path, &e))?;
        Ok(())
    }

    async fn remove(path: &Path) -> Result<()> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(write_failed(path, &e)),
        }
    }
}

fn corrupted(path: &Path, error: &dyn std::fmt::Display) -> DesignError {
    DesignError::State(StateError::Corrupted {
        message: format!("{}: {error}", path.display()),
    })
}

fn write_failed(path: &Path, error: &std::io::Error) -> DesignError {
    DesignError::State(StateError::write(format!("{}: {error}", path.display())))
}

#[async_trait]
impl StateStore for LocalStateStore {
    async fn load(&self) -> Result<Option<Database>> {
        let db = Self::read_json::<Database>(&self.state_path).await?;
        match &db {
            Some(db) => info!(
                "Loaded state from {} ({} object(s))",
                self.state_path.display(),
                db.objects.len()
            ),
            None => debug!("No state at {}", self.state_path.display()),
        }
        Ok(db)
    }

    async fn save(&self, db: &Database) -> Result<()> {
        Self::write_json(&self.state_path, db).await?;
        info!("Saved state to {}", self.state_path.display());
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        Self::remove(&self.state_path).await?;
        Self::remove(&self.lock_path).await?;
        info!("Deleted state {}", self.state_path.display());
        Ok(())
    }

    async fn exists(&self) -> Result<bool> {
        Ok(fs::try_exists(&self.state_path).await.unwrap_or(false))
    }

    async fn acquire_lock(&self, holder: &str, operation: &str) -> Result<LockInfo> {
        if let Some(existing) = Self::read_json::<LockInfo>(&self.lock_path).await? {
            if !existing.is_expired() {
                return Err(DesignError::State(StateError::LockedByOther {
                    holder: existing.describe(),
                    since: existing.acquired_at.to_rfc3339(),
                }));
            }
            warn!("Taking over expired lock of {}", existing.describe());
        }

        let lock = LockInfo::new(holder, operation);
        Self::write_json(&self.lock_path, &lock).await.map_err(|e| {
            DesignError::State(StateError::LockFailed {
                message: e.to_string(),
            })
        })?;
        debug!("Acquired state lock {} for {}", lock.lock_id, lock.describe());
        Ok(lock)
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        match Self::read_json::<LockInfo>(&self.lock_path).await? {
            Some(existing) if existing.lock_id == lock_id => {
                Self::remove(&self.lock_path).await?;
                debug!("Released state lock {lock_id}");
            }
            Some(existing) => warn!("Lock {lock_id} is no longer held, {} holds it now", existing.describe()),
            None => debug!("Lock {lock_id} already released"),
        }
        Ok(())
    }

    async fn force_unlock(&self) -> Result<()> {
        if let Some(existing) = Self::read_json::<LockInfo>(&self.lock_path).await? {
            warn!("Forcing release of lock held by {}", existing.describe());
        }
        Self::remove(&self.lock_path).await
    }

    async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
        Self::read_json(&self.lock_path).await
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::DesignMode;
    use crate::store::{Attributes, ObjectStore, STATE_VERSION};
    use tempfile::TempDir;

    fn create_test_store() -> (LocalStateStore, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = LocalStateStore::with_state_path(temp_dir.path().join("state").join("state.json"));
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let (store, _temp) = create_test_store();
        assert!(store.load().await.expect("load").is_none());

        let mut db = Database::new();
        db.objects.create("site", Attributes::new());
        db.ledger.upsert_design("edge", DesignMode::Deployment, "1.0.0", "");
        store.save(&db).await.expect("Failed to save state");

        let loaded = store
            .load()
            .await
            .expect("Failed to load state")
            .expect("State should exist");
        assert_eq!(loaded.objects.len(), 1);
        assert!(loaded.ledger.design_by_name("edge").is_some());
    }

    #[tokio::test]
    async fn test_load_or_default_checks_version() {
        let (store, _temp) = create_test_store();

        let db = store.load_or_default().await.expect("Load should not fail");
        assert!(db.objects.is_empty());

        let mut stale = Database::new();
        stale.version = String::from("0");
        store.save(&stale).await.expect("save");
        assert_ne!(STATE_VERSION, "0");
        assert!(matches!(
            store.load_or_default().await,
            Err(DesignError::State(StateError::VersionMismatch { .. }))
        ));
    }

    #[tokio::test]
    async fn test_corrupted_state() {
        let (store, _temp) = create_test_store();
        store.save(&Database::new()).await.expect("save");
        fs::write(store.state_path(), "{ not json").await.expect("write");

        assert!(matches!(
            store.load().await,
            Err(DesignError::State(StateError::Corrupted { .. }))
        ));
    }

    #[tokio::test]
    async fn test_exists_and_delete() {
        let (store, _temp) = create_test_store();

        assert!(!store.exists().await.expect("exists check failed"));
        store.save(&Database::new()).await.expect("Failed to save state");
        assert!(store.exists().await.expect("exists check failed"));

        store.delete().await.expect("delete");
        assert!(!store.exists().await.expect("exists check failed"));
    }

    #[tokio::test]
    async fn test_lock_acquire_release() {
        let (store, _temp) = create_test_store();

        let lock = store
            .acquire_lock("test-holder", "run edge/east")
            .await
            .expect("Failed to acquire lock");
        assert!(store.is_locked().await.expect("is_locked failed"));

        store.release_lock("someone-else").await.expect("foreign release");
        assert!(store.is_locked().await.expect("is_locked failed"));

        store
            .release_lock(&lock.lock_id)
            .await
            .expect("Failed to release lock");
        assert!(!store.is_locked().await.expect("is_locked failed"));
    }

    #[tokio::test]
    async fn test_lock_conflict_and_force_unlock() {
        let (store, _temp) = create_test_store();

        let _lock = store
            .acquire_lock("holder-1", "decommission east")
            .await
            .expect("Failed to acquire first lock");

        match store.acquire_lock("holder-2", "plan").await {
            Err(DesignError::State(StateError::LockedByOther { holder, .. })) => {
                assert_eq!(holder, "holder-1 (decommission east)");
            }
            other => panic!("expected lock conflict, got {other:?}"),
        }

        store.force_unlock().await.expect("force unlock");
        assert!(!store.is_locked().await.expect("is_locked failed"));
    }
}
