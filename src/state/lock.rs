//! State lock records.
//!
//! A run holds the lock from loading the state until it is saved again, so
//! two processes never claim attributes against the same stale ledger. The
//! lock names the operation that took it, which is what a blocked user sees.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Seconds after which an abandoned lock may be taken over.
pub const LOCK_TTL_SECS: i64 = 300;

/// Persisted lock record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    /// Identifier needed to release the lock.
    pub lock_id: String,
    /// Process or user holding the lock.
    pub holder: String,
    /// Operation the holder is running, e.g. `run edge/east`.
    #[serde(default)]
    pub operation: String,
    /// Acquisition time.
    pub acquired_at: DateTime<Utc>,
    /// Takeover time.
    pub expires_at: DateTime<Utc>,
}

impl LockInfo {
    /// Creates a lock for an operation.
    ///
    /// An empty holder is replaced by [`generate_holder_id`].
    #[must_use]
    pub fn new(holder: &str, operation: &str) -> Self {
        let acquired_at = Utc::now();
        Self {
            lock_id: Uuid::new_v4().to_string(),
            holder: if holder.is_empty() {
                generate_holder_id()
            } else {
                holder.to_string()
            },
            operation: operation.to_string(),
            acquired_at,
            expires_at: acquired_at + Duration::seconds(LOCK_TTL_SECS),
        }
    }

    /// Returns true once the lock may be taken over.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// Seconds left before the lock expires.
    #[must_use]
    pub fn remaining_secs(&self) -> i64 {
        (self.expires_at - Utc::now()).num_seconds().max(0)
    }

    /// Holder and operation, as shown in lock conflicts.
    #[must_use]
    pub fn describe(&self) -> String {
        if self.operation.is_empty() {
            self.holder.clone()
        } else {
            format!("{} ({})", self.holder, self.operation)
        }
    }
}

/// Identifier of this process: `hostname-pid-random`.
#[must_use]
pub fn generate_holder_id() -> String {
    let host = hostname::get().map_or_else(|_| String::from("unknown"), |h| h.to_string_lossy().into_owned());
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{host}-{}-{}", std::process::id(), &suffix[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_lock() {
        let lock = LockInfo::new("ci", "run edge/east");
        assert_eq!(lock.describe(), "ci (run edge/east)");
        assert!(!lock.is_expired());
        assert!(lock.remaining_secs() > 0);
    }

    #[test]
    fn test_expired_lock() {
        let mut lock = LockInfo::new("ci", "");
        lock.expires_at = Utc::now() - Duration::seconds(1);
        assert!(lock.is_expired());
        assert_eq!(lock.remaining_secs(), 0);
        assert_eq!(lock.describe(), "ci");
    }

    #[test]
    fn test_generated_holder() {
        let lock = LockInfo::new("", "plan");
        assert!(lock.holder.contains(&std::process::id().to_string()));
        assert_ne!(generate_holder_id(), generate_holder_id());
    }
}
