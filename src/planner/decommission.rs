//! Decommission engine.
//!
//! This module reverts what a deployment recorded: objects it fully
//! controls are deleted and attributes it only owns are restored to the
//! values they had before the deployment first wrote them.

use clap::ValueEnum;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{DependencyError, DesignError, Result};
use crate::ledger::{AttributeChange, ChangeSet, ChangeSetKind, Ledger, Record, Scope};
use crate::store::{Attributes, Database, ObjectRef, ObjectStore};

/// What happens to recorded changes when ownership ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DecommissionMode {
    /// Delete owned objects and restore owned attributes.
    #[default]
    Revert,
    /// Drop ownership and leave the data untouched.
    Release,
}

impl fmt::Display for DecommissionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Revert => write!(f, "revert"),
            Self::Release => write!(f, "release"),
        }
    }
}

/// Engine reverting deployment records.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecommissionEngine {
    mode: DecommissionMode,
}

impl DecommissionEngine {
    /// Creates an engine for a mode.
    #[must_use]
    pub const fn new(mode: DecommissionMode) -> Self {
        Self { mode }
    }

    /// The engine's mode.
    #[must_use]
    pub const fn mode(&self) -> DecommissionMode {
        self.mode
    }

    /// Checks that no other active deployment depends on an object about to
    /// be deleted.
    ///
    /// An object is blocked when another deployment records it, or owns an
    /// object or attribute that references it.
    ///
    /// # Errors
    ///
    /// Returns [`DependencyError::Blocked`] for the first blocked object.
    pub fn preflight(
        &self,
        ledger: &Ledger,
        store: &dyn ObjectStore,
        deployment: Uuid,
        records: &[Record],
    ) -> Result<()> {
        if self.mode == DecommissionMode::Release {
            return Ok(());
        }

        for record in records.iter().filter(|r| r.is_full()) {
            let mut blockers: Vec<String> = ledger
                .claims_on(&record.object, Some(deployment))
                .into_iter()
                .map(|(d, _)| d.name.clone())
                .collect();

            for (referrer, field) in store.referrers(&record.object) {
                let owner = ledger
                    .owner_of(&referrer, &field)
                    .or_else(|| ledger.full_owner(&referrer))
                    .filter(|d| d.id != deployment);
                if let Some(owner) = owner {
                    blockers.push(owner.name.clone());
                }
            }

            if !blockers.is_empty() {
                blockers.sort();
                blockers.dedup();
                return Err(blocked(store, record, blockers));
            }
        }
        Ok(())
    }

    /// Checks that a re-run does not remove what its own new records point at.
    ///
    /// # Errors
    ///
    /// Returns [`DependencyError::Blocked`] naming `deployment` for the first
    /// removed object still referenced by an object in `current`.
    pub fn check_rebuilt(
        &self,
        store: &dyn ObjectStore,
        deployment: &str,
        removals: &[Record],
        current: &[Record],
    ) -> Result<()> {
        if self.mode == DecommissionMode::Release {
            return Ok(());
        }

        for record in removals.iter().filter(|r| r.is_full()) {
            let referenced = store
                .referrers(&record.object)
                .iter()
                .any(|(referrer, _)| current.iter().any(|r| &r.object == referrer));
            if referenced {
                return Err(blocked(store, record, vec![deployment.to_string()]));
            }
        }
        Ok(())
    }

    /// Objects outside `records` whose relations point at an object the
    /// records would delete.
    #[must_use]
    pub fn outside_referrers(&self, store: &dyn ObjectStore, records: &[Record]) -> Vec<ObjectRef> {
        if self.mode == DecommissionMode::Release {
            return Vec::new();
        }

        let mut referrers: Vec<ObjectRef> = Vec::new();
        for record in records.iter().filter(|r| r.is_full()) {
            for (referrer, _) in store.referrers(&record.object) {
                if !records.iter().any(|r| r.object == referrer) && !referrers.contains(&referrer) {
                    referrers.push(referrer);
                }
            }
        }
        referrers
    }

    /// Reverts records, newest first.
    ///
    /// Returns audit records describing every write that was made.
    ///
    /// # Errors
    ///
    /// Returns an error if a store write fails.
    pub fn execute(&self, store: &mut dyn ObjectStore, records: &[Record]) -> Result<Vec<Record>> {
        let mut ordered: Vec<&Record> = records.iter().collect();
        ordered.sort_by(|a, b| b.index.cmp(&a.index));

        let mut audit = Vec::new();
        for record in ordered {
            if self.mode == DecommissionMode::Release {
                info!(object = %record.object, key = %record.key, "Released ownership");
                continue;
            }

            let Some(current) = store.get(&record.object).cloned() else {
                warn!(object = %record.object, "Object already gone, skipping");
                continue;
            };

            match record.scope {
                Scope::Full => {
                    store.delete(&record.object)?;
                    info!(object = %record.object, label = %current.label(), "Deleted object");
                    audit.push(Record {
                        changes: current
                            .attributes
                            .iter()
                            .map(|(field, value)| {
                                (field.clone(), AttributeChange { old: value.clone(), new: Value::Null })
                            })
                            .collect(),
                        index: audit.len(),
                        ..record.clone()
                    });
                }
                Scope::Attributes => {
                    let mut restored = Attributes::new();
                    let mut changes = IndexMap::new();
                    for (field, change) in &record.changes {
                        let before = current.get(field).cloned().unwrap_or(Value::Null);
                        let after = revert_value(current.get(field), change);
                        info!(
                            object = %record.object,
                            field = %field,
                            old = %before,
                            new = %after,
                            "Reverted attribute"
                        );
                        restored.insert(field.clone(), after.clone());
                        changes.insert(field.clone(), AttributeChange { old: before, new: after });
                    }
                    store.update(&record.object, restored)?;
                    audit.push(Record {
                        changes,
                        index: audit.len(),
                        ..record.clone()
                    });
                }
            }
        }
        Ok(audit)
    }

    /// Decommissions a whole deployment.
    ///
    /// Runs the preflight, reverts the active change set, marks the
    /// deployment decommissioned and appends a decommission change set
    /// holding the audit records.
    ///
    /// # Errors
    ///
    /// Returns an error if the deployment is blocked, already decommissioned
    /// or a store write fails.
    pub fn decommission(&self, db: &mut Database, deployment: Uuid, actor: &str) -> Result<ChangeSet> {
        let Database { objects, ledger, .. } = db;
        let records = ledger
            .active_change_set(deployment)
            .map(|cs| cs.records.clone())
            .unwrap_or_default();

        self.preflight(ledger, &*objects, deployment, &records)?;
        let audit = self.execute(&mut *objects, &records)?;
        ledger.mark_decommissioned(deployment, actor)?;

        let mut change_set = ChangeSet::new(Some(deployment), ChangeSetKind::Decommission);
        change_set.records = audit;
        ledger.push_change_set(change_set.clone());
        info!(
            "Decommissioned deployment {deployment} ({} record(s), mode {})",
            records.len(),
            self.mode
        );
        Ok(change_set)
    }
}

/// Computes the value an attribute returns to.
///
/// Mappings restore the keys the deployment wrote and regain the keys its
/// write dropped. Lists drop the items it added and regain the items it
/// removed. Anything else gets its old value back.
#[must_use]
pub fn revert_value(current: Option<&Value>, change: &AttributeChange) -> Value {
    match (&change.old, &change.new, current) {
        (old, Value::Object(new), Some(Value::Object(current))) => {
            let old = old.as_object();
            let mut restored = current.clone();
            for key in new.keys() {
                match old.and_then(|o| o.get(key)) {
                    Some(value) => {
                        restored.insert(key.clone(), value.clone());
                    }
                    None => {
                        restored.remove(key);
                    }
                }
            }
            for (key, value) in old.into_iter().flatten() {
                if !new.contains_key(key) && !restored.contains_key(key) {
                    restored.insert(key.clone(), value.clone());
                }
            }
            Value::Object(restored)
        }
        (old, Value::Array(new), Some(Value::Array(current))) => {
            let old: &[Value] = old.as_array().map(Vec::as_slice).unwrap_or_default();
            let mut restored: Vec<Value> = current
                .iter()
                .filter(|item| !new.contains(item) || old.contains(item))
                .cloned()
                .collect();
            for item in old {
                if !new.contains(item) && !restored.contains(item) {
                    restored.push(item.clone());
                }
            }
            Value::Array(restored)
        }
        _ => change.old.clone(),
    }
}

fn blocked(store: &dyn ObjectStore, record: &Record, deployments: Vec<String>) -> DesignError {
    let label = store
        .get(&record.object)
        .map_or_else(|| record.object.to_string(), |o| o.label());
    DesignError::Dependency(DependencyError::Blocked {
        object: label,
        deployments,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StateError;
    use crate::ledger::DesignMode;
    use serde_json::json;

    fn attrs(value: Value) -> Attributes {
        value.as_object().cloned().unwrap_or_default()
    }

    fn change(old: Value, new: Value) -> AttributeChange {
        AttributeChange { old, new }
    }

    fn record(object: &ObjectRef, scope: Scope, index: usize, changes: &[(&str, AttributeChange)]) -> Record {
        Record {
            object: object.clone(),
            key: format!("k{index}"),
            scope,
            changes: changes.iter().map(|(k, c)| ((*k).to_string(), c.clone())).collect(),
            index,
            adopted: false,
        }
    }

    #[test]
    fn test_revert_value_shapes() {
        let dict = change(json!({"a": 1}), json!({"a": 2, "b": 3}));
        assert_eq!(
            revert_value(Some(&json!({"a": 2, "b": 3, "c": 4})), &dict),
            json!({"a": 1, "c": 4})
        );

        let list = change(json!(["x", "y"]), json!(["x", "z"]));
        assert_eq!(revert_value(Some(&json!(["x", "z", "w"])), &list), json!(["x", "w", "y"]));

        let scalar = change(json!("planned"), json!("active"));
        assert_eq!(revert_value(Some(&json!("offline")), &scalar), json!("planned"));
        assert_eq!(revert_value(None, &scalar), json!("planned"));
    }

    #[test]
    fn test_decommission_round_trip() {
        let mut db = Database::new();
        let site = db.objects.create("site", attrs(json!({"name": "s1", "status": "planned"})));
        let design = db.ledger.upsert_design("d", DesignMode::Deployment, "1", "");
        let deployment = db.ledger.create_deployment(design, "east", "1", "tester");

        let device = db
            .objects
            .create("device", attrs(json!({"name": "r1", "site": site.id.to_value()})));
        db.objects
            .update(&site, attrs(json!({"status": "active"})))
            .expect("update");

        let mut cs = ChangeSet::new(Some(deployment), ChangeSetKind::Build);
        cs.records = vec![
            record(&site, Scope::Attributes, 0, &[("status", change(json!("planned"), json!("active")))]),
            record(&device, Scope::Full, 1, &[("name", change(Value::Null, json!("r1")))]),
        ];
        db.ledger.push_change_set(cs);

        let engine = DecommissionEngine::default();
        let audit = engine.decommission(&mut db, deployment, "tester").expect("decommission");
        assert_eq!(audit.records.len(), 2);
        assert_eq!(audit.records[0].object, device);

        assert!(db.objects.get(&device).is_none());
        let stored = db.objects.require(&site).expect("site");
        assert_eq!(stored.get("status"), Some(&json!("planned")));
        assert!(db.ledger.active_change_set(deployment).is_none());

        let err = engine.decommission(&mut db, deployment, "tester").expect_err("twice");
        assert!(matches!(err, DesignError::State(StateError::AlreadyDecommissioned { .. })));
    }

    #[test]
    fn test_preflight_blocks_on_foreign_referrer() {
        let mut db = Database::new();
        let design = db.ledger.upsert_design("d", DesignMode::Deployment, "1", "");
        let first = db.ledger.create_deployment(design, "first", "1", "tester");
        let second = db.ledger.create_deployment(design, "second", "1", "tester");

        let site = db.objects.create("site", attrs(json!({"name": "s1"})));
        let device = db
            .objects
            .create("device", attrs(json!({"name": "r1", "site": site.id.to_value()})));

        let mut mine = ChangeSet::new(Some(first), ChangeSetKind::Build);
        mine.records = vec![record(&site, Scope::Full, 0, &[])];
        db.ledger.push_change_set(mine);
        let mut theirs = ChangeSet::new(Some(second), ChangeSetKind::Build);
        theirs.records = vec![record(&device, Scope::Full, 0, &[])];
        db.ledger.push_change_set(theirs);

        let err = DecommissionEngine::default()
            .decommission(&mut db, first, "tester")
            .expect_err("blocked");
        match err {
            DesignError::Dependency(DependencyError::Blocked { deployments, .. }) => {
                assert_eq!(deployments, vec![String::from("second")]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(db.objects.get(&site).is_some());

        let released = DecommissionEngine::new(DecommissionMode::Release)
            .decommission(&mut db, first, "tester")
            .expect("release");
        assert!(released.records.is_empty());
        assert!(db.objects.get(&site).is_some());
    }

    #[test]
    fn test_rebuilt_records_keep_their_targets() {
        let mut db = Database::new();
        let site = db.objects.create("site", attrs(json!({"name": "s1"})));
        let device = db
            .objects
            .create("device", attrs(json!({"name": "r1", "site": site.id.to_value()})));
        let cable = db
            .objects
            .create("cable", attrs(json!({"label": "c1", "site": site.id.to_value()})));

        let removals = vec![record(&site, Scope::Full, 0, &[])];
        let current = vec![record(&device, Scope::Full, 0, &[])];
        let engine = DecommissionEngine::default();

        match engine.check_rebuilt(&db.objects, "east", &removals, &current) {
            Err(DesignError::Dependency(DependencyError::Blocked { deployments, .. })) => {
                assert_eq!(deployments, vec![String::from("east")]);
            }
            other => panic!("expected blocked removal, got {other:?}"),
        }
        assert!(engine.check_rebuilt(&db.objects, "east", &removals, &[]).is_ok());

        assert_eq!(engine.outside_referrers(&db.objects, &removals), vec![device.clone(), cable]);
        let both = vec![record(&site, Scope::Full, 0, &[]), record(&device, Scope::Full, 1, &[])];
        assert_eq!(engine.outside_referrers(&db.objects, &both).len(), 1);
        assert!(
            DecommissionEngine::new(DecommissionMode::Release)
                .check_rebuilt(&db.objects, "east", &removals, &current)
                .is_ok()
        );
    }
}
