//! Ledger record types.
//!
//! These types are the persistent lineage of design runs: which design was
//! run under which deployment, and which objects and attributes each run
//! touched together with the values needed to revert them.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

use crate::store::ObjectRef;

/// How a design's runs are tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DesignMode {
    /// One-shot runs without lineage.
    AdHoc,
    /// Named deployments with ownership, re-runs and decommissioning.
    #[default]
    Deployment,
}

impl fmt::Display for DesignMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AdHoc => write!(f, "ad-hoc"),
            Self::Deployment => write!(f, "deployment"),
        }
    }
}

/// A registered design.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Design {
    /// Design identifier.
    pub id: Uuid,
    /// Unique design name.
    pub name: String,
    /// Run tracking mode.
    pub mode: DesignMode,
    /// Design version string.
    pub version: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
}

/// Lifecycle status of a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    /// Owns its recorded objects and attributes.
    Active,
    /// Changes were reverted or released, ownership dropped.
    Decommissioned,
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Decommissioned => write!(f, "decommissioned"),
        }
    }
}

/// A named instance of a design.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    /// Deployment identifier.
    pub id: Uuid,
    /// Owning design.
    pub design_id: Uuid,
    /// Name, unique within the design.
    pub name: String,
    /// Design version of the last run.
    pub version: String,
    /// Lifecycle status.
    pub status: DeploymentStatus,
    /// When the deployment was first built.
    pub created_at: DateTime<Utc>,
    /// When the deployment last changed.
    pub updated_at: DateTime<Utc>,
    /// Actor of the last change.
    pub updated_by: String,
    /// Change sets in creation order.
    #[serde(default)]
    pub change_sets: Vec<Uuid>,
}

impl Deployment {
    /// Returns true while the deployment owns its records.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == DeploymentStatus::Active
    }
}

/// Purpose of a change set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeSetKind {
    /// Records of a design run.
    Build,
    /// Audit trail of a decommission.
    Decommission,
}

/// The journal of one design run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    /// Change set identifier.
    pub id: Uuid,
    /// Owning deployment, `None` for ad-hoc runs.
    pub deployment_id: Option<Uuid>,
    /// Purpose of the change set.
    pub kind: ChangeSetKind,
    /// Whether the records still carry ownership.
    pub active: bool,
    /// When the change set was recorded.
    pub created_at: DateTime<Utc>,
    /// Hash of the rendered design documents.
    #[serde(default)]
    pub document_hash: Option<String>,
    /// Records in creation order.
    #[serde(default)]
    pub records: Vec<Record>,
}

impl ChangeSet {
    /// Creates an empty change set.
    #[must_use]
    pub fn new(deployment_id: Option<Uuid>, kind: ChangeSetKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            deployment_id,
            kind,
            active: kind == ChangeSetKind::Build,
            created_at: Utc::now(),
            document_hash: None,
            records: Vec::new(),
        }
    }

    /// Finds the record for an object.
    #[must_use]
    pub fn record_for(&self, object: &ObjectRef) -> Option<&Record> {
        self.records.iter().find(|r| &r.object == object)
    }

    /// Finds the record with the given identity key.
    #[must_use]
    pub fn record_by_key(&self, key: &str) -> Option<&Record> {
        self.records.iter().find(|r| r.key == key)
    }
}

/// Degree of control a record grants over its object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// The deployment created (or adopted) the object and deletes it on decommission.
    Full,
    /// The deployment only owns the recorded attributes.
    Attributes,
}

/// Old and new value of one written attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeChange {
    /// Value before the deployment first wrote the attribute.
    pub old: Value,
    /// Value written by the latest run.
    pub new: Value,
}

/// One object touched by a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// The touched object.
    pub object: ObjectRef,
    /// Identity key used to match records across runs.
    pub key: String,
    /// Degree of control.
    pub scope: Scope,
    /// Written attributes.
    #[serde(default)]
    pub changes: IndexMap<String, AttributeChange>,
    /// Position within the change set.
    pub index: usize,
    /// Whether the object was adopted in import mode.
    #[serde(default)]
    pub adopted: bool,
}

impl Record {
    /// Returns true if the record grants full control.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.scope == Scope::Full
    }

    /// Returns true if the record wrote the attribute.
    #[must_use]
    pub fn owns(&self, attribute: &str) -> bool {
        self.changes.contains_key(attribute)
    }

    /// Returns true if both records wrote identical attribute values.
    #[must_use]
    pub fn same_values(&self, other: &Self) -> bool {
        self.changes.len() == other.changes.len()
            && self
                .changes
                .iter()
                .all(|(k, c)| other.changes.get(k).is_some_and(|o| o.new == c.new))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ObjectId;
    use serde_json::json;

    fn record(changes: &[(&str, Value)]) -> Record {
        Record {
            object: ObjectRef::new("site", ObjectId::new()),
            key: String::from("site(name=s1)"),
            scope: Scope::Full,
            changes: changes
                .iter()
                .map(|(k, v)| {
                    ((*k).to_string(), AttributeChange { old: Value::Null, new: v.clone() })
                })
                .collect(),
            index: 0,
            adopted: false,
        }
    }

    #[test]
    fn test_same_values() {
        let a = record(&[("name", json!("s1")), ("status", json!("active"))]);
        let b = record(&[("name", json!("s1")), ("status", json!("active"))]);
        let c = record(&[("name", json!("s1")), ("status", json!("planned"))]);
        assert!(a.same_values(&b));
        assert!(!a.same_values(&c));
        assert!(a.owns("status"));
        assert!(!a.owns("description"));
    }

    #[test]
    fn test_mode_serialization() {
        assert_eq!(serde_json::to_string(&DesignMode::AdHoc).expect("json"), "\"ad-hoc\"");
        let build = ChangeSet::new(None, ChangeSetKind::Build);
        assert!(build.active);
        assert!(!ChangeSet::new(None, ChangeSetKind::Decommission).active);
    }
}
