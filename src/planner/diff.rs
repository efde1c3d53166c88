//! Diff engine for comparing change sets.
//!
//! This module matches the records of a new run against the deployment's
//! previous active change set and works out what the re-run removed.

use indexmap::IndexMap;
use std::collections::HashSet;
use std::fmt;
use tracing::debug;

use crate::ledger::{ChangeSet, Record, Scope};
use crate::store::ObjectRef;

/// Engine for computing diffs between two runs of a deployment.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiffEngine;

/// Difference for a single record.
#[derive(Debug, Clone)]
pub struct RecordDiff {
    /// Identity key.
    pub key: String,
    /// Object concerned.
    pub object: ObjectRef,
    /// Type of difference.
    pub diff_type: DiffType,
    /// Attributes whose written value changed or stopped being written.
    pub details: Vec<DiffDetail>,
}

/// Type of difference detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffType {
    /// Record only present in the new run.
    Added,
    /// Same key, different written values.
    Updated,
    /// Record only present in the previous run.
    Removed,
    /// Same key and values.
    Retained,
}

/// Detail about a specific attribute.
#[derive(Debug, Clone)]
pub struct DiffDetail {
    /// Attribute name.
    pub field: String,
    /// Value written by the previous run.
    pub old_value: Option<String>,
    /// Value written by the new run.
    pub new_value: Option<String>,
}

/// Complete diff result.
#[derive(Debug, Default)]
pub struct DiffResult {
    /// All record diffs.
    pub diffs: Vec<RecordDiff>,
    /// Number of added records.
    pub added: usize,
    /// Number of updated records.
    pub updated: usize,
    /// Number of removed records.
    pub removed: usize,
    /// Number of retained records.
    pub retained: usize,
    /// Records to decommission, in previous-run order.
    ///
    /// Partial records carry only the attributes the new run stopped writing.
    pub removals: Vec<Record>,
}

impl DiffEngine {
    /// Creates a new diff engine.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes the diff between the previous change set and new records.
    ///
    /// Records are matched by identity key. A key now pointing at another
    /// object counts as a replacement: the old record is removed and the
    /// new one added. An object still recorded under a different key is
    /// never removed.
    #[must_use]
    pub fn compute_diff(&self, previous: Option<&ChangeSet>, current: &[Record]) -> DiffResult {
        let mut result = DiffResult::default();
        let previous_records: &[Record] = previous
            .map(|cs| cs.records.as_slice())
            .unwrap_or_default();

        let previous_by_key: IndexMap<&str, &Record> =
            previous_records.iter().map(|r| (r.key.as_str(), r)).collect();
        let current_by_object: IndexMap<&ObjectRef, &Record> =
            current.iter().map(|r| (&r.object, r)).collect();
        let mut matched: HashSet<&str> = HashSet::new();

        for record in current {
            let Some(old) = previous_by_key.get(record.key.as_str()).copied() else {
                result.push(Self::added(record));
                continue;
            };
            matched.insert(old.key.as_str());

            if old.object != record.object {
                debug!("Record {} now points at {}", record.key, record.object);
                Self::remove(&mut result, old, current_by_object.get(&old.object).copied());
                result.push(Self::added(record));
                continue;
            }

            if let Some(partial) = Self::dropped_attributes(old, record) {
                result.removals.push(partial);
            }
            result.push(Self::compare(old, record));
        }

        for old in previous_records {
            if matched.contains(old.key.as_str()) {
                continue;
            }
            Self::remove(&mut result, old, current_by_object.get(&old.object).copied());
        }

        result
    }

    fn added(record: &Record) -> RecordDiff {
        RecordDiff {
            key: record.key.clone(),
            object: record.object.clone(),
            diff_type: DiffType::Added,
            details: record
                .changes
                .iter()
                .map(|(field, change)| DiffDetail {
                    field: field.clone(),
                    old_value: None,
                    new_value: Some(change.new.to_string()),
                })
                .collect(),
        }
    }

    /// Handles a previous record without a counterpart under its key.
    fn remove(result: &mut DiffResult, old: &Record, still_recorded: Option<&Record>) {
        match still_recorded {
            Some(current) => {
                debug!("{} moved from key {} to {}", old.object, old.key, current.key);
                if let Some(partial) = Self::dropped_attributes(old, current) {
                    result.removals.push(partial);
                }
            }
            None => {
                debug!("Record {} was removed", old.key);
                result.removals.push(old.clone());
                result.push(RecordDiff {
                    key: old.key.clone(),
                    object: old.object.clone(),
                    diff_type: DiffType::Removed,
                    details: old
                        .changes
                        .iter()
                        .map(|(field, change)| DiffDetail {
                            field: field.clone(),
                            old_value: Some(change.new.to_string()),
                            new_value: None,
                        })
                        .collect(),
                });
            }
        }
    }

    fn compare(old: &Record, record: &Record) -> RecordDiff {
        if old.same_values(record) {
            return RecordDiff {
                key: record.key.clone(),
                object: record.object.clone(),
                diff_type: DiffType::Retained,
                details: Vec::new(),
            };
        }

        let mut details: Vec<DiffDetail> = record
            .changes
            .iter()
            .filter(|(field, change)| old.changes.get(*field).is_none_or(|o| o.new != change.new))
            .map(|(field, change)| DiffDetail {
                field: field.clone(),
                old_value: old.changes.get(field).map(|o| o.new.to_string()),
                new_value: Some(change.new.to_string()),
            })
            .collect();
        details.extend(
            old.changes
                .iter()
                .filter(|(field, _)| !record.changes.contains_key(*field))
                .map(|(field, change)| DiffDetail {
                    field: field.clone(),
                    old_value: Some(change.new.to_string()),
                    new_value: None,
                }),
        );

        RecordDiff {
            key: record.key.clone(),
            object: record.object.clone(),
            diff_type: DiffType::Updated,
            details,
        }
    }

    /// Builds a removal record for attributes a partially owned object lost.
    fn dropped_attributes(old: &Record, record: &Record) -> Option<Record> {
        if old.scope != Scope::Attributes || record.scope != Scope::Attributes {
            return None;
        }
        let changes: IndexMap<_, _> = old
            .changes
            .iter()
            .filter(|(field, _)| !record.changes.contains_key(*field))
            .map(|(field, change)| (field.clone(), change.clone()))
            .collect();
        if changes.is_empty() {
            return None;
        }
        Some(Record {
            changes,
            ..old.clone()
        })
    }
}

impl DiffResult {
    fn push(&mut self, diff: RecordDiff) {
        match diff.diff_type {
            DiffType::Added => self.added += 1,
            DiffType::Updated => self.updated += 1,
            DiffType::Removed => self.removed += 1,
            DiffType::Retained => self.retained += 1,
        }
        self.diffs.push(diff);
    }

    /// Returns true if there are any changes.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.added > 0 || self.updated > 0 || self.removed > 0 || !self.removals.is_empty()
    }

    /// Returns the total number of changes.
    #[must_use]
    pub const fn total_changes(&self) -> usize {
        self.added + self.updated + self.removed
    }

    /// Filters to only diffs that changed something.
    #[must_use]
    pub fn actionable_diffs(&self) -> Vec<&RecordDiff> {
        self.diffs
            .iter()
            .filter(|d| d.diff_type != DiffType::Retained)
            .collect()
    }
}

impl fmt::Display for DiffType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Added => "added",
            Self::Updated => "updated",
            Self::Removed => "removed",
            Self::Retained => "retained",
        };
        write!(f, "{s}")
    }
}

impl fmt::Display for RecordDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.key, self.diff_type)?;
        if !self.details.is_empty() {
            write!(f, " (")?;
            for (i, detail) in self.details.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", detail.field)?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{AttributeChange, ChangeSetKind};
    use crate::store::ObjectId;
    use serde_json::{Value, json};

    fn record(key: &str, object: &ObjectRef, scope: Scope, changes: &[(&str, Value)]) -> Record {
        Record {
            object: object.clone(),
            key: key.to_string(),
            scope,
            changes: changes
                .iter()
                .map(|(k, v)| ((*k).to_string(), AttributeChange { old: Value::Null, new: v.clone() }))
                .collect(),
            index: 0,
            adopted: false,
        }
    }

    fn change_set(records: Vec<Record>) -> ChangeSet {
        let mut cs = ChangeSet::new(None, ChangeSetKind::Build);
        cs.records = records;
        cs
    }

    #[test]
    fn test_retained_updated_added_removed() {
        let a = ObjectRef::new("device", ObjectId::new());
        let b = ObjectRef::new("device", ObjectId::new());
        let c = ObjectRef::new("device", ObjectId::new());
        let d = ObjectRef::new("device", ObjectId::new());

        let previous = change_set(vec![
            record("a", &a, Scope::Full, &[("name", json!("a"))]),
            record("b", &b, Scope::Full, &[("name", json!("b"))]),
            record("c", &c, Scope::Full, &[("name", json!("c"))]),
        ]);
        let current = vec![
            record("a", &a, Scope::Full, &[("name", json!("a"))]),
            record("b", &b, Scope::Full, &[("name", json!("b2"))]),
            record("d", &d, Scope::Full, &[("name", json!("d"))]),
        ];

        let diff = DiffEngine::new().compute_diff(Some(&previous), &current);
        assert_eq!((diff.retained, diff.updated, diff.added, diff.removed), (1, 1, 1, 1));
        assert_eq!(diff.removals.len(), 1);
        assert_eq!(diff.removals[0].object, c);
        assert_eq!(diff.actionable_diffs().len(), 3);
        assert!(diff.has_changes());
    }

    #[test]
    fn test_key_pointing_elsewhere_is_replacement() {
        let old = ObjectRef::new("device", ObjectId::new());
        let new = ObjectRef::new("device", ObjectId::new());
        let previous = change_set(vec![record("devices[0]", &old, Scope::Full, &[])]);
        let current = vec![record("devices[0]", &new, Scope::Full, &[])];

        let diff = DiffEngine::new().compute_diff(Some(&previous), &current);
        assert_eq!((diff.added, diff.removed), (1, 1));
        assert_eq!(diff.removals[0].object, old);
    }

    #[test]
    fn test_moved_object_is_not_removed() {
        let object = ObjectRef::new("device", ObjectId::new());
        let previous = change_set(vec![record("devices[0]", &object, Scope::Full, &[])]);
        let current = vec![record("devices[1]", &object, Scope::Full, &[])];

        let diff = DiffEngine::new().compute_diff(Some(&previous), &current);
        assert!(diff.removals.is_empty());
        assert_eq!(diff.removed, 0);
    }

    #[test]
    fn test_dropped_attributes_become_partial_removals() {
        let object = ObjectRef::new("device", ObjectId::new());
        let previous = change_set(vec![record(
            "device(name=r1)",
            &object,
            Scope::Attributes,
            &[("description", json!("x")), ("status", json!("active"))],
        )]);
        let current = vec![record(
            "device(name=r1)",
            &object,
            Scope::Attributes,
            &[("status", json!("active"))],
        )];

        let diff = DiffEngine::new().compute_diff(Some(&previous), &current);
        assert_eq!(diff.updated, 1);
        assert_eq!(diff.removals.len(), 1);
        let partial = &diff.removals[0];
        assert_eq!(partial.changes.keys().collect::<Vec<_>>(), vec!["description"]);
    }

    #[test]
    fn test_first_run_adds_everything() {
        let object = ObjectRef::new("site", ObjectId::new());
        let diff = DiffEngine::new().compute_diff(None, &[record("s", &object, Scope::Full, &[])]);
        assert_eq!(diff.added, 1);
        assert!(diff.removals.is_empty());
        assert_eq!(diff.total_changes(), 1);
    }
}
