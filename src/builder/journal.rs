//! Change journal of a single build.
//!
//! The journal collects one [`Record`] per touched object, checks ownership
//! claims against the ledger before a write, and carries values forward from
//! the deployment's previous change set.

use indexmap::IndexMap;
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::Result;
use crate::ledger::{AttributeChange, ChangeSet, Ledger, Record, Scope};
use crate::schema::ObjectSchema;
use crate::store::{Attributes, ObjectRef};

/// Records produced by a build.
#[derive(Debug)]
pub struct Journal<'a> {
    ledger: &'a Ledger,
    deployment: Option<Uuid>,
    previous: Option<&'a ChangeSet>,
    import: bool,
    records: Vec<Record>,
    /// Times each identity key was handed out.
    keys: HashMap<String, usize>,
}

impl<'a> Journal<'a> {
    /// Creates a journal for a deployment (or an ad-hoc run when `None`).
    #[must_use]
    pub fn new(ledger: &'a Ledger, deployment: Option<Uuid>, import: bool) -> Self {
        let previous = deployment.and_then(|id| ledger.active_change_set(id));
        Self {
            ledger,
            deployment,
            previous,
            import,
            records: Vec::new(),
            keys: HashMap::new(),
        }
    }

    /// The deployment's previous active change set.
    #[must_use]
    pub const fn previous(&self) -> Option<&'a ChangeSet> {
        self.previous
    }

    /// Object fully controlled by the previous run under the same identity key.
    #[must_use]
    pub fn reusable(&self, key: &str, object_type: &str) -> Option<&'a ObjectRef> {
        self.previous
            .and_then(|cs| cs.record_by_key(key))
            .filter(|r| r.is_full() && r.object.object_type == object_type)
            .map(|r| &r.object)
    }

    /// Value the previous run recorded for an attribute.
    #[must_use]
    pub fn previous_change(&self, object: &ObjectRef, attribute: &str) -> Option<&'a AttributeChange> {
        self.previous
            .and_then(|cs| cs.record_for(object))
            .and_then(|r| r.changes.get(attribute))
    }

    /// Checks that the attributes of an existing object may be written.
    ///
    /// # Errors
    ///
    /// Returns an ownership conflict if another active deployment owns one of them.
    pub fn claim<'s>(
        &self,
        object: &ObjectRef,
        schema: &ObjectSchema,
        attributes: impl IntoIterator<Item = &'s str>,
    ) -> Result<()> {
        self.ledger
            .check_claim(self.deployment, object, schema, attributes)
    }

    /// Hands out an identity key for one object specification.
    ///
    /// Repeats of a key are numbered in build order (`key#2`, `key#3`), so
    /// an unchanged design yields the same keys on every run.
    pub fn reserve_key(&mut self, key: String) -> String {
        let seen = self.keys.entry(key.clone()).or_insert(0);
        *seen += 1;
        if *seen == 1 { key } else { format!("{key}#{seen}") }
    }

    /// Records a write.
    ///
    /// Repeated writes to one object in the same build merge into its record,
    /// keeping the first old value of every attribute.
    pub fn record(
        &mut self,
        object: &ObjectRef,
        key: &str,
        created: bool,
        changes: IndexMap<String, AttributeChange>,
    ) {
        if let Some(existing) = self.records.iter_mut().find(|r| &r.object == object) {
            for (attribute, change) in changes {
                existing
                    .changes
                    .entry(attribute)
                    .and_modify(|c| c.new = change.new.clone())
                    .or_insert(change);
            }
            if created {
                existing.scope = Scope::Full;
            }
            return;
        }

        let previous = self.previous.and_then(|cs| cs.record_for(object));
        let adopting = self.import && !created && previous.is_none();
        let scope = if created || previous.is_some_and(Record::is_full) {
            Scope::Full
        } else if adopting && self.ledger.claims_on(object, self.deployment).is_empty() {
            Scope::Full
        } else {
            Scope::Attributes
        };

        let changes = changes
            .into_iter()
            .map(|(attribute, change)| {
                let old = match previous.and_then(|r| r.changes.get(&attribute)) {
                    Some(carried) => carried.old.clone(),
                    None if self.import && !created => change.new.clone(),
                    None => change.old,
                };
                (attribute, AttributeChange { old, new: change.new })
            })
            .collect();

        self.records.push(Record {
            object: object.clone(),
            key: key.to_string(),
            scope,
            changes,
            index: self.records.len(),
            adopted: adopting || previous.is_some_and(|r| r.adopted),
        });
    }

    /// Records gathered so far.
    #[must_use]
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Consumes the journal and returns its records.
    #[must_use]
    pub fn into_records(self) -> Vec<Record> {
        self.records
    }
}

/// Builds the change map of a write against the object's current attributes.
#[must_use]
pub fn changes_against(
    current: Option<&Attributes>,
    writes: &Attributes,
) -> IndexMap<String, AttributeChange> {
    writes
        .iter()
        .map(|(field, new)| {
            let old = current
                .and_then(|attrs| attrs.get(field))
                .cloned()
                .unwrap_or(Value::Null);
            (field.clone(), AttributeChange { old, new: new.clone() })
        })
        .collect()
}
