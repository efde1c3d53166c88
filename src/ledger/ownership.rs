//! Ownership rules over the ledger.
//!
//! A deployment owns an attribute when the active change set of the active
//! deployment recorded a write to it. Identifier fields are never owned, so
//! several deployments may locate the same object through its name.

use uuid::Uuid;

use crate::error::{DesignError, OwnershipError, Result};
use crate::schema::ObjectSchema;
use crate::store::ObjectRef;

use super::tables::Ledger;
use super::types::{Deployment, Record};

impl Ledger {
    /// Active records on an object, optionally excluding one deployment.
    #[must_use]
    pub fn claims_on(
        &self,
        object: &ObjectRef,
        excluding: Option<Uuid>,
    ) -> Vec<(&Deployment, &Record)> {
        self.active_records()
            .filter(|(d, r)| &r.object == object && Some(d.id) != excluding)
            .collect()
    }

    /// Checks that `claimant` may write the attributes of an object.
    ///
    /// # Errors
    ///
    /// Returns [`OwnershipError::Conflict`] if another active deployment owns
    /// one of the non-identifier attributes.
    pub fn check_claim<'a>(
        &self,
        claimant: Option<Uuid>,
        object: &ObjectRef,
        schema: &ObjectSchema,
        attributes: impl IntoIterator<Item = &'a str>,
    ) -> Result<()> {
        let claims = self.claims_on(object, claimant);
        if claims.is_empty() {
            return Ok(());
        }

        for attribute in attributes {
            if schema.is_identifier(attribute) {
                continue;
            }
            if let Some((owner, _)) = claims.iter().find(|(_, r)| r.owns(attribute)) {
                return Err(DesignError::Ownership(OwnershipError::Conflict {
                    object: object.to_string(),
                    attribute: attribute.to_string(),
                    deployment: owner.name.clone(),
                }));
            }
        }
        Ok(())
    }

    /// Returns the active deployment that owns an attribute, if any.
    #[must_use]
    pub fn owner_of(&self, object: &ObjectRef, attribute: &str) -> Option<&Deployment> {
        self.active_records()
            .find(|(_, r)| &r.object == object && r.owns(attribute))
            .map(|(d, _)| d)
    }

    /// Returns the active deployment holding full control of an object, if any.
    #[must_use]
    pub fn full_owner(&self, object: &ObjectRef) -> Option<&Deployment> {
        self.active_records()
            .find(|(_, r)| &r.object == object && r.is_full())
            .map(|(d, _)| d)
    }

    /// Returns true if a direct write to the attribute would violate ownership.
    #[must_use]
    pub fn is_protected(&self, object: &ObjectRef, attribute: &str) -> bool {
        self.owner_of(object, attribute).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{AttributeChange, ChangeSet, ChangeSetKind, DesignMode, Scope};
    use crate::store::ObjectId;
    use serde_json::{Value, json};

    fn schema() -> ObjectSchema {
        serde_yaml::from_str(
            "name: device\nidentifiers: [name]\nfields:\n  name: {type: string}\n  description: {type: string}\n  status: {type: string}\n",
        )
        .expect("schema")
    }

    fn owned_by(ledger: &mut Ledger, deployment: &str, object: &ObjectRef, attrs: &[&str]) -> Uuid {
        let design = ledger.upsert_design("d", DesignMode::Deployment, "1", "");
        let dep = ledger.create_deployment(design, deployment, "1", "tester");
        let mut cs = ChangeSet::new(Some(dep), ChangeSetKind::Build);
        cs.records.push(Record {
            object: object.clone(),
            key: String::from("device(name=r1)"),
            scope: Scope::Attributes,
            changes: attrs
                .iter()
                .map(|a| ((*a).to_string(), AttributeChange { old: Value::Null, new: json!("x") }))
                .collect(),
            index: 0,
            adopted: false,
        });
        ledger.push_change_set(cs);
        dep
    }

    #[test]
    fn test_conflict_on_owned_attribute() {
        let mut ledger = Ledger::default();
        let object = ObjectRef::new("device", ObjectId::new());
        let a = owned_by(&mut ledger, "a", &object, &["name", "description"]);

        let err = ledger
            .check_claim(None, &object, &schema(), ["description"])
            .expect_err("conflict");
        assert!(err.is_conflict());

        assert!(ledger.check_claim(Some(a), &object, &schema(), ["description"]).is_ok());
        assert!(ledger.check_claim(None, &object, &schema(), ["name", "status"]).is_ok());
        assert!(ledger.is_protected(&object, "description"));
        assert!(!ledger.is_protected(&object, "status"));
        assert!(ledger.full_owner(&object).is_none());
    }

    #[test]
    fn test_decommissioned_deployment_releases_claims() {
        let mut ledger = Ledger::default();
        let object = ObjectRef::new("device", ObjectId::new());
        let a = owned_by(&mut ledger, "a", &object, &["description"]);
        ledger.mark_decommissioned(a, "tester").expect("decommission");

        assert!(ledger.check_claim(None, &object, &schema(), ["description"]).is_ok());
        assert!(ledger.owner_of(&object, "description").is_none());
    }
}
