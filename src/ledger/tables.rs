//! Ledger tables: designs, deployments and change sets.

use chrono::Utc;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{DesignError, Result, StateError};

use super::types::{
    ChangeSet, ChangeSetKind, Deployment, DeploymentStatus, Design, DesignMode, Record,
};

/// Persistent lineage of every design run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ledger {
    /// Registered designs.
    designs: IndexMap<Uuid, Design>,
    /// Deployments of all designs.
    deployments: IndexMap<Uuid, Deployment>,
    /// Change sets of all deployments and ad-hoc runs.
    change_sets: IndexMap<Uuid, ChangeSet>,
}

impl Ledger {
    /// Registers a design or refreshes the metadata of an existing one.
    pub fn upsert_design(
        &mut self,
        name: &str,
        mode: DesignMode,
        version: &str,
        description: &str,
    ) -> Uuid {
        if let Some(design) = self.designs.values_mut().find(|d| d.name == name) {
            design.mode = mode;
            design.version = version.to_string();
            design.description = description.to_string();
            return design.id;
        }

        let design = Design {
            id: Uuid::new_v4(),
            name: name.to_string(),
            mode,
            version: version.to_string(),
            description: description.to_string(),
        };
        info!("Registered design '{name}' ({mode})");
        let id = design.id;
        self.designs.insert(id, design);
        id
    }

    /// Gets a design by identifier.
    #[must_use]
    pub fn design(&self, id: Uuid) -> Option<&Design> {
        self.designs.get(&id)
    }

    /// Gets a design by name.
    #[must_use]
    pub fn design_by_name(&self, name: &str) -> Option<&Design> {
        self.designs.values().find(|d| d.name == name)
    }

    /// Gets a deployment by identifier.
    #[must_use]
    pub fn deployment(&self, id: Uuid) -> Option<&Deployment> {
        self.deployments.get(&id)
    }

    /// Finds a deployment of a design by name.
    #[must_use]
    pub fn find_deployment(&self, design_id: Uuid, name: &str) -> Option<&Deployment> {
        self.deployments
            .values()
            .find(|d| d.design_id == design_id && d.name == name)
    }

    /// Resolves a deployment by design and deployment name.
    ///
    /// # Errors
    ///
    /// Returns an error if the design or the deployment does not exist.
    pub fn require_deployment(&self, design: &str, name: &str) -> Result<&Deployment> {
        let design_id = self
            .design_by_name(design)
            .ok_or_else(|| {
                DesignError::State(StateError::UnknownDesign {
                    name: design.to_string(),
                })
            })?
            .id;
        self.find_deployment(design_id, name).ok_or_else(|| {
            DesignError::State(StateError::UnknownDeployment {
                design: design.to_string(),
                deployment: name.to_string(),
            })
        })
    }

    /// Iterates over every deployment.
    pub fn deployments(&self) -> impl Iterator<Item = &Deployment> {
        self.deployments.values()
    }

    /// Creates a new active deployment.
    pub fn create_deployment(
        &mut self,
        design_id: Uuid,
        name: &str,
        version: &str,
        actor: &str,
    ) -> Uuid {
        let now = Utc::now();
        let deployment = Deployment {
            id: Uuid::new_v4(),
            design_id,
            name: name.to_string(),
            version: version.to_string(),
            status: DeploymentStatus::Active,
            created_at: now,
            updated_at: now,
            updated_by: actor.to_string(),
            change_sets: Vec::new(),
        };
        info!("Created deployment '{name}'");
        let id = deployment.id;
        self.deployments.insert(id, deployment);
        id
    }

    /// Records that a deployment was touched by an actor.
    pub fn touch_deployment(&mut self, id: Uuid, version: &str, actor: &str) {
        if let Some(deployment) = self.deployments.get_mut(&id) {
            deployment.version = version.to_string();
            deployment.updated_at = Utc::now();
            deployment.updated_by = actor.to_string();
        }
    }

    /// Marks a deployment as decommissioned and deactivates all of its change sets.
    ///
    /// # Errors
    ///
    /// Returns an error if the deployment is unknown or already decommissioned.
    pub fn mark_decommissioned(&mut self, id: Uuid, actor: &str) -> Result<()> {
        let deployment = self
            .deployments
            .get_mut(&id)
            .ok_or_else(|| DesignError::internal(format!("deployment {id} is not in the ledger")))?;
        if !deployment.is_active() {
            return Err(DesignError::State(StateError::AlreadyDecommissioned {
                deployment: deployment.name.clone(),
            }));
        }
        deployment.status = DeploymentStatus::Decommissioned;
        deployment.updated_at = Utc::now();
        deployment.updated_by = actor.to_string();

        for change_set in self.change_sets.values_mut() {
            if change_set.deployment_id == Some(id) {
                change_set.active = false;
            }
        }
        Ok(())
    }

    /// Removes a decommissioned deployment and its change sets.
    ///
    /// # Errors
    ///
    /// Returns an error if the deployment is unknown or still active.
    pub fn remove_deployment(&mut self, id: Uuid) -> Result<Deployment> {
        let deployment = self
            .deployments
            .get(&id)
            .ok_or_else(|| DesignError::internal(format!("deployment {id} is not in the ledger")))?;
        if deployment.is_active() {
            return Err(DesignError::State(StateError::DeploymentActive {
                deployment: deployment.name.clone(),
            }));
        }

        self.change_sets.retain(|_, cs| cs.deployment_id != Some(id));
        let removed = self
            .deployments
            .shift_remove(&id)
            .ok_or_else(|| DesignError::internal(format!("deployment {id} vanished")))?;
        info!("Deleted deployment '{}'", removed.name);
        Ok(removed)
    }

    /// Gets a change set by identifier.
    #[must_use]
    pub fn change_set(&self, id: Uuid) -> Option<&ChangeSet> {
        self.change_sets.get(&id)
    }

    /// Returns the active build change set of a deployment.
    #[must_use]
    pub fn active_change_set(&self, deployment_id: Uuid) -> Option<&ChangeSet> {
        self.change_sets.values().rev().find(|cs| {
            cs.deployment_id == Some(deployment_id) && cs.active && cs.kind == ChangeSetKind::Build
        })
    }

    /// Lists the change sets of a deployment in creation order.
    #[must_use]
    pub fn change_sets_for(&self, deployment_id: Uuid) -> Vec<&ChangeSet> {
        self.change_sets
            .values()
            .filter(|cs| cs.deployment_id == Some(deployment_id))
            .collect()
    }

    /// Appends a change set.
    ///
    /// An active build change set supersedes the deployment's previous one.
    pub fn push_change_set(&mut self, change_set: ChangeSet) -> Uuid {
        let id = change_set.id;
        if let Some(deployment_id) = change_set.deployment_id {
            if change_set.active && change_set.kind == ChangeSetKind::Build {
                for previous in self.change_sets.values_mut() {
                    if previous.deployment_id == Some(deployment_id) {
                        previous.active = false;
                    }
                }
            }
            if let Some(deployment) = self.deployments.get_mut(&deployment_id) {
                deployment.change_sets.push(id);
            }
        }
        debug!(
            "Recorded {:?} change set {id} with {} records",
            change_set.kind,
            change_set.records.len()
        );
        self.change_sets.insert(id, change_set);
        id
    }

    /// Iterates over records that currently carry ownership.
    ///
    /// Only records of active change sets of active deployments qualify.
    pub fn active_records(&self) -> impl Iterator<Item = (&Deployment, &Record)> {
        self.change_sets
            .values()
            .filter(|cs| cs.active && cs.kind == ChangeSetKind::Build)
            .filter_map(|cs| {
                cs.deployment_id
                    .and_then(|id| self.deployments.get(&id))
                    .filter(|d| d.is_active())
                    .map(|d| (d, cs))
            })
            .flat_map(|(d, cs)| cs.records.iter().map(move |r| (d, r)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_design_is_by_name() {
        let mut ledger = Ledger::default();
        let a = ledger.upsert_design("l3vpn", DesignMode::Deployment, "1.0", "");
        let b = ledger.upsert_design("l3vpn", DesignMode::Deployment, "1.1", "vpn");
        assert_eq!(a, b);
        assert_eq!(ledger.design(a).map(|d| d.version.as_str()), Some("1.1"));
    }

    #[test]
    fn test_new_build_supersedes_previous() {
        let mut ledger = Ledger::default();
        let design = ledger.upsert_design("d", DesignMode::Deployment, "1", "");
        let dep = ledger.create_deployment(design, "east", "1", "tester");

        let first = ledger.push_change_set(ChangeSet::new(Some(dep), ChangeSetKind::Build));
        let second = ledger.push_change_set(ChangeSet::new(Some(dep), ChangeSetKind::Build));

        assert_eq!(ledger.active_change_set(dep).map(|cs| cs.id), Some(second));
        assert!(!ledger.change_set(first).expect("first").active);
        assert_eq!(ledger.deployment(dep).expect("dep").change_sets, vec![first, second]);
    }

    #[test]
    fn test_lifecycle_guards() {
        let mut ledger = Ledger::default();
        let design = ledger.upsert_design("d", DesignMode::Deployment, "1", "");
        let dep = ledger.create_deployment(design, "east", "1", "tester");
        ledger.push_change_set(ChangeSet::new(Some(dep), ChangeSetKind::Build));

        assert!(ledger.remove_deployment(dep).is_err());
        ledger.mark_decommissioned(dep, "tester").expect("decommission");
        assert!(ledger.active_change_set(dep).is_none());
        assert!(ledger.mark_decommissioned(dep, "tester").is_err());

        ledger.remove_deployment(dep).expect("remove");
        assert!(ledger.deployment(dep).is_none());
        assert!(ledger.change_sets_for(dep).is_empty());
        assert!(ledger.require_deployment("d", "east").is_err());
    }
}
