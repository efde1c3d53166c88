//! Ownership and ledger module.
//!
//! This module records the lineage of design runs and enforces ownership:
//! - Designs, deployments, change sets and records
//! - Exclusive attribute claims between active deployments
//! - The protection hook for writes made outside of a design run

mod ownership;
mod protection;
mod tables;
mod types;

pub use protection::{WriteGuard, Writer};
pub use tables::Ledger;
pub use types::{
    AttributeChange, ChangeSet, ChangeSetKind, Deployment, DeploymentStatus, Design, DesignMode,
    Record, Scope,
};
