//! Planning module for re-runs and decommissions.
//!
//! This module compares a deployment's runs and reverts the records a
//! deployment no longer claims.

mod decommission;
mod diff;

pub use decommission::{DecommissionEngine, DecommissionMode, revert_value};
pub use diff::{DiffDetail, DiffEngine, DiffResult, DiffType, RecordDiff};
