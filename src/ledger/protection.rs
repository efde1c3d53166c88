//! Protection hook for writes made outside of a design run.

use std::collections::HashSet;
use tracing::warn;
use uuid::Uuid;

use crate::error::{DesignError, OwnershipError, Result};
use crate::store::ObjectRef;

use super::tables::Ledger;

/// Origin of a write checked by the [`WriteGuard`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Writer {
    /// A design run acting for a deployment.
    Deployment(Uuid),
    /// A user or tool outside of any design run.
    External {
        /// Name of the writer, used in logs.
        user: String,
        /// Privileged writers may overwrite owned attributes.
        bypass: bool,
    },
}

/// Rejects writes to attributes owned by another active deployment.
#[derive(Debug)]
pub struct WriteGuard<'a> {
    ledger: &'a Ledger,
    /// Object types under protection, empty for all.
    protected_types: HashSet<String>,
}

impl<'a> WriteGuard<'a> {
    /// Creates a guard protecting every object type.
    #[must_use]
    pub fn new(ledger: &'a Ledger) -> Self {
        Self {
            ledger,
            protected_types: HashSet::new(),
        }
    }

    /// Restricts protection to the given object types.
    #[must_use]
    pub fn with_protected_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.protected_types = types.into_iter().map(Into::into).collect();
        self
    }

    /// Checks a write of `attributes` on `object`.
    ///
    /// # Errors
    ///
    /// Returns [`OwnershipError::Protected`] if another deployment owns one of
    /// the attributes and the writer may not bypass protection.
    pub fn check<'s>(
        &self,
        writer: &Writer,
        object: &ObjectRef,
        attributes: impl IntoIterator<Item = &'s str>,
    ) -> Result<()> {
        if !self.protected_types.is_empty() && !self.protected_types.contains(&object.object_type) {
            return Ok(());
        }

        for attribute in attributes {
            let Some(owner) = self.ledger.owner_of(object, attribute) else {
                continue;
            };
            match writer {
                Writer::Deployment(id) if *id == owner.id => {}
                Writer::External { user, bypass: true } => {
                    warn!(
                        "{user} overrides '{attribute}' of {object} owned by deployment '{}'",
                        owner.name
                    );
                }
                _ => {
                    return Err(DesignError::Ownership(OwnershipError::Protected {
                        object: object.to_string(),
                        attribute: attribute.to_string(),
                        deployment: owner.name.clone(),
                    }));
                }
            }
        }
        Ok(())
    }
}
