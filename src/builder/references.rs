//! Build-scoped named references.

use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

use crate::error::{DesignError, ReferenceError, Result};
use crate::store::{ObjectRef, ObjectStore};

/// Value stored under a reference name.
#[derive(Debug, Clone, PartialEq)]
pub enum Reference {
    /// A saved object.
    Object(ObjectRef),
    /// A single attribute value captured when the reference was defined.
    Value(Value),
}

/// Names defined with `!ref` during one build.
///
/// Resolution is single-pass: a name is only visible after the object that
/// defines it has been saved.
#[derive(Debug, Default)]
pub struct ReferenceTable {
    entries: HashMap<String, Reference>,
}

impl ReferenceTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Defines a new name.
    ///
    /// # Errors
    ///
    /// Returns [`ReferenceError::Duplicate`] if the name is taken.
    pub fn define(&mut self, name: &str, reference: Reference) -> Result<()> {
        if self.entries.contains_key(name) {
            return Err(DesignError::Reference(ReferenceError::Duplicate {
                name: name.to_string(),
            }));
        }
        debug!("Defined reference '{name}'");
        self.entries.insert(name.to_string(), reference);
        Ok(())
    }

    /// Gets a defined reference.
    ///
    /// # Errors
    ///
    /// Returns [`ReferenceError::Undefined`] if the name is unknown.
    pub fn get(&self, name: &str) -> Result<&Reference> {
        self.entries.get(name).ok_or_else(|| {
            DesignError::Reference(ReferenceError::Undefined {
                name: name.to_string(),
            })
        })
    }

    /// Resolves a reference to a document value.
    ///
    /// Objects resolve to their id, or to one of their current attributes.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is unknown or the attribute is missing.
    pub fn resolve(
        &self,
        name: &str,
        attribute: Option<&str>,
        store: &dyn ObjectStore,
    ) -> Result<Value> {
        let missing = |attribute: &str| {
            DesignError::Reference(ReferenceError::MissingAttribute {
                name: name.to_string(),
                attribute: attribute.to_string(),
            })
        };

        match (self.get(name)?, attribute) {
            (Reference::Object(object), None) => Ok(object.id.to_value()),
            (Reference::Object(object), Some(attribute)) => store
                .require(object)?
                .get(attribute)
                .cloned()
                .ok_or_else(|| missing(attribute)),
            (Reference::Value(value), None) => Ok(value.clone()),
            (Reference::Value(value), Some(attribute)) => {
                value.get(attribute).cloned().ok_or_else(|| missing(attribute))
            }
        }
    }

    /// Number of defined names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no name is defined.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Attributes, MemoryStore};
    use serde_json::json;

    #[test]
    fn test_define_and_resolve() {
        let mut store = MemoryStore::new();
        let mut attributes = Attributes::new();
        attributes.insert(String::from("name"), json!("core-1"));
        let device = store.create("device", attributes);

        let mut table = ReferenceTable::new();
        table.define("core", Reference::Object(device.clone())).expect("define");
        table.define("asn", Reference::Value(json!(65000))).expect("define");

        assert_eq!(table.resolve("core", None, &store).expect("id"), device.id.to_value());
        assert_eq!(table.resolve("core", Some("name"), &store).expect("attr"), json!("core-1"));
        assert_eq!(table.resolve("asn", None, &store).expect("value"), json!(65000));
        assert!(table.resolve("core", Some("serial"), &store).is_err());
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_duplicate_and_undefined() {
        let mut table = ReferenceTable::new();
        table.define("x", Reference::Value(json!(1))).expect("define");
        assert!(matches!(
            table.define("x", Reference::Value(json!(2))),
            Err(DesignError::Reference(ReferenceError::Duplicate { .. }))
        ));
        assert!(matches!(
            table.get("y"),
            Err(DesignError::Reference(ReferenceError::Undefined { .. }))
        ));
    }
}
