//! State shared by the builder and its extensions during one build.

use serde_json::Value;

use crate::error::{DesignError, LookupError, Result, ValidationError};
use crate::schema::SchemaOracle;
use crate::store::{ObjectRef, ObjectStore, Predicate, describe_query};

use super::action::Action;
use super::journal::Journal;
use super::references::ReferenceTable;

/// Options of a single build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildOptions {
    /// Adopt located objects instead of only claiming written attributes.
    pub import: bool,
}

/// Store, schema, references and journal of one build.
pub struct BuildContext<'a> {
    store: &'a mut dyn ObjectStore,
    schema: &'a dyn SchemaOracle,
    references: ReferenceTable,
    journal: Journal<'a>,
}

impl<'a> BuildContext<'a> {
    /// Creates a build context.
    pub fn new(
        store: &'a mut dyn ObjectStore,
        schema: &'a dyn SchemaOracle,
        journal: Journal<'a>,
    ) -> Self {
        Self {
            store,
            schema,
            references: ReferenceTable::new(),
            journal,
        }
    }

    /// The object store.
    #[must_use]
    pub fn store(&self) -> &dyn ObjectStore {
        &*self.store
    }

    /// The object store, mutably.
    pub fn store_mut(&mut self) -> &mut dyn ObjectStore {
        &mut *self.store
    }

    /// The schema oracle.
    #[must_use]
    pub fn schema(&self) -> &'a dyn SchemaOracle {
        self.schema
    }

    /// Named references defined so far.
    #[must_use]
    pub const fn references(&self) -> &ReferenceTable {
        &self.references
    }

    /// Named references, mutably.
    pub const fn references_mut(&mut self) -> &mut ReferenceTable {
        &mut self.references
    }

    /// The change journal.
    #[must_use]
    pub const fn journal(&self) -> &Journal<'a> {
        &self.journal
    }

    /// The change journal, mutably.
    pub const fn journal_mut(&mut self) -> &mut Journal<'a> {
        &mut self.journal
    }

    /// Consumes the context and returns its journal.
    #[must_use]
    pub fn into_journal(self) -> Journal<'a> {
        self.journal
    }

    /// Finds at most one object matching the predicates.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::MultipleMatches`] if more than one object matches.
    pub fn find_optional(
        &self,
        object_type: &str,
        predicates: &[Predicate],
    ) -> Result<Option<ObjectRef>> {
        let hits = self.store.query(object_type, predicates);
        match hits.as_slice() {
            [] => Ok(None),
            [one] => Ok(Some(one.object_ref())),
            many => Err(DesignError::Lookup(LookupError::MultipleMatches {
                object_type: object_type.to_string(),
                query: describe_query(predicates),
                count: many.len(),
            })),
        }
    }

    /// Finds exactly one object matching the predicates.
    ///
    /// # Errors
    ///
    /// Returns a [`LookupError`] on zero or several matches.
    pub fn find_one(&self, object_type: &str, predicates: &[Predicate]) -> Result<ObjectRef> {
        self.find_optional(object_type, predicates)?.ok_or_else(|| {
            DesignError::Lookup(LookupError::NotFound {
                object_type: object_type.to_string(),
                query: describe_query(predicates),
            })
        })
    }
}

/// An object specification being assembled from its document mapping.
///
/// Values are kept raw until the builder resolves them, so attribute
/// extensions can add entries in the same form the document uses.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingObject {
    /// Object type being built.
    pub object_type: String,
    /// Selected action, `None` until an action tag is seen.
    pub action: Option<Action>,
    /// Lookup fields from action tags, in document order.
    pub lookup: Vec<(String, Value)>,
    /// Plain attribute assignments, in document order.
    pub fields: Vec<(String, Value)>,
    /// `field__lookup` assignments as `(field, lookup, value)`.
    pub queries: Vec<(String, String, Value)>,
    /// References to define as `(name, attribute)`.
    pub references: Vec<(String, Option<String>)>,
}

impl PendingObject {
    /// Creates an empty specification for an object type.
    #[must_use]
    pub fn new(object_type: impl Into<String>) -> Self {
        Self {
            object_type: object_type.into(),
            action: None,
            lookup: Vec::new(),
            fields: Vec::new(),
            queries: Vec::new(),
            references: Vec::new(),
        }
    }

    /// Selects the action, rejecting a second, different one.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::ConflictingActions`] on a mismatch.
    pub fn set_action(&mut self, action: Action) -> Result<()> {
        match self.action {
            Some(existing) if existing != action => {
                Err(DesignError::Validation(ValidationError::ConflictingActions {
                    object_type: self.object_type.clone(),
                    first: existing.to_string(),
                    second: action.to_string(),
                }))
            }
            _ => {
                self.action = Some(action);
                Ok(())
            }
        }
    }

    /// Literal value given for a field, by assignment or lookup.
    #[must_use]
    pub fn literal(&self, field: &str) -> Option<&Value> {
        self.fields
            .iter()
            .chain(&self.lookup)
            .find(|(f, _)| f == field)
            .map(|(_, v)| v)
            .filter(|v| !v.is_object() && !v.is_array())
    }
}
