//! Object schema types.
//!
//! These types describe what the builder can introspect about an object
//! type: its fields, which of them are relations and which fields form the
//! natural identity of an object.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{DesignError, Result, SchemaError};

/// Introspectable schema of the backing data store.
pub trait SchemaOracle: Send + Sync {
    /// Resolves an object type by name or by its plural collection key.
    fn object_type(&self, name: &str) -> Option<&ObjectSchema>;

    /// Lists every known object type.
    fn object_types(&self) -> Vec<&ObjectSchema>;

    /// Resolves an object type or fails with [`SchemaError::UnknownObjectType`].
    ///
    /// # Errors
    ///
    /// Returns an error if the name is unknown.
    fn require(&self, name: &str) -> Result<&ObjectSchema> {
        self.object_type(name).ok_or_else(|| {
            DesignError::Schema(SchemaError::UnknownObjectType {
                name: name.to_string(),
            })
        })
    }
}

/// Kind of value a field holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// UTF-8 string.
    String,
    /// Signed or unsigned integer.
    Integer,
    /// Any JSON number.
    Float,
    /// Boolean flag.
    Boolean,
    /// Arbitrary structured data (mappings, lists).
    Json,
    /// Relation to another object type.
    Relation,
}

/// Cardinality of a relation field, seen from the owning object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    /// Single related object, unique on both sides.
    OneToOne,
    /// Foreign key to one related object.
    #[default]
    ManyToOne,
    /// Reverse side of a foreign key held by the children.
    OneToMany,
    /// Association set stored on the owning object.
    ManyToMany,
}

impl Cardinality {
    /// Returns true if the owning object stores a single id.
    #[must_use]
    pub const fn is_foreign_key(self) -> bool {
        matches!(self, Self::OneToOne | Self::ManyToOne)
    }
}

/// Definition of a single field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    /// Value kind.
    #[serde(rename = "type")]
    pub kind: FieldKind,

    /// Whether a non-null value is required.
    #[serde(default)]
    pub required: bool,

    /// Allowed string values, empty for unrestricted.
    #[serde(default)]
    pub choices: Vec<String>,

    /// Related object type for relation fields.
    #[serde(default)]
    pub target: Option<String>,

    /// Relation cardinality, many-to-one when omitted.
    #[serde(default)]
    pub cardinality: Option<Cardinality>,

    /// Foreign key field on the children for one-to-many relations.
    #[serde(default)]
    pub related_field: Option<String>,

    /// Whether assignment must wait until the owner has been saved once.
    #[serde(default)]
    pub deferred: bool,
}

/// Borrowed view of a relation field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relation<'a> {
    /// Related object type.
    pub target: &'a str,
    /// Relation cardinality.
    pub cardinality: Cardinality,
    /// Foreign key field on the children (one-to-many only).
    pub related_field: Option<&'a str>,
}

impl FieldDef {
    /// Returns the relation view if this is a relation field.
    #[must_use]
    pub fn relation(&self) -> Option<Relation<'_>> {
        if self.kind != FieldKind::Relation {
            return None;
        }
        self.target.as_deref().map(|target| Relation {
            target,
            cardinality: self.cardinality.unwrap_or_default(),
            related_field: self.related_field.as_deref(),
        })
    }

    /// Returns true if the field value is assigned after the owner's first save.
    ///
    /// One-to-many and many-to-many relations always are.
    #[must_use]
    pub fn is_post_save(&self) -> bool {
        self.deferred
            || self.relation().is_some_and(|r| {
                matches!(r.cardinality, Cardinality::OneToMany | Cardinality::ManyToMany)
            })
    }
}

/// Schema of one object type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectSchema {
    /// Object type name.
    pub name: String,

    /// Plural collection key used at the top of design documents.
    #[serde(default)]
    pub plural: Option<String>,

    /// Fields forming the natural identity of an object.
    #[serde(default)]
    pub identifiers: Vec<String>,

    /// Field definitions in declaration order.
    #[serde(default)]
    pub fields: IndexMap<String, FieldDef>,
}

impl ObjectSchema {
    /// Gets a field definition.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.get(name)
    }

    /// Gets a field definition or fails with [`SchemaError::UnknownField`].
    ///
    /// # Errors
    ///
    /// Returns an error if the field does not exist.
    pub fn require_field(&self, name: &str) -> Result<&FieldDef> {
        self.fields.get(name).ok_or_else(|| {
            DesignError::Schema(SchemaError::UnknownField {
                object_type: self.name.clone(),
                field: name.to_string(),
            })
        })
    }

    /// Returns true if the field is part of the natural identity.
    #[must_use]
    pub fn is_identifier(&self, field: &str) -> bool {
        self.identifiers.iter().any(|f| f == field)
    }

    /// Collection key used at the top of design documents.
    #[must_use]
    pub fn collection_key(&self) -> &str {
        self.plural.as_deref().unwrap_or(&self.name)
    }

    /// Finds the one-to-many field whose children point back through `related_field`.
    #[must_use]
    pub fn reverse_field(&self, target: &str, related_field: &str) -> Option<&str> {
        self.fields.iter().find_map(|(name, def)| {
            def.relation()
                .filter(|r| {
                    r.cardinality == Cardinality::OneToMany
                        && r.target == target
                        && r.related_field == Some(related_field)
                })
                .map(|_| name.as_str())
        })
    }
}
