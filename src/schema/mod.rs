//! Schema module.
//!
//! This module exposes what the builder knows about object types:
//! - The [`SchemaOracle`] trait and the field/relation descriptions
//! - The YAML-backed [`SchemaCatalog`]
//! - Attribute validation run before every write

mod catalog;
mod constraints;
mod types;

pub use catalog::{CatalogFile, SchemaCatalog};
pub use constraints::{RequiredCheck, validate_attributes, validate_value};
pub use types::{Cardinality, FieldDef, FieldKind, ObjectSchema, Relation, SchemaOracle};
