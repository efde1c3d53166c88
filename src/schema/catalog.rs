//! Schema catalog loaded from a YAML file.
//!
//! The catalog is the shipped [`SchemaOracle`]: a list of object types with
//! their fields, relations and identifier fields.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

use crate::error::{ConfigError, DesignError, Result, SchemaError};

use super::types::{Cardinality, FieldKind, ObjectSchema, SchemaOracle};

/// On-disk catalog layout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogFile {
    /// Object type definitions.
    #[serde(default)]
    pub object_types: Vec<ObjectSchema>,
}

/// Validated set of object schemas.
#[derive(Debug, Clone, Default)]
pub struct SchemaCatalog {
    /// Schemas by type name.
    types: IndexMap<String, ObjectSchema>,
    /// Collection key to type name.
    plurals: HashMap<String, String>,
}

impl SchemaCatalog {
    /// Builds a catalog from object schemas, checking cross references.
    ///
    /// # Errors
    ///
    /// Returns an error if names collide, a relation targets an unknown
    /// type or field, or an identifier is not a declared field.
    pub fn from_types(object_types: Vec<ObjectSchema>) -> Result<Self> {
        let mut catalog = Self::default();

        for schema in object_types {
            if catalog.types.contains_key(&schema.name) {
                return Err(invalid(format!("object type '{}' is defined twice", schema.name)));
            }
            if let Some(plural) = &schema.plural {
                if catalog.plurals.contains_key(plural) {
                    return Err(invalid(format!("collection key '{plural}' is defined twice")));
                }
                catalog.plurals.insert(plural.clone(), schema.name.clone());
            }
            catalog.types.insert(schema.name.clone(), schema);
        }

        catalog.check_references()?;
        debug!("Schema catalog holds {} object types", catalog.types.len());
        Ok(catalog)
    }

    /// Loads a catalog from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading schema catalog from: {}", path.display());

        if !path.exists() {
            return Err(DesignError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            DesignError::Config(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        Self::parse_yaml(&content, Some(path))
    }

    /// Parses a catalog from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid or the catalog is inconsistent.
    pub fn parse_yaml(content: &str, source: Option<&Path>) -> Result<Self> {
        let file: CatalogFile = serde_yaml::from_str(content).map_err(|e| {
            DesignError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location: source.map(|p| p.display().to_string()),
            })
        })?;

        Self::from_types(file.object_types)
    }

    fn check_references(&self) -> Result<()> {
        for schema in self.types.values() {
            for identifier in &schema.identifiers {
                if schema.field(identifier).is_none() {
                    return Err(invalid(format!(
                        "identifier '{identifier}' of '{}' is not a field",
                        schema.name
                    )));
                }
            }

            for (name, def) in &schema.fields {
                if def.kind != FieldKind::Relation {
                    continue;
                }
                let relation = def.relation().ok_or_else(|| {
                    invalid(format!("relation '{}.{name}' has no target", schema.name))
                })?;
                let target = self.types.get(relation.target).ok_or_else(|| {
                    invalid(format!(
                        "relation '{}.{name}' targets unknown type '{}'",
                        schema.name, relation.target
                    ))
                })?;

                if relation.cardinality == Cardinality::OneToMany {
                    let related = relation.related_field.ok_or_else(|| {
                        invalid(format!(
                            "one-to-many relation '{}.{name}' needs a related_field",
                            schema.name
                        ))
                    })?;
                    if target.field(related).is_none() {
                        return Err(invalid(format!(
                            "related_field '{related}' of '{}.{name}' is not a field of '{}'",
                            schema.name, target.name
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

fn invalid(message: String) -> DesignError {
    DesignError::Schema(SchemaError::InvalidDefinition { message })
}

impl SchemaOracle for SchemaCatalog {
    fn object_type(&self, name: &str) -> Option<&ObjectSchema> {
        self.types
            .get(name)
            .or_else(|| self.plurals.get(name).and_then(|n| self.types.get(n)))
    }

    fn object_types(&self) -> Vec<&ObjectSchema> {
        self.types.values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r"
object_types:
  - name: site
    plural: sites
    identifiers: [name]
    fields:
      name: {type: string, required: true}
      devices: {type: relation, target: device, cardinality: one_to_many, related_field: site}
  - name: device
    plural: devices
    identifiers: [name]
    fields:
      name: {type: string, required: true}
      site: {type: relation, target: site, required: true}
";

    #[test]
    fn test_parse_and_resolve_plural() {
        let catalog = SchemaCatalog::parse_yaml(CATALOG, None).expect("catalog");
        assert_eq!(catalog.object_types().len(), 2);
        assert_eq!(catalog.require("sites").expect("plural").name, "site");
        assert_eq!(catalog.require("device").expect("name").name, "device");
        assert!(catalog.require("racks").is_err());
    }

    #[test]
    fn test_unknown_target_rejected() {
        let yaml = r"
object_types:
  - name: device
    fields:
      rack: {type: relation, target: rack}
";
        let err = SchemaCatalog::parse_yaml(yaml, None).expect_err("should fail");
        assert!(err.to_string().contains("unknown type 'rack'"));
    }

    #[test]
    fn test_one_to_many_requires_related_field() {
        let yaml = r"
object_types:
  - name: site
    fields:
      devices: {type: relation, target: device, cardinality: one_to_many}
  - name: device
    fields:
      name: {type: string}
";
        assert!(SchemaCatalog::parse_yaml(yaml, None).is_err());
    }

    #[test]
    fn test_identifier_must_be_field() {
        let yaml = r"
object_types:
  - name: site
    identifiers: [slug]
    fields:
      name: {type: string}
";
        assert!(SchemaCatalog::parse_yaml(yaml, None).is_err());
    }
}
