//! Design definition types.
//!
//! This module defines the structs that map to the `design.yaml` file: the
//! design's identity, its templates, the input checks run before a build,
//! the extensions it uses and where its state lives.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use validator::Validate;

use crate::ledger::DesignMode;

/// Default local state file, relative to the definition directory.
pub const DEFAULT_STATE_PATH: &str = ".halldyll-design/state.json";

/// The root structure of a design definition file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Validate)]
pub struct DesignDefinition {
    /// Design identity.
    #[validate(nested)]
    pub design: DesignInfo,

    /// Schema catalog file describing the object types.
    #[validate(length(min = 1, message = "a schema catalog path is required"))]
    pub schema: String,

    /// Templates rendered and built in order.
    #[validate(length(min = 1, message = "at least one template is required"))]
    pub templates: Vec<String>,

    /// Input data and checks.
    #[serde(default)]
    pub context: ContextConfig,

    /// Optional report template rendered after a successful run.
    #[serde(default)]
    pub report: Option<String>,

    /// Extensions enabled for this design.
    #[serde(default)]
    pub extensions: Vec<String>,

    /// Output directory for the `context_file` extension.
    #[serde(default)]
    pub context_dir: Option<String>,

    /// State persistence.
    #[serde(default)]
    pub state: StateConfig,

    /// Object types guarded against direct writes to owned attributes.
    #[serde(default)]
    pub protected_types: Vec<String>,

    /// Directory the definition was loaded from.
    #[serde(skip)]
    pub root: PathBuf,
}

/// Identity of a design.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct DesignInfo {
    /// Unique design name.
    #[validate(length(min = 1, max = 63))]
    pub name: String,

    /// Run tracking mode.
    #[serde(default)]
    pub mode: DesignMode,

    /// Design version.
    #[serde(default = "default_version")]
    #[validate(length(min = 1))]
    pub version: String,

    /// Free-form description.
    #[serde(default)]
    pub description: String,
}

/// Input data of a design.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ContextConfig {
    /// YAML file with input data, merged under inline data.
    #[serde(default)]
    pub file: Option<String>,

    /// Inline input data.
    #[serde(default)]
    pub data: serde_json::Map<String, Value>,

    /// Checks run against the input before any write.
    #[serde(default)]
    pub checks: Vec<CheckConfig>,
}

/// Declarative input check.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum CheckConfig {
    /// Every path must be present and non-null.
    Required {
        /// Dotted paths into the input.
        fields: Vec<String>,
    },
    /// Items of a list must be unique, optionally by one of their keys.
    Distinct {
        /// Dotted path of the list.
        field: String,
        /// Key compared between items.
        #[serde(default)]
        key: Option<String>,
    },
    /// A value must be one of a fixed set.
    OneOf {
        /// Dotted path of the value.
        field: String,
        /// Allowed values.
        values: Vec<Value>,
    },
}

/// State persistence configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateConfig {
    /// Local state file path.
    #[serde(default)]
    pub path: Option<String>,
}

fn default_version() -> String {
    String::from("1.0.0")
}

impl DesignDefinition {
    /// Resolves a path relative to the definition directory.
    #[must_use]
    pub fn resolve(&self, relative: impl AsRef<Path>) -> PathBuf {
        let relative = relative.as_ref();
        if relative.is_absolute() {
            relative.to_path_buf()
        } else {
            self.root.join(relative)
        }
    }

    /// Path of the local state file.
    #[must_use]
    pub fn state_path(&self) -> PathBuf {
        self.resolve(self.state.path.as_deref().unwrap_or(DEFAULT_STATE_PATH))
    }

    /// Paths of the templates, in build order.
    #[must_use]
    pub fn template_paths(&self) -> Vec<PathBuf> {
        self.templates.iter().map(|t| self.resolve(t)).collect()
    }

    /// Returns true if runs are tracked as deployments.
    #[must_use]
    pub fn is_deployment(&self) -> bool {
        self.design.mode == DesignMode::Deployment
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_and_paths() {
        let yaml = r"
design:
  name: edge-site
schema: schema.yaml
templates: [site.yaml]
";
        let mut definition: DesignDefinition = serde_yaml::from_str(yaml).expect("parse");
        definition.root = PathBuf::from("/designs/edge");

        assert_eq!(definition.design.version, "1.0.0");
        assert!(definition.is_deployment());
        assert_eq!(definition.state_path(), PathBuf::from("/designs/edge/.halldyll-design/state.json"));
        assert_eq!(definition.template_paths(), vec![PathBuf::from("/designs/edge/site.yaml")]);
        assert!(definition.validate().is_ok());
    }

    #[test]
    fn test_checks_parse() {
        let yaml = r"
checks:
  - required: {fields: [site.name]}
  - distinct: {field: devices, key: name}
  - one_of: {field: site.region, values: [eu, us]}
";
        let context: ContextConfig = serde_yaml::from_str(yaml).expect("parse");
        assert_eq!(context.checks.len(), 3);
        assert!(matches!(context.checks[1], CheckConfig::Distinct { .. }));
    }

    #[test]
    fn test_derive_validation_rejects_empty_templates() {
        let yaml = "design: {name: x}\nschema: s.yaml\ntemplates: []\n";
        let definition: DesignDefinition = serde_yaml::from_str(yaml).expect("parse");
        assert!(definition.validate().is_err());
    }
}
