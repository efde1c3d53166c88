//! Definition parser for loading design definition files.
//!
//! This module handles loading definitions from YAML files and environment
//! variables, with proper precedence and error handling.

use crate::error::{ConfigError, DesignError, Result};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::definition::DesignDefinition;

/// Environment variable overriding the definition file location.
pub const ENV_DESIGN_FILE: &str = "DESIGN_BUILDER_FILE";

/// Environment variable overriding the state file path.
pub const ENV_STATE_PATH: &str = "DESIGN_BUILDER_STATE_PATH";

/// Environment variable naming the actor recorded on deployments.
pub const ENV_ACTOR: &str = "DESIGN_BUILDER_ACTOR";

/// Definition parser for loading design definitions.
#[derive(Debug, Default)]
pub struct DefinitionParser {
    /// Base path for resolving relative paths.
    base_path: Option<PathBuf>,
}

impl DefinitionParser {
    /// Creates a new definition parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving relative paths.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads a definition from a YAML file.
    ///
    /// Relative paths inside the definition resolve against the file's directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<DesignDefinition> {
        let path = path.as_ref();
        info!("Loading design definition from: {}", path.display());

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

        let mut definition = self.parse_yaml(&content, Some(path))?;
        definition.root = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        Ok(definition)
    }

    /// Parses a definition from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<DesignDefinition> {
        debug!("Parsing YAML design definition");

        let mut definition: DesignDefinition = serde_yaml::from_str(content).map_err(|e| {
            let location = source.map(|p| p.display().to_string());
            DesignError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location,
            })
        })?;
        if let Some(base) = &self.base_path {
            definition.root.clone_from(base);
        }

        debug!("Successfully parsed definition for design: {}", definition.design.name);
        Ok(definition)
    }

    /// Loads a definition with environment variable overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<DesignDefinition> {
        let mut definition = self.load_file(path)?;
        Self::apply_env_overrides(&mut definition);
        Ok(definition)
    }

    /// Applies environment variable overrides to the definition.
    fn apply_env_overrides(definition: &mut DesignDefinition) {
        if let Ok(path) = std::env::var(ENV_STATE_PATH) {
            debug!("Overriding state.path from environment");
            definition.state.path = Some(path);
        }
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                DesignError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }

    /// Loads the input data of a design: the context file overlaid with
    /// inline data.
    ///
    /// # Errors
    ///
    /// Returns an error if the context file cannot be read or is not a mapping.
    pub fn load_context(&self, definition: &DesignDefinition) -> Result<Map<String, Value>> {
        let mut data = Map::new();
        if let Some(file) = &definition.context.file {
            let path = definition.resolve(file);
            let content = std::fs::read_to_string(&path).map_err(|e| {
                DesignError::Config(ConfigError::ParseError {
                    message: format!("Failed to read context file: {e}"),
                    location: Some(path.display().to_string()),
                })
            })?;
            let value: Value = serde_yaml::from_str(&content).map_err(|e| {
                DesignError::Config(ConfigError::ParseError {
                    message: format!("YAML parse error: {e}"),
                    location: Some(path.display().to_string()),
                })
            })?;
            match value {
                Value::Object(map) => data = map,
                Value::Null => {}
                _ => {
                    return Err(DesignError::Config(ConfigError::validation(
                        "the context file must contain a mapping",
                        "context.file",
                    )));
                }
            }
        }
        for (key, value) in &definition.context.data {
            data.insert(key.clone(), value.clone());
        }
        Ok(data)
    }

    /// Returns the actor recorded on deployment changes.
    #[must_use]
    pub fn actor() -> String {
        std::env::var(ENV_ACTOR)
            .or_else(|_| std::env::var("USER"))
            .unwrap_or_else(|_| String::from("unknown"))
    }
}

/// Default definition file names to search for.
pub const DEFAULT_DESIGN_FILES: &[&str] = &[
    "design.yaml",
    "design.yml",
    "halldyll.design.yaml",
    "halldyll.design.yml",
];

/// Finds the definition file in the current directory or parent directories.
///
/// # Errors
///
/// Returns an error if no definition file is found.
pub fn find_design_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_DESIGN_FILES {
            let candidate = current.join(filename);
            if candidate.exists() {
                info!("Found design definition: {}", candidate.display());
                return Ok(candidate);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(DesignError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_DESIGN_FILES[0]),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    const MINIMAL: &str = r"
design:
  name: edge-site
  mode: ad-hoc
schema: schema.yaml
templates:
  - site.yaml
";

    #[test]
    fn test_parse_minimal_definition() {
        let definition = DefinitionParser::new()
            .parse_yaml(MINIMAL, None)
            .expect("parse");
        assert_eq!(definition.design.name, "edge-site");
        assert!(!definition.is_deployment());
        assert!(definition.extensions.is_empty());
    }

    #[test]
    fn test_load_file_sets_root_and_context() {
        let temp = TempDir::new().expect("temp dir");
        let nested = temp.path().join("a").join("b");
        std::fs::create_dir_all(&nested).expect("mkdir");
        let file = temp.path().join("design.yaml");
        std::fs::write(
            &file,
            format!("{MINIMAL}context:\n  file: input.yaml\n  data:\n    region: eu\n"),
        )
        .expect("write");
        std::fs::write(temp.path().join("input.yaml"), "region: us\nsite: s1\n").expect("write");

        let parser = DefinitionParser::new();
        let definition = parser.load_file(&file).expect("load");
        assert_eq!(definition.root, temp.path());

        let context = parser.load_context(&definition).expect("context");
        assert_eq!(context.get("region"), Some(&json!("eu")));
        assert_eq!(context.get("site"), Some(&json!("s1")));

        assert_eq!(find_design_file(&nested).expect("find"), file);
    }

    #[test]
    fn test_missing_file() {
        let err = DefinitionParser::new()
            .load_file("/nonexistent/design.yaml")
            .expect_err("missing");
        assert!(matches!(err, DesignError::Config(ConfigError::FileNotFound { .. })));
    }
}
