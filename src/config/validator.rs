//! Definition validation.
//!
//! This module checks a design definition before anything is rendered:
//! field constraints declared on the definition types, naming rules and
//! consistency between the design mode, extensions and referenced files.

use crate::error::{ConfigError, DesignError, Result};
use std::collections::HashSet;
use tracing::debug;
use validator::Validate;

use super::definition::{CheckConfig, DesignDefinition};

/// Validator for design definitions.
#[derive(Debug, Default)]
pub struct DefinitionValidator {
    /// Extension names available to designs.
    known_extensions: HashSet<String>,
    /// Whether referenced files must exist.
    check_files: bool,
}

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<DefinitionIssue>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct DefinitionIssue {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl DefinitionValidator {
    /// Creates a validator accepting the given extension names.
    #[must_use]
    pub fn new<I, S>(known_extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            known_extensions: known_extensions.into_iter().map(Into::into).collect(),
            check_files: false,
        }
    }

    /// Also requires the schema, templates and context file to exist.
    #[must_use]
    pub const fn with_file_checks(mut self, check_files: bool) -> Self {
        self.check_files = check_files;
        self
    }

    /// Validates a design definition.
    ///
    /// # Errors
    ///
    /// Returns the first error if validation fails.
    pub fn validate(&self, definition: &DesignDefinition) -> Result<ValidationResult> {
        let result = self.check(definition);

        if result.errors.is_empty() {
            debug!("Definition validation passed");
            Ok(result)
        } else {
            let first_error = &result.errors[0];
            Err(DesignError::Config(ConfigError::validation(
                first_error.message.clone(),
                first_error.field.clone(),
            )))
        }
    }

    /// Collects every error and warning without failing.
    #[must_use]
    pub fn check(&self, definition: &DesignDefinition) -> ValidationResult {
        let mut result = ValidationResult::default();

        if let Err(errors) = definition.validate() {
            result.errors.push(DefinitionIssue {
                field: String::from("design"),
                message: errors.to_string(),
            });
        }

        Self::validate_name(definition, &mut result);
        self.validate_files(definition, &mut result);
        self.validate_extensions(definition, &mut result);
        Self::validate_checks(&definition.context.checks, &mut result);
        Self::validate_mode(definition, &mut result);
        result
    }

    fn validate_name(definition: &DesignDefinition, result: &mut ValidationResult) {
        if !definition.design.name.is_empty() && !is_valid_name(&definition.design.name) {
            result.errors.push(DefinitionIssue {
                field: String::from("design.name"),
                message: format!(
                    "Design name '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                    definition.design.name
                ),
            });
        }
    }

    fn validate_files(&self, definition: &DesignDefinition, result: &mut ValidationResult) {
        let mut seen = HashSet::new();
        for (i, template) in definition.templates.iter().enumerate() {
            if !seen.insert(template) {
                result.errors.push(DefinitionIssue {
                    field: format!("templates[{i}]"),
                    message: format!("Duplicate template: {template}"),
                });
            }
        }

        if !self.check_files {
            return;
        }

        let mut files: Vec<(String, &String)> = vec![(String::from("schema"), &definition.schema)];
        files.extend(
            definition
                .templates
                .iter()
                .enumerate()
                .map(|(i, t)| (format!("templates[{i}]"), t)),
        );
        if let Some(file) = &definition.context.file {
            files.push((String::from("context.file"), file));
        }
        if let Some(report) = &definition.report {
            files.push((String::from("report"), report));
        }

        for (field, file) in files {
            if !definition.resolve(file).exists() {
                result.errors.push(DefinitionIssue {
                    field,
                    message: format!("File not found: {file}"),
                });
            }
        }
    }

    fn validate_extensions(&self, definition: &DesignDefinition, result: &mut ValidationResult) {
        let mut seen = HashSet::new();
        for (i, name) in definition.extensions.iter().enumerate() {
            if !seen.insert(name) {
                result.warnings.push(format!("extensions[{i}]: '{name}' is listed twice"));
            }
            if !self.known_extensions.contains(name) {
                result.errors.push(DefinitionIssue {
                    field: format!("extensions[{i}]"),
                    message: format!("Unknown extension: {name}"),
                });
            }
        }

        let uses_context_file = definition.extensions.iter().any(|e| e == "context_file");
        if uses_context_file && definition.context_dir.is_none() {
            result.errors.push(DefinitionIssue {
                field: String::from("context_dir"),
                message: String::from("The context_file extension needs a context_dir"),
            });
        }
        if !uses_context_file && definition.context_dir.is_some() {
            result
                .warnings
                .push(String::from("context_dir is set but the context_file extension is not enabled"));
        }
    }

    fn validate_checks(checks: &[CheckConfig], result: &mut ValidationResult) {
        for (i, check) in checks.iter().enumerate() {
            let empty = match check {
                CheckConfig::Required { fields } => fields.is_empty(),
                CheckConfig::Distinct { field, .. } => field.is_empty(),
                CheckConfig::OneOf { field, values } => field.is_empty() || values.is_empty(),
            };
            if empty {
                result.errors.push(DefinitionIssue {
                    field: format!("context.checks[{i}]"),
                    message: String::from("Check has nothing to check"),
                });
            }
        }
    }

    fn validate_mode(definition: &DesignDefinition, result: &mut ValidationResult) {
        if definition.is_deployment() {
            return;
        }
        if !definition.protected_types.is_empty() {
            result.warnings.push(String::from(
                "protected_types has no effect on ad-hoc designs: they record no ownership",
            ));
        }
    }
}

/// Validates that a name follows the naming convention.
/// Names must be lowercase alphanumeric with hyphens, starting with a letter.
fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    let starts_with_letter = chars.next().is_some_and(|c| c.is_ascii_lowercase());
    starts_with_letter
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !name.ends_with('-')
        && !name.contains("--")
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl std::fmt::Display for DefinitionIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DefinitionParser;

    fn definition(yaml: &str) -> DesignDefinition {
        DefinitionParser::new().parse_yaml(yaml, None).expect("parse")
    }

    #[test]
    fn test_valid_name() {
        assert!(is_valid_name("edge-site"));
        assert!(is_valid_name("dc-42"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("Edge"));
        assert!(!is_valid_name("1site"));
        assert!(!is_valid_name("edge_site"));
        assert!(!is_valid_name("edge-"));
        assert!(!is_valid_name("edge--site"));
    }

    #[test]
    fn test_extension_rules() {
        let validator = DefinitionValidator::new(["lookup", "context_file"]);
        let def = definition(
            "design: {name: edge}\nschema: s.yaml\ntemplates: [a.yaml]\nextensions: [context_file, nope]\n",
        );
        let result = validator.check(&def);
        assert_eq!(result.error_count(), 2);
        assert!(validator.validate(&def).is_err());
    }

    #[test]
    fn test_warnings_do_not_fail() {
        let validator = DefinitionValidator::new(["lookup"]);
        let def = definition(
            "design: {name: edge, mode: ad-hoc}\nschema: s.yaml\ntemplates: [a.yaml]\nprotected_types: [device]\n",
        );
        let result = validator.validate(&def).expect("valid");
        assert!(result.is_valid());
        assert_eq!(result.warning_count(), 1);
    }

    #[test]
    fn test_file_checks() {
        let validator = DefinitionValidator::new(Vec::<String>::new()).with_file_checks(true);
        let mut def = definition("design: {name: edge}\nschema: s.yaml\ntemplates: [a.yaml, a.yaml]\n");
        def.root = std::path::PathBuf::from("/nonexistent");
        let result = validator.check(&def);
        // schema, two missing templates and the duplicate
        assert_eq!(result.error_count(), 4);
    }
}
