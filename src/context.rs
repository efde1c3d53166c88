//! Input checks run before a design writes anything.

use serde_json::{Map, Value};
use std::collections::HashSet;

use crate::config::CheckConfig;
use crate::error::{DesignError, Result, ValidationError};
use crate::render::lookup_path;

/// A check applied to the design input.
#[cfg_attr(test, mockall::automock)]
pub trait ContextCheck: Send + Sync {
    /// Name used in error messages.
    fn name(&self) -> String;

    /// Checks the input.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::ContextCheckFailed`] if the input is rejected.
    fn check(&self, context: &Map<String, Value>) -> Result<()>;
}

/// Check declared in the design definition.
#[derive(Debug, Clone)]
pub struct DeclaredCheck {
    config: CheckConfig,
}

impl DeclaredCheck {
    /// Wraps a check from the definition.
    #[must_use]
    pub const fn new(config: CheckConfig) -> Self {
        Self { config }
    }

    /// Builds the checks of a definition in declaration order.
    #[must_use]
    pub fn from_configs(configs: &[CheckConfig]) -> Vec<Box<dyn ContextCheck>> {
        configs
            .iter()
            .cloned()
            .map(|c| Box::new(Self::new(c)) as Box<dyn ContextCheck>)
            .collect()
    }

    fn fail(&self, message: String) -> DesignError {
        DesignError::Validation(ValidationError::ContextCheckFailed {
            check: self.name(),
            message,
        })
    }
}

impl ContextCheck for DeclaredCheck {
    fn name(&self) -> String {
        match &self.config {
            CheckConfig::Required { .. } => String::from("required"),
            CheckConfig::Distinct { field, .. } => format!("distinct({field})"),
            CheckConfig::OneOf { field, .. } => format!("one_of({field})"),
        }
    }

    fn check(&self, context: &Map<String, Value>) -> Result<()> {
        match &self.config {
            CheckConfig::Required { fields } => {
                for field in fields {
                    if lookup_path(context, field).is_none_or(Value::is_null) {
                        return Err(self.fail(format!("'{field}' is required")));
                    }
                }
                Ok(())
            }
            CheckConfig::Distinct { field, key } => {
                let Some(value) = lookup_path(context, field) else {
                    return Ok(());
                };
                let Value::Array(items) = value else {
                    return Err(self.fail(format!("'{field}' is not a list")));
                };
                let mut seen = HashSet::new();
                for item in items {
                    let compared = match key {
                        Some(key) => item.get(key).unwrap_or(&Value::Null),
                        None => item,
                    };
                    if !seen.insert(compared.to_string()) {
                        return Err(self.fail(format!("duplicate value {compared} in '{field}'")));
                    }
                }
                Ok(())
            }
            CheckConfig::OneOf { field, values } => match lookup_path(context, field) {
                Some(value) if !values.contains(value) => {
                    Err(self.fail(format!("'{field}' is {value}, expected one of {values:?}")))
                }
                _ => Ok(()),
            },
        }
    }
}

/// Runs checks in order, stopping at the first failure.
///
/// # Errors
///
/// Returns the first failing check's error.
pub fn run_checks(checks: &[Box<dyn ContextCheck>], context: &Map<String, Value>) -> Result<()> {
    checks.iter().try_for_each(|check| check.check(context))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn input(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_required() {
        let check = DeclaredCheck::new(CheckConfig::Required {
            fields: vec![String::from("site.name"), String::from("site.region")],
        });
        assert!(check.check(&input(json!({"site": {"name": "s1", "region": "eu"}}))).is_ok());
        let err = check
            .check(&input(json!({"site": {"name": "s1", "region": null}})))
            .expect_err("null region");
        assert!(err.to_string().contains("site.region"));
    }

    #[test]
    fn test_distinct_by_key() {
        let check = DeclaredCheck::new(CheckConfig::Distinct {
            field: String::from("devices"),
            key: Some(String::from("name")),
        });
        assert!(check.check(&input(json!({"devices": [{"name": "a"}, {"name": "b"}]}))).is_ok());
        assert!(check.check(&input(json!({"devices": [{"name": "a"}, {"name": "a"}]}))).is_err());
        assert!(check.check(&input(json!({}))).is_ok());
    }

    #[test]
    fn test_one_of() {
        let check = DeclaredCheck::new(CheckConfig::OneOf {
            field: String::from("region"),
            values: vec![json!("eu"), json!("us")],
        });
        assert!(check.check(&input(json!({"region": "eu"}))).is_ok());
        assert!(matches!(
            check.check(&input(json!({"region": "ap"}))),
            Err(DesignError::Validation(ValidationError::ContextCheckFailed { .. }))
        ));
    }

    #[test]
    fn test_run_checks_stops_at_first_failure() {
        let mut first = MockContextCheck::new();
        first.expect_check().times(1).returning(|_| {
            Err(DesignError::Validation(ValidationError::ContextCheckFailed {
                check: String::from("first"),
                message: String::from("no"),
            }))
        });
        let mut second = MockContextCheck::new();
        second.expect_check().never();

        let checks: Vec<Box<dyn ContextCheck>> = vec![Box::new(first), Box::new(second)];
        assert!(run_checks(&checks, &Map::new()).is_err());
    }
}
