//! Template rendering and run reports.
//!
//! Design templates are plain YAML with `{{ path }}` placeholders resolved
//! against the design input. Reports are rendered from a small data mapping
//! once a run has committed.

use serde_json::{Map, Value};
use std::fmt::Write as _;

use crate::error::{DesignError, Result, ValidationError};

/// Turns a template into a YAML document.
#[cfg_attr(test, mockall::automock)]
pub trait Renderer: Send + Sync {
    /// Renders `template` against `context`. `name` identifies the template in errors.
    ///
    /// # Errors
    ///
    /// Returns an error if the template refers to missing input.
    fn render(&self, name: &str, template: &str, context: &Map<String, Value>) -> Result<String>;
}

/// Renders the report shown after a committed run.
#[cfg_attr(test, mockall::automock)]
pub trait ReportRenderer: Send + Sync {
    /// Renders the report for the given run data.
    ///
    /// # Errors
    ///
    /// Returns an error if the report cannot be produced.
    fn render_report(&self, data: &Map<String, Value>) -> Result<String>;
}

/// Substitutes `{{ dotted.path }}` placeholders.
///
/// Strings are inserted verbatim, any other value as inline JSON, which
/// YAML reads back as a flow collection or scalar.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlaceholderRenderer;

impl PlaceholderRenderer {
    /// Creates a placeholder renderer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Renderer for PlaceholderRenderer {
    fn render(&self, name: &str, template: &str, context: &Map<String, Value>) -> Result<String> {
        let mut output = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(start) = rest.find("{{") {
            output.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let end = after.find("}}").ok_or_else(|| {
                DesignError::Validation(ValidationError::malformed(name, "unclosed '{{' placeholder"))
            })?;

            let path = after[..end].trim();
            let value = lookup_path(context, path).ok_or_else(|| {
                DesignError::Validation(ValidationError::malformed(
                    name,
                    format!("undefined variable '{path}'"),
                ))
            })?;
            match value {
                Value::String(s) => output.push_str(s),
                other => output.push_str(&other.to_string()),
            }
            rest = &after[end + 2..];
        }

        output.push_str(rest);
        Ok(output)
    }
}

/// Resolves a dotted path such as `site.devices.0.name` in a mapping.
#[must_use]
pub fn lookup_path<'v>(data: &'v Map<String, Value>, path: &str) -> Option<&'v Value> {
    let mut parts = path.split('.');
    let mut current = data.get(parts.next()?)?;
    for part in parts {
        current = match current {
            Value::Object(map) => map.get(part)?,
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Fixed plain-text summary of a run.
#[derive(Debug, Default, Clone, Copy)]
pub struct SummaryReport;

impl ReportRenderer for SummaryReport {
    fn render_report(&self, data: &Map<String, Value>) -> Result<String> {
        let text = |key: &str| data.get(key).and_then(Value::as_str).unwrap_or("-").to_string();
        let count = |key: &str| data.get(key).and_then(Value::as_u64).unwrap_or(0);

        let mut report = format!("Design {}", text("design"));
        if let Some(deployment) = data.get("deployment").and_then(Value::as_str) {
            let _ = write!(report, ", deployment {deployment}");
        }
        let _ = write!(
            report,
            ": {} added, {} updated, {} removed, {} retained",
            count("added"),
            count("updated"),
            count("removed"),
            count("retained")
        );
        Ok(report)
    }
}

/// Report rendered from a design-provided template.
#[derive(Debug)]
pub struct TemplateReport<R> {
    renderer: R,
    name: String,
    template: String,
}

impl<R: Renderer> TemplateReport<R> {
    /// Creates a report from a template and the renderer used for designs.
    pub fn new(renderer: R, name: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            renderer,
            name: name.into(),
            template: template.into(),
        }
    }
}

impl<R: Renderer> ReportRenderer for TemplateReport<R> {
    fn render_report(&self, data: &Map<String, Value>) -> Result<String> {
        self.renderer.render(&self.name, &self.template, data)
    }
}
