//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use serde_json::json;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::{DesignDefinition, ValidationResult};
use crate::ledger::{ChangeSet, Deployment, DeploymentStatus, Ledger, Record, Scope};
use crate::planner::DiffType;
use crate::runner::RunOutcome;
use crate::state::LockInfo;
use crate::store::{Database, ObjectRef};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Record diff row for table display.
#[derive(Tabled)]
struct DiffRow {
    #[tabled(rename = "Change")]
    change: String,
    #[tabled(rename = "Key")]
    key: String,
    #[tabled(rename = "Object")]
    object: String,
    #[tabled(rename = "Fields")]
    fields: String,
}

/// Record row for table display.
#[derive(Tabled)]
struct RecordRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Key")]
    key: String,
    #[tabled(rename = "Object")]
    object: String,
    #[tabled(rename = "Scope")]
    scope: String,
    #[tabled(rename = "Attributes")]
    attributes: String,
}

/// Deployment row for table display.
#[derive(Tabled)]
struct DeploymentRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Version")]
    version: String,
    #[tabled(rename = "Updated")]
    updated: String,
    #[tabled(rename = "By")]
    updated_by: String,
    #[tabled(rename = "Change sets")]
    change_sets: usize,
}

/// Ownership row for table display.
#[derive(Tabled)]
struct OwnerRow {
    #[tabled(rename = "Deployment")]
    deployment: String,
    #[tabled(rename = "Scope")]
    scope: String,
    #[tabled(rename = "Attributes")]
    attributes: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats the outcome of a plan or run.
    #[must_use]
    pub fn format_outcome(&self, outcome: &RunOutcome) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(outcome).unwrap_or_default(),
            OutputFormat::Text => Self::format_outcome_text(outcome),
        }
    }

    fn format_outcome_text(outcome: &RunOutcome) -> String {
        let mut output = String::new();
        let title = if outcome.dry_run { "Plan" } else { "Run" };
        let _ = write!(output, "\n{title}: design {}", outcome.design.bold());
        if let Some(deployment) = &outcome.deployment {
            let _ = write!(output, ", deployment {}", deployment.bold());
        }
        let _ = writeln!(output, "\n   Document hash: {}\n", Self::truncate(&outcome.document_hash, 8));

        let rows: Vec<DiffRow> = match &outcome.diff {
            Some(diff) => diff
                .actionable_diffs()
                .into_iter()
                .map(|d| DiffRow {
                    change: Self::format_diff_type(d.diff_type),
                    key: Self::truncate(&d.key, 40),
                    object: d.object.to_string(),
                    fields: d
                        .details
                        .iter()
                        .map(|detail| detail.field.as_str())
                        .collect::<Vec<_>>()
                        .join(", "),
                })
                .collect(),
            None => outcome
                .records
                .iter()
                .map(|r| DiffRow {
                    change: Self::format_diff_type(DiffType::Added),
                    key: Self::truncate(&r.key, 40),
                    object: r.object.to_string(),
                    fields: Self::attribute_list(r),
                })
                .collect(),
        };

        if rows.is_empty() {
            let _ = writeln!(output, "{} No changes - the deployment is up to date.", "✓".green());
        } else {
            output.push_str(&Table::new(rows).to_string());
            output.push('\n');
        }

        let _ = writeln!(
            output,
            "\n{}: {} added, {} updated, {} removed, {} retained",
            title,
            outcome.added.to_string().green(),
            outcome.updated.to_string().yellow(),
            outcome.removed.to_string().red(),
            outcome.retained
        );

        if let Some(report) = &outcome.report {
            let _ = writeln!(output, "\n{report}");
        }
        output
    }

    /// Formats the deployments of a design.
    #[must_use]
    pub fn format_deployments(&self, ledger: &Ledger, design: &str) -> String {
        let deployments: Vec<&Deployment> = ledger
            .design_by_name(design)
            .map(|d| ledger.deployments().filter(|dep| dep.design_id == d.id).collect())
            .unwrap_or_default();

        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(&deployments).unwrap_or_default(),
            OutputFormat::Text => {
                if deployments.is_empty() {
                    return format!("\nDesign {design} has no deployments.\n");
                }
                let rows: Vec<DeploymentRow> = deployments
                    .iter()
                    .map(|d| DeploymentRow {
                        name: d.name.clone(),
                        status: Self::format_status(d.status),
                        version: d.version.clone(),
                        updated: d.updated_at.format("%Y-%m-%d %H:%M").to_string(),
                        updated_by: d.updated_by.clone(),
                        change_sets: d.change_sets.len(),
                    })
                    .collect();
                format!("\nDeployments of {design}:\n{}\n", Table::new(rows))
            }
        }
    }

    /// Formats a deployment with its active change set.
    #[must_use]
    pub fn format_deployment(&self, ledger: &Ledger, deployment: &Deployment) -> String {
        let active = ledger.active_change_set(deployment.id);

        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(&json!({
                "deployment": deployment,
                "active_change_set": active,
            }))
            .unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = String::new();
                let _ = writeln!(output, "\nDeployment: {}", deployment.name.bold());
                let _ = writeln!(output, "   Status: {}", Self::format_status(deployment.status));
                let _ = writeln!(output, "   Version: {}", deployment.version);
                let _ = writeln!(output, "   Created: {}", deployment.created_at);
                let _ = writeln!(
                    output,
                    "   Updated: {} by {}",
                    deployment.updated_at, deployment.updated_by
                );
                let _ = writeln!(output, "   Change sets: {}", deployment.change_sets.len());

                match active {
                    Some(change_set) => {
                        let _ = writeln!(
                            output,
                            "\nActive change set {} ({} records):",
                            change_set.id,
                            change_set.records.len()
                        );
                        output.push_str(&Self::records_table(&change_set.records));
                        output.push('\n');
                    }
                    None => output.push_str("\nNo active change set.\n"),
                }
                output
            }
        }
    }

    /// Formats the audit records of a decommission.
    #[must_use]
    pub fn format_decommission(&self, change_set: &ChangeSet) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(change_set).unwrap_or_default(),
            OutputFormat::Text => {
                if change_set.records.is_empty() {
                    return format!("{} Nothing to revert.\n", "✓".green());
                }
                format!(
                    "\nReverted {} record(s):\n{}\n",
                    change_set.records.len(),
                    Self::records_table(&change_set.records)
                )
            }
        }
    }

    /// Formats the deployments holding records on an object.
    #[must_use]
    pub fn format_owners(&self, ledger: &Ledger, object: &ObjectRef, attribute: Option<&str>) -> String {
        let claims: Vec<(&Deployment, &Record)> = ledger
            .claims_on(object, None)
            .into_iter()
            .filter(|(_, r)| attribute.is_none_or(|a| r.owns(a)))
            .collect();

        match self.format {
            OutputFormat::Json => {
                let owners: Vec<_> = claims
                    .iter()
                    .map(|(d, r)| {
                        json!({
                            "deployment": d.name,
                            "scope": r.scope,
                            "attributes": r.changes.keys().collect::<Vec<_>>(),
                        })
                    })
                    .collect();
                serde_json::to_string_pretty(&owners).unwrap_or_default()
            }
            OutputFormat::Text => {
                if claims.is_empty() {
                    return format!("{object} is not owned by any active deployment.\n");
                }
                let rows: Vec<OwnerRow> = claims
                    .iter()
                    .map(|(d, r)| OwnerRow {
                        deployment: d.name.clone(),
                        scope: Self::format_scope(r.scope),
                        attributes: Self::attribute_list(r),
                    })
                    .collect();
                format!("\nOwners of {object}:\n{}\n", Table::new(rows))
            }
        }
    }

    /// Formats a definition validation result.
    #[must_use]
    pub fn format_validation(
        &self,
        definition: &DesignDefinition,
        result: &ValidationResult,
        show_warnings: bool,
    ) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(&json!({
                "design": definition.design.name,
                "valid": result.is_valid(),
                "errors": result.errors.iter().map(ToString::to_string).collect::<Vec<_>>(),
                "warnings": result.warnings,
            }))
            .unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = String::new();
                if result.is_valid() {
                    let _ = writeln!(output, "{} Design definition is valid!", "✓".green());
                } else {
                    let _ = writeln!(output, "{} {} error(s):", "✗".red(), result.error_count());
                    for error in &result.errors {
                        let _ = writeln!(output, "   - {error}");
                    }
                }
                if show_warnings && !result.warnings.is_empty() {
                    let _ = writeln!(output, "\n{} Warnings:", "⚠".yellow());
                    for warning in &result.warnings {
                        let _ = writeln!(output, "   - {warning}");
                    }
                }

                let _ = writeln!(output, "\nDesign summary:");
                let _ = writeln!(output, "   Name: {}", definition.design.name);
                let _ = writeln!(output, "   Mode: {}", definition.design.mode);
                let _ = writeln!(output, "   Templates: {}", definition.templates.len());
                let _ = writeln!(output, "   Extensions: {}", definition.extensions.join(", "));
                let _ = writeln!(output, "   State: {}", definition.state_path().display());
                output
            }
        }
    }

    /// Formats a state summary.
    #[must_use]
    pub fn format_state(&self, db: &Database, lock: Option<&LockInfo>) -> String {
        let deployments = db.ledger.deployments().count();
        let active = db.ledger.deployments().filter(|d| d.is_active()).count();

        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(&json!({
                "version": db.version,
                "last_updated": db.last_updated,
                "objects": db.objects.len(),
                "deployments": deployments,
                "active_deployments": active,
                "lock": lock,
            }))
            .unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = String::from("\nState\n\n");
                let _ = writeln!(output, "   Version: {}", db.version);
                if let Some(updated) = db.last_updated {
                    let _ = writeln!(output, "   Last updated: {updated}");
                }
                let _ = writeln!(output, "   Objects: {}", db.objects.len());
                let _ = writeln!(output, "   Deployments: {deployments} ({active} active)");
                match lock {
                    Some(lock) if !lock.is_expired() => {
                        let _ = writeln!(
                            output,
                            "   Lock: held by {} ({}s left)",
                            lock.describe(),
                            lock.remaining_secs()
                        );
                    }
                    _ => output.push_str("   Lock: none\n"),
                }
                output
            }
        }
    }

    fn records_table(records: &[Record]) -> String {
        let rows: Vec<RecordRow> = records
            .iter()
            .map(|r| RecordRow {
                index: r.index,
                key: Self::truncate(&r.key, 40),
                object: r.object.to_string(),
                scope: Self::format_scope(r.scope),
                attributes: Self::attribute_list(r),
            })
            .collect();
        Table::new(rows).to_string()
    }

    fn attribute_list(record: &Record) -> String {
        Self::truncate(
            &record.changes.keys().map(String::as_str).collect::<Vec<_>>().join(", "),
            50,
        )
    }

    /// Formats a diff type with color.
    fn format_diff_type(diff_type: DiffType) -> String {
        match diff_type {
            DiffType::Added => "+added".green().to_string(),
            DiffType::Updated => "~updated".yellow().to_string(),
            DiffType::Removed => "-removed".red().to_string(),
            DiffType::Retained => "retained".dimmed().to_string(),
        }
    }

    fn format_status(status: DeploymentStatus) -> String {
        match status {
            DeploymentStatus::Active => "active".green().to_string(),
            DeploymentStatus::Decommissioned => "decommissioned".dimmed().to_string(),
        }
    }

    fn format_scope(scope: Scope) -> String {
        match scope {
            Scope::Full => String::from("full"),
            Scope::Attributes => String::from("attributes"),
        }
    }

    /// Truncates a string to a maximum number of characters.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{kept}...")
        }
    }

    /// Formats a success message.
    #[must_use]
    pub fn success(&self, message: &str) -> String {
        match self.format {
            OutputFormat::Json => {
                serde_json::to_string_pretty(&json!({ "status": "success", "message": message }))
                    .unwrap_or_default()
            }
            OutputFormat::Text => format!("{} {message}", "✓".green()),
        }
    }

    /// Formats an error message.
    #[must_use]
    pub fn error(&self, message: &str) -> String {
        match self.format {
            OutputFormat::Json => {
                serde_json::to_string_pretty(&json!({ "status": "error", "message": message }))
                    .unwrap_or_default()
            }
            OutputFormat::Text => format!("{} {message}", "✗".red()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_is_char_safe() {
        assert_eq!(OutputFormatter::truncate("short", 10), "short");
        assert_eq!(OutputFormatter::truncate("ééééééé", 5), "éé...");
    }

    #[test]
    fn test_json_messages() {
        let formatter = OutputFormatter::new(OutputFormat::Json);
        let value: serde_json::Value =
            serde_json::from_str(&formatter.success("done")).expect("json");
        assert_eq!(value["status"], "success");
    }

    #[test]
    fn test_empty_deployments() {
        let formatter = OutputFormatter::new(OutputFormat::Text);
        let out = formatter.format_deployments(&Ledger::default(), "edge");
        assert!(out.contains("no deployments"));
    }
}
