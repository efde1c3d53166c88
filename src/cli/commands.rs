//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;

use crate::config::ENV_DESIGN_FILE;
use crate::planner::DecommissionMode;

/// Halldyll design builder - declarative, ownership-tracked data generation.
#[derive(Parser, Debug)]
#[command(name = "halldyll-design")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the design definition file.
    #[arg(short, long, global = true, env = ENV_DESIGN_FILE)]
    pub design: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate the design definition and render its templates.
    Validate {
        /// Show all warnings, not just errors.
        #[arg(short, long)]
        warnings: bool,
    },

    /// Build the design and show the changes without keeping them.
    Plan(RunArgs),

    /// Build the design and commit the changes.
    Run {
        /// Run options.
        #[command(flatten)]
        args: RunArgs,

        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },

    /// Revert everything a deployment recorded.
    Decommission {
        /// Deployment name.
        deployment: String,

        /// Delete and restore (revert) or only drop ownership (release).
        #[arg(long, default_value = "revert")]
        mode: DecommissionMode,

        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },

    /// Delete a decommissioned deployment and its history.
    Delete {
        /// Deployment name.
        deployment: String,

        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },

    /// List the deployments of the design.
    Deployments,

    /// Show a deployment and the records of its active change set.
    Show {
        /// Deployment name.
        deployment: String,
    },

    /// Show which deployments own an object.
    Owner {
        /// Object type.
        object_type: String,

        /// Object id.
        id: String,

        /// Restrict to a single attribute.
        #[arg(long)]
        attribute: Option<String>,
    },

    /// Write an attribute directly, outside of any design run.
    Set {
        /// Object type.
        object_type: String,

        /// Object id.
        id: String,

        /// Assignment `field=value`, the value is read as YAML.
        #[arg(value_parser = parse_assignment)]
        assignment: (String, Value),

        /// Overwrite attributes owned by a deployment.
        #[arg(long)]
        bypass: bool,
    },

    /// Manage the state file.
    State {
        /// State subcommand.
        #[command(subcommand)]
        command: StateCommands,
    },
}

/// Options shared by `plan` and `run`.
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Deployment name (deployment-mode designs).
    #[arg(short = 'D', long)]
    pub deployment: Option<String>,

    /// Input override `key=value`, the value is read as YAML.
    #[arg(short, long = "input", value_parser = parse_assignment)]
    pub inputs: Vec<(String, Value)>,

    /// Adopt located objects that no deployment owns.
    #[arg(long)]
    pub import: bool,

    /// How objects dropped from the design are handled.
    #[arg(long, default_value = "revert")]
    pub removal_mode: DecommissionMode,
}

/// State management subcommands.
#[derive(Subcommand, Debug)]
pub enum StateCommands {
    /// Show a summary of the state.
    Show,

    /// Lock the state.
    Lock {
        /// Lock holder identifier.
        #[arg(long)]
        holder: Option<String>,
    },

    /// Unlock the state.
    Unlock {
        /// Lock ID to unlock.
        #[arg(long)]
        lock_id: Option<String>,

        /// Force unlock (dangerous).
        #[arg(long)]
        force: bool,
    },
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

impl Cli {
    /// Parses CLI arguments from the command line.
    #[must_use]
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

/// Parses `key=value`, reading the value as YAML and falling back to a string.
///
/// # Errors
///
/// Returns an error if there is no `=` or the key is empty.
pub fn parse_assignment(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("missing key in '{raw}'"));
    }
    let value = serde_yaml::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}
