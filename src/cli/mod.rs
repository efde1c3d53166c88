//! CLI module for the Halldyll design builder.
//!
//! This module provides the command-line interface for running designs
//! and managing their deployments.

mod commands;
mod output;

pub use commands::{Cli, Commands, OutputFormat, RunArgs, StateCommands, parse_assignment};
pub use output::OutputFormatter;
