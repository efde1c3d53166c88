// ============================================================================
// Linting - Dangerous or non-idiomatic practices are flagged
// ============================================================================

#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![warn(missing_docs)]                // Public items should be documented
#![warn(dead_code)]                   // Unused code is flagged
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness
#![warn(unused_imports)]              // Unused imports are flagged
#![warn(unused_variables)]            // Unused variables are flagged
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Halldyll Design Builder
//!
//! A design-driven data generation engine with ownership tracking.
//!
//! ## Overview
//!
//! A design is a set of YAML templates describing a hierarchy of objects.
//! Rendering the templates with some input and building the result creates
//! or updates those objects in a data store. The builder:
//!
//! - Records which deployment created or changed which object and attribute
//! - Rejects writes to attributes another active deployment owns
//! - Re-runs a deployment with new input and removes what it no longer builds
//! - Decommissions a deployment, restoring everything it changed
//!
//! ## Architecture
//!
//! 1. **Definition**: `design.yaml` names the schema, templates and extensions
//! 2. **Builder**: walks a rendered document and writes objects through a journal
//! 3. **Ledger**: keeps designs, deployments and their change sets
//! 4. **Planner**: diffs a run against the previous one and reverts removals
//!
//! ## Modules
//!
//! - [`config`]: Definition parsing and validation
//! - [`schema`]: Object type introspection
//! - [`store`]: Object store and database transactions
//! - [`ledger`]: Ownership tracking
//! - [`builder`]: Design document builder
//! - [`ext`]: Extension registry and built-in extensions
//! - [`planner`]: Change set diff and decommissioning
//! - [`runner`]: Full design runs
//! - [`state`]: State persistence
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! sites:
//!   - name: "{{ site }}"
//!     status: active
//!     devices:
//!       - "!create_or_update:name": edge-router-1
//!         tags:
//!           - name: edge
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod builder;
pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod ext;
pub mod ledger;
pub mod planner;
pub mod render;
pub mod runner;
pub mod schema;
pub mod state;
pub mod store;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::{BuildContext, Builder, Journal};
pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{DefinitionParser, DefinitionValidator, DesignDefinition, DocumentHasher};
pub use error::{DesignError, Result};
pub use ext::{Extension, ExtensionRegistry};
pub use ledger::{ChangeSet, Deployment, Ledger, Record, WriteGuard};
pub use planner::{DecommissionEngine, DecommissionMode, DiffEngine};
pub use runner::{DesignRunner, RunOutcome, RunRequest};
pub use schema::{SchemaCatalog, SchemaOracle};
pub use state::{LocalStateStore, StateStore};
pub use store::{Database, MemoryStore, ObjectStore, SharedDatabase};
