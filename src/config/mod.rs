//! Configuration module for the Halldyll design builder.
//!
//! This module handles all definition-related functionality:
//! - Parsing and deserializing `design.yaml`
//! - Validation of definition values
//! - Hashing rendered documents for change detection

mod definition;
mod hash;
mod parser;
mod validator;

pub use definition::{
    CheckConfig, ContextConfig, DEFAULT_STATE_PATH, DesignDefinition, DesignInfo, StateConfig,
};
pub use hash::DocumentHasher;
pub use parser::{
    DEFAULT_DESIGN_FILES, DefinitionParser, ENV_ACTOR, ENV_DESIGN_FILE, ENV_STATE_PATH,
    find_design_file,
};
pub use validator::{DefinitionIssue, DefinitionValidator, ValidationResult};
