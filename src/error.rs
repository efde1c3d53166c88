//! Error types for the Halldyll design builder.
//!
//! This module provides the error hierarchy for every stage of a design run:
//! configuration, schema introspection, object building, ownership claims,
//! decommissioning, extensions and state persistence.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for the Halldyll design builder.
#[derive(Debug, Error)]
pub enum DesignError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Schema oracle errors.
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Design document or attribute validation errors.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Object lookup errors.
    #[error("Lookup error: {0}")]
    Lookup(#[from] LookupError),

    /// Named reference errors.
    #[error("Reference error: {0}")]
    Reference(#[from] ReferenceError),

    /// Ownership claim errors.
    #[error("Ownership error: {0}")]
    Ownership(#[from] OwnershipError),

    /// Decommission blocked by another deployment.
    #[error("Dependency error: {0}")]
    Dependency(#[from] DependencyError),

    /// Extension errors.
    #[error("Extension error: {0}")]
    Extension(#[from] ExtensionError),

    /// State and lifecycle errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Object store errors.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// Environment variable is missing.
    #[error("Missing environment variable: {name}")]
    MissingEnvVar {
        /// Name of the missing variable.
        name: String,
    },

    /// Duplicate definition.
    #[error("Duplicate {resource_type} name: {name}")]
    DuplicateName {
        /// Kind of definition (check, template, etc.).
        resource_type: String,
        /// The duplicated name.
        name: String,
    },
}

/// Errors raised while introspecting the object schema.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// No object type matches the given name or collection key.
    #[error("Unknown object type: {name}")]
    UnknownObjectType {
        /// The name that could not be resolved.
        name: String,
    },

    /// The object type has no such field.
    #[error("Object type '{object_type}' has no field '{field}'")]
    UnknownField {
        /// Object type being inspected.
        object_type: String,
        /// The unknown field.
        field: String,
    },

    /// The schema catalog itself is inconsistent.
    #[error("Invalid schema definition: {message}")]
    InvalidDefinition {
        /// Description of the inconsistency.
        message: String,
    },
}

/// Errors raised while validating a design document or object attributes.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// An attribute value violates the schema constraints.
    #[error("Invalid value for {object_type} '{object}' field '{field}': {message}")]
    InvalidAttribute {
        /// Object type being validated.
        object_type: String,
        /// Display name of the object.
        object: String,
        /// Field that failed validation.
        field: String,
        /// Description of the violation.
        message: String,
    },

    /// The design document has an unexpected shape.
    #[error("Malformed design document at '{path}': {message}")]
    MalformedDocument {
        /// Location in the document.
        path: String,
        /// Description of the problem.
        message: String,
    },

    /// Conflicting action tags on a single object.
    #[error("Conflicting actions on {object_type}: {first} and {second}")]
    ConflictingActions {
        /// Object type being built.
        object_type: String,
        /// First action found.
        first: String,
        /// Second, conflicting action.
        second: String,
    },

    /// A context check rejected the input.
    #[error("Context check '{check}' failed: {message}")]
    ContextCheckFailed {
        /// Name of the failing check.
        check: String,
        /// Reason reported by the check.
        message: String,
    },
}

/// Errors raised while resolving objects through a query.
#[derive(Debug, Error)]
pub enum LookupError {
    /// The query matched nothing.
    #[error("No {object_type} matches {query}")]
    NotFound {
        /// Object type queried.
        object_type: String,
        /// Rendered query.
        query: String,
    },

    /// The query matched more than one object.
    #[error("{count} objects of type {object_type} match {query}, expected exactly one")]
    MultipleMatches {
        /// Object type queried.
        object_type: String,
        /// Rendered query.
        query: String,
        /// Number of matches.
        count: usize,
    },
}

/// Errors raised by the build-scoped reference table.
#[derive(Debug, Error)]
pub enum ReferenceError {
    /// The reference was used before being defined.
    #[error("Reference '{name}' is not defined")]
    Undefined {
        /// Reference name.
        name: String,
    },

    /// The reference name is already taken in this build.
    #[error("Reference '{name}' is already defined")]
    Duplicate {
        /// Reference name.
        name: String,
    },

    /// The referenced object has no such attribute.
    #[error("Reference '{name}' has no attribute '{attribute}'")]
    MissingAttribute {
        /// Reference name.
        name: String,
        /// Requested attribute.
        attribute: String,
    },
}

/// Ownership errors.
#[derive(Debug, Error)]
pub enum OwnershipError {
    /// Another active deployment already owns the attribute.
    #[error("Attribute '{attribute}' of {object} is owned by deployment '{deployment}'")]
    Conflict {
        /// Object being claimed.
        object: String,
        /// Attribute being claimed.
        attribute: String,
        /// Name of the owning deployment.
        deployment: String,
    },

    /// A direct write was rejected by the protection hook.
    #[error("Attribute '{attribute}' of {object} is managed by deployment '{deployment}' and cannot be changed directly")]
    Protected {
        /// Object being written.
        object: String,
        /// Attribute being written.
        attribute: String,
        /// Name of the owning deployment.
        deployment: String,
    },
}

/// Decommission dependency errors.
#[derive(Debug, Error)]
pub enum DependencyError {
    /// Other active deployments still depend on the object.
    #[error("Cannot remove {object}: still required by {}", .deployments.join(", "))]
    Blocked {
        /// Object that cannot be removed.
        object: String,
        /// Names of the blocking deployments.
        deployments: Vec<String>,
    },
}

/// Extension errors.
#[derive(Debug, Error)]
pub enum ExtensionError {
    /// No registered extension handles the tag.
    #[error("Unknown action tag: !{tag}")]
    UnknownTag {
        /// The unhandled tag.
        tag: String,
    },

    /// Two extensions claim the same tag.
    #[error("Action tag !{tag} is already registered by extension '{extension}'")]
    DuplicateTag {
        /// The contested tag.
        tag: String,
        /// Extension that registered the tag first.
        extension: String,
    },

    /// The extension does not implement the requested operation.
    #[error("Extension '{extension}' does not support {operation}")]
    Unsupported {
        /// Extension name.
        extension: String,
        /// Operation attempted (attribute, value).
        operation: String,
    },

    /// The extension failed while running.
    #[error("Extension '{extension}' failed: {message}")]
    Failed {
        /// Extension name.
        extension: String,
        /// Failure description.
        message: String,
    },
}

/// State management and lifecycle errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// State is corrupted.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// State could not be written.
    #[error("Failed to write state: {message}")]
    WriteFailed {
        /// Description of the failure.
        message: String,
    },

    /// State lock acquisition failed.
    #[error("Failed to acquire state lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// State lock is held by another process.
    #[error("State is locked by another process (lock holder: {holder}, since: {since})")]
    LockedByOther {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },

    /// State version mismatch.
    #[error("State version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Expected state version.
        expected: String,
        /// Found state version.
        found: String,
    },

    /// No design with this name is registered.
    #[error("Design not found: {name}")]
    UnknownDesign {
        /// Design name.
        name: String,
    },

    /// No deployment with this name exists for the design.
    #[error("Deployment '{deployment}' not found for design '{design}'")]
    UnknownDeployment {
        /// Design name.
        design: String,
        /// Deployment name.
        deployment: String,
    },

    /// The deployment was already decommissioned.
    #[error("Deployment '{deployment}' is already decommissioned")]
    AlreadyDecommissioned {
        /// Deployment name.
        deployment: String,
    },

    /// The deployment must be decommissioned first.
    #[error("Deployment '{deployment}' is still active, decommission it first")]
    DeploymentActive {
        /// Deployment name.
        deployment: String,
    },

    /// The design mode does not allow the operation.
    #[error("Design '{design}' does not support {operation}")]
    InvalidMode {
        /// Design name.
        design: String,
        /// Operation attempted.
        operation: String,
    },
}

/// Object store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The object does not exist.
    #[error("Object not found: {object}")]
    NotFound {
        /// The missing object reference.
        object: String,
    },

    /// The identifier is not a valid object id.
    #[error("Invalid object id: {value}")]
    InvalidId {
        /// The rejected value.
        value: String,
    },
}

/// Result type alias for design builder operations.
pub type Result<T> = std::result::Result<T, DesignError>;

impl DesignError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if this error is an ownership conflict.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Ownership(OwnershipError::Conflict { .. }))
    }

    /// Returns true if a retry could succeed without changing the input.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::State(StateError::LockFailed { .. } | StateError::LockedByOther { .. })
        )
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Creates a parse error without a source location.
    #[must_use]
    pub fn parse(message: impl Into<String>) -> Self {
        Self::ParseError {
            message: message.into(),
            location: None,
        }
    }
}

impl ValidationError {
    /// Creates a malformed-document error.
    #[must_use]
    pub fn malformed(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedDocument {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl StateError {
    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }

    /// Creates a write error with the given message.
    #[must_use]
    pub fn write(message: impl Into<String>) -> Self {
        Self::WriteFailed {
            message: message.into(),
        }
    }
}

impl ExtensionError {
    /// Creates a failure for the named extension.
    #[must_use]
    pub fn failed(extension: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            extension: extension.into(),
            message: message.into(),
        }
    }
}
