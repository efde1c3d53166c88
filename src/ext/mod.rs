//! Extension registry and the built-in extensions.
//!
//! Extensions handle custom `!tag` keys and values in design documents.
//! The registry holds one descriptor per extension class; every build gets
//! its own [`ExtensionSet`] that instantiates each class at most once.

pub mod context_file;
pub mod lookup;
mod registry;

pub use context_file::ContextFileExtension;
pub use lookup::LookupExtension;
pub use registry::{
    AttributeOutcome, Extension, ExtensionDescriptor, ExtensionFactory, ExtensionKind,
    ExtensionRegistry, ExtensionSet,
};

use std::path::PathBuf;

use crate::error::Result;

impl ExtensionRegistry {
    /// Registry with the built-in extensions.
    ///
    /// `context_file` is only available when an output directory is given.
    ///
    /// # Errors
    ///
    /// Returns an error if two built-ins claim the same tag.
    pub fn builtin(context_dir: Option<PathBuf>) -> Result<Self> {
        let mut registry = Self::new();
        registry.register(lookup::descriptor())?;
        if let Some(dir) = context_dir {
            registry.register(context_file::descriptor(dir))?;
        }
        Ok(registry)
    }
}
