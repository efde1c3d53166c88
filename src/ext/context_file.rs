//! `!context_file` extension.
//!
//! Writes a mapping to `<dir>/<name>.yaml` so later tooling can pick up data
//! produced by a design run. Files written during a build are removed again
//! when the build rolls back.

use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::builder::{BuildContext, PendingObject};
use crate::error::{ExtensionError, Result};

use super::registry::{AttributeOutcome, Extension, ExtensionDescriptor, ExtensionKind};

/// Tag handled by [`ContextFileExtension`].
pub const TAG: &str = "context_file";

/// Descriptor registering the extension for an output directory.
#[must_use]
pub fn descriptor(dir: PathBuf) -> ExtensionDescriptor {
    ExtensionDescriptor::new("context_file", &[TAG], ExtensionKind::Attribute, move || {
        Box::new(ContextFileExtension::new(dir.clone()))
    })
}

/// Writes design data files below a directory.
#[derive(Debug)]
pub struct ContextFileExtension {
    dir: PathBuf,
    written: Vec<(PathBuf, Option<String>)>,
}

impl ContextFileExtension {
    /// Creates the extension for an output directory.
    #[must_use]
    pub const fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            written: Vec::new(),
        }
    }

    /// Output directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn target(&self, name: &str) -> Result<PathBuf> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !name.starts_with('.');
        if !valid {
            return Err(ExtensionError::failed(TAG, format!("invalid file name '{name}'")).into());
        }
        Ok(self.dir.join(format!("{name}.yaml")))
    }
}

impl Extension for ContextFileExtension {
    fn attribute(
        &mut self,
        args: &[String],
        value: &Value,
        _object: &mut PendingObject,
        _ctx: &mut BuildContext<'_>,
    ) -> Result<AttributeOutcome> {
        let [name] = args else {
            return Err(ExtensionError::failed(TAG, "expected !context_file:<name>").into());
        };
        let path = self.target(name)?;

        let content = serde_yaml::to_string(value)
            .map_err(|e| ExtensionError::failed(TAG, format!("cannot serialize {name}: {e}")))?;
        fs::create_dir_all(&self.dir)?;
        let previous = fs::read_to_string(&path).ok();
        fs::write(&path, content)?;
        debug!("Wrote context file {}", path.display());

        if !self.written.iter().any(|(p, _)| p == &path) {
            self.written.push((path, previous));
        }
        Ok(AttributeOutcome::Nothing)
    }

    fn commit(&mut self) -> Result<()> {
        self.written.clear();
        Ok(())
    }

    fn roll_back(&mut self) {
        for (path, previous) in self.written.drain(..).rev() {
            let restored = match previous {
                Some(content) => fs::write(&path, content),
                None => fs::remove_file(&path),
            };
            if let Err(e) = restored {
                warn!("Failed to restore {}: {}", path.display(), e);
            }
        }
    }
}
