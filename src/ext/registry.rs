//! Extension trait, descriptors and the build-scoped instance set.

use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::builder::{BuildContext, PendingObject};
use crate::error::{DesignError, ExtensionError, Result};

/// Tags the builder handles itself and extensions may not claim.
const RESERVED_TAGS: &[&str] = &["ref", "create", "update", "create_or_update", "get"];

/// Result of an attribute extension call.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeOutcome {
    /// The extension handled the entry completely.
    Nothing,
    /// Assign a value to a field of the object being built.
    Assign {
        /// Field name.
        field: String,
        /// Raw value, resolved like a document value.
        value: Value,
    },
    /// Merge entries into the object, parsed like document keys.
    Merge(Map<String, Value>),
}

/// A pluggable handler for custom action tags.
///
/// One instance is created lazily per build and lives until the build
/// commits or rolls back.
pub trait Extension: Send {
    /// Handles `!tag[:args]: value` as a mapping key.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry cannot be handled.
    fn attribute(
        &mut self,
        args: &[String],
        value: &Value,
        object: &mut PendingObject,
        ctx: &mut BuildContext<'_>,
    ) -> Result<AttributeOutcome> {
        let _ = (args, value, object, ctx);
        Err(unsupported::<Self>("attribute tags"))
    }

    /// Produces the value for a `!tag:arg` string.
    ///
    /// # Errors
    ///
    /// Returns an error if no value can be produced.
    fn value(&mut self, arg: &str, ctx: &mut BuildContext<'_>) -> Result<Value> {
        let _ = (arg, ctx);
        Err(unsupported::<Self>("value tags"))
    }

    /// Called once after the whole build succeeded.
    ///
    /// # Errors
    ///
    /// Returns an error to abort the run; the build is then rolled back.
    fn commit(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called once when the build fails or is a dry run.
    fn roll_back(&mut self) {}
}

fn unsupported<T: ?Sized>(operation: &str) -> DesignError {
    DesignError::Extension(ExtensionError::Unsupported {
        extension: std::any::type_name::<T>().to_string(),
        operation: operation.to_string(),
    })
}

/// Where an extension's tags may appear.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionKind {
    /// Mapping keys only.
    Attribute,
    /// String values only.
    Value,
    /// Both keys and values.
    Both,
}

impl ExtensionKind {
    const fn accepts(self, wanted: Self) -> bool {
        matches!(
            (self, wanted),
            (Self::Both, _) | (Self::Attribute, Self::Attribute) | (Self::Value, Self::Value)
        )
    }
}

/// Factory producing a fresh extension instance.
pub type ExtensionFactory = Arc<dyn Fn() -> Box<dyn Extension> + Send + Sync>;

/// Registration entry for one extension class.
#[derive(Clone)]
pub struct ExtensionDescriptor {
    /// Extension name, used in design definitions and logs.
    pub name: String,
    /// Tags handled by the extension.
    pub tags: Vec<String>,
    /// Where the tags may appear.
    pub kind: ExtensionKind,
    factory: ExtensionFactory,
}

impl ExtensionDescriptor {
    /// Creates a descriptor.
    pub fn new<F>(name: &str, tags: &[&str], kind: ExtensionKind, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Extension> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            tags: tags.iter().map(|t| (*t).to_string()).collect(),
            kind,
            factory: Arc::new(factory),
        }
    }

    fn handles(&self, tag: &str, kind: ExtensionKind) -> bool {
        self.kind.accepts(kind) && self.tags.iter().any(|t| t == tag)
    }
}

impl fmt::Debug for ExtensionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionDescriptor")
            .field("name", &self.name)
            .field("tags", &self.tags)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Catalog of extension classes available to builds.
#[derive(Debug, Clone, Default)]
pub struct ExtensionRegistry {
    descriptors: Vec<Arc<ExtensionDescriptor>>,
}

impl ExtensionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an extension class.
    ///
    /// # Errors
    ///
    /// Returns an error if a tag is reserved or already registered.
    pub fn register(&mut self, descriptor: ExtensionDescriptor) -> Result<()> {
        for tag in &descriptor.tags {
            if RESERVED_TAGS.contains(&tag.as_str()) {
                return Err(DesignError::Extension(ExtensionError::DuplicateTag {
                    tag: tag.clone(),
                    extension: String::from("builder"),
                }));
            }
            if let Some(existing) = self.descriptors.iter().find(|d| d.tags.contains(tag)) {
                return Err(DesignError::Extension(ExtensionError::DuplicateTag {
                    tag: tag.clone(),
                    extension: existing.name.clone(),
                }));
            }
        }
        debug!("Registered extension '{}' for tags {:?}", descriptor.name, descriptor.tags);
        self.descriptors.push(Arc::new(descriptor));
        Ok(())
    }

    /// Names of the registered extensions.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.descriptors.iter().map(|d| d.name.as_str()).collect()
    }

    /// Returns a registry restricted to the named extensions.
    ///
    /// # Errors
    ///
    /// Returns an error if a name is not registered.
    pub fn select(&self, names: &[String]) -> Result<Self> {
        let descriptors = names
            .iter()
            .map(|name| {
                self.descriptors
                    .iter()
                    .find(|d| &d.name == name)
                    .cloned()
                    .ok_or_else(|| {
                        DesignError::Extension(ExtensionError::failed(
                            name.as_str(),
                            "extension is not registered",
                        ))
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { descriptors })
    }

    /// Starts a build-scoped extension set.
    #[must_use]
    pub fn start_build(&self) -> ExtensionSet {
        ExtensionSet {
            instances: self.descriptors.iter().map(|_| None).collect(),
            descriptors: self.descriptors.clone(),
            order: Vec::new(),
            committed: 0,
        }
    }
}

/// Extension instances of one build.
///
/// At most one instance per extension class is created, on first use.
pub struct ExtensionSet {
    descriptors: Vec<Arc<ExtensionDescriptor>>,
    instances: Vec<Option<Box<dyn Extension>>>,
    order: Vec<usize>,
    /// Leading entries of `order` whose commit succeeded.
    committed: usize,
}

impl ExtensionSet {
    /// Returns the instance handling `tag` as a mapping key.
    ///
    /// # Errors
    ///
    /// Returns [`ExtensionError::UnknownTag`] if no extension handles it.
    pub fn attribute(&mut self, tag: &str) -> Result<&mut (dyn Extension + 'static)> {
        self.instance(tag, ExtensionKind::Attribute)
    }

    /// Returns the instance handling `tag` in a string value.
    ///
    /// # Errors
    ///
    /// Returns [`ExtensionError::UnknownTag`] if no extension handles it.
    pub fn value(&mut self, tag: &str) -> Result<&mut (dyn Extension + 'static)> {
        self.instance(tag, ExtensionKind::Value)
    }

    fn instance(&mut self, tag: &str, kind: ExtensionKind) -> Result<&mut (dyn Extension + 'static)> {
        let index = self
            .descriptors
            .iter()
            .position(|d| d.handles(tag, kind))
            .ok_or_else(|| {
                DesignError::Extension(ExtensionError::UnknownTag {
                    tag: tag.to_string(),
                })
            })?;

        let slot = &mut self.instances[index];
        if slot.is_none() {
            debug!("Instantiating extension '{}'", self.descriptors[index].name);
            *slot = Some((self.descriptors[index].factory)());
            self.order.push(index);
        }
        slot.as_deref_mut()
            .ok_or_else(|| DesignError::internal(format!("extension for !{tag} was not created")))
    }

    /// Names of the extensions instantiated so far, in creation order.
    #[must_use]
    pub fn instantiated(&self) -> Vec<&str> {
        self.order
            .iter()
            .map(|&i| self.descriptors[i].name.as_str())
            .collect()
    }

    /// Commits every instantiated extension in creation order.
    ///
    /// # Errors
    ///
    /// Returns the first commit failure. Extensions committed before it stay
    /// committed and are skipped by a following [`roll_back`](Self::roll_back).
    pub fn commit(&mut self) -> Result<()> {
        while let Some(&index) = self.order.get(self.committed) {
            if let Some(extension) = self.instances[index].as_deref_mut() {
                if let Err(e) = extension.commit() {
                    error!("Commit of extension '{}' failed: {e}", self.descriptors[index].name);
                    return Err(e);
                }
                info!("Committed extension '{}'", self.descriptors[index].name);
            }
            self.committed += 1;
        }
        Ok(())
    }

    /// Rolls back every extension not yet committed, newest first.
    pub fn roll_back(&mut self) {
        for &index in self.order[self.committed..].iter().rev() {
            if let Some(extension) = self.instances[index].as_deref_mut() {
                extension.roll_back();
                error!("Rolled back extension '{}'", self.descriptors[index].name);
            }
        }
    }
}

impl fmt::Debug for ExtensionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionSet")
            .field("instantiated", &self.instantiated())
            .finish_non_exhaustive()
    }
}
