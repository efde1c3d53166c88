//! Object creator.
//!
//! This module turns a rendered design document into store writes:
//! - Action tag and value directive parsing
//! - Build-scoped `!ref` names
//! - The change journal with ownership claims
//! - The builder walking the document

mod action;
mod context;
mod creator;
mod journal;
mod references;

pub use action::{Action, KeyDirective, QUERY_SEPARATOR, TAG_PREFIX, ValueDirective};
pub use context::{BuildContext, BuildOptions, PendingObject};
pub use creator::{BuildOutput, Builder};
pub use journal::{Journal, changes_against};
pub use references::{Reference, ReferenceTable};
