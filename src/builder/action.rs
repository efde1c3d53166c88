//! Action tag parsing.
//!
//! Mapping keys and string values in a design document may carry a `!tag`
//! prefix. Each key is parsed once into a [`KeyDirective`] and each string
//! value into a [`ValueDirective`] before any processing takes place.

use serde_json::Value;
use std::fmt;

use crate::error::{DesignError, Result, ValidationError};

/// Prefix marking an action tag.
pub const TAG_PREFIX: char = '!';

/// Separator between a relation field and the field queried on the related type.
pub const QUERY_SEPARATOR: &str = "__";

/// How an object specification is matched against the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Always create a new object.
    Create,
    /// Update exactly one existing object.
    Update,
    /// Update the matching object, or create it from the lookup values.
    CreateOrUpdate,
    /// Fetch exactly one existing object without writing it.
    Get,
}

impl Action {
    /// Parses an action tag name.
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "create" => Some(Self::Create),
            "update" => Some(Self::Update),
            "create_or_update" => Some(Self::CreateOrUpdate),
            "get" => Some(Self::Get),
            _ => None,
        }
    }

    /// Tag name of the action.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::CreateOrUpdate => "create_or_update",
            Self::Get => "get",
        }
    }

    /// Returns true if the action needs a lookup in the store.
    #[must_use]
    pub const fn needs_lookup(self) -> bool {
        !matches!(self, Self::Create)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "!{}", self.as_str())
    }
}

/// Parsed meaning of a mapping key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyDirective {
    /// Plain attribute assignment.
    Field(String),
    /// Assign `field` the unique related object whose `lookup` equals the value.
    Query {
        /// Relation field being assigned.
        field: String,
        /// Field queried on the related type, may itself contain `__`.
        lookup: String,
    },
    /// Action tag selecting a lookup field.
    Action {
        /// The action.
        action: Action,
        /// Lookup field, may contain `__`.
        field: String,
    },
    /// Store the object (or one of its attributes) under the value as name.
    Ref {
        /// Attribute to store instead of the object.
        attribute: Option<String>,
    },
    /// Attribute extension call.
    Extension {
        /// Extension tag.
        tag: String,
        /// Colon separated tag arguments.
        args: Vec<String>,
    },
}

impl KeyDirective {
    /// Parses a mapping key.
    ///
    /// # Errors
    ///
    /// Returns an error if an action tag has no lookup field.
    pub fn parse(key: &str) -> Result<Self> {
        let Some(body) = key.strip_prefix(TAG_PREFIX) else {
            return Ok(match key.split_once(QUERY_SEPARATOR) {
                Some((field, lookup)) if !field.is_empty() && !lookup.is_empty() => Self::Query {
                    field: field.to_string(),
                    lookup: lookup.to_string(),
                },
                _ => Self::Field(key.to_string()),
            });
        };

        let (tag, rest) = body.split_once(':').map_or((body, None), |(t, r)| (t, Some(r)));

        if tag == "ref" {
            return Ok(Self::Ref {
                attribute: rest.filter(|r| !r.is_empty()).map(str::to_string),
            });
        }

        if let Some(action) = Action::from_tag(tag) {
            let field = rest.filter(|r| !r.is_empty()).ok_or_else(|| {
                DesignError::Validation(ValidationError::malformed(
                    key,
                    format!("{action} needs a field, as in {action}:name"),
                ))
            })?;
            return Ok(Self::Action {
                action,
                field: field.to_string(),
            });
        }

        Ok(Self::Extension {
            tag: tag.to_string(),
            args: rest
                .map(|r| r.split(':').map(str::to_string).collect())
                .unwrap_or_default(),
        })
    }

    /// Returns true if the key carries an action tag.
    #[must_use]
    pub fn is_action(key: &str) -> bool {
        matches!(Self::parse(key), Ok(Self::Action { .. }))
    }
}

/// Parsed meaning of a string value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueDirective<'a> {
    /// Use the value as-is.
    Literal,
    /// Substitute a named reference.
    Ref {
        /// Reference name.
        name: &'a str,
        /// Optional attribute of the referenced object.
        attribute: Option<&'a str>,
    },
    /// Ask a value extension for the value.
    Extension {
        /// Extension tag.
        tag: &'a str,
        /// Argument after the tag.
        arg: &'a str,
    },
}

impl<'a> ValueDirective<'a> {
    /// Parses a document value.
    #[must_use]
    pub fn parse(value: &'a Value) -> Self {
        let Some(body) = value.as_str().and_then(|s| s.strip_prefix(TAG_PREFIX)) else {
            return Self::Literal;
        };
        let Some((tag, arg)) = body.split_once(':') else {
            return Self::Literal;
        };
        if tag == "ref" {
            let (name, attribute) = arg.split_once('.').map_or((arg, None), |(n, a)| (n, Some(a)));
            Self::Ref { name, attribute }
        } else {
            Self::Extension { tag, arg }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_keys() {
        assert_eq!(
            KeyDirective::parse("name").expect("field"),
            KeyDirective::Field(String::from("name"))
        );
        assert_eq!(
            KeyDirective::parse("site__name").expect("query"),
            KeyDirective::Query { field: String::from("site"), lookup: String::from("name") }
        );
        assert_eq!(
            KeyDirective::parse("!create_or_update:device__name").expect("action"),
            KeyDirective::Action {
                action: Action::CreateOrUpdate,
                field: String::from("device__name"),
            }
        );
        assert_eq!(
            KeyDirective::parse("!ref").expect("ref"),
            KeyDirective::Ref { attribute: None }
        );
        assert_eq!(
            KeyDirective::parse("!ref:address").expect("ref attr"),
            KeyDirective::Ref { attribute: Some(String::from("address")) }
        );
        assert_eq!(
            KeyDirective::parse("!lookup:site:slug").expect("extension"),
            KeyDirective::Extension {
                tag: String::from("lookup"),
                args: vec![String::from("site"), String::from("slug")],
            }
        );
        assert!(KeyDirective::parse("!get").is_err());
        assert!(KeyDirective::is_action("!update:name"));
        assert!(!KeyDirective::is_action("name"));
    }

    #[test]
    fn test_parse_values() {
        assert_eq!(ValueDirective::parse(&json!("plain")), ValueDirective::Literal);
        assert_eq!(ValueDirective::parse(&json!(42)), ValueDirective::Literal);
        assert_eq!(
            ValueDirective::parse(&json!("!ref:core")),
            ValueDirective::Ref { name: "core", attribute: None }
        );
        assert_eq!(
            ValueDirective::parse(&json!("!ref:core.name")),
            ValueDirective::Ref { name: "core", attribute: Some("name") }
        );
        assert_eq!(
            ValueDirective::parse(&json!("!next_prefix:10.0.0.0/8")),
            ValueDirective::Extension { tag: "next_prefix", arg: "10.0.0.0/8" }
        );
        assert_eq!(ValueDirective::parse(&json!("!important")), ValueDirective::Literal);
    }
}
