//! Stored object types.
//!
//! Objects are schemaless attribute maps tagged with their object type.
//! Relation fields hold the target's [`ObjectId`] rendered as a string, and
//! many-to-many fields hold an array of such strings.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

use crate::error::{DesignError, Result, StoreError};

/// Ordered attribute map of a stored object.
pub type Attributes = serde_json::Map<String, Value>;

/// Unique identifier of a stored object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(Uuid);

impl ObjectId {
    /// Generates a new random identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parses an identifier from its string form.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not a valid UUID.
    pub fn parse(value: &str) -> Result<Self> {
        Uuid::parse_str(value).map(Self).map_err(|_| {
            DesignError::Store(StoreError::InvalidId {
                value: value.to_string(),
            })
        })
    }

    /// Reads an identifier from a relation value.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        value.as_str().and_then(|s| Uuid::parse_str(s).ok()).map(Self)
    }

    /// Renders the identifier as a relation value.
    #[must_use]
    pub fn to_value(self) -> Value {
        Value::String(self.0.to_string())
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Typed pointer to a stored object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectRef {
    /// Object type name.
    pub object_type: String,
    /// Object identifier.
    pub id: ObjectId,
}

impl ObjectRef {
    /// Creates a new object reference.
    #[must_use]
    pub fn new(object_type: impl Into<String>, id: ObjectId) -> Self {
        Self {
            object_type: object_type.into(),
            id,
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.object_type, self.id)
    }
}

/// An object held by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredObject {
    /// Object identifier.
    pub id: ObjectId,
    /// Object type name.
    pub object_type: String,
    /// Attribute values.
    pub attributes: Attributes,
}

impl StoredObject {
    /// Returns a reference pointing at this object.
    #[must_use]
    pub fn object_ref(&self) -> ObjectRef {
        ObjectRef::new(self.object_type.clone(), self.id)
    }

    /// Gets an attribute value.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.attributes.get(field)
    }

    /// Human-readable label, preferring the `name` attribute.
    #[must_use]
    pub fn label(&self) -> String {
        match self.attributes.get("name") {
            Some(Value::String(name)) => format!("{}:{name}", self.object_type),
            _ => self.object_ref().to_string(),
        }
    }

    /// Checks whether the object satisfies every predicate.
    #[must_use]
    pub fn matches(&self, predicates: &[Predicate]) -> bool {
        predicates.iter().all(|p| p.matches(self))
    }
}

/// Equality predicate on a single attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    /// Attribute name.
    pub field: String,
    /// Expected value.
    pub value: Value,
}

impl Predicate {
    /// Creates a new predicate.
    #[must_use]
    pub fn new(field: impl Into<String>, value: Value) -> Self {
        Self {
            field: field.into(),
            value,
        }
    }

    /// Checks the predicate against an object.
    ///
    /// Array attributes match when they contain the expected scalar.
    #[must_use]
    pub fn matches(&self, object: &StoredObject) -> bool {
        match (object.get(&self.field), &self.value) {
            (Some(Value::Array(items)), expected) if !expected.is_array() => {
                items.contains(expected)
            }
            (Some(actual), expected) => actual == expected,
            (None, Value::Null) => true,
            (None, _) => false,
        }
    }
}

/// Renders a predicate list for error messages.
#[must_use]
pub fn describe_query(predicates: &[Predicate]) -> String {
    let parts: Vec<String> = predicates
        .iter()
        .map(|p| format!("{}={}", p.field, p.value))
        .collect();
    format!("{{{}}}", parts.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(attributes: Value) -> StoredObject {
        StoredObject {
            id: ObjectId::new(),
            object_type: String::from("device"),
            attributes: attributes.as_object().cloned().unwrap_or_default(),
        }
    }

    #[test]
    fn test_predicate_matches_scalar_and_array() {
        let obj = object(json!({"name": "r1", "tags": ["a", "b"]}));
        assert!(Predicate::new("name", json!("r1")).matches(&obj));
        assert!(!Predicate::new("name", json!("r2")).matches(&obj));
        assert!(Predicate::new("tags", json!("b")).matches(&obj));
        assert!(Predicate::new("missing", Value::Null).matches(&obj));
    }

    #[test]
    fn test_object_id_round_trip_through_value() {
        let id = ObjectId::new();
        assert_eq!(ObjectId::from_value(&id.to_value()), Some(id));
        assert!(ObjectId::parse("not-a-uuid").is_err());
    }

    #[test]
    fn test_label_prefers_name() {
        let obj = object(json!({"name": "r1"}));
        assert_eq!(obj.label(), "device:r1");
    }
}
