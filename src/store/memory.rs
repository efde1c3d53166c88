//! Object store interface and its in-memory implementation.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{DesignError, Result, StoreError};

use super::object::{Attributes, ObjectId, ObjectRef, Predicate, StoredObject};

/// Persistent object store used by the builder and the decommission engine.
pub trait ObjectStore {
    /// Creates a new object and returns its reference.
    fn create(&mut self, object_type: &str, attributes: Attributes) -> ObjectRef;

    /// Gets an object by reference.
    fn get(&self, object: &ObjectRef) -> Option<&StoredObject>;

    /// Writes the given attributes onto an existing object.
    ///
    /// # Errors
    ///
    /// Returns an error if the object does not exist.
    fn update(&mut self, object: &ObjectRef, changes: Attributes) -> Result<()>;

    /// Deletes an object.
    ///
    /// Relation values pointing at the object are cleared on every other
    /// object: foreign keys become null and array members are removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the object does not exist.
    fn delete(&mut self, object: &ObjectRef) -> Result<StoredObject>;

    /// Returns every object of the type matching all predicates.
    fn query(&self, object_type: &str, predicates: &[Predicate]) -> Vec<&StoredObject>;

    /// Returns `(object, field)` pairs whose relation values point at `target`.
    fn referrers(&self, target: &ObjectRef) -> Vec<(ObjectRef, String)>;

    /// Lists objects, optionally restricted to one type.
    fn list(&self, object_type: Option<&str>) -> Vec<&StoredObject>;

    /// Gets an object or fails with [`StoreError::NotFound`].
    ///
    /// # Errors
    ///
    /// Returns an error if the object does not exist.
    fn require(&self, object: &ObjectRef) -> Result<&StoredObject> {
        self.get(object).ok_or_else(|| {
            DesignError::Store(StoreError::NotFound {
                object: object.to_string(),
            })
        })
    }
}

/// In-memory object store kept in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryStore {
    /// Objects by identifier.
    objects: IndexMap<ObjectId, StoredObject>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Returns true if the store holds no objects.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Finds the reference for an identifier regardless of type.
    #[must_use]
    pub fn resolve(&self, id: ObjectId) -> Option<ObjectRef> {
        self.objects.get(&id).map(StoredObject::object_ref)
    }

    fn points_at(value: &Value, target: &str) -> bool {
        match value {
            Value::String(s) => s == target,
            Value::Array(items) => items.iter().any(|item| item.as_str() == Some(target)),
            _ => false,
        }
    }
}

impl ObjectStore for MemoryStore {
    fn create(&mut self, object_type: &str, attributes: Attributes) -> ObjectRef {
        let id = ObjectId::new();
        let object = StoredObject {
            id,
            object_type: object_type.to_string(),
            attributes,
        };
        debug!("Created {}", object.label());
        let object_ref = object.object_ref();
        self.objects.insert(id, object);
        object_ref
    }

    fn get(&self, object: &ObjectRef) -> Option<&StoredObject> {
        self.objects
            .get(&object.id)
            .filter(|o| o.object_type == object.object_type)
    }

    fn update(&mut self, object: &ObjectRef, changes: Attributes) -> Result<()> {
        let stored = self
            .objects
            .get_mut(&object.id)
            .filter(|o| o.object_type == object.object_type)
            .ok_or_else(|| {
                DesignError::Store(StoreError::NotFound {
                    object: object.to_string(),
                })
            })?;

        for (field, value) in changes {
            stored.attributes.insert(field, value);
        }
        debug!("Updated {}", stored.label());
        Ok(())
    }

    fn delete(&mut self, object: &ObjectRef) -> Result<StoredObject> {
        if self.get(object).is_none() {
            return Err(DesignError::Store(StoreError::NotFound {
                object: object.to_string(),
            }));
        }
        let removed = self
            .objects
            .shift_remove(&object.id)
            .ok_or_else(|| DesignError::internal(format!("{object} vanished during delete")))?;

        let target = object.id.to_string();
        for other in self.objects.values_mut() {
            for value in other.attributes.values_mut() {
                if value.as_str() == Some(target.as_str()) {
                    *value = Value::Null;
                } else if let Value::Array(items) = value {
                    items.retain(|item| item.as_str() != Some(target.as_str()));
                }
            }
        }

        debug!("Deleted {}", removed.label());
        Ok(removed)
    }

    fn query(&self, object_type: &str, predicates: &[Predicate]) -> Vec<&StoredObject> {
        self.objects
            .values()
            .filter(|o| o.object_type == object_type && o.matches(predicates))
            .collect()
    }

    fn referrers(&self, target: &ObjectRef) -> Vec<(ObjectRef, String)> {
        let needle = target.id.to_string();
        self.objects
            .values()
            .filter(|o| o.id != target.id)
            .flat_map(|o| {
                o.attributes
                    .iter()
                    .filter(|(_, v)| Self::points_at(v, &needle))
                    .map(|(field, _)| (o.object_ref(), field.clone()))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    fn list(&self, object_type: Option<&str>) -> Vec<&StoredObject> {
        self.objects
            .values()
            .filter(|o| object_type.is_none_or(|t| o.object_type == t))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs(value: Value) -> Attributes {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_create_query_update() {
        let mut store = MemoryStore::new();
        let site = store.create("site", attrs(json!({"name": "s1"})));
        store.create("site", attrs(json!({"name": "s2"})));

        let hits = store.query("site", &[Predicate::new("name", json!("s1"))]);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, site.id);

        store
            .update(&site, attrs(json!({"description": "main"})))
            .expect("update failed");
        let stored = store.require(&site).expect("site missing");
        assert_eq!(stored.get("description"), Some(&json!("main")));
        assert_eq!(stored.get("name"), Some(&json!("s1")));
    }

    #[test]
    fn test_get_checks_object_type() {
        let mut store = MemoryStore::new();
        let site = store.create("site", Attributes::new());
        let wrong = ObjectRef::new("device", site.id);
        assert!(store.get(&wrong).is_none());
        assert!(store.update(&wrong, Attributes::new()).is_err());
    }

    #[test]
    fn test_delete_clears_relations() {
        let mut store = MemoryStore::new();
        let site = store.create("site", attrs(json!({"name": "s1"})));
        let tag = store.create("tag", attrs(json!({"name": "t"})));
        let device = store.create(
            "device",
            attrs(json!({"site": site.id.to_value(), "tags": [tag.id.to_value()]})),
        );

        let referrers = store.referrers(&site);
        assert_eq!(referrers, vec![(device.clone(), String::from("site"))]);

        store.delete(&site).expect("delete site");
        store.delete(&tag).expect("delete tag");

        let stored = store.require(&device).expect("device missing");
        assert_eq!(stored.get("site"), Some(&Value::Null));
        assert_eq!(stored.get("tags"), Some(&json!([])));
        assert!(store.delete(&site).is_err());
    }
}
