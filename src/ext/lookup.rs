//! `!lookup` extension.
//!
//! Assigns a relation field the unique object matching a query:
//!
//! ```yaml
//! devices:
//!   - name: r1
//!     "!lookup:site": {name: s1, status: active}
//!     "!lookup:platform:slug": ios
//! ```

use serde_json::Value;

use crate::builder::{BuildContext, PendingObject};
use crate::error::{ExtensionError, Result};
use crate::store::Predicate;

use super::registry::{AttributeOutcome, Extension, ExtensionDescriptor, ExtensionKind};

/// Tag handled by [`LookupExtension`].
pub const TAG: &str = "lookup";

/// Descriptor registering the extension.
#[must_use]
pub fn descriptor() -> ExtensionDescriptor {
    ExtensionDescriptor::new("lookup", &[TAG], ExtensionKind::Attribute, || {
        Box::new(LookupExtension)
    })
}

/// Resolves relation fields by query.
#[derive(Debug, Default)]
pub struct LookupExtension;

impl Extension for LookupExtension {
    fn attribute(
        &mut self,
        args: &[String],
        value: &Value,
        object: &mut PendingObject,
        ctx: &mut BuildContext<'_>,
    ) -> Result<AttributeOutcome> {
        let (field, query_field) = match args {
            [field] => (field, None),
            [field, query_field] => (field, Some(query_field)),
            _ => {
                return Err(ExtensionError::failed(
                    TAG,
                    "expected !lookup:<field> or !lookup:<field>:<query_field>",
                )
                .into());
            }
        };

        let schema = ctx.schema().require(&object.object_type)?;
        let relation = schema.require_field(field)?.relation().ok_or_else(|| {
            ExtensionError::failed(TAG, format!("{}.{field} is not a relation", object.object_type))
        })?;

        let predicates: Vec<Predicate> = match (query_field, value) {
            (Some(query_field), _) => vec![Predicate::new(query_field.clone(), value.clone())],
            (None, Value::Object(query)) => query
                .iter()
                .map(|(k, v)| Predicate::new(k.clone(), v.clone()))
                .collect(),
            (None, other) => {
                return Err(ExtensionError::failed(
                    TAG,
                    format!("!lookup:{field} expects a query mapping, got {other}"),
                )
                .into());
            }
        };

        let found = ctx.find_one(relation.target, &predicates)?;
        Ok(AttributeOutcome::Assign {
            field: field.clone(),
            value: found.id.to_value(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{BuildContext, Journal};
    use crate::error::{DesignError, LookupError};
    use crate::ledger::Ledger;
    use crate::schema::SchemaCatalog;
    use crate::store::{Attributes, MemoryStore, ObjectStore};
    use serde_json::json;

    fn catalog() -> SchemaCatalog {
        SchemaCatalog::parse_yaml(
            r"
object_types:
  - name: site
    identifiers: [name]
    fields:
      name: {type: string}
      status: {type: string}
  - name: device
    fields:
      name: {type: string}
      site: {type: relation, target: site}
",
            None,
        )
        .expect("catalog")
    }

    fn site(store: &mut MemoryStore, name: &str, status: &str) {
        let mut attributes = Attributes::new();
        attributes.insert(String::from("name"), json!(name));
        attributes.insert(String::from("status"), json!(status));
        store.create("site", attributes);
    }

    #[test]
    fn test_lookup_assigns_match() {
        let catalog = catalog();
        let ledger = Ledger::default();
        let mut store = MemoryStore::new();
        site(&mut store, "s1", "active");
        site(&mut store, "s2", "active");
        let expected = store.query("site", &[Predicate::new("name", json!("s2"))])[0].id;

        let mut ctx = BuildContext::new(&mut store, &catalog, Journal::new(&ledger, None, false));
        let mut pending = PendingObject::new("device");
        let mut extension = LookupExtension;

        let outcome = extension
            .attribute(&[String::from("site")], &json!({"name": "s2"}), &mut pending, &mut ctx)
            .expect("lookup");
        assert_eq!(
            outcome,
            AttributeOutcome::Assign { field: String::from("site"), value: expected.to_value() }
        );

        let err = extension
            .attribute(
                &[String::from("site"), String::from("status")],
                &json!("active"),
                &mut pending,
                &mut ctx,
            )
            .expect_err("two matches");
        assert!(matches!(err, DesignError::Lookup(LookupError::MultipleMatches { count: 2, .. })));
    }

    #[test]
    fn test_lookup_rejects_plain_fields() {
        let catalog = catalog();
        let ledger = Ledger::default();
        let mut store = MemoryStore::new();
        let mut ctx = BuildContext::new(&mut store, &catalog, Journal::new(&ledger, None, false));
        let mut pending = PendingObject::new("device");

        let err = LookupExtension
            .attribute(&[String::from("name")], &json!({"name": "x"}), &mut pending, &mut ctx)
            .expect_err("not a relation");
        assert!(err.to_string().contains("not a relation"));
    }
}
