//! Attribute validation against an object schema.

use serde_json::Value;

use crate::error::{DesignError, Result, ValidationError};
use crate::store::{Attributes, ObjectId};

use super::types::{Cardinality, FieldKind, ObjectSchema};

/// When required fields are enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequiredCheck {
    /// Before the first save: deferred fields may still be missing.
    BeforeSave,
    /// After deferred assignments: every required field must be set.
    Complete,
}

/// Validates the full attribute map of an object.
///
/// # Errors
///
/// Returns a [`ValidationError::InvalidAttribute`] naming the first offending field.
pub fn validate_attributes(
    schema: &ObjectSchema,
    label: &str,
    attributes: &Attributes,
    check: RequiredCheck,
) -> Result<()> {
    for (field, value) in attributes {
        validate_value(schema, label, field, value)?;
    }

    for (name, def) in &schema.fields {
        if !def.required || def.relation().is_some_and(|r| r.cardinality == Cardinality::OneToMany) {
            continue;
        }
        if check == RequiredCheck::BeforeSave && def.deferred {
            continue;
        }
        let missing = attributes.get(name).is_none_or(Value::is_null);
        if missing {
            return Err(invalid(schema, label, name, "a value is required"));
        }
    }
    Ok(())
}

/// Validates a single attribute value.
///
/// # Errors
///
/// Returns an error if the field is unknown or the value has the wrong shape.
pub fn validate_value(schema: &ObjectSchema, label: &str, field: &str, value: &Value) -> Result<()> {
    let def = schema
        .field(field)
        .ok_or_else(|| invalid(schema, label, field, "unknown field"))?;

    if value.is_null() {
        return Ok(());
    }

    let ok = match def.kind {
        FieldKind::String => value.is_string(),
        FieldKind::Integer => value.is_i64() || value.is_u64(),
        FieldKind::Float => value.is_number(),
        FieldKind::Boolean => value.is_boolean(),
        FieldKind::Json => true,
        FieldKind::Relation => match def.cardinality.unwrap_or_default() {
            Cardinality::OneToOne | Cardinality::ManyToOne => ObjectId::from_value(value).is_some(),
            Cardinality::ManyToMany => value
                .as_array()
                .is_some_and(|items| items.iter().all(|i| ObjectId::from_value(i).is_some())),
            Cardinality::OneToMany => false,
        },
    };
    if !ok {
        let expected = format!("{:?}", def.kind).to_lowercase();
        return Err(invalid(schema, label, field, &format!("expected {expected}, got {value}")));
    }

    if let Some(s) = value.as_str()
        && !def.choices.is_empty()
        && !def.choices.iter().any(|c| c == s)
    {
        return Err(invalid(
            schema,
            label,
            field,
            &format!("'{s}' is not one of [{}]", def.choices.join(", ")),
        ));
    }
    Ok(())
}

fn invalid(schema: &ObjectSchema, label: &str, field: &str, message: &str) -> DesignError {
    DesignError::Validation(ValidationError::InvalidAttribute {
        object_type: schema.name.clone(),
        object: label.to_string(),
        field: field.to_string(),
        message: message.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> ObjectSchema {
        serde_yaml::from_str(
            r"
name: device
fields:
  name: {type: string, required: true}
  status: {type: string, choices: [active, planned]}
  position: {type: integer}
  site: {type: relation, target: site}
  primary_ip: {type: relation, target: ip, cardinality: one_to_one, required: true, deferred: true}
",
        )
        .expect("schema")
    }

    fn attrs(value: Value) -> Attributes {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_required_respects_deferred_phase() {
        let schema = schema();
        let attributes = attrs(json!({"name": "r1"}));
        assert!(validate_attributes(&schema, "r1", &attributes, RequiredCheck::BeforeSave).is_ok());
        assert!(validate_attributes(&schema, "r1", &attributes, RequiredCheck::Complete).is_err());
    }

    #[test]
    fn test_type_and_choice_errors_name_the_field() {
        let schema = schema();
        let err = validate_value(&schema, "r1", "status", &json!("retired")).expect_err("choice");
        assert!(err.to_string().contains("field 'status'"));

        assert!(validate_value(&schema, "r1", "position", &json!("3")).is_err());
        assert!(validate_value(&schema, "r1", "site", &json!("not-an-id")).is_err());
        assert!(validate_value(&schema, "r1", "site", &ObjectId::new().to_value()).is_ok());
        assert!(validate_value(&schema, "r1", "color", &json!("red")).is_err());
    }

    #[test]
    fn test_missing_required_field() {
        let schema = schema();
        let err = validate_attributes(&schema, "?", &Attributes::new(), RequiredCheck::BeforeSave)
            .expect_err("name is required");
        assert!(err.to_string().contains("'name'"));
    }
}
