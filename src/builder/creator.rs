//! Object creator.
//!
//! Walks a rendered design document and turns every object specification
//! into store writes. Each object goes through the same steps:
//!
//! 1. Parse its mapping keys into directives (extensions may add entries).
//! 2. Locate an existing object according to the action.
//! 3. Resolve and write immediate attributes, creating the object if needed.
//! 4. Define `!ref` names.
//! 5. Build one-to-many children and apply many-to-many and deferred fields.
//!
//! Every write is recorded in the journal with its identity key.

use serde_json::{Map, Value};
use std::collections::VecDeque;
use tracing::{debug, info};

use crate::error::{DesignError, ReferenceError, Result, ValidationError};
use crate::ext::{AttributeOutcome, ExtensionSet};
use crate::ledger::{AttributeChange, Record};
use crate::schema::{Cardinality, ObjectSchema, RequiredCheck, validate_attributes};
use crate::store::{Attributes, ObjectId, ObjectRef, Predicate};

use super::action::{Action, KeyDirective, QUERY_SEPARATOR, ValueDirective};
use super::context::{BuildContext, PendingObject};
use super::journal::changes_against;
use super::references::Reference;

/// Foreign key tying a one-to-many child to its parent.
#[derive(Debug, Clone)]
struct ParentLink {
    field: String,
    parent: ObjectRef,
}

/// Result of a successful build.
#[derive(Debug)]
pub struct BuildOutput {
    /// Journal records in write order.
    pub records: Vec<Record>,
    /// Extensions instantiated during the build, still uncommitted.
    pub extensions: ExtensionSet,
}

/// Builds design documents into the object store.
pub struct Builder<'a> {
    ctx: BuildContext<'a>,
    extensions: ExtensionSet,
    /// Documents started so far.
    documents: usize,
}

impl<'a> Builder<'a> {
    /// Creates a builder over a context and a fresh extension set.
    #[must_use]
    pub const fn new(ctx: BuildContext<'a>, extensions: ExtensionSet) -> Self {
        Self {
            ctx,
            extensions,
            documents: 0,
        }
    }

    /// The build context.
    #[must_use]
    pub const fn context(&self) -> &BuildContext<'a> {
        &self.ctx
    }

    /// Builds every collection of a document, in document order.
    ///
    /// Top-level keys name object types, by type name or plural collection key.
    /// Objects without natural identifiers are keyed by document and position,
    /// e.g. `doc1/notes[0]`, so the same collection in two documents stays apart.
    ///
    /// # Errors
    ///
    /// Returns the first schema, lookup, validation, reference, ownership or
    /// extension error. Writes made so far are left in place; the caller's
    /// transaction is expected to roll them back.
    pub fn build_document(&mut self, document: &Value) -> Result<()> {
        let index = self.documents;
        self.documents += 1;
        let collections = match document {
            Value::Null => return Ok(()),
            Value::Object(collections) => collections,
            other => {
                return Err(DesignError::Validation(ValidationError::malformed(
                    "<document>",
                    format!("expected a mapping of object collections, got {other}"),
                )));
            }
        };

        for (collection, body) in collections {
            let schema = self.ctx.schema().require(collection)?;
            let items: Vec<&Value> = match body {
                Value::Null => Vec::new(),
                Value::Array(items) => items.iter().collect(),
                Value::Object(_) => vec![body],
                other => {
                    return Err(DesignError::Validation(ValidationError::malformed(
                        collection.as_str(),
                        format!("expected a list or a mapping, got {other}"),
                    )));
                }
            };

            info!("Building {} {} object(s)", items.len(), schema.name);
            for (i, item) in items.into_iter().enumerate() {
                self.build_object(schema, item, None, "", &format!("doc{index}/{collection}[{i}]"))?;
            }
        }
        Ok(())
    }

    /// Finishes the build and hands out the journal and extensions.
    #[must_use]
    pub fn finish(self) -> BuildOutput {
        let records = self.ctx.into_journal().into_records();
        info!("Build finished with {} record(s)", records.len());
        BuildOutput {
            records,
            extensions: self.extensions,
        }
    }

    /// Abandons the build and rolls back every instantiated extension.
    pub fn abort(mut self) {
        self.extensions.roll_back();
    }

    fn build_object(
        &mut self,
        schema: &ObjectSchema,
        spec: &Value,
        parent: Option<&ParentLink>,
        scope: &str,
        position: &str,
    ) -> Result<ObjectRef> {
        let Value::Object(entries) = spec else {
            return Err(DesignError::Validation(ValidationError::malformed(
                position,
                format!("expected a {} mapping, got {spec}", schema.name),
            )));
        };

        let pending = self.collect(schema, entries)?;
        let action = pending.action.unwrap_or(Action::Create);
        let key = self
            .ctx
            .journal_mut()
            .reserve_key(identity_key(schema, &pending, scope, position));
        debug!("{action} {} at {key}", schema.name);

        // Lookup values, also written on create.
        let mut lookup = Attributes::new();
        for predicate in self.predicates_for(schema, &pending.lookup)? {
            lookup.insert(predicate.field, predicate.value);
        }

        let mut predicates: Vec<Predicate> = lookup
            .iter()
            .map(|(field, value)| Predicate::new(field.clone(), value.clone()))
            .collect();
        if let Some(link) = parent
            && action.needs_lookup()
        {
            predicates.push(Predicate::new(link.field.clone(), link.parent.id.to_value()));
        }

        let existing = match action {
            Action::Get | Action::Update => Some(self.ctx.find_one(&schema.name, &predicates)?),
            Action::CreateOrUpdate => self.ctx.find_optional(&schema.name, &predicates)?,
            Action::Create => self
                .ctx
                .journal()
                .reusable(&key, &schema.name)
                .filter(|object| self.ctx.store().get(object).is_some())
                .cloned(),
        };

        let (mut writes, post_save) = self.immediate_writes(schema, &pending, &key)?;
        if let Some(link) = parent
            && action != Action::Get
        {
            writes.insert(link.field.clone(), link.parent.id.to_value());
        }
        if action == Action::Create {
            writes.extend(lookup.clone());
        }

        if action == Action::Get && !writes.is_empty() {
            return Err(DesignError::Validation(ValidationError::malformed(
                key.as_str(),
                "!get cannot set attributes",
            )));
        }

        let (object, created) = match existing {
            Some(object) => {
                if action != Action::Get {
                    self.write_existing(schema, &object, &key, writes, &lookup)?;
                }
                (object, false)
            }
            None => {
                for (field, value) in lookup {
                    writes.entry(field).or_insert(value);
                }
                validate_attributes(schema, &key, &writes, RequiredCheck::BeforeSave)?;
                let changes = changes_against(None, &writes);
                let object = self.ctx.store_mut().create(&schema.name, writes);
                self.ctx.journal_mut().record(&object, &key, true, changes);
                (object, true)
            }
        };

        self.define_references(&object, &pending.references)?;
        self.post_save(schema, &object, &key, action, created, post_save)?;
        Ok(object)
    }

    /// Parses the keys of an object mapping, dispatching attribute extensions.
    fn collect(&mut self, schema: &ObjectSchema, entries: &Map<String, Value>) -> Result<PendingObject> {
        let mut pending = PendingObject::new(schema.name.clone());
        let mut queue: VecDeque<(String, Value)> =
            entries.iter().map(|(k, v)| (k.clone(), v.clone())).collect();

        while let Some((key, value)) = queue.pop_front() {
            match KeyDirective::parse(&key)? {
                KeyDirective::Field(field) => pending.fields.push((field, value)),
                KeyDirective::Query { .. } if schema.field(&key).is_some() => {
                    pending.fields.push((key, value));
                }
                KeyDirective::Query { field, lookup } => pending.queries.push((field, lookup, value)),
                KeyDirective::Action { action, field } => {
                    pending.set_action(action)?;
                    pending.lookup.push((field, value));
                }
                KeyDirective::Ref { attribute } => {
                    let name = value.as_str().ok_or_else(|| {
                        DesignError::Validation(ValidationError::malformed(
                            key.as_str(),
                            "!ref expects a reference name",
                        ))
                    })?;
                    pending.references.push((name.to_string(), attribute));
                }
                KeyDirective::Extension { tag, args } => {
                    let extension = self.extensions.attribute(&tag)?;
                    match extension.attribute(&args, &value, &mut pending, &mut self.ctx)? {
                        AttributeOutcome::Nothing => {}
                        AttributeOutcome::Assign { field, value } => pending.fields.push((field, value)),
                        AttributeOutcome::Merge(extra) => queue.extend(extra),
                    }
                }
            }
        }
        Ok(pending)
    }

    /// Resolves attributes written before the first save.
    ///
    /// Returns the writes and the raw post-save assignments.
    fn immediate_writes(
        &mut self,
        schema: &ObjectSchema,
        pending: &PendingObject,
        key: &str,
    ) -> Result<(Attributes, Vec<(String, Value)>)> {
        let mut writes = Attributes::new();
        let mut post_save = Vec::new();

        for (field, raw) in &pending.fields {
            let def = schema.require_field(field)?;
            if def.is_post_save() {
                post_save.push((field.clone(), raw.clone()));
                continue;
            }
            let value = match def.relation() {
                Some(relation) => self.resolve_foreign_key(relation.target, raw, key, field)?,
                None => self.resolve_value(raw)?,
            };
            writes.insert(field.clone(), value);
        }

        for (field, lookup, raw) in &pending.queries {
            let relation = schema.require_field(field)?.relation().ok_or_else(|| {
                DesignError::Validation(ValidationError::malformed(
                    format!("{key}.{field}{QUERY_SEPARATOR}{lookup}"),
                    format!("{field} is not a relation"),
                ))
            })?;
            let target = self.ctx.schema().require(relation.target)?;
            let value = self.resolve_value(raw)?;
            let inner = self.predicate(target, lookup, value)?;
            let found = self.ctx.find_one(&target.name, &[inner])?;
            match relation.cardinality {
                Cardinality::OneToMany => {
                    return Err(DesignError::Validation(ValidationError::malformed(
                        format!("{key}.{field}"),
                        "one-to-many relations cannot be assigned by query",
                    )));
                }
                Cardinality::ManyToMany => post_save.push((field.clone(), found.id.to_value())),
                Cardinality::OneToOne | Cardinality::ManyToOne => {
                    if schema.require_field(field)?.deferred {
                        post_save.push((field.clone(), found.id.to_value()));
                    } else {
                        writes.insert(field.clone(), found.id.to_value());
                    }
                }
            }
        }
        Ok((writes, post_save))
    }

    fn write_existing(
        &mut self,
        schema: &ObjectSchema,
        object: &ObjectRef,
        key: &str,
        writes: Attributes,
        lookup: &Attributes,
    ) -> Result<()> {
        let current = self.ctx.store().require(object)?.attributes.clone();
        let mut merged = current.clone();
        merged.extend(writes.clone());
        validate_attributes(schema, key, &merged, RequiredCheck::BeforeSave)?;
        self.ctx
            .journal()
            .claim(object, schema, writes.keys().map(String::as_str))?;

        let mut changes = changes_against(Some(&current), &writes);
        // Lookup values stay recorded while the previous run recorded them.
        for (field, value) in lookup {
            if !changes.contains_key(field)
                && self.ctx.journal().previous_change(object, field).is_some()
            {
                let old = current.get(field).cloned().unwrap_or(Value::Null);
                changes.insert(field.clone(), AttributeChange { old, new: value.clone() });
            }
        }

        if !writes.is_empty() {
            self.ctx.store_mut().update(object, writes)?;
        }
        self.ctx.journal_mut().record(object, key, false, changes);
        Ok(())
    }

    fn define_references(&mut self, object: &ObjectRef, references: &[(String, Option<String>)]) -> Result<()> {
        for (name, attribute) in references {
            let reference = match attribute {
                None => Reference::Object(object.clone()),
                Some(attribute) => {
                    let value = self.ctx.store().require(object)?.get(attribute).cloned().ok_or_else(|| {
                        DesignError::Reference(ReferenceError::MissingAttribute {
                            name: name.clone(),
                            attribute: attribute.clone(),
                        })
                    })?;
                    Reference::Value(value)
                }
            };
            self.ctx.references_mut().define(name, reference)?;
        }
        Ok(())
    }

    fn post_save(
        &mut self,
        schema: &ObjectSchema,
        object: &ObjectRef,
        key: &str,
        action: Action,
        created: bool,
        assignments: Vec<(String, Value)>,
    ) -> Result<()> {
        let mut late = Attributes::new();
        for (field, raw) in assignments {
            let def = schema.require_field(&field)?;
            let Some(relation) = def.relation() else {
                late.insert(field, self.resolve_value(&raw)?);
                continue;
            };
            match relation.cardinality {
                Cardinality::OneToMany => {
                    let related_field = relation.related_field.ok_or_else(|| {
                        DesignError::internal(format!("{}.{field} has no related field", schema.name))
                    })?;
                    let link = ParentLink {
                        field: related_field.to_string(),
                        parent: object.clone(),
                    };
                    self.build_children(relation.target, &raw, &link, key, &field)?;
                }
                Cardinality::ManyToMany => {
                    let value = self.resolve_many(relation.target, &raw, object, key, &field)?;
                    late.insert(field, value);
                }
                Cardinality::OneToOne | Cardinality::ManyToOne => {
                    let value = self.resolve_foreign_key(relation.target, &raw, key, &field)?;
                    late.insert(field, value);
                }
            }
        }

        if action == Action::Get {
            if late.is_empty() {
                return Ok(());
            }
            return Err(DesignError::Validation(ValidationError::malformed(
                key,
                "!get cannot set attributes",
            )));
        }

        let current = self.ctx.store().require(object)?.attributes.clone();
        let mut merged = current.clone();
        merged.extend(late.clone());
        validate_attributes(schema, key, &merged, RequiredCheck::Complete)?;
        if late.is_empty() {
            return Ok(());
        }

        if !created {
            self.ctx
                .journal()
                .claim(object, schema, late.keys().map(String::as_str))?;
        }
        let changes = changes_against(Some(&current), &late);
        self.ctx.store_mut().update(object, late)?;
        self.ctx.journal_mut().record(object, key, created, changes);
        Ok(())
    }

    fn build_children(
        &mut self,
        target: &str,
        raw: &Value,
        link: &ParentLink,
        key: &str,
        field: &str,
    ) -> Result<()> {
        let schema = self.ctx.schema().require(target)?;
        for (i, item) in as_items(raw).into_iter().enumerate() {
            self.build_object(schema, item, Some(link), key, &format!("{field}[{i}]"))?;
        }
        Ok(())
    }

    /// Computes the new association list of a many-to-many field.
    ///
    /// Listed items are appended. Items this deployment added in its previous
    /// run and no longer lists are dropped; everything else is left alone.
    fn resolve_many(
        &mut self,
        target: &str,
        raw: &Value,
        owner: &ObjectRef,
        key: &str,
        field: &str,
    ) -> Result<Value> {
        let schema = self.ctx.schema().require(target)?;
        let mut listed: Vec<Value> = Vec::new();
        for (i, item) in as_items(raw).into_iter().enumerate() {
            let id = if item.is_object() {
                self.build_object(schema, item, None, key, &format!("{field}[{i}]"))?
                    .id
                    .to_value()
            } else {
                self.existing(schema, item)?
            };
            if !listed.contains(&id) {
                listed.push(id);
            }
        }

        let current = array_of(self.ctx.store().require(owner)?.get(field));
        let previous = self.ctx.journal().previous_change(owner, field);
        let added_before = array_of(previous.map(|c| &c.new));
        let present_before = array_of(previous.map(|c| &c.old));

        let mut merged: Vec<Value> = current
            .into_iter()
            .filter(|id| {
                listed.contains(id) || !added_before.contains(id) || present_before.contains(id)
            })
            .collect();
        for id in listed {
            if !merged.contains(&id) {
                merged.push(id);
            }
        }
        Ok(Value::Array(merged))
    }

    /// Resolves the value of a foreign key field.
    ///
    /// A mapping with action keys is built as a nested object, a mapping
    /// without them is a lookup. Anything else must name an existing object.
    fn resolve_foreign_key(&mut self, target: &str, raw: &Value, key: &str, field: &str) -> Result<Value> {
        let schema = self.ctx.schema().require(target)?;
        match raw {
            Value::Null => Ok(Value::Null),
            Value::Object(entries) if entries.keys().any(|k| KeyDirective::is_action(k)) => {
                let scope = format!("{key}/{field}");
                Ok(self.build_object(schema, raw, None, &scope, field)?.id.to_value())
            }
            Value::Object(entries) => {
                let entries: Vec<(String, Value)> =
                    entries.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                let predicates = self.predicates_for(schema, &entries)?;
                Ok(self.ctx.find_one(&schema.name, &predicates)?.id.to_value())
            }
            other => self.existing(schema, other),
        }
    }

    /// Resolves a reference or id string to an existing object of the type.
    fn existing(&mut self, schema: &ObjectSchema, raw: &Value) -> Result<Value> {
        let value = self.resolve_value(raw)?;
        let text = value.as_str().ok_or_else(|| {
            DesignError::Validation(ValidationError::malformed(
                schema.name.as_str(),
                format!("expected a reference or an id, got {value}"),
            ))
        })?;
        let object = ObjectRef::new(schema.name.clone(), ObjectId::parse(text)?);
        self.ctx.store().require(&object)?;
        Ok(object.id.to_value())
    }

    /// Resolves value directives, recursing into lists and mappings.
    fn resolve_value(&mut self, raw: &Value) -> Result<Value> {
        match ValueDirective::parse(raw) {
            ValueDirective::Literal => match raw {
                Value::Array(items) => items
                    .iter()
                    .map(|item| self.resolve_value(item))
                    .collect::<Result<Vec<_>>>()
                    .map(Value::Array),
                Value::Object(entries) => entries
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), self.resolve_value(v)?)))
                    .collect::<Result<Map<_, _>>>()
                    .map(Value::Object),
                _ => Ok(raw.clone()),
            },
            ValueDirective::Ref { name, attribute } => {
                self.ctx
                    .references()
                    .resolve(name, attribute, self.ctx.store())
            }
            ValueDirective::Extension { tag, arg } => {
                let extension = self.extensions.value(tag)?;
                extension.value(arg, &mut self.ctx)
            }
        }
    }

    fn predicates_for(&mut self, schema: &ObjectSchema, entries: &[(String, Value)]) -> Result<Vec<Predicate>> {
        entries
            .iter()
            .map(|(field, raw)| {
                let value = self.resolve_value(raw)?;
                self.predicate(schema, field, value)
            })
            .collect()
    }

    /// Builds a predicate, following `relation__field` paths and lookup mappings.
    fn predicate(&mut self, schema: &ObjectSchema, field: &str, value: Value) -> Result<Predicate> {
        if schema.field(field).is_none()
            && let Some((head, rest)) = field.split_once(QUERY_SEPARATOR)
        {
            let target = self.relation_target(schema, head)?;
            let inner = self.predicate(target, rest, value)?;
            let found = self.ctx.find_one(&target.name, &[inner])?;
            return Ok(Predicate::new(head, found.id.to_value()));
        }

        let def = schema.require_field(field)?;
        if let (Some(relation), Value::Object(entries)) = (def.relation(), &value) {
            let target = self.ctx.schema().require(relation.target)?;
            let entries: Vec<(String, Value)> =
                entries.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            let predicates = self.predicates_for(target, &entries)?;
            let found = self.ctx.find_one(&target.name, &predicates)?;
            return Ok(Predicate::new(field, found.id.to_value()));
        }
        Ok(Predicate::new(field, value))
    }

    fn relation_target(&self, schema: &ObjectSchema, field: &str) -> Result<&'a ObjectSchema> {
        let relation = schema.require_field(field)?.relation().ok_or_else(|| {
            DesignError::Validation(ValidationError::malformed(
                format!("{}.{field}", schema.name),
                "only relation fields can be followed with __",
            ))
        })?;
        self.ctx.schema().require(relation.target)
    }
}

/// Identity key of an object, used to match records across runs.
///
/// Natural identifiers are used when the mapping gives every declared
/// identifier a literal value; otherwise the document position is.
fn identity_key(schema: &ObjectSchema, pending: &PendingObject, scope: &str, position: &str) -> String {
    let natural: Option<Vec<String>> = if schema.identifiers.is_empty() {
        None
    } else {
        schema
            .identifiers
            .iter()
            .map(|field| {
                pending
                    .literal(field)
                    .map(|v| format!("{field}={}", v.as_str().map_or_else(|| v.to_string(), str::to_string)))
            })
            .collect()
    };
    let local = natural.map_or_else(
        || position.to_string(),
        |parts| format!("{}({})", schema.name, parts.join(",")),
    );
    if scope.is_empty() {
        local
    } else {
        format!("{scope}/{local}")
    }
}

fn as_items(raw: &Value) -> Vec<&Value> {
    match raw {
        Value::Null => Vec::new(),
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    }
}

fn array_of(value: Option<&Value>) -> Vec<Value> {
    value.and_then(Value::as_array).cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Journal;
    use crate::error::{ExtensionError, LookupError};
    use crate::ext::ExtensionRegistry;
    use crate::schema::SchemaCatalog;
    use crate::store::{Database, ObjectStore};
    use serde_json::json;
    use uuid::Uuid;

    const CATALOG: &str = r"
object_types:
  - name: site
    plural: sites
    identifiers: [name]
    fields:
      name: {type: string, required: true}
      status: {type: string, choices: [planned, active]}
      devices: {type: relation, target: device, cardinality: one_to_many, related_field: site}
  - name: device
    plural: devices
    identifiers: [name]
    fields:
      name: {type: string, required: true}
      site: {type: relation, target: site, required: true}
      description: {type: string}
      tags: {type: relation, target: tag, cardinality: many_to_many}
      primary_ip: {type: relation, target: ip, cardinality: one_to_one, deferred: true}
  - name: tag
    plural: tags
    identifiers: [name]
    fields:
      name: {type: string}
  - name: ip
    plural: ips
    identifiers: [address]
    fields:
      address: {type: string, required: true}
      device: {type: relation, target: device}
";

    fn catalog() -> SchemaCatalog {
        SchemaCatalog::parse_yaml(CATALOG, None).expect("catalog")
    }

    fn build(db: &mut Database, catalog: &SchemaCatalog, deployment: Option<Uuid>, doc: &str) -> Result<Vec<Record>> {
        let Database { objects, ledger, .. } = db;
        let journal = Journal::new(ledger, deployment, false);
        let ctx = BuildContext::new(objects, catalog, journal);
        let mut builder = Builder::new(ctx, ExtensionRegistry::new().start_build());
        let document: Value = serde_yaml::from_str(doc).expect("yaml");
        builder.build_document(&document)?;
        Ok(builder.finish().records)
    }

    fn one(db: &Database, object_type: &str, name: &str) -> ObjectRef {
        let hits = db.objects.query(object_type, &[Predicate::new("name", json!(name))]);
        assert_eq!(hits.len(), 1, "{object_type} {name}");
        hits[0].object_ref()
    }

    #[test]
    fn test_nested_document() {
        let catalog = catalog();
        let mut db = Database::new();
        let doc = r#"
sites:
  - "!create_or_update:name": s1
    status: active
    devices:
      - name: r1
        "!ref": r1
        tags:
          - "!create_or_update:name": core
ips:
  - address: 10.0.0.1/32
    device: "!ref:r1"
    "!ref": ip1
devices:
  - "!update:name": r1
    primary_ip: "!ref:ip1"
"#;
        let records = build(&mut db, &catalog, None, doc).expect("build");
        assert_eq!(records.len(), 4);
        assert_eq!(records[0].key, "site(name=s1)");
        assert_eq!(records[1].key, "site(name=s1)/device(name=r1)");
        assert!(records.iter().all(|r| r.is_full()));

        let site = one(&db, "site", "s1");
        let device = one(&db, "device", "r1");
        let tag = one(&db, "tag", "core");
        let stored = db.objects.require(&device).expect("device");
        assert_eq!(stored.get("site"), Some(&site.id.to_value()));
        assert_eq!(stored.get("tags"), Some(&json!([tag.id.to_string()])));
        let ip = db.objects.list(Some("ip"))[0].object_ref();
        assert_eq!(stored.get("primary_ip"), Some(&ip.id.to_value()));
        assert!(records[1].owns("primary_ip"));
    }

    #[test]
    fn test_create_or_update_reuses_object() {
        let catalog = catalog();
        let mut db = Database::new();
        let doc = r#"
sites:
  - "!create_or_update:name": s1
    status: planned
"#;
        build(&mut db, &catalog, None, doc).expect("first");
        let records = build(&mut db, &catalog, None, &doc.replace("planned", "active")).expect("second");
        assert_eq!(db.objects.list(Some("site")).len(), 1);
        assert!(!records[0].is_full());
        assert_eq!(records[0].changes["status"].old, json!("planned"));
        assert_eq!(records[0].changes["status"].new, json!("active"));
    }

    #[test]
    fn test_query_and_lookup_errors() {
        let catalog = catalog();
        let mut db = Database::new();
        build(&mut db, &catalog, None, "sites:\n  - name: s1\n").expect("site");
        build(&mut db, &catalog, None, "devices:\n  - name: r2\n    site__name: s1\n").expect("query");
        let site = one(&db, "site", "s1");
        let device = one(&db, "device", "r2");
        assert_eq!(
            db.objects.require(&device).expect("device").get("site"),
            Some(&site.id.to_value())
        );

        let err = build(&mut db, &catalog, None, "devices:\n  - name: r3\n    site__name: nope\n")
            .expect_err("missing site");
        assert!(matches!(err, DesignError::Lookup(LookupError::NotFound { .. })));

        let err = build(&mut db, &catalog, None, "devices:\n  - \"!get:name\": r2\n    description: x\n")
            .expect_err("get with writes");
        assert!(matches!(err, DesignError::Validation(_)));
    }

    #[test]
    fn test_validation_and_unknown_tags() {
        let catalog = catalog();
        let mut db = Database::new();

        let err = build(&mut db, &catalog, None, "devices:\n  - name: r1\n").expect_err("site required");
        assert!(err.to_string().contains("site"));

        let err = build(&mut db, &catalog, None, "sites:\n  - name: s1\n    status: gone\n")
            .expect_err("bad choice");
        assert!(matches!(err, DesignError::Validation(ValidationError::InvalidAttribute { .. })));

        let err = build(&mut db, &catalog, None, "sites:\n  - name: s1\n    \"!nope:x\": 1\n")
            .expect_err("unknown tag");
        assert!(matches!(err, DesignError::Extension(ExtensionError::UnknownTag { .. })));

        assert!(build(&mut db, &catalog, None, "racks: []\n").is_err());
    }

    #[test]
    fn test_undefined_reference() {
        let catalog = catalog();
        let mut db = Database::new();
        let err = build(&mut db, &catalog, None, "ips:\n  - address: a\n    device: \"!ref:later\"\n")
            .expect_err("forward reference");
        assert!(matches!(err, DesignError::Reference(ReferenceError::Undefined { .. })));
    }

    #[test]
    fn test_lookup_needs_exactly_one_match() {
        let catalog = catalog();
        let mut db = Database::new();

        for doc in [
            "sites:\n  - \"!get:name\": nope\n",
            "sites:\n  - \"!update:name\": nope\n    status: active\n",
        ] {
            let err = build(&mut db, &catalog, None, doc).expect_err("no match");
            assert!(matches!(err, DesignError::Lookup(LookupError::NotFound { .. })), "{doc}");
        }

        let twin = json!({"name": "dup", "status": "planned"}).as_object().cloned().unwrap_or_default();
        db.objects.create("site", twin.clone());
        db.objects.create("site", twin);
        for doc in [
            "sites:\n  - \"!get:name\": dup\n",
            "sites:\n  - \"!update:name\": dup\n    status: active\n",
            "devices:\n  - name: r1\n    site__name: dup\n",
        ] {
            let err = build(&mut db, &catalog, None, doc).expect_err("two matches");
            assert!(matches!(err, DesignError::Lookup(LookupError::MultipleMatches { .. })), "{doc}");
        }
        assert!(db.objects.list(Some("device")).is_empty());
        assert!(
            db.objects
                .query("site", &[Predicate::new("status", json!("active"))])
                .is_empty()
        );
    }

    #[test]
    fn test_create_or_update_creates_on_miss() {
        let catalog = catalog();
        let mut db = Database::new();
        let doc = "sites:\n  - \"!create_or_update:name\": fresh\n    status: planned\n";

        let records = build(&mut db, &catalog, None, doc).expect("create");
        assert_eq!(records.len(), 1);
        assert!(records[0].is_full());
        assert_eq!(records[0].changes["name"].new, json!("fresh"));

        let site = one(&db, "site", "fresh");
        assert_eq!(db.objects.require(&site).expect("site").get("status"), Some(&json!("planned")));
    }
}
