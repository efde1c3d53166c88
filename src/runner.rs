//! Design runner.
//!
//! This module drives a complete run: input checks, template rendering,
//! the build, the diff against the deployment's previous run, removal of
//! what the re-run dropped and the final commit. Every write of a run
//! happens inside one transaction; a failure leaves the database untouched
//! and rolls back the extensions that were used.

use serde::Serialize;
use serde_json::{Map, Value, json};
use std::path::Path;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::builder::{BuildContext, Builder, Journal};
use crate::config::{DefinitionParser, DesignDefinition, DesignInfo, DocumentHasher};
use crate::context::{ContextCheck, DeclaredCheck, run_checks};
use crate::error::{ConfigError, DesignError, Result, StateError, ValidationError};
use crate::ext::{ExtensionRegistry, ExtensionSet};
use crate::ledger::{ChangeSet, ChangeSetKind, DesignMode, Record};
use crate::planner::{DecommissionEngine, DecommissionMode, DiffEngine, DiffResult};
use crate::render::{PlaceholderRenderer, ReportRenderer, Renderer, SummaryReport, TemplateReport};
use crate::schema::{RequiredCheck, SchemaCatalog, SchemaOracle, validate_attributes};
use crate::store::{Database, ObjectRef, ObjectStore, SharedDatabase};

/// Parameters of a single run.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    /// Deployment name, required for deployment-mode designs.
    pub deployment: Option<String>,
    /// Input data rendered into the templates.
    pub input: Map<String, Value>,
    /// Who is running the design.
    pub actor: String,
    /// Adopt located objects.
    pub import: bool,
    /// Build and diff, then roll everything back.
    pub dry_run: bool,
    /// How records dropped by a re-run are handled.
    pub removal_mode: DecommissionMode,
}

/// Result of a run.
#[derive(Debug, Serialize)]
pub struct RunOutcome {
    /// Design name.
    pub design: String,
    /// Deployment name, for deployment-mode designs.
    pub deployment: Option<String>,
    /// The change set recorded by the run.
    pub change_set: Uuid,
    /// Hash of the rendered documents.
    pub document_hash: String,
    /// Whether the run was rolled back.
    pub dry_run: bool,
    /// Records new in this run.
    pub added: usize,
    /// Records whose written values changed.
    pub updated: usize,
    /// Records of the previous run that were removed.
    pub removed: usize,
    /// Records unchanged since the previous run.
    pub retained: usize,
    /// Records of this run.
    pub records: Vec<Record>,
    /// Diff against the previous run.
    #[serde(skip)]
    pub diff: Option<DiffResult>,
    /// Rendered report.
    pub report: Option<String>,
}

/// Runs a design against a database.
pub struct DesignRunner {
    design: DesignInfo,
    schema: Box<dyn SchemaOracle>,
    templates: Vec<(String, String)>,
    renderer: Box<dyn Renderer>,
    registry: ExtensionRegistry,
    checks: Vec<Box<dyn ContextCheck>>,
    report: Option<Box<dyn ReportRenderer>>,
    hasher: DocumentHasher,
    diff_engine: DiffEngine,
}

impl std::fmt::Debug for DesignRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DesignRunner")
            .field("design", &self.design.name)
            .field("templates", &self.templates.len())
            .field("extensions", &self.registry.names())
            .field("checks", &self.checks.len())
            .finish_non_exhaustive()
    }
}

impl DesignRunner {
    /// Creates a runner for named template sources.
    ///
    /// Templates are rendered with [`PlaceholderRenderer`] and no extension,
    /// check or report is configured.
    #[must_use]
    pub fn new(design: DesignInfo, schema: Box<dyn SchemaOracle>, templates: Vec<(String, String)>) -> Self {
        Self {
            design,
            schema,
            templates,
            renderer: Box::new(PlaceholderRenderer::new()),
            registry: ExtensionRegistry::new(),
            checks: Vec::new(),
            report: None,
            hasher: DocumentHasher::new(),
            diff_engine: DiffEngine::new(),
        }
    }

    /// Loads schema, templates, extensions, checks and report of a definition.
    ///
    /// # Errors
    ///
    /// Returns an error if a referenced file cannot be read or an extension is unknown.
    pub fn from_definition(definition: &DesignDefinition) -> Result<Self> {
        let schema = SchemaCatalog::load_file(definition.resolve(&definition.schema))?;

        let templates = definition
            .templates
            .iter()
            .map(|name| Ok((name.clone(), read_source(&definition.resolve(name))?)))
            .collect::<Result<Vec<_>>>()?;

        let context_dir = definition.context_dir.as_ref().map(|d| definition.resolve(d));
        let registry = ExtensionRegistry::builtin(context_dir)?.select(&definition.extensions)?;

        let report: Box<dyn ReportRenderer> = match &definition.report {
            Some(name) => Box::new(TemplateReport::new(
                PlaceholderRenderer::new(),
                name.clone(),
                read_source(&definition.resolve(name))?,
            )),
            None => Box::new(SummaryReport),
        };

        info!(
            "Loaded design '{}' with {} template(s) and {} extension(s)",
            definition.design.name,
            templates.len(),
            definition.extensions.len()
        );

        Ok(Self::new(definition.design.clone(), Box::new(schema), templates)
            .with_extensions(registry)
            .with_checks(DeclaredCheck::from_configs(&definition.context.checks))
            .with_report(report))
    }

    /// Replaces the template renderer.
    #[must_use]
    pub fn with_renderer(mut self, renderer: Box<dyn Renderer>) -> Self {
        self.renderer = renderer;
        self
    }

    /// Sets the extensions available to the design.
    #[must_use]
    pub fn with_extensions(mut self, registry: ExtensionRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Sets the input checks.
    #[must_use]
    pub fn with_checks(mut self, checks: Vec<Box<dyn ContextCheck>>) -> Self {
        self.checks = checks;
        self
    }

    /// Sets the report rendered after a committed run.
    #[must_use]
    pub fn with_report(mut self, report: Box<dyn ReportRenderer>) -> Self {
        self.report = Some(report);
        self
    }

    /// The design being run.
    #[must_use]
    pub const fn design(&self) -> &DesignInfo {
        &self.design
    }

    /// The schema oracle.
    #[must_use]
    pub fn schema(&self) -> &dyn SchemaOracle {
        self.schema.as_ref()
    }

    /// Checks the input and renders every template into a document.
    ///
    /// # Errors
    ///
    /// Returns an error if a check fails, a template cannot be rendered or
    /// the result is not YAML.
    pub fn render(&self, input: &Map<String, Value>) -> Result<Vec<Value>> {
        run_checks(&self.checks, input)?;

        self.templates
            .iter()
            .map(|(name, source)| {
                let rendered = self.renderer.render(name, source, input)?;
                debug!("Rendered template {name} ({} bytes)", rendered.len());
                serde_yaml::from_str(&rendered).map_err(|e| {
                    DesignError::Validation(ValidationError::malformed(name.clone(), e.to_string()))
                })
            })
            .collect()
    }

    /// Runs the design.
    ///
    /// # Errors
    ///
    /// Returns an error if any stage fails; the database is then left as it was.
    pub fn run(&self, db: &mut Database, request: &RunRequest) -> Result<RunOutcome> {
        let documents = self.render(&request.input)?;
        let document_hash = self.hasher.hash_documents(&documents);

        let mut tx = db.begin();
        info!(
            "Running design '{}' (transaction {}, hash {})",
            self.design.name,
            tx.id(),
            self.hasher.short_hash(&document_hash)
        );

        let deployment = self.open_deployment(&mut tx, request)?;
        let (records, mut extensions) = self.build(&mut tx, deployment, request.import, &documents)?;

        let recorded = self.record(&mut tx, deployment, records, &document_hash, request);
        let (change_set, diff) = match recorded {
            Ok(recorded) => recorded,
            Err(e) => {
                error!("Run of design '{}' failed: {e}", self.design.name);
                extensions.roll_back();
                return Err(e);
            }
        };

        if request.dry_run {
            extensions.roll_back();
            tx.rollback();
            info!("Dry run of design '{}' rolled back", self.design.name);
        } else {
            if let Err(e) = extensions.commit() {
                extensions.roll_back();
                return Err(e);
            }
            tx.commit();
        }

        let mut outcome = RunOutcome {
            design: self.design.name.clone(),
            deployment: request.deployment.clone().filter(|_| deployment.is_some()),
            change_set: change_set.id,
            document_hash,
            dry_run: request.dry_run,
            added: change_set.records.len(),
            updated: 0,
            removed: 0,
            retained: 0,
            records: change_set.records,
            diff: None,
            report: None,
        };
        if let Some(diff) = diff {
            outcome.added = diff.added;
            outcome.updated = diff.updated;
            outcome.removed = diff.removed;
            outcome.retained = diff.retained;
            outcome.diff = Some(diff);
        }

        if !request.dry_run
            && let Some(report) = &self.report
        {
            match report.render_report(&report_data(&outcome, &request.input)) {
                Ok(rendered) => outcome.report = Some(rendered),
                Err(e) => warn!("Report of design '{}' failed after commit: {e}", self.design.name),
            }
        }

        info!(
            "Design '{}' done: {} added, {} updated, {} removed, {} retained",
            outcome.design, outcome.added, outcome.updated, outcome.removed, outcome.retained
        );
        Ok(outcome)
    }

    /// Runs the design while holding the shared database lock.
    ///
    /// # Errors
    ///
    /// Returns an error if the run fails.
    pub async fn run_shared(&self, db: &SharedDatabase, request: &RunRequest) -> Result<RunOutcome> {
        let mut guard = db.lock().await;
        self.run(&mut guard, request)
    }

    /// Decommissions a deployment of this design.
    ///
    /// # Errors
    ///
    /// Returns an error if the design is ad-hoc, the deployment is unknown,
    /// already decommissioned or blocked by another deployment.
    pub fn decommission(
        &self,
        db: &mut Database,
        deployment: &str,
        mode: DecommissionMode,
        actor: &str,
    ) -> Result<ChangeSet> {
        self.require_deployment_mode("decommission")?;
        let mut tx = db.begin();
        let id = tx.ledger.require_deployment(&self.design.name, deployment)?.id;
        let change_set = DecommissionEngine::new(mode).decommission(&mut tx, id, actor)?;
        tx.commit();
        Ok(change_set)
    }

    /// Deletes a decommissioned deployment and its change sets.
    ///
    /// # Errors
    ///
    /// Returns an error if the deployment is unknown or still active.
    pub fn delete(&self, db: &mut Database, deployment: &str) -> Result<()> {
        self.require_deployment_mode("delete")?;
        let id = db.ledger.require_deployment(&self.design.name, deployment)?.id;
        db.ledger.remove_deployment(id)?;
        Ok(())
    }

    fn require_deployment_mode(&self, operation: &str) -> Result<()> {
        if self.design.mode == DesignMode::Deployment {
            Ok(())
        } else {
            Err(DesignError::State(StateError::InvalidMode {
                design: self.design.name.clone(),
                operation: operation.to_string(),
            }))
        }
    }

    /// Registers the design and resolves (or creates) the deployment.
    fn open_deployment(&self, db: &mut Database, request: &RunRequest) -> Result<Option<Uuid>> {
        let design_id = db.ledger.upsert_design(
            &self.design.name,
            self.design.mode,
            &self.design.version,
            &self.design.description,
        );

        if self.design.mode == DesignMode::AdHoc {
            if request.deployment.is_some() {
                return Err(DesignError::State(StateError::InvalidMode {
                    design: self.design.name.clone(),
                    operation: String::from("deployments"),
                }));
            }
            return Ok(None);
        }

        let name = request.deployment.as_deref().ok_or_else(|| {
            DesignError::Config(ConfigError::validation(
                "deployment-mode designs need a deployment name",
                "deployment",
            ))
        })?;

        match db.ledger.find_deployment(design_id, name) {
            Some(existing) if !existing.is_active() => {
                Err(DesignError::State(StateError::AlreadyDecommissioned {
                    deployment: name.to_string(),
                }))
            }
            Some(existing) => Ok(Some(existing.id)),
            None => Ok(Some(db.ledger.create_deployment(
                design_id,
                name,
                &self.design.version,
                &request.actor,
            ))),
        }
    }

    /// Builds every document and returns the journal records.
    fn build(
        &self,
        db: &mut Database,
        deployment: Option<Uuid>,
        import: bool,
        documents: &[Value],
    ) -> Result<(Vec<Record>, ExtensionSet)> {
        let Database { objects, ledger, .. } = db;
        let journal = Journal::new(ledger, deployment, import);
        let ctx = BuildContext::new(objects, self.schema.as_ref(), journal);
        let mut builder = Builder::new(ctx, self.registry.start_build());

        for (i, document) in documents.iter().enumerate() {
            if let Err(e) = builder.build_document(document) {
                error!("Build of document {i} of design '{}' failed: {e}", self.design.name);
                builder.abort();
                return Err(e);
            }
        }

        let output = builder.finish();
        Ok((output.records, output.extensions))
    }

    /// Removes what a re-run dropped and appends the change set.
    fn record(
        &self,
        db: &mut Database,
        deployment: Option<Uuid>,
        records: Vec<Record>,
        document_hash: &str,
        request: &RunRequest,
    ) -> Result<(ChangeSet, Option<DiffResult>)> {
        let mut diff = None;
        if let Some(id) = deployment {
            let result = self
                .diff_engine
                .compute_diff(db.ledger.active_change_set(id), &records);

            if !result.removals.is_empty() {
                let engine = DecommissionEngine::new(request.removal_mode);
                let Database { objects, ledger, .. } = &mut *db;
                engine.preflight(ledger, &*objects, id, &result.removals)?;
                let deployment_name = request.deployment.as_deref().unwrap_or_default();
                engine.check_rebuilt(&*objects, deployment_name, &result.removals, &records)?;
                let referrers = engine.outside_referrers(&*objects, &result.removals);
                engine.execute(&mut *objects, &result.removals)?;
                self.revalidate(&*objects, &referrers)?;
            }
            diff = Some(result);
        } else if request.import {
            warn!("Import has no effect on ad-hoc design '{}'", self.design.name);
        }

        let mut change_set = ChangeSet::new(deployment, ChangeSetKind::Build);
        change_set.document_hash = Some(document_hash.to_string());
        change_set.records = records;
        db.ledger.push_change_set(change_set.clone());

        if let Some(id) = deployment {
            db.ledger.touch_deployment(id, &self.design.version, &request.actor);
        }
        Ok((change_set, diff))
    }

    /// Checks that objects whose relations were cleared by removals still
    /// carry every required field.
    fn revalidate(&self, objects: &dyn ObjectStore, referrers: &[ObjectRef]) -> Result<()> {
        for referrer in referrers {
            let Some(current) = objects.get(referrer) else {
                continue;
            };
            let schema = self.schema.require(&referrer.object_type)?;
            validate_attributes(schema, &current.label(), &current.attributes, RequiredCheck::Complete)?;
        }
        Ok(())
    }
}

/// Reads a template or report source.
fn read_source(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| {
        DesignError::Config(ConfigError::ParseError {
            message: format!("Failed to read template: {e}"),
            location: Some(path.display().to_string()),
        })
    })
}

/// Data available to report templates.
fn report_data(outcome: &RunOutcome, input: &Map<String, Value>) -> Map<String, Value> {
    let records: Vec<Value> = outcome
        .records
        .iter()
        .map(|r| {
            json!({
                "key": r.key,
                "object_type": r.object.object_type,
                "id": r.object.id.to_string(),
                "scope": r.scope,
            })
        })
        .collect();

    let mut data = Map::new();
    data.insert(String::from("design"), json!(outcome.design));
    if let Some(deployment) = &outcome.deployment {
        data.insert(String::from("deployment"), json!(deployment));
    }
    data.insert(String::from("added"), json!(outcome.added));
    data.insert(String::from("updated"), json!(outcome.updated));
    data.insert(String::from("removed"), json!(outcome.removed));
    data.insert(String::from("retained"), json!(outcome.retained));
    data.insert(String::from("records"), Value::Array(records));
    data.insert(String::from("input"), Value::Object(input.clone()));
    data
}

/// Loads a definition file and prepares its runner and input.
///
/// # Errors
///
/// Returns an error if the definition, its files or its input cannot be loaded.
pub fn load_design(path: &Path) -> Result<(DesignDefinition, DesignRunner, Map<String, Value>)> {
    let parser = DefinitionParser::new();
    let definition = parser.load_with_env(path)?;
    let runner = DesignRunner::from_definition(&definition)?;
    let input = parser.load_context(&definition)?;
    Ok((definition, runner, input))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::Scope;
    use crate::render::MockReportRenderer;
    use crate::store::Predicate;

    const CATALOG: &str = r"
object_types:
  - name: site
    plural: sites
    identifiers: [name]
    fields:
      name: {type: string, required: true}
      status: {type: string, choices: [planned, active]}
";

    fn runner(mode: DesignMode) -> DesignRunner {
        let design = DesignInfo {
            name: String::from("edge"),
            mode,
            version: String::from("1.0.0"),
            description: String::new(),
        };
        let schema = SchemaCatalog::parse_yaml(CATALOG, None).expect("catalog");
        DesignRunner::new(
            design,
            Box::new(schema),
            vec![(
                String::from("site.yaml"),
                String::from("sites:\n  - name: {{ site }}\n    status: {{ status }}\n"),
            )],
        )
    }

    fn request(deployment: Option<&str>, site: &str, status: &str) -> RunRequest {
        let mut input = Map::new();
        input.insert(String::from("site"), json!(site));
        input.insert(String::from("status"), json!(status));
        RunRequest {
            deployment: deployment.map(String::from),
            input,
            actor: String::from("tester"),
            ..RunRequest::default()
        }
    }

    #[test]
    fn test_deployment_run_and_rerun() {
        let runner = runner(DesignMode::Deployment);
        let mut db = Database::new();

        let first = runner.run(&mut db, &request(Some("east"), "s1", "planned")).expect("first run");
        assert_eq!(first.added, 1);
        assert_eq!(first.records[0].scope, Scope::Full);

        let second = runner.run(&mut db, &request(Some("east"), "s1", "active")).expect("second run");
        assert_eq!(second.updated, 1);
        assert_eq!(db.objects.len(), 1);

        let third = runner.run(&mut db, &request(Some("east"), "s2", "active")).expect("third run");
        assert_eq!((third.added, third.removed), (1, 1));
        assert!(db.objects.query("site", &[Predicate::new("name", json!("s1"))]).is_empty());
    }

    #[test]
    fn test_dry_run_leaves_database_untouched() {
        let runner = runner(DesignMode::Deployment);
        let mut db = Database::new();
        let mut req = request(Some("east"), "s1", "planned");
        req.dry_run = true;

        let outcome = runner.run(&mut db, &req).expect("dry run");
        assert!(outcome.dry_run);
        assert!(db.objects.is_empty());
        assert!(db.ledger.design_by_name("edge").is_none());
    }

    #[test]
    fn test_failed_run_rolls_back() {
        let runner = runner(DesignMode::Deployment);
        let mut db = Database::new();
        let err = runner
            .run(&mut db, &request(Some("east"), "s1", "broken"))
            .expect_err("invalid choice");
        assert!(matches!(err, DesignError::Validation(_)));
        assert!(db.objects.is_empty());
        assert_eq!(db.ledger.deployments().count(), 0);
    }

    #[test]
    fn test_mode_rules() {
        let mut db = Database::new();
        assert!(runner(DesignMode::Deployment).run(&mut db, &request(None, "s1", "planned")).is_err());
        assert!(runner(DesignMode::AdHoc).run(&mut db, &request(Some("x"), "s1", "planned")).is_err());

        let adhoc = runner(DesignMode::AdHoc);
        let outcome = adhoc.run(&mut db, &request(None, "s1", "planned")).expect("ad-hoc");
        assert!(outcome.deployment.is_none());
        assert!(adhoc.decommission(&mut db, "x", DecommissionMode::Revert, "t").is_err());
    }

    #[test]
    fn test_decommission_then_delete() {
        let runner = runner(DesignMode::Deployment);
        let mut db = Database::new();
        runner.run(&mut db, &request(Some("east"), "s1", "planned")).expect("run");

        assert!(runner.delete(&mut db, "east").is_err());
        runner
            .decommission(&mut db, "east", DecommissionMode::Revert, "tester")
            .expect("decommission");
        assert!(db.objects.is_empty());
        assert!(runner.run(&mut db, &request(Some("east"), "s1", "planned")).is_err());

        runner.delete(&mut db, "east").expect("delete");
        assert_eq!(db.ledger.deployments().count(), 0);
    }

    #[test]
    fn test_report_rendered_after_commit() {
        let mut report = MockReportRenderer::new();
        report
            .expect_render_report()
            .withf(|data| data["design"] == json!("edge") && data["added"] == json!(1))
            .times(1)
            .returning(|_| Ok(String::from("ok")));

        let runner = runner(DesignMode::Deployment).with_report(Box::new(report));
        let mut db = Database::new();
        let outcome = runner.run(&mut db, &request(Some("east"), "s1", "planned")).expect("run");
        assert_eq!(outcome.report.as_deref(), Some("ok"));
    }

    #[test]
    fn test_failed_report_keeps_committed_run() {
        let mut report = MockReportRenderer::new();
        report
            .expect_render_report()
            .times(1)
            .returning(|_| Err(DesignError::internal("report template broken")));

        let runner = runner(DesignMode::Deployment).with_report(Box::new(report));
        let mut db = Database::new();
        let outcome = runner.run(&mut db, &request(Some("east"), "s1", "planned")).expect("run");
        assert!(outcome.report.is_none());
        assert_eq!(outcome.added, 1);
        assert_eq!(db.objects.query("site", &[Predicate::new("name", json!("s1"))]).len(), 1);
        assert_eq!(db.ledger.deployments().count(), 1);
    }
}
