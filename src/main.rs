//! Halldyll design builder CLI entrypoint.
//!
//! This is the main entrypoint for the halldyll-design command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use halldyll_design_builder::cli::{Cli, Commands, OutputFormatter, RunArgs, StateCommands};
use halldyll_design_builder::config::{
    DefinitionParser, DefinitionValidator, DesignDefinition, find_design_file,
};
use halldyll_design_builder::error::{ConfigError, DesignError, Result};
use halldyll_design_builder::ext::ExtensionRegistry;
use halldyll_design_builder::ledger::{WriteGuard, Writer};
use halldyll_design_builder::planner::DecommissionMode;
use halldyll_design_builder::runner::{DesignRunner, RunRequest, load_design};
use halldyll_design_builder::schema::validate_value;
use halldyll_design_builder::state::{LocalStateStore, StateStore};
use halldyll_design_builder::store::{Attributes, Database, ObjectId, ObjectRef, ObjectStore};

use clap::Parser;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose, cli.log_json);

    // Run async runtime
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system.
///
/// `RUST_LOG` takes precedence over `--verbose`.
fn init_logging(verbose: bool, json: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<()> {
    let formatter = OutputFormatter::new(cli.output);
    let design = cli.design.as_deref();

    match cli.command {
        Commands::Validate { warnings } => cmd_validate(design, warnings, &formatter),
        Commands::Plan(args) => cmd_plan(design, &args, &formatter).await,
        Commands::Run { args, yes } => cmd_run(design, &args, yes, &formatter).await,
        Commands::Decommission { deployment, mode, yes } => {
            cmd_decommission(design, &deployment, mode, yes, &formatter).await
        }
        Commands::Delete { deployment, yes } => cmd_delete(design, &deployment, yes, &formatter).await,
        Commands::Deployments => cmd_deployments(design, &formatter).await,
        Commands::Show { deployment } => cmd_show(design, &deployment, &formatter).await,
        Commands::Owner {
            object_type,
            id,
            attribute,
        } => cmd_owner(design, &object_type, &id, attribute.as_deref(), &formatter).await,
        Commands::Set {
            object_type,
            id,
            assignment,
            bypass,
        } => cmd_set(design, &object_type, &id, assignment, bypass, &formatter).await,
        Commands::State { command } => cmd_state(design, command, &formatter).await,
    }
}

/// Validate the definition and render its templates.
fn cmd_validate(design: Option<&Path>, show_warnings: bool, formatter: &OutputFormatter) -> Result<()> {
    let design_file = resolve_design_path(design)?;
    info!("Validating design: {}", design_file.display());

    let parser = parser_for(&design_file);
    parser.load_dotenv()?;
    let definition = parser.load_with_env(&design_file)?;

    let result = validator_for(&definition)?.check(&definition);
    eprintln!("{}", formatter.format_validation(&definition, &result, show_warnings));
    if !result.is_valid() {
        return Err(DesignError::Config(ConfigError::validation(
            format!("{} error(s) found", result.error_count()),
            "design",
        )));
    }

    let runner = DesignRunner::from_definition(&definition)?;
    let input = parser.load_context(&definition)?;
    let documents = runner.render(&input)?;
    eprintln!(
        "{}",
        formatter.success(&format!("{} template(s) rendered", documents.len()))
    );
    Ok(())
}

/// Build the design and roll it back.
async fn cmd_plan(design: Option<&Path>, args: &RunArgs, formatter: &OutputFormatter) -> Result<()> {
    let workspace = Workspace::open(design)?;
    let mut request = workspace.request(args);
    request.dry_run = true;

    let outcome = with_locked_state(&workspace.store, "plan", false, |db| workspace.runner.run(db, &request)).await?;
    eprintln!("{}", formatter.format_outcome(&outcome));
    Ok(())
}

/// Build the design and commit it.
async fn cmd_run(design: Option<&Path>, args: &RunArgs, yes: bool, formatter: &OutputFormatter) -> Result<()> {
    let workspace = Workspace::open(design)?;
    let request = workspace.request(args);

    let outcome = with_locked_state(&workspace.store, "run", true, |db| {
        if !yes {
            let preview = workspace.runner.run(db, &RunRequest {
                dry_run: true,
                ..request.clone()
            })?;
            eprintln!("{}", formatter.format_outcome(&preview));
            if preview.removed > 0 {
                warn!("{} record(s) will be removed", preview.removed);
            }
            if !confirm("Do you want to apply these changes? [y/N]: ", "y")? {
                return Ok(None);
            }
        }
        workspace.runner.run(db, &request).map(Some)
    })
    .await?;

    match outcome {
        Some(outcome) => eprintln!("{}", formatter.format_outcome(&outcome)),
        None => eprintln!("Run cancelled."),
    }
    Ok(())
}

/// Decommission a deployment.
async fn cmd_decommission(
    design: Option<&Path>,
    deployment: &str,
    mode: DecommissionMode,
    yes: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let workspace = Workspace::open(design)?;

    if !yes && !confirm(
        &format!("Decommission '{deployment}' ({mode})? Type the deployment name to confirm: "),
        deployment,
    )? {
        eprintln!("Decommission cancelled.");
        return Ok(());
    }

    let actor = DefinitionParser::actor();
    let operation = format!("decommission {deployment}");
    let change_set = with_locked_state(&workspace.store, &operation, true, |db| {
        workspace.runner.decommission(db, deployment, mode, &actor)
    })
    .await?;

    eprintln!("{}", formatter.format_decommission(&change_set));
    eprintln!("{}", formatter.success(&format!("Deployment '{deployment}' decommissioned")));
    Ok(())
}

/// Delete a decommissioned deployment.
async fn cmd_delete(design: Option<&Path>, deployment: &str, yes: bool, formatter: &OutputFormatter) -> Result<()> {
    let workspace = Workspace::open(design)?;

    if !yes && !confirm(&format!("Delete the history of '{deployment}'? [y/N]: "), "y")? {
        eprintln!("Delete cancelled.");
        return Ok(());
    }

    let operation = format!("delete {deployment}");
    with_locked_state(&workspace.store, &operation, true, |db| workspace.runner.delete(db, deployment)).await?;
    eprintln!("{}", formatter.success(&format!("Deployment '{deployment}' deleted")));
    Ok(())
}

/// List deployments.
async fn cmd_deployments(design: Option<&Path>, formatter: &OutputFormatter) -> Result<()> {
    let workspace = Workspace::open(design)?;
    let db = workspace.store.load_or_default().await?;
    eprintln!(
        "{}",
        formatter.format_deployments(&db.ledger, &workspace.definition.design.name)
    );
    Ok(())
}

/// Show a deployment.
async fn cmd_show(design: Option<&Path>, deployment: &str, formatter: &OutputFormatter) -> Result<()> {
    let workspace = Workspace::open(design)?;
    let db = workspace.store.load_or_default().await?;
    let found = db
        .ledger
        .require_deployment(&workspace.definition.design.name, deployment)?;
    eprintln!("{}", formatter.format_deployment(&db.ledger, found));
    Ok(())
}

/// Show the owners of an object.
async fn cmd_owner(
    design: Option<&Path>,
    object_type: &str,
    id: &str,
    attribute: Option<&str>,
    formatter: &OutputFormatter,
) -> Result<()> {
    let workspace = Workspace::open(design)?;
    let db = workspace.store.load_or_default().await?;
    let object = ObjectRef::new(object_type, ObjectId::parse(id)?);
    db.objects.require(&object)?;
    eprintln!("{}", formatter.format_owners(&db.ledger, &object, attribute));
    Ok(())
}

/// Write an attribute directly.
async fn cmd_set(
    design: Option<&Path>,
    object_type: &str,
    id: &str,
    (field, value): (String, Value),
    bypass: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let workspace = Workspace::open(design)?;
    let object = ObjectRef::new(object_type, ObjectId::parse(id)?);
    let schema = workspace.runner.schema().require(object_type)?;
    let writer = Writer::External {
        user: DefinitionParser::actor(),
        bypass,
    };

    with_locked_state(&workspace.store, "set", true, |db| {
        let label = db.objects.require(&object)?.label();
        validate_value(schema, &label, &field, &value)?;
        WriteGuard::new(&db.ledger)
            .with_protected_types(workspace.definition.protected_types.iter().cloned())
            .check(&writer, &object, [field.as_str()])?;

        let mut changes = Attributes::new();
        changes.insert(field.clone(), value.clone());
        db.objects.update(&object, changes)
    })
    .await?;

    eprintln!("{}", formatter.success(&format!("Set {field} on {object}")));
    Ok(())
}

/// State management commands.
async fn cmd_state(design: Option<&Path>, command: StateCommands, formatter: &OutputFormatter) -> Result<()> {
    let workspace = Workspace::open(design)?;
    let store = &workspace.store;

    match command {
        StateCommands::Show => {
            let db = store.load_or_default().await?;
            let lock = store.get_lock_info().await?;
            eprintln!("{}", formatter.format_state(&db, lock.as_ref()));
        }
        StateCommands::Lock { holder } => {
            let lock = store.acquire_lock(holder.as_deref().unwrap_or(""), "manual lock").await?;
            eprintln!("State locked: {}", lock.lock_id);
        }
        StateCommands::Unlock { lock_id, force } => {
            if force {
                store.force_unlock().await?;
                eprintln!("State forcefully unlocked.");
            } else if let Some(id) = lock_id {
                store.release_lock(&id).await?;
                eprintln!("State unlocked.");
            } else {
                eprintln!("{}", formatter.error("Please provide --lock-id or use --force"));
            }
        }
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// A loaded design with its runner, input and state store.
struct Workspace {
    definition: DesignDefinition,
    runner: DesignRunner,
    input: Map<String, Value>,
    store: LocalStateStore,
}

impl Workspace {
    /// Loads and validates the design definition.
    fn open(design: Option<&Path>) -> Result<Self> {
        let design_file = resolve_design_path(design)?;
        debug!("Loading design from: {}", design_file.display());
        parser_for(&design_file).load_dotenv()?;

        let (definition, runner, input) = load_design(&design_file)?;
        validator_for(&definition)?.validate(&definition)?;
        let store = LocalStateStore::with_state_path(definition.state_path());

        Ok(Self {
            definition,
            runner,
            input,
            store,
        })
    }

    /// Builds a run request from the command line.
    fn request(&self, args: &RunArgs) -> RunRequest {
        let mut input = self.input.clone();
        for (key, value) in &args.inputs {
            input.insert(key.clone(), value.clone());
        }
        RunRequest {
            deployment: args.deployment.clone(),
            input,
            actor: DefinitionParser::actor(),
            import: args.import,
            dry_run: false,
            removal_mode: args.removal_mode,
        }
    }
}

/// Holds the state lock while `f` works on the loaded database.
async fn with_locked_state<T>(
    store: &LocalStateStore,
    operation: &str,
    save: bool,
    f: impl FnOnce(&mut Database) -> Result<T>,
) -> Result<T> {
    let lock = store.acquire_lock("", operation).await?;
    let result = locked_section(store, save, f).await;
    store.release_lock(&lock.lock_id).await?;
    result
}

async fn locked_section<T>(
    store: &LocalStateStore,
    save: bool,
    f: impl FnOnce(&mut Database) -> Result<T>,
) -> Result<T> {
    let mut db = store.load_or_default().await?;
    let value = f(&mut db)?;
    if save {
        store.save(&db).await?;
    }
    Ok(value)
}

/// Asks for confirmation on stderr.
fn confirm(prompt: &str, expected: &str) -> Result<bool> {
    eprint!("{prompt}");
    std::io::stderr().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case(expected))
}

/// Resolves the design file path.
fn resolve_design_path(design: Option<&Path>) -> Result<PathBuf> {
    design.map_or_else(|| find_design_file("."), |path| Ok(path.to_path_buf()))
}

/// Parser rooted at the design file's directory.
fn parser_for(design_file: &Path) -> DefinitionParser {
    DefinitionParser::new().with_base_path(
        design_file
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new(".")),
    )
}

/// Validator knowing every built-in extension.
fn validator_for(definition: &DesignDefinition) -> Result<DefinitionValidator> {
    let registry = ExtensionRegistry::builtin(Some(definition.root.clone()))?;
    Ok(DefinitionValidator::new(registry.names()).with_file_checks(true))
}
