//! stagectl CLI entrypoint.
//!
//! This is the main entrypoint for the stagectl command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use stage_reconciler::cli::{
    Cli, Commands, LogFormat, OutputFormatter, PlanEntry, StateCommands,
};
use stage_reconciler::config::{
    find_config_file, ConfigHasher, ConfigParser, ConfigValidator, StageManifest,
};
use stage_reconciler::error::{ReconcileError, Result, StageError};
use stage_reconciler::reconciler::{reconcile_batch, BatchItem, ReconcileOptions, Reconciler};
use stage_reconciler::remote::{create_remote_store, RemoteObjectStore};
use stage_reconciler::state::{
    HistoryEntry, LocalStateStore, ReconcileState, StateOperation, StateStore, STATE_DIR,
};

use clap::Parser;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.log_format);

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

/// Initializes the logging system. Logs go to stderr so stdout stays parseable.
fn init_logging(verbose: bool, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<()> {
    let formatter = OutputFormatter::new(cli.output);

    match cli.command {
        Commands::Init { path, force } => cmd_init(&path, force),
        Commands::Validate { warnings } => cmd_validate(cli.config.as_ref(), warnings, &formatter),
        Commands::Plan { detailed } => cmd_plan(cli.config.as_ref(), detailed, &formatter).await,
        Commands::Apply {
            yes,
            parallel,
            prune,
            recreate_missing,
        } => {
            let flags = ApplyFlags {
                yes,
                parallel,
                prune,
                recreate_missing,
            };
            cmd_apply(cli.config.as_ref(), flags, &formatter).await
        }
        Commands::Drift => cmd_drift(cli.config.as_ref(), &formatter).await,
        Commands::Destroy { yes, stage } => {
            cmd_destroy(cli.config.as_ref(), yes, stage.as_deref()).await
        }
        Commands::State { command } => cmd_state(cli.config.as_ref(), command, &formatter).await,
    }
}

/// Everything a command needs from the project directory.
struct Workspace {
    manifest: StageManifest,
    state_store: LocalStateStore,
    remote: Arc<dyn RemoteObjectStore>,
}

/// Flags of `stagectl apply`.
#[derive(Debug, Clone, Copy)]
struct ApplyFlags {
    yes: bool,
    parallel: usize,
    prune: bool,
    recreate_missing: bool,
}

/// Initialize a new project.
fn cmd_init(path: &Path, force: bool) -> Result<()> {
    info!("Initializing stagectl project in: {}", path.display());

    let config_path = path.join("stagectl.yaml");
    let env_path = path.join(".env.example");
    let gitignore_path = path.join(".gitignore");

    if !force && config_path.exists() {
        eprintln!("Manifest already exists: {}", config_path.display());
        eprintln!("Use --force to overwrite.");
        return Ok(());
    }

    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }

    std::fs::write(&config_path, include_str!("../templates/stagectl.yaml"))?;
    eprintln!("Created: {}", config_path.display());

    std::fs::write(&env_path, include_str!("../templates/.env.example"))?;
    eprintln!("Created: {}", env_path.display());

    let ignored = [".env", ".stagectl/"];
    if gitignore_path.exists() {
        let existing = std::fs::read_to_string(&gitignore_path)?;
        let missing: Vec<&str> = ignored
            .iter()
            .copied()
            .filter(|entry| !existing.lines().any(|line| line.trim() == *entry))
            .collect();
        if !missing.is_empty() {
            let mut file = std::fs::OpenOptions::new()
                .append(true)
                .open(&gitignore_path)?;
            writeln!(file, "\n# stagectl")?;
            for entry in missing {
                writeln!(file, "{entry}")?;
            }
            eprintln!("Updated: {}", gitignore_path.display());
        }
    } else {
        std::fs::write(&gitignore_path, format!("{}\n", ignored.join("\n")))?;
        eprintln!("Created: {}", gitignore_path.display());
    }

    eprintln!("\nProject initialized successfully!");
    eprintln!("Next steps:");
    eprintln!("  1. Copy .env.example to .env and fill in your credentials");
    eprintln!("  2. Edit stagectl.yaml with your stages");
    eprintln!("  3. Run 'stagectl validate' to check the manifest");
    eprintln!("  4. Run 'stagectl plan' to see what would change");
    eprintln!("  5. Run 'stagectl apply' to reconcile");

    Ok(())
}

/// Validate the manifest.
fn cmd_validate(
    config_path: Option<&PathBuf>,
    show_warnings: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let config_file = resolve_config_path(config_path)?;
    info!("Validating manifest: {}", config_file.display());

    let manifest = load_manifest(&config_file)?;
    let result = ConfigValidator::new().validate_manifest(&manifest)?;

    emit(&formatter.format_validation(&result, manifest.stages.len(), show_warnings))
}

/// Show what apply would do.
async fn cmd_plan(
    config_path: Option<&PathBuf>,
    detailed: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let workspace = load_workspace(config_path)?;
    let state = workspace.state_store.load().await?.unwrap_or_default();
    let options = ReconcileOptions::from(&workspace.manifest.reconcile);

    let entries = plan_entries(&workspace, &state, options).await;
    let orphans = orphan_ids(&workspace.manifest, &state);
    for identity in &state.retired {
        warn!("Stage {identity} was replaced but not dropped; the next apply drops it");
    }

    emit(&formatter.format_plans(&entries, &orphans, detailed))
}

/// Reconcile every stage in the manifest.
async fn cmd_apply(
    config_path: Option<&PathBuf>,
    flags: ApplyFlags,
    formatter: &OutputFormatter,
) -> Result<()> {
    let workspace = load_workspace(config_path)?;
    let lock = workspace.state_store.acquire_lock("", "apply").await?;

    let result = apply_locked(&workspace, flags, formatter).await;

    if let Err(e) = workspace.state_store.release_lock(&lock.lock_id).await {
        error!("Failed to release state lock: {e}");
    }
    result
}

async fn apply_locked(
    workspace: &Workspace,
    flags: ApplyFlags,
    formatter: &OutputFormatter,
) -> Result<()> {
    let mut state = workspace.state_store.load().await?.unwrap_or_default();
    let mut options = ReconcileOptions::from(&workspace.manifest.reconcile);
    if flags.recreate_missing {
        options = options.with_recreate_missing(true);
    }

    let entries = plan_entries(workspace, &state, options).await;
    let orphans = if flags.prune {
        orphan_ids(&workspace.manifest, &state)
    } else {
        Vec::new()
    };

    let pending = !state.retired.is_empty()
        || entries
            .iter()
            .any(|e| e.error.is_some() || e.plan.as_ref().is_some_and(|p| p.has_changes()));
    if !pending && orphans.is_empty() {
        eprintln!("No changes. Stages match the manifest.");
        return Ok(());
    }

    if !flags.yes {
        eprint!("{}", formatter.format_plans(&entries, &orphans, false));
        if !confirm("\nDo you want to apply these changes? [y/N] ", &["y", "yes"])? {
            eprintln!("Apply cancelled.");
            return Ok(());
        }
    }

    let mut failures = drop_retired(workspace, &mut state).await;

    let hasher = ConfigHasher::new();
    let items: Vec<BatchItem> = workspace
        .manifest
        .stages
        .iter()
        .map(|desired| {
            let logical_id = desired.logical_id();
            BatchItem {
                previous: state.identity(&logical_id).cloned(),
                logical_id,
                desired: desired.clone(),
            }
        })
        .collect();
    let hashes: Vec<String> = items.iter().map(|i| hasher.hash_stage(&i.desired)).collect();

    let results = reconcile_batch(
        Arc::clone(&workspace.remote),
        items,
        options,
        flags.parallel,
    )
    .await;

    for (result, hash) in results.iter().zip(&hashes) {
        match &result.result {
            Ok(outcome) => state.record(
                &result.logical_id,
                outcome.identity.clone(),
                hash,
                outcome.plan.action,
            ),
            Err(e) => {
                error!("{} failed: {e}", result.stage);
                if let StageError::Reconcile(ReconcileError::PartiallyApplied {
                    action,
                    identity,
                    pending_drops,
                    ..
                }) = e
                {
                    state.record_partial(&result.logical_id, identity.clone(), pending_drops, *action);
                }
                failures.push(format!("{}: {e}", result.logical_id));
            }
        }
    }
    let ids: Vec<String> = results.iter().map(|r| r.logical_id.clone()).collect();
    state.add_history(if failures.is_empty() {
        HistoryEntry::new(StateOperation::Apply, ids)
    } else {
        HistoryEntry::failed(StateOperation::Apply, ids, &failures.join("; "))
    });

    let mut pruned = Vec::new();
    if !orphans.is_empty() {
        let reconciler = Reconciler::new(workspace.remote.as_ref());
        let mut prune_error = None;
        for id in &orphans {
            let Some(identity) = state.identity(id).cloned() else {
                continue;
            };
            match reconciler.destroy(&identity).await {
                Ok(_) => {
                    state.remove(id);
                    pruned.push(id.clone());
                }
                Err(e) => {
                    error!("Failed to prune {id}: {e}");
                    failures.push(format!("{id}: {e}"));
                    prune_error.get_or_insert_with(|| e.to_string());
                }
            }
        }
        state.add_history(match prune_error {
            None => HistoryEntry::new(StateOperation::Prune, pruned.clone()),
            Some(e) => HistoryEntry::failed(StateOperation::Prune, orphans.clone(), &e),
        });
    }

    workspace.state_store.save(&state).await?;
    emit(&formatter.format_apply(&results, &pruned))?;

    if failures.is_empty() {
        Ok(())
    } else {
        Err(StageError::Reconcile(ReconcileError::Aborted {
            reason: format!("{} stage(s) failed", failures.len()),
        }))
    }
}

/// Drops objects a previous apply replaced but did not get to drop.
///
/// Returns one failure line per object that is still retired.
async fn drop_retired(workspace: &Workspace, state: &mut ReconcileState) -> Vec<String> {
    let reconciler = Reconciler::new(workspace.remote.as_ref());
    let mut failures = Vec::new();
    for identity in std::mem::take(&mut state.retired) {
        match reconciler.destroy(&identity).await {
            Ok(existed) => info!("Dropped retired stage {identity} (existed: {existed})"),
            Err(e) => {
                error!("Failed to drop retired stage {identity}: {e}");
                failures.push(format!("{identity}: {e}"));
                state.retire(identity);
            }
        }
    }
    failures
}

/// Report drift between the manifest and the remote.
async fn cmd_drift(config_path: Option<&PathBuf>, formatter: &OutputFormatter) -> Result<()> {
    let workspace = load_workspace(config_path)?;
    let state = workspace.state_store.load().await?.unwrap_or_default();
    let options = ReconcileOptions::from(&workspace.manifest.reconcile);
    let reconciler = Reconciler::with_options(workspace.remote.as_ref(), options);

    let mut reports = Vec::with_capacity(workspace.manifest.stages.len());
    for desired in &workspace.manifest.stages {
        let previous = state.identity(&desired.logical_id());
        reports.push(reconciler.check_drift(desired, previous).await?);
    }

    emit(&formatter.format_drift(&reports))
}

/// Drop stages recorded in state.
async fn cmd_destroy(config_path: Option<&PathBuf>, yes: bool, only: Option<&str>) -> Result<()> {
    let workspace = load_workspace(config_path)?;
    let lock = workspace.state_store.acquire_lock("", "destroy").await?;

    let result = destroy_locked(&workspace, yes, only).await;

    if let Err(e) = workspace.state_store.release_lock(&lock.lock_id).await {
        error!("Failed to release state lock: {e}");
    }
    result
}

async fn destroy_locked(workspace: &Workspace, yes: bool, only: Option<&str>) -> Result<()> {
    let Some(mut state) = workspace.state_store.load().await? else {
        eprintln!("No state found. Nothing to destroy.");
        return Ok(());
    };

    let targets: Vec<String> = match only {
        Some(id) if state.stages.contains_key(id) => vec![id.to_string()],
        Some(id) => {
            return Err(StageError::internal(format!("No stage recorded under {id}")));
        }
        None => state.stages.keys().cloned().collect(),
    };
    if targets.is_empty() && state.retired.is_empty() {
        eprintln!("No stages recorded. Nothing to destroy.");
        return Ok(());
    }

    if !yes {
        eprintln!("The following stages will be dropped:");
        for id in &targets {
            if let Some(identity) = state.identity(id) {
                eprintln!("  - {id} ({identity})");
            }
        }
        if only.is_none() {
            for identity in &state.retired {
                eprintln!("  - retired {identity}");
            }
        }
        if !confirm("\nType 'destroy' to confirm: ", &["destroy"])? {
            eprintln!("Destroy cancelled.");
            return Ok(());
        }
    }

    let reconciler = Reconciler::new(workspace.remote.as_ref());
    let mut first_error = None;
    for id in &targets {
        let Some(identity) = state.identity(id).cloned() else {
            continue;
        };
        match reconciler.destroy(&identity).await {
            Ok(existed) => {
                debug!("Destroyed {id} (existed: {existed})");
                state.remove(id);
            }
            Err(e) => {
                error!("Failed to destroy {id}: {e}");
                first_error.get_or_insert(e);
            }
        }
    }

    if only.is_none() {
        let retired_failures = drop_retired(workspace, &mut state).await;
        if !retired_failures.is_empty() && first_error.is_none() {
            first_error = Some(StageError::Reconcile(ReconcileError::Aborted {
                reason: retired_failures.join("; "),
            }));
        }
    }

    state.add_history(match &first_error {
        None => HistoryEntry::new(StateOperation::Destroy, targets),
        Some(e) => HistoryEntry::failed(StateOperation::Destroy, targets, &e.to_string()),
    });
    workspace.state_store.save(&state).await?;

    match first_error {
        None => {
            eprintln!("Destroy complete.");
            Ok(())
        }
        Some(e) => Err(e),
    }
}

/// Inspect or unlock the state.
async fn cmd_state(
    config_path: Option<&PathBuf>,
    command: StateCommands,
    formatter: &OutputFormatter,
) -> Result<()> {
    let workspace = load_workspace(config_path)?;
    let store = &workspace.state_store;

    match command {
        StateCommands::Show => {
            let Some(state) = store.load().await? else {
                eprintln!("No state found.");
                return Ok(());
            };
            emit(&formatter.format_state(&state))?;
            if let Some(lock) = store.get_lock_info().await? {
                eprintln!(
                    "\nLocked by {} since {} ({}s remaining)",
                    lock.holder,
                    lock.acquired_at.format("%Y-%m-%d %H:%M:%S"),
                    lock.remaining_secs()
                );
            }
        }
        StateCommands::Lock { holder } => {
            let lock = store
                .acquire_lock(holder.as_deref().unwrap_or_default(), "manual")
                .await?;
            eprintln!("State locked.");
            eprintln!("  Lock ID: {}", lock.lock_id);
            eprintln!("  Holder: {}", lock.holder);
            eprintln!("  Expires: {}", lock.expires_at);
        }
        StateCommands::Unlock { lock_id, force } => {
            if force {
                match store.force_unlock().await? {
                    Some(lock) => eprintln!("Removed lock held by {}.", lock.holder),
                    None => eprintln!("State is not locked."),
                }
            } else if let Some(id) = lock_id {
                store.release_lock(&id).await?;
                eprintln!("State unlocked.");
            } else {
                warn!("Neither --lock-id nor --force given");
                eprintln!("Pass --lock-id <ID>, or --force to remove any lock.");
            }
        }
    }

    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

/// Plans every manifest entry without applying anything.
async fn plan_entries(
    workspace: &Workspace,
    state: &ReconcileState,
    options: ReconcileOptions,
) -> Vec<PlanEntry> {
    let reconciler = Reconciler::with_options(workspace.remote.as_ref(), options);
    let hasher = ConfigHasher::new();
    let mut entries = Vec::with_capacity(workspace.manifest.stages.len());
    for desired in &workspace.manifest.stages {
        let logical_id = desired.logical_id();
        let edited = state.stages.get(&logical_id).map(|record| {
            !ConfigHasher::hashes_match(&record.config_hash, &hasher.hash_stage(desired))
        });
        let entry = match reconciler.plan(desired, state.identity(&logical_id)).await {
            Ok(planned) => PlanEntry {
                logical_id,
                plan: Some(planned.plan),
                error: None,
                edited,
            },
            Err(e) => PlanEntry {
                logical_id,
                plan: None,
                error: Some(e.to_string()),
                edited,
            },
        };
        entries.push(entry);
    }
    entries
}

fn orphan_ids(manifest: &StageManifest, state: &ReconcileState) -> Vec<String> {
    let wanted: Vec<String> = manifest
        .stages
        .iter()
        .map(|s| s.logical_id())
        .collect();
    state
        .orphans(&wanted)
        .into_iter()
        .map(String::from)
        .collect()
}

/// Resolves the manifest path.
fn resolve_config_path(config_path: Option<&PathBuf>) -> Result<PathBuf> {
    match config_path {
        Some(path) => Ok(path.clone()),
        None => find_config_file(std::env::current_dir()?),
    }
}

/// Directory the manifest lives in; relative paths are resolved against it.
fn manifest_dir(config_file: &Path) -> PathBuf {
    config_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

/// Loads `.env`, parses the manifest and resolves secrets.
fn load_manifest(config_file: &Path) -> Result<StageManifest> {
    let parser = ConfigParser::new().with_base_path(manifest_dir(config_file));
    parser.load_dotenv()?;
    parser.load_with_env(config_file)
}

/// Loads and validates the manifest, then opens the state and remote stores.
fn load_workspace(config_path: Option<&PathBuf>) -> Result<Workspace> {
    let config_file = resolve_config_path(config_path)?;
    let base = manifest_dir(&config_file);

    let mut manifest = load_manifest(&config_file)?;
    let validation = ConfigValidator::new().validate_manifest(&manifest)?;
    for warning in &validation.warnings {
        warn!("{warning}");
    }

    let state_dir = manifest
        .state
        .path
        .as_ref()
        .map_or_else(|| base.join(STATE_DIR), |p| base.join(p));
    let state_store = LocalStateStore::with_base_dir(&state_dir);
    debug!(
        "Using {} state store at {}",
        state_store.backend_type(),
        state_dir.display()
    );

    // Relative catalog paths follow the manifest, not the working directory.
    if let Some(path) = manifest.remote.path.as_mut() {
        *path = base.join(&*path).display().to_string();
    } else {
        manifest.remote.path = Some(
            base.join(stage_reconciler::remote::DEFAULT_CATALOG_PATH)
                .display()
                .to_string(),
        );
    }
    let remote = create_remote_store(&manifest.remote);
    debug!("Using {} remote backend", remote.backend_type());

    Ok(Workspace {
        manifest,
        state_store,
        remote,
    })
}

/// Prompts on stderr and reads one answer from stdin.
fn confirm(prompt: &str, accepted: &[&str]) -> Result<bool> {
    eprint!("{prompt}");
    std::io::stderr().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    let answer = input.trim().to_lowercase();
    Ok(accepted.contains(&answer.as_str()))
}

/// Writes command output to stdout.
fn emit(output: &str) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(output.as_bytes())?;
    if !output.ends_with('\n') {
        stdout.write_all(b"\n")?;
    }
    stdout.flush()?;
    Ok(())
}
