mod manifest;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use colored::Colorize;
use tokio_util::sync::CancellationToken;

use converge_core::differ::FieldDiff;
use converge_core::drift::Drift;
use converge_core::plan::{Action, Plan, PlannedChange};
use converge_core::ReconcilerConfig;
use converge_core::provider::RemoteClient;
use converge_core::registry::{ManagedResource, Registry, StoredState};
use converge_core::resource::{ResourceId, ResourceIdentity, Value};
use converge_provider_awscc::{AwsccProvider, registry};
use converge_state::{StateBackend, StateFile, create_backend};

use crate::manifest::Manifest;

#[derive(Parser)]
#[command(name = "converge")]
#[command(about = "Reconcile cloud resources toward a declared state", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the manifest
    Validate {
        #[arg(default_value = "converge.json")]
        file: PathBuf,
    },
    /// Show the changes apply would make, without remote calls
    Plan {
        #[arg(default_value = "converge.json")]
        file: PathBuf,
    },
    /// Reconcile every resource toward the manifest
    Apply {
        #[arg(default_value = "converge.json")]
        file: PathBuf,
    },
    /// Describe every resource in state and record drift
    Refresh {
        #[arg(default_value = "converge.json")]
        file: PathBuf,
    },
    /// Delete every resource in state
    Destroy {
        #[arg(default_value = "converge.json")]
        file: PathBuf,

        /// Skip confirmation prompt (auto-approve)
        #[arg(long)]
        auto_approve: bool,
    },
    /// Read the manifest's data sources and print their results
    Read {
        #[arg(default_value = "converge.json")]
        file: PathBuf,
    },
    /// Adopt an existing remote object into state
    Import {
        /// Manifest address of the resource (<type>.<name>)
        resource: ResourceId,

        /// Remote identity of the existing object
        identity: String,

        #[arg(long, default_value = "converge.json")]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Validate { file } => run_validate(&file),
        Commands::Plan { file } => run_plan(&file).await,
        Commands::Apply { file } => run_apply(&file).await,
        Commands::Refresh { file } => run_refresh(&file).await,
        Commands::Destroy { file, auto_approve } => run_destroy(&file, auto_approve).await,
        Commands::Read { file } => run_read(&file).await,
        Commands::Import {
            resource,
            identity,
            file,
        } => run_import(&file, &resource, ResourceIdentity::new(identity)).await,
    };

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn load_validated(file: &Path, registry: &Registry) -> Result<Manifest, String> {
    let manifest = Manifest::load(file)?;
    manifest.validate(registry)?;
    Ok(manifest)
}

fn run_validate(file: &Path) -> Result<(), String> {
    println!("{}", "Validating...".cyan());
    let manifest = load_validated(file, &registry())?;

    println!(
        "{}",
        format!(
            "✓ {} resources, {} data sources validated successfully.",
            manifest.resources.len(),
            manifest.data.len()
        )
        .green()
        .bold()
    );
    for resource in &manifest.resources {
        println!("  • {}", resource.id());
    }
    for data in &manifest.data {
        println!("  • data.{}.{}", data.source_type, data.name);
    }
    Ok(())
}

/// Ids in state that the manifest no longer declares, in reverse creation order
fn orphans(manifest: &Manifest, state: &StateFile) -> Vec<ResourceId> {
    let mut ids: Vec<ResourceId> = state
        .ids()
        .filter(|id| manifest.resource(id).is_none())
        .collect();
    ids.reverse();
    ids
}

fn build_plan(manifest: &Manifest, state: &StateFile, registry: &Registry) -> Result<Plan, String> {
    let mut plan = Plan::new();

    for entry in &manifest.resources {
        let id = entry.id();
        let kind = registry
            .resource(&entry.resource_type)
            .ok_or_else(|| format!("{}: unknown resource type", id))?;
        let current = state.stored(&id);
        let change = kind
            .plan(id.clone(), current.as_ref(), Some(&entry.attributes))
            .map_err(|e| format!("{}: {}", id, e))?;
        plan.add(change);
    }

    for id in orphans(manifest, state) {
        let kind = registry
            .resource(&id.resource_type)
            .ok_or_else(|| format!("{}: unknown resource type in state", id))?;
        let current = state.stored(&id);
        let change = kind
            .plan(id.clone(), current.as_ref(), None)
            .map_err(|e| format!("{}: {}", id, e))?;
        plan.add(change);
    }

    Ok(plan)
}

async fn run_plan(file: &Path) -> Result<(), String> {
    let registry = registry();
    let manifest = load_validated(file, &registry)?;
    let backend = create_backend(&manifest.backend).map_err(|e| e.to_string())?;
    let state = backend
        .read_state()
        .await
        .map_err(|e| e.to_string())?
        .unwrap_or_default();

    let plan = build_plan(&manifest, &state, &registry)?;
    print_plan(&plan);
    Ok(())
}

fn action_symbol(action: Action) -> colored::ColoredString {
    match action {
        Action::NoOp => action.symbol().normal(),
        Action::Created => action.symbol().green().bold(),
        Action::Updated => action.symbol().yellow().bold(),
        Action::Replaced => action.symbol().magenta().bold(),
        Action::Deleted => action.symbol().red().bold(),
    }
}

fn format_value(value: &Option<Value>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => "(none)".to_string(),
    }
}

fn print_change(change: &PlannedChange) {
    println!(
        "  {} {}",
        action_symbol(change.action),
        change.id.to_string().cyan().bold()
    );
    for (name, field) in change.diff.changes() {
        match field {
            FieldDiff::Changed { old, new } => println!(
                "      {}: {} → {}",
                name.bold(),
                format_value(old).red(),
                format_value(new).green()
            ),
            FieldDiff::ForceReplace { old, new } => println!(
                "      {}: {} → {} {}",
                name.bold(),
                format_value(old).red(),
                format_value(new).green(),
                "(forces replacement)".magenta()
            ),
            FieldDiff::Unchanged => {}
        }
    }
}

fn print_plan(plan: &Plan) {
    if plan.is_empty() {
        println!("{}", "No changes. Resources are up-to-date.".green());
        return;
    }

    println!("{}", "Execution Plan:".cyan().bold());
    println!();
    for change in plan.changes().iter().filter(|c| c.action.is_change()) {
        print_change(change);
    }
    println!();
    println!("{}", plan.summary().to_string().bold());
}

/// Cancel the returned token on Ctrl-C
fn cancel_on_interrupt() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", "Interrupted, stopping after the current step...".yellow());
            token.cancel();
        }
    });
    cancel
}

/// Reconcile `id` toward `desired` and record the outcome in `state`
async fn reconcile_one(
    provider: &AwsccProvider,
    manifest: &Manifest,
    registry: &Registry,
    state: &mut StateFile,
    id: &ResourceId,
    desired: Option<&serde_json::Value>,
    cancel: &CancellationToken,
) -> Result<Action, String> {
    let kind = registry
        .resource(&id.resource_type)
        .ok_or_else(|| format!("unknown resource type {}", id.resource_type))?;
    let client = provider
        .client_for(&id.resource_type)
        .ok_or_else(|| format!("no remote type for {}", id.resource_type))?;

    reconcile_with(
        kind,
        &client,
        &manifest.provider.reconciler,
        state,
        id,
        desired,
        cancel,
    )
    .await
}

async fn reconcile_with(
    kind: &dyn ManagedResource,
    client: &dyn RemoteClient,
    config: &ReconcilerConfig,
    state: &mut StateFile,
    id: &ResourceId,
    desired: Option<&serde_json::Value>,
    cancel: &CancellationToken,
) -> Result<Action, String> {
    let current: Option<StoredState> = state.stored(id);
    match kind
        .reconcile(client, config, current, desired.cloned(), cancel.child_token())
        .await
    {
        Ok(reconciled) => {
            if let Some(drift) = &reconciled.drift
                && !matches!(drift, Drift::Unchanged)
            {
                log::warn!("{} drifted from recorded state", id);
            }
            state.record(id, reconciled.state);
            Ok(reconciled.action)
        }
        Err(e) => {
            if let Some(identity) = e.identity.clone() {
                log::warn!(
                    "{} exists remotely as {} but did not settle: {}",
                    id,
                    identity,
                    e.error
                );
                // Record the object so the next apply refreshes it instead of creating another
                let adopted = match kind.import(client, identity.clone()).await {
                    Ok(adopted) => adopted,
                    Err(describe_error) => {
                        log::debug!("could not describe {} {}: {}", id, identity, describe_error);
                        StoredState::new(identity, serde_json::json!({}))
                    }
                };
                state.record(id, Some(adopted));
            } else if e.mutated {
                log::warn!("{} may have been partially changed: {}", id, e.error);
            }
            Err(e.to_string())
        }
    }
}

async fn save_state(backend: &dyn StateBackend, state: &mut StateFile) -> Result<(), String> {
    state.increment_serial();
    backend.write_state(state).await.map_err(|e| e.to_string())
}

async fn run_apply(file: &Path) -> Result<(), String> {
    let registry = registry();
    let manifest = load_validated(file, &registry)?;
    let backend = create_backend(&manifest.backend).map_err(|e| e.to_string())?;
    let lock = backend
        .acquire_lock("apply")
        .await
        .map_err(|e| e.to_string())?;

    let result = apply_locked(&manifest, &registry, backend.as_ref()).await;

    backend
        .release_lock(&lock)
        .await
        .map_err(|e| e.to_string())?;
    result
}

async fn apply_locked(
    manifest: &Manifest,
    registry: &Registry,
    backend: &dyn StateBackend,
) -> Result<(), String> {
    let mut state = backend
        .read_state()
        .await
        .map_err(|e| e.to_string())?
        .unwrap_or_default();

    let plan = build_plan(manifest, &state, registry)?;
    if plan.is_empty() && !manifest.provider.reconciler.refresh {
        println!("{}", "No changes needed.".green());
        return Ok(());
    }
    print_plan(&plan);
    println!();

    let provider = AwsccProvider::new(&manifest.provider.region).await;
    println!(
        "{}",
        format!("Applying changes (region: {})...", provider.region())
            .cyan()
            .bold()
    );
    println!();

    let cancel = cancel_on_interrupt();
    let mut applied = Plan::new();
    let mut failure_count = 0;

    let targets = manifest
        .resources
        .iter()
        .map(|r| (r.id(), Some(&r.attributes)))
        .chain(orphans(manifest, &state).into_iter().map(|id| (id, None)));

    for (id, desired) in targets {
        if cancel.is_cancelled() {
            break;
        }
        match reconcile_one(&provider, manifest, registry, &mut state, &id, desired, &cancel).await {
            Ok(action) => {
                if action.is_change() {
                    println!("  {} {} {}", "✓".green(), action, id);
                }
                applied.add(PlannedChange::new(id, action, Default::default()));
            }
            Err(e) => {
                println!("  {} {} - {}", "✗".red(), id, e);
                failure_count += 1;
            }
        }
    }

    save_state(backend, &mut state).await?;

    println!();
    let summary = applied.summary();
    if failure_count == 0 && !cancel.is_cancelled() {
        println!(
            "{}",
            format!(
                "Apply complete! {} created, {} updated, {} replaced, {} deleted.",
                summary.create, summary.update, summary.replace, summary.delete
            )
            .green()
            .bold()
        );
        Ok(())
    } else {
        Err(format!(
            "Apply incomplete. {} succeeded, {} failed.",
            applied.changes().len(),
            failure_count
        ))
    }
}

async fn run_refresh(file: &Path) -> Result<(), String> {
    let registry = registry();
    let manifest = load_validated(file, &registry)?;
    let backend = create_backend(&manifest.backend).map_err(|e| e.to_string())?;
    let lock = backend
        .acquire_lock("refresh")
        .await
        .map_err(|e| e.to_string())?;

    let result = refresh_locked(&manifest, &registry, backend.as_ref()).await;

    backend
        .release_lock(&lock)
        .await
        .map_err(|e| e.to_string())?;
    result
}

async fn refresh_locked(
    manifest: &Manifest,
    registry: &Registry,
    backend: &dyn StateBackend,
) -> Result<(), String> {
    let Some(mut state) = backend.read_state().await.map_err(|e| e.to_string())? else {
        println!("{}", "No state to refresh.".yellow());
        return Ok(());
    };

    let provider = AwsccProvider::new(&manifest.provider.region).await;
    let ids: Vec<ResourceId> = state.ids().collect();
    let mut drifted = 0;

    for id in ids {
        let (Some(kind), Some(client), Some(current)) = (
            registry.resource(&id.resource_type),
            provider.client_for(&id.resource_type),
            state.stored(&id),
        ) else {
            log::warn!("skipping {}: unknown resource type", id);
            continue;
        };

        let refreshed = kind
            .refresh(&client, &current)
            .await
            .map_err(|e| format!("{}: {}", id, e))?;
        match refreshed.drift {
            Drift::Unchanged => println!("  {} {}", "✓".green(), id),
            Drift::Changed(diff) => {
                drifted += 1;
                println!("  {} {} drifted", "~".yellow().bold(), id);
                for name in diff.changed_fields() {
                    println!("      {}", name);
                }
            }
            Drift::Gone => {
                drifted += 1;
                println!("  {} {} no longer exists", "-".red().bold(), id);
            }
        }
        state.record(
            &id,
            refreshed
                .observed
                .map(|observed| StoredState::new(current.identity.clone(), observed)),
        );
    }

    save_state(backend, &mut state).await?;
    println!();
    println!("{}", format!("Refresh complete. {} drifted.", drifted).bold());
    Ok(())
}

async fn run_import(
    file: &Path,
    id: &ResourceId,
    identity: ResourceIdentity,
) -> Result<(), String> {
    let registry = registry();
    let manifest = load_validated(file, &registry)?;
    let entry = manifest
        .resource(id)
        .ok_or_else(|| format!("{} is not declared in {}", id, file.display()))?;
    let backend = create_backend(&manifest.backend).map_err(|e| e.to_string())?;
    let lock = backend
        .acquire_lock("import")
        .await
        .map_err(|e| e.to_string())?;

    let result = import_locked(
        &manifest,
        &registry,
        backend.as_ref(),
        id,
        identity,
        &entry.attributes,
    )
    .await;

    backend
        .release_lock(&lock)
        .await
        .map_err(|e| e.to_string())?;
    result
}

async fn import_locked(
    manifest: &Manifest,
    registry: &Registry,
    backend: &dyn StateBackend,
    id: &ResourceId,
    identity: ResourceIdentity,
    desired: &serde_json::Value,
) -> Result<(), String> {
    let mut state = backend
        .read_state()
        .await
        .map_err(|e| e.to_string())?
        .unwrap_or_default();
    if let Some(existing) = state.stored(id) {
        return Err(format!("{} is already managed as {}", id, existing.identity));
    }

    let kind = registry
        .resource(&id.resource_type)
        .ok_or_else(|| format!("unknown resource type {}", id.resource_type))?;
    let provider = AwsccProvider::new(&manifest.provider.region).await;
    let client = provider
        .client_for(&id.resource_type)
        .ok_or_else(|| format!("no remote type for {}", id.resource_type))?;

    let imported = kind
        .import(&client, identity)
        .await
        .map_err(|e| format!("{}: {}", id, e))?;
    let change = kind
        .plan(id.clone(), Some(&imported), Some(desired))
        .map_err(|e| format!("{}: {}", id, e))?;
    println!(
        "{}",
        format!("✓ Imported {} as {}", id, imported.identity)
            .green()
            .bold()
    );
    state.record(id, Some(imported));
    save_state(backend, &mut state).await?;

    if change.action.is_change() {
        println!();
        println!("{}", "The manifest differs from the imported object:".yellow());
        print_change(&change);
    }
    Ok(())
}

async fn run_destroy(file: &Path, auto_approve: bool) -> Result<(), String> {
    let registry = registry();
    let manifest = load_validated(file, &registry)?;
    let backend = create_backend(&manifest.backend).map_err(|e| e.to_string())?;
    let lock = backend
        .acquire_lock("destroy")
        .await
        .map_err(|e| e.to_string())?;

    let result = destroy_locked(&manifest, &registry, backend.as_ref(), auto_approve).await;

    backend
        .release_lock(&lock)
        .await
        .map_err(|e| e.to_string())?;
    result
}

async fn destroy_locked(
    manifest: &Manifest,
    registry: &Registry,
    backend: &dyn StateBackend,
    auto_approve: bool,
) -> Result<(), String> {
    let mut state = backend
        .read_state()
        .await
        .map_err(|e| e.to_string())?
        .unwrap_or_default();

    let mut targets: Vec<ResourceId> = state.ids().collect();
    if targets.is_empty() {
        println!("{}", "No resources to destroy.".green());
        return Ok(());
    }
    targets.reverse();

    println!("{}", "Destroy Plan:".red().bold());
    println!();
    for id in &targets {
        println!("  {} {}", "-".red().bold(), id.to_string().cyan().bold());
    }
    println!();

    if !auto_approve {
        println!(
            "{}",
            "Do you really want to destroy all resources?"
                .yellow()
                .bold()
        );
        println!(
            "  {}",
            "This action cannot be undone. Type 'yes' to confirm.".yellow()
        );
        print!("\n  Enter a value: ");
        std::io::Write::flush(&mut std::io::stdout()).map_err(|e| e.to_string())?;

        let mut input = String::new();
        std::io::stdin()
            .read_line(&mut input)
            .map_err(|e| e.to_string())?;

        if input.trim() != "yes" {
            println!();
            println!("{}", "Destroy cancelled.".yellow());
            return Ok(());
        }
        println!();
    }

    println!("{}", "Destroying resources...".red().bold());
    println!();

    let provider = AwsccProvider::new(&manifest.provider.region).await;
    let cancel = cancel_on_interrupt();
    let mut success_count = 0;
    let mut failure_count = 0;

    for id in targets {
        if cancel.is_cancelled() {
            break;
        }
        match reconcile_one(&provider, manifest, registry, &mut state, &id, None, &cancel).await {
            Ok(_) => {
                println!("  {} delete {}", "✓".green(), id);
                success_count += 1;
            }
            Err(e) => {
                println!("  {} delete {} - {}", "✗".red(), id, e);
                failure_count += 1;
            }
        }
    }

    save_state(backend, &mut state).await?;

    println!();
    if failure_count == 0 && !cancel.is_cancelled() {
        println!(
            "{}",
            format!("Destroy complete! {} resources destroyed.", success_count)
                .green()
                .bold()
        );
        Ok(())
    } else {
        Err(format!(
            "Destroy failed. {} succeeded, {} failed.",
            success_count, failure_count
        ))
    }
}

async fn run_read(file: &Path) -> Result<(), String> {
    let registry = registry();
    let manifest = load_validated(file, &registry)?;
    if manifest.data.is_empty() {
        println!("{}", "No data sources defined in configuration.".yellow());
        return Ok(());
    }

    let provider = AwsccProvider::new(&manifest.provider.region).await;
    for entry in &manifest.data {
        let label = format!("data.{}.{}", entry.source_type, entry.name);
        let source = registry
            .data_source(&entry.source_type)
            .ok_or_else(|| format!("{}: unknown data source type", label))?;
        let client = provider
            .client_for(&entry.source_type)
            .ok_or_else(|| format!("{}: no remote type", label))?;

        let output = source
            .read(&client, &entry.args)
            .await
            .map_err(|e| format!("{}: {}", label, e))?;
        let rendered = serde_json::to_string_pretty(&output).map_err(|e| e.to_string())?;
        println!("{}", label.cyan().bold());
        println!("{}", rendered);
        println!();
    }
    Ok(())
}
