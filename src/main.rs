//! protectsync CLI entrypoint.
//!
//! This is the main entrypoint for the protectsync command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use protectsync::cli::{Cli, Commands, LogFormat, OutputFormatter, StateCommands};
use protectsync::config::{find_config_file, ConfigParser, ConfigValidator, SyncConfig};
use protectsync::error::{ConfigError, ReconcileError, Result};
use protectsync::reconciler::{ReconcileSummary, Reconciler};
use protectsync::remote::RemoteClient;
use protectsync::state::{
    generate_holder_id, run_lock_ttl, LocalStateStore, MemoryStateStore, StateStore, LOCK_EXPIRY_SECS,
    STATE_DIR,
};

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
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
            if let Some(delay) = e.retry_delay_secs() {
                eprintln!("The failure looks transient; retry the same command in {delay}s.");
            } else if e.is_retryable() {
                eprintln!("The failure looks transient; running the same command again is safe.");
            }
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system.
fn init_logging(verbose: bool, format: LogFormat) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

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
    let ctx = Context {
        config_path: cli.config,
        formatter: OutputFormatter::new(cli.output),
        no_state: cli.no_state,
    };

    match cli.command {
        Commands::Validate { warnings } => cmd_validate(&ctx, warnings),
        Commands::Plan { grouping } => cmd_plan(&ctx, grouping.as_deref()).await,
        Commands::Apply {
            grouping,
            continue_on_error,
            timeout,
        } => cmd_apply(&ctx, grouping.as_deref(), continue_on_error, timeout).await,
        Commands::Drift => cmd_drift(&ctx).await,
        Commands::Destroy { yes, grouping } => cmd_destroy(&ctx, yes, grouping.as_deref()).await,
        Commands::Status => cmd_status(&ctx).await,
        Commands::State { command } => cmd_state(&ctx, command).await,
    }
}

/// Global options shared by every command.
struct Context {
    config_path: Option<PathBuf>,
    formatter: OutputFormatter,
    no_state: bool,
}

/// Validate configuration.
fn cmd_validate(ctx: &Context, show_warnings: bool) -> Result<()> {
    let (config_file, config) = load_config(ctx)?;
    info!("Validating configuration: {}", config_file.display());

    let result = ConfigValidator::new().check(&config);
    emit(&ctx.formatter.format_validation(&config, &result, show_warnings))?;

    match result.errors.into_iter().next() {
        Some(first_error) => Err(first_error.into_config_error().into()),
        None => Ok(()),
    }
}

/// Show the plan for each grouping.
async fn cmd_plan(ctx: &Context, grouping: Option<&str>) -> Result<()> {
    let config = select(load_valid_config(ctx)?, grouping)?;
    let client = create_remote_client(&config)?;
    let state_store = create_state_store(ctx, &config)?;
    let reconciler = Reconciler::new(&client, &state_store);

    let mut plans = Vec::with_capacity(config.groupings.len());
    for grouping in &config.groupings {
        plans.push(reconciler.plan(grouping).await?);
    }

    emit(&ctx.formatter.format_plans(&plans))
}

/// Reconcile groupings to their declared membership.
async fn cmd_apply(
    ctx: &Context,
    grouping: Option<&str>,
    continue_on_error: bool,
    timeout: Option<u64>,
) -> Result<()> {
    let config = select(load_valid_config(ctx)?, grouping)?;
    let timeout = timeout.map_or_else(|| config.reconcile.convergence_timeout(), Duration::from_secs);
    let continue_on_error = continue_on_error || config.reconcile.continue_on_error;

    let summary = reconcile_locked(ctx, &config, timeout, continue_on_error).await?;
    finish(ctx, summary)
}

/// Remove every member from the selected groupings.
async fn cmd_destroy(ctx: &Context, confirmed: bool, grouping: Option<&str>) -> Result<()> {
    let mut config = select(load_valid_config(ctx)?, grouping)?;

    if !confirmed {
        return Err(ReconcileError::Aborted {
            reason: format!(
                "destroy removes every member of {}; pass --yes to confirm",
                config.grouping_names().join(", ")
            ),
        }
        .into());
    }

    for grouping in &mut config.groupings {
        grouping.members.clear();
    }

    let timeout = config.reconcile.convergence_timeout();
    let continue_on_error = config.reconcile.continue_on_error;
    let summary = reconcile_locked(ctx, &config, timeout, continue_on_error).await?;
    finish(ctx, summary)
}

/// Check for drift.
async fn cmd_drift(ctx: &Context) -> Result<()> {
    let config = load_valid_config(ctx)?;
    let client = create_remote_client(&config)?;
    let state_store = create_state_store(ctx, &config)?;

    let report = Reconciler::new(&client, &state_store)
        .check_drift(&config.groupings)
        .await?;

    emit(&ctx.formatter.format_drift(&report))
}

/// Show the locally recorded membership.
async fn cmd_status(ctx: &Context) -> Result<()> {
    let config = load_valid_config(ctx)?;
    let state_store = create_state_store(ctx, &config)?;

    let state = state_store.load_or_default().await?;
    emit(&ctx.formatter.format_status(&state))?;

    if let Some(lock) = state_store.get_lock_info().await?
        && !lock.is_expired()
    {
        emit(&ctx.formatter.warning(&format!("State is locked: {lock}")))?;
    }

    Ok(())
}

/// State management commands.
async fn cmd_state(ctx: &Context, command: StateCommands) -> Result<()> {
    let config = load_valid_config(ctx)?;
    let state_store = create_state_store(ctx, &config)?;

    match command {
        StateCommands::Show => {
            if let Some(state) = state_store.load().await? {
                emit(&ctx.formatter.format_state(&state))?;
            } else {
                emit(&ctx.formatter.warning("No state found."))?;
            }
        }
        StateCommands::Lock { holder } => {
            let holder = holder.unwrap_or_else(generate_holder_id);
            let lock = state_store.acquire_lock(&holder, LOCK_EXPIRY_SECS).await?;
            emit(&ctx.formatter.format_lock(&lock))?;
        }
        StateCommands::Unlock { lock_id, force } => {
            if force {
                if let Some(lock_info) = state_store.get_lock_info().await? {
                    state_store.release_lock(&lock_info.lock_id).await?;
                    emit(&ctx.formatter.success("State forcefully unlocked."))?;
                } else {
                    emit(&ctx.formatter.warning("State is not locked."))?;
                }
            } else if let Some(id) = lock_id {
                state_store.release_lock(&id).await?;
                emit(&ctx.formatter.success("State unlocked."))?;
            } else {
                return Err(ConfigError::validation("Please provide --lock-id or use --force", "lock_id").into());
            }
        }
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Reconciles every grouping of `config` while holding the state lock.
///
/// The run is cancelled on Ctrl-C or once `timeout` elapses.
async fn reconcile_locked(
    ctx: &Context,
    config: &SyncConfig,
    timeout: Duration,
    continue_on_error: bool,
) -> Result<ReconcileSummary> {
    let client = create_remote_client(config)?;
    let state_store = create_state_store(ctx, config)?;

    let lock = state_store
        .acquire_lock(&generate_holder_id(), run_lock_ttl(timeout))
        .await?;
    debug!("Holding state lock {}", lock.lock_id);

    let cancel = CancellationToken::new();
    let watcher = spawn_cancel_watcher(cancel.clone(), timeout);

    let summary = Reconciler::new(&client, &state_store)
        .with_poll_interval(config.reconcile.poll_interval())
        .with_continue_on_error(continue_on_error)
        .reconcile_all(config, &cancel)
        .await;

    watcher.abort();

    if let Err(e) = state_store.release_lock(&lock.lock_id).await {
        warn!("Failed to release state lock {}: {}", lock.lock_id, e);
    }

    Ok(summary)
}

/// Cancels `cancel` on Ctrl-C or after `timeout`.
fn spawn_cancel_watcher(cancel: CancellationToken, timeout: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!("Failed to listen for Ctrl-C: {}", e);
                    tokio::time::sleep(timeout).await;
                    warn!("Convergence timeout of {}s elapsed, cancelling", timeout.as_secs());
                } else {
                    warn!("Interrupted, cancelling reconciliation");
                }
            }
            () = tokio::time::sleep(timeout) => {
                warn!("Convergence timeout of {}s elapsed, cancelling", timeout.as_secs());
            }
        }
        cancel.cancel();
    })
}

/// Prints the summary and turns an incomplete run into an error.
fn finish(ctx: &Context, summary: ReconcileSummary) -> Result<()> {
    emit(&ctx.formatter.format_summary(&summary))?;

    if summary.is_success() {
        return Ok(());
    }

    let skipped = summary.skipped.len();
    match summary.into_first_error() {
        Some(err) => Err(err),
        None => Err(ReconcileError::Aborted {
            reason: format!("{skipped} grouping(s) were not reconciled"),
        }
        .into()),
    }
}

/// Writes command output to stdout.
fn emit(output: &str) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(output.as_bytes())?;
    stdout.flush()?;
    Ok(())
}

/// Resolves the configuration file path.
fn resolve_config_path(config_path: Option<&PathBuf>) -> Result<PathBuf> {
    config_path.map_or_else(|| find_config_file("."), |path| Ok(path.clone()))
}

/// Loads `.env` and the configuration file, with environment overrides.
fn load_config(ctx: &Context) -> Result<(PathBuf, SyncConfig)> {
    let config_file = resolve_config_path(ctx.config_path.as_ref())?;
    debug!("Loading configuration from: {}", config_file.display());

    let parser = ConfigParser::new().with_base_path(config_dir(&config_file));
    parser.load_dotenv()?;

    let config = parser.load_with_env(&config_file)?;
    Ok((config_file, config))
}

/// Loads the configuration and rejects it if it is invalid.
fn load_valid_config(ctx: &Context) -> Result<SyncConfig> {
    let (_, config) = load_config(ctx)?;

    let result = ConfigValidator::new().validate(&config)?;
    for warning in &result.warnings {
        warn!("{warning}");
    }

    Ok(config)
}

/// Narrows the configuration to one grouping if requested.
fn select(config: SyncConfig, grouping: Option<&str>) -> Result<SyncConfig> {
    config.select(grouping).ok_or_else(|| {
        ConfigError::validation(
            format!("Unknown grouping: {}", grouping.unwrap_or_default()),
            "grouping",
        )
        .into()
    })
}

/// Directory containing the configuration file.
fn config_dir(config_file: &Path) -> PathBuf {
    config_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

/// Creates the state store selected by the configuration and flags.
fn create_state_store(ctx: &Context, config: &SyncConfig) -> Result<Box<dyn StateStore>> {
    if ctx.no_state {
        debug!("Using in-memory state");
        return Ok(Box::new(MemoryStateStore::new()));
    }

    if let Some(path) = &config.state.path {
        return Ok(Box::new(LocalStateStore::with_state_path(path)));
    }

    let config_file = resolve_config_path(ctx.config_path.as_ref())?;
    Ok(Box::new(LocalStateStore::with_base_dir(
        config_dir(&config_file).join(STATE_DIR),
    )))
}

/// Creates the management API client.
fn create_remote_client(config: &SyncConfig) -> Result<RemoteClient> {
    let token = ConfigParser::get_api_token()?;
    let client = RemoteClient::with_timeout(&config.service.endpoint, &token, config.service.timeout_secs)?;
    debug!("Using management API at {}", client.endpoint());
    Ok(client)
}
