use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueEnum};
use cloud_nuke::config::{parse_duration, resolve_project, NukeConfig};
use cloud_nuke::gcp::auth::{validate_project_id, GcpCredentials};
use cloud_nuke::gcp::client::{Endpoints, GcpClient};
use cloud_nuke::gcp::http::format_gcp_error;
use cloud_nuke::gcp::{projects, resources};
use cloud_nuke::nuke::{self, build_scopes};
use cloud_nuke::resource::Registry;
use cloud_nuke::VERSION;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Discover and destroy GCP resources matching filters
#[derive(Parser, Debug)]
#[command(name = "cloud-nuke", version = VERSION, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log level
    #[arg(long, value_enum, default_value = "info", global = true)]
    log_level: LogLevel,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Delete every resource that passes the filters
    Nuke {
        #[command(flatten)]
        target: TargetArgs,

        /// Skip the confirmation prompt
        #[arg(long)]
        force: bool,

        /// List what would be deleted without deleting anything
        #[arg(long)]
        dry_run: bool,
    },
    /// List what `nuke` would delete
    Inspect {
        #[command(flatten)]
        target: TargetArgs,
    },
    /// Print the supported resource types in processing order
    ListResourceTypes,
}

#[derive(Args, Debug)]
struct TargetArgs {
    /// GCP project to use
    #[arg(short, long)]
    project: Option<String>,

    /// Region to target (repeatable); defaults to every region
    #[arg(long = "region")]
    regions: Vec<String>,

    /// Region to skip (repeatable)
    #[arg(long = "exclude-region")]
    exclude_regions: Vec<String>,

    /// Resource type to target (repeatable); defaults to every type
    #[arg(long = "resource-type")]
    resource_types: Vec<String>,

    /// Resource type to skip (repeatable)
    #[arg(long = "exclude-resource-type")]
    exclude_resource_types: Vec<String>,

    /// Only target resources older than this (e.g. 24h, 7d)
    #[arg(long)]
    older_than: Option<String>,

    /// Only target resources newer than this (e.g. 30m, 2h)
    #[arg(long)]
    newer_than: Option<String>,

    /// YAML filter configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Fail a deletion when a dependent-resource lookup fails instead of
    /// continuing as if nothing was found
    #[arg(long)]
    strict_listing: bool,

    /// Also list resources that were filtered out
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn as_directive(self) -> &'static str {
        match self {
            LogLevel::Off => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

fn setup_logging(
    level: LogLevel,
    log_file: Option<&PathBuf>,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    if matches!(level, LogLevel::Off) {
        return Ok(None);
    }

    // RUST_LOG wins over --log-level when set
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_directive()));

    let Some(path) = log_file else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
        return Ok(None);
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
    }

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file {}", path.display()))?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("cloud-nuke {} started, logging to {}", VERSION, path.display());
    Ok(Some(guard))
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let _log_guard = match setup_logging(cli.log_level, cli.log_file.as_ref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return ExitCode::from(2);
        }
    };

    let result = match cli.command {
        Command::ListResourceTypes => list_resource_types(),
        Command::Inspect { target } => run(target, Mode::Inspect).await,
        Command::Nuke {
            target,
            force,
            dry_run,
        } => {
            let mode = if dry_run {
                Mode::Inspect
            } else {
                Mode::Nuke { force }
            };
            run(target, mode).await
        }
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {}", format_gcp_error(&e));
            ExitCode::from(2)
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Mode {
    Inspect,
    Nuke { force: bool },
}

/// Registry without credentials, for listing type names
fn offline_registry() -> Result<Registry> {
    let client = GcpClient::with_credentials(
        GcpCredentials::from_static_token(""),
        "",
        Endpoints::default(),
    )?;
    Ok(resources::registry(&client)?)
}

fn list_resource_types() -> Result<bool> {
    for (type_name, is_global) in offline_registry()?.describe() {
        let scope = if is_global { "global" } else { "regional" };
        println!("{:<24} {}", type_name, scope);
    }
    Ok(true)
}

/// Returns `Ok(false)` when the run finished with failures
async fn run(target: TargetArgs, mode: Mode) -> Result<bool> {
    let project = resolve_project(target.project.as_deref()).context(
        "No GCP project configured. Set GOOGLE_CLOUD_PROJECT or use --project flag",
    )?;
    if !validate_project_id(&project) {
        tracing::warn!("Project ID {} does not look like a valid project ID", project);
    }

    let run_id = Uuid::new_v4();
    let span = tracing::info_span!("run", run_id = %run_id, project = %project);
    execute_run(target, mode, project).instrument(span).await
}

async fn execute_run(target: TargetArgs, mode: Mode, project: String) -> Result<bool> {
    let cancel = CancellationToken::new();
    watch_interrupts(cancel.clone());

    let client = GcpClient::new(&project)
        .await?
        .strict_lookups(target.strict_listing)
        .cancel_on(cancel.clone());
    projects::ensure_active(&client).await?;

    let full_registry = resources::registry(&client)?;
    let registry = full_registry.select(&target.resource_types, &target.exclude_resource_types)?;

    let mut config = match &target.config {
        Some(path) => NukeConfig::load(path)?,
        None => NukeConfig::default(),
    };
    config.validate_types(&full_registry.type_names())?;

    let now = Utc::now();
    if let Some(age) = &target.older_than {
        config = config.with_older_than(parse_duration(age)?, now)?;
    }
    if let Some(age) = &target.newer_than {
        config = config.with_newer_than(parse_duration(age)?, now)?;
    }

    let regions = target_regions(&client, &registry, &target).await?;
    let scopes = build_scopes(&regions);
    tracing::info!(
        types = registry.len(),
        regions = regions.len(),
        "Starting run"
    );

    let plan = nuke::inspect(&registry, &scopes, &config, &cancel).await;
    let planned = plan.planned_report();
    print!("{}", planned.render(target.verbose));

    if cancel.is_cancelled() {
        println!("Interrupted, nothing was deleted.");
        return Ok(false);
    }

    let force = match mode {
        Mode::Inspect => return Ok(!planned.has_failures()),
        Mode::Nuke { force } => force,
    };

    if plan.is_empty() {
        println!("Nothing to nuke.");
        return Ok(!planned.has_failures());
    }

    if !force {
        let confirmed = tokio::select! {
            answer = confirm(plan.target_count(), &project) => answer?,
            _ = cancel.cancelled() => false,
        };
        if !confirmed {
            println!("\nAborted, nothing was deleted.");
            return Ok(!cancel.is_cancelled());
        }
    }

    let report = nuke::execute(plan, &cancel).await;
    print!("{}", report.render(target.verbose));
    Ok(!report.has_failures())
}

/// First Ctrl-C cancels the run, the second one exits immediately
fn watch_interrupts(cancel: CancellationToken) {
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if cancel.is_cancelled() {
                eprintln!("Interrupted again, exiting");
                std::process::exit(130);
            }
            tracing::warn!("Interrupted, no new deletes will be issued (Ctrl-C again to exit)");
            cancel.cancel();
        }
    });
}

/// `--region` values, or every region, minus `--exclude-region`
async fn target_regions(
    client: &GcpClient,
    registry: &Registry,
    target: &TargetArgs,
) -> Result<Vec<String>> {
    // Only global types selected: no region lookup needed
    if registry.describe().iter().all(|(_, is_global)| *is_global) {
        return Ok(Vec::new());
    }

    let regions = if target.regions.is_empty() {
        projects::list_regions(client).await?
    } else {
        target.regions.clone()
    };

    Ok(regions
        .into_iter()
        .filter(|r| !target.exclude_regions.contains(r))
        .collect())
}

async fn confirm(count: usize, project: &str) -> Result<bool> {
    let mut stdout = tokio::io::stdout();
    stdout
        .write_all(
            format!(
                "\n{} resources in project {} will be deleted. Type 'nuke' to confirm: ",
                count, project
            )
            .as_bytes(),
        )
        .await?;
    stdout.flush().await?;

    let mut line = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await
        .context("Failed to read confirmation")?;
    Ok(line.trim() == "nuke")
}
