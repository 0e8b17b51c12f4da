//! # comply CLI entry point
//!
//! Parses arguments, sets up logging and metrics, resolves settings and
//! dispatches to the handlers in `comply_cli::commands`. Every command
//! prints one JSON document on stdout; logs go to stderr.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::EnvFilter;

use comply_cli::commands::{
    self, AddFrameworksArgs, FixAllArgs, FixOrgArgs, ImportCatalogArgs, PlanArgs, Report,
    SimulateArgs, EXIT_FAILURE,
};
use comply_cli::config::{Overrides, Settings};

/// Compliance template materialization.
///
/// Copies framework, control, policy and task templates into
/// organization-scoped instances, creating only what is missing.
#[derive(Parser, Debug)]
#[command(name = "comply", version, about, long_about = None)]
struct Cli {
    /// Enable verbose output. Repeat for more verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Log line format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    /// Path to a YAML settings file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Postgres connection string. Overrides DATABASE_URL.
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Maximum pool connections.
    #[arg(long, global = true)]
    max_connections: Option<u32>,

    /// Rows per multi-row insert.
    #[arg(long, global = true)]
    insert_chunk_size: Option<usize>,

    /// Serve Prometheus metrics on this address.
    #[arg(long, global = true)]
    metrics_addr: Option<SocketAddr>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Materialize frameworks for one organization.
    AddFrameworks(AddFrameworksArgs),

    /// Fill gaps in every framework an organization already has.
    FixOrg(FixOrgArgs),

    /// Run fix-org for every organization.
    FixAll(FixAllArgs),

    /// Print what a run would create without writing anything.
    Plan(PlanArgs),

    /// Apply database migrations and exit.
    Migrate,

    /// Write a YAML catalog into the template tables.
    ImportCatalog(ImportCatalogArgs),

    /// Run against a YAML catalog using the in-memory backend.
    Simulate(SimulateArgs),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

fn default_directive(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

fn init_tracing(verbose: u8, format: LogFormat) {
    let filter = if std::env::var_os("RUST_LOG").is_some() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(default_directive(verbose))
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.with_target(false).init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn overrides(cli: &Cli) -> Overrides {
    let batch_size = match &cli.command {
        Commands::FixAll(args) => args.batch_size,
        _ => None,
    };
    Overrides {
        database_url: cli.database_url.clone(),
        max_connections: cli.max_connections,
        batch_size,
        insert_chunk_size: cli.insert_chunk_size,
    }
}

async fn run(cli: Cli) -> anyhow::Result<Report> {
    let settings = Settings::load(cli.config.as_deref(), &overrides(&cli))?;
    tracing::debug!(
        batch_size = settings.batch_size,
        insert_chunk_size = settings.insert_chunk_size,
        max_connections = settings.max_connections,
        "settings resolved"
    );

    match &cli.command {
        Commands::AddFrameworks(args) => {
            let db = commands::connect(&settings).await?;
            let orchestrator = commands::orchestrator(db, &settings);
            commands::run_add_frameworks(&orchestrator, args).await
        }
        Commands::FixOrg(args) => {
            let db = commands::connect(&settings).await?;
            let orchestrator = commands::orchestrator(db, &settings);
            commands::run_fix_org(&orchestrator, args).await
        }
        Commands::FixAll(_) => {
            let db = commands::connect(&settings).await?;
            let orchestrator = Arc::new(commands::orchestrator(db, &settings));
            commands::run_fix_all(orchestrator, settings.batch_size).await
        }
        Commands::Plan(args) => {
            let db = commands::connect(&settings).await?;
            let orchestrator = commands::orchestrator(db, &settings);
            commands::run_plan(&orchestrator, args).await
        }
        Commands::Migrate => commands::run_migrate(&settings).await,
        Commands::ImportCatalog(args) => commands::run_import_catalog(args, &settings).await,
        Commands::Simulate(args) => commands::run_simulate(args, &settings).await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_format);

    if let Some(addr) = cli.metrics_addr {
        match PrometheusBuilder::new().with_http_listener(addr).install() {
            Ok(()) => {
                comply_engine::telemetry::describe();
                tracing::info!(%addr, "serving Prometheus metrics");
            }
            Err(e) => tracing::warn!(%addr, "metrics exporter not installed: {e}"),
        }
    }

    match run(cli).await {
        Ok(report) => match serde_json::to_string_pretty(&report.body) {
            Ok(json) => {
                println!("{json}");
                ExitCode::from(report.exit_code)
            }
            Err(e) => {
                tracing::error!("cannot render output: {e}");
                ExitCode::from(EXIT_FAILURE)
            }
        },
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::from(EXIT_FAILURE)
        }
    }
}
