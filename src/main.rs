use analytics::KpiRegistry;
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use comfy_table::{Table, presets::UTF8_FULL};
use configuration::{Config, init_tracing, load_config};
use database::{DbRepository, connect, run_migrations};
use engine::{CancelFlag, LedgerSink, Pipeline, RunRequest};
use ingestion::{Ingestor, SourceDescriptor};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// The main entry point for the KPI pipeline.
#[tokio::main]
async fn main() -> ExitCode {
    // Parse command-line arguments
    let cli = Cli::parse();

    // Execute the appropriate command
    match cli.command {
        Commands::Run(args) => {
            let config = match load_config(args.config.as_deref()) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Error loading configuration: {}", e);
                    return ExitCode::from(1);
                }
            };
            // Held until exit so buffered log lines reach the file.
            let _guard = init_tracing(&config.logging);

            match handle_run(args, config).await {
                Ok(code) => ExitCode::from(code),
                Err(e) => {
                    eprintln!("Error during run: {:#}", e);
                    ExitCode::from(1)
                }
            }
        }
        Commands::Catalog => match print_catalog() {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("Error building the catalog: {:#}", e);
                ExitCode::from(1)
            }
        },
    }
}

// ==============================================================================
// CLI Structure
// ==============================================================================

/// Computes the portfolio KPI catalog from a loan tape, with lineage and parity.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run ingest → validate → calculate → persist over one snapshot.
    Run(RunArgs),
    /// Print the registered KPI definitions.
    Catalog,
}

#[derive(Parser)]
struct RunArgs {
    /// The loan tape: a file path or an http(s) URL (CSV or JSON).
    #[arg(long)]
    dataset: String,

    /// Directory receiving the result files and the manifest.
    #[arg(long)]
    output: PathBuf,

    /// Optional payment schedule, a file path or an http(s) URL.
    #[arg(long)]
    payments: Option<String>,

    /// The business date of the snapshot (format: YYYY-MM-DD). Defaults to today (UTC).
    #[arg(long)]
    as_of: Option<NaiveDate>,

    /// Reuse a run id, e.g. to replay a run. A fresh one is generated otherwise.
    #[arg(long)]
    run_id: Option<Uuid>,

    /// Path to a TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// JSON file of reference values to check parity against instead of the polars engine.
    #[arg(long)]
    reference: Option<PathBuf>,

    /// Cancel the run at the next phase boundary after this many seconds.
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Compute and write outputs without touching the audit ledger.
    #[arg(long)]
    dry_run: bool,

    /// Exit with code 3 when any KPI disagrees with the reference engine.
    #[arg(long)]
    strict_parity: bool,
}

// ==============================================================================
// Run Command Logic
// ==============================================================================

/// Wires the pipeline from the configuration, runs it once and prints the outcome.
/// Returns the process exit code.
async fn handle_run(args: RunArgs, config: Config) -> anyhow::Result<u8> {
    let auth_token = std::env::var(&config.ingestion.auth_token_env).ok();
    let mut request = RunRequest::new(
        SourceDescriptor::parse(&args.dataset, auth_token.clone()),
        args.output,
        args.as_of.unwrap_or_else(|| Utc::now().date_naive()),
    );
    request.payments = args.payments.as_deref().map(|p| SourceDescriptor::parse(p, auth_token.clone()));
    request.reference = args.reference;
    request.dry_run = args.dry_run;
    if let Some(run_id) = args.run_id {
        request.run_id = run_id;
    }

    let ledger: Option<Arc<dyn LedgerSink>> = if args.dry_run {
        None
    } else {
        let url = config.persistence.database_url.as_deref().ok_or_else(|| {
            anyhow::anyhow!("persistence.database_url is not set; pass --dry-run to skip the ledger")
        })?;
        let pool = connect(url).await?;
        run_migrations(&pool).await?;
        Some(Arc::new(DbRepository::new(pool)))
    };

    let ingestor = Ingestor::new(&config.ingestion)?;
    let pipeline = Pipeline::new(Arc::new(config), ingestor, ledger)?;

    let cancel = CancelFlag::new();
    spawn_cancel_watchers(&cancel, args.timeout_secs);

    info!(run_id = %request.run_id, dataset = %args.dataset, "Starting run");
    let outcome = pipeline.run(&request, &cancel).await;
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    Ok(u8::try_from(outcome.exit_code(args.strict_parity)).unwrap_or(1))
}

/// Ctrl-C and the optional deadline both raise the same flag; the pipeline
/// stops at its next phase boundary.
fn spawn_cancel_watchers(cancel: &CancelFlag, timeout_secs: Option<u64>) {
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, canceling at the next phase boundary");
            on_signal.cancel();
        }
    });

    if let Some(secs) = timeout_secs {
        let on_deadline = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            warn!(timeout_secs = secs, "Run deadline reached, canceling at the next phase boundary");
            on_deadline.cancel();
        });
    }
}

// ==============================================================================
// Catalog Command Logic
// ==============================================================================

fn print_catalog() -> anyhow::Result<()> {
    let registry = KpiRegistry::from_catalog()?;

    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec![
        "KPI", "Version", "Group", "Unit", "Window", "Direction", "Warning", "Critical", "Precision",
    ]);
    for def in registry.definitions() {
        table.add_row(vec![
            def.kpi_name.clone(),
            def.formula_version.clone(),
            def.owning_group.as_str().to_string(),
            def.unit.as_str().to_string(),
            def.window.as_str().to_string(),
            def.direction.as_str().to_string(),
            threshold(def.thresholds.warning),
            threshold(def.thresholds.critical),
            def.precision.to_string(),
        ]);
    }

    println!("KPI catalog {}", analytics::CATALOG_VERSION);
    println!("{table}");
    Ok(())
}

fn threshold(value: Option<impl std::fmt::Display>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}
