//! Checkout split - coordinated checkout assignment
//!
//! CLI entry point for assigning, inspecting and diagnosing the split.

// Allow multiple crate versions from dependencies (can't easily control)
#![allow(clippy::multiple_crate_versions)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use checkout_split::cli;
use checkout_split::cycle::config::{SplitConfig, StoreBackend};
use checkout_split::doctor::diagnose;
use checkout_split::error::Result as SplitResult;
use checkout_split::handler::process_checkout;
use checkout_split::simulate::simulate;
use checkout_split::{
    AssignmentRecord, CheckoutRequest, CheckoutResponse, ConfigStore, CycleAssignmentService,
    FileStore, JsonlLogger, MemoryStore,
};

/// Coordinated weighted round-robin checkout assignment
///
/// Routes checkout requests between a primary and a secondary provider in a
/// fixed slot rotation shared through a key-value store.
#[derive(Parser, Debug)]
#[command(name = "checkout-split", version, about)]
struct Cli {
    /// Path to the split.toml configuration file
    #[arg(long, default_value = "split.toml")]
    config: PathBuf,

    /// Directory for the assignment log (.split by default)
    #[arg(long, default_value = ".split")]
    log_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Assign one checkout request and print the JSON response
    Assign {
        /// Plan to check out (annual or monthly)
        #[arg(long)]
        plan: Option<String>,

        /// Attribution parameter, repeatable (e.g. --param utm_source=fb)
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,

        /// Read the request body from a JSON file instead
        #[arg(long, conflicts_with_all = ["plan", "params"])]
        request: Option<PathBuf>,
    },
    /// Show the stored rotation state
    Status,
    /// Clear the cycle lock regardless of holder
    Unlock,
    /// Run concurrent assignments against an in-memory store
    Simulate {
        /// Number of assignments
        #[arg(long, default_value_t = 100)]
        count: usize,

        /// Concurrent workers
        #[arg(long, default_value_t = 4)]
        concurrency: usize,
    },
    /// Diagnose the stored state, assignment log and configuration
    Doctor,
}

/// Parse a `key=value` attribution parameter.
fn parse_param(raw: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    if key.trim().is_empty() {
        return Err(format!("parameter key cannot be empty in '{raw}'"));
    }
    Ok((key.trim().to_string(), value.to_string()))
}

/// Build the request for `assign` from flags or a request file.
///
/// Failing to read the file is an error; a body that does not parse is a
/// rejected request and gets a failure response like any other.
fn build_request(
    plan: Option<String>,
    params: Vec<(String, String)>,
    request: Option<&Path>,
) -> Result<SplitResult<CheckoutRequest>> {
    if let Some(path) = request {
        let body = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read request file: {}", path.display()))?;
        return Ok(CheckoutRequest::parse(&body));
    }

    let utm_params: BTreeMap<String, Value> = params
        .into_iter()
        .map(|(key, value)| (key, Value::String(value)))
        .collect();

    Ok(Ok(CheckoutRequest {
        plan,
        utm_params,
        quiz_data: serde_json::Map::new(),
    }))
}

/// Resolve a relative store path against the directory holding the config.
fn resolve_store_path(config_path: &Path, store_path: &Path) -> PathBuf {
    if store_path.is_absolute() {
        return store_path.to_path_buf();
    }
    config_path
        .parent()
        .map_or_else(|| store_path.to_path_buf(), |dir| dir.join(store_path))
}

/// Initialize tracing on stderr, defaulting to warnings only.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    // Load configuration
    let config = SplitConfig::from_path(&cli.config)
        .with_context(|| format!("Failed to load config from '{}'", cli.config.display()))?;

    match config.store.backend {
        StoreBackend::File => {
            let Some(path) = config.store.path.as_deref() else {
                bail!("Store backend 'file' requires a 'path'");
            };
            let path = resolve_store_path(&cli.config, path);
            let store = FileStore::open(&path)
                .with_context(|| format!("Failed to open store at '{}'", path.display()))?;
            run(cli, &config, store).await
        }
        StoreBackend::Memory => run(cli, &config, MemoryStore::new()).await,
    }
}

/// Dispatch a subcommand against the configured store.
async fn run<S: ConfigStore>(cli: Cli, config: &SplitConfig, store: S) -> Result<()> {
    let settings = config.service_settings()?;
    let service = CycleAssignmentService::new(store, settings, config.checkout.clone())
        .context("Failed to create assignment service")?;

    match cli.command {
        Command::Assign {
            plan,
            params,
            request,
        } => {
            let logger =
                JsonlLogger::new(&cli.log_dir).context("Failed to initialize JSONL logger")?;
            let (request, outcome) = match build_request(plan, params, request.as_deref())? {
                Ok(request) => {
                    let outcome = process_checkout(&service, &request).await;
                    (request, outcome)
                }
                Err(err) => (CheckoutRequest::default(), Err(err)),
            };
            logger
                .append(&AssignmentRecord::from_outcome(&request, &outcome))
                .context("Failed to write to JSONL log")?;

            match &outcome {
                Ok(result) => cli::render_assignment(result),
                Err(err) => cli::render_failure(err),
            }

            let response = CheckoutResponse::from_outcome(&outcome);
            println!(
                "{}",
                serde_json::to_string(&response).context("Failed to serialize response")?
            );

            if !response.is_success() {
                std::process::exit(1);
            }
        }
        Command::Status => {
            let state = service.state().await.context("Failed to read cycle state")?;
            cli::render_state(
                state.as_ref(),
                &service.settings().rules,
                config.lock.stale_after(),
                Utc::now(),
            );
        }
        Command::Unlock => {
            let state = service
                .force_unlock()
                .await
                .context("Failed to clear the cycle lock")?;
            eprintln!("Lock cleared at index {}.", state.cycle_index);
        }
        Command::Simulate { count, concurrency } => {
            let settings = config.service_settings()?;
            let expected = settings.rules.secondary_ratio();
            let summary = simulate(settings, config.checkout.clone(), count, concurrency)
                .await
                .context("Simulation failed")?;
            cli::render_simulation(&summary, expected);
        }
        Command::Doctor => {
            let logger =
                JsonlLogger::new(&cli.log_dir).context("Failed to initialize JSONL logger")?;
            let log = logger.read_all().context("Failed to read assignment log")?;
            let state = service.state().await.context("Failed to read cycle state")?;

            let report = diagnose(config, state.as_ref(), &log, Utc::now());
            cli::render_diagnostic_report(&report);

            if report.error_count() > 0 {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
