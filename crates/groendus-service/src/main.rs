//! Groendus Service - keeps a monotonic charging-energy total.
//!
//! Run with: `cargo run -p groendus-service`

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tokio::sync::Mutex;
use tracing::info;

use groendus_core::{ChargingApi, GraphQlClient, PageRequest, SrpAuthSession};
use groendus_service::config::ValidationError;
use groendus_service::{Collector, Config, ConfigError, SyncEngine, SyncStatus};
use groendus_store::{AccumulatorStore, Store};

/// Groendus Service - background collector for Athlon/Groendus charging energy.
#[derive(Parser, Debug)]
#[command(name = "groendus-service")]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Database path (overrides config).
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    /// Portal account email (overrides config).
    #[arg(long, global = true)]
    email: Option<String>,

    /// Portal account password (overrides config).
    #[arg(long, global = true, env = "GROENDUS_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Chargepoint to track (overrides config).
    #[arg(long, global = true)]
    chargepoint: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the collector in the foreground (default behavior).
    Run,

    /// Run a single sync pass and print the snapshot as JSON.
    SyncOnce,

    /// Check credentials and chargepoint access against the portal.
    Verify,

    /// Print the stored accumulator for the configured chargepoint.
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("groendus_service=info".parse()?)
                .add_directive("groendus_core=info".parse()?)
                .add_directive("groendus_store=info".parse()?),
        )
        .init();

    let config = load_config(&args)?;

    match args.command {
        Some(Command::SyncOnce) => sync_once(&config).await,
        Some(Command::Verify) => verify(&config).await,
        Some(Command::Status) => status(&config).await,
        Some(Command::Run) | None => run(&config).await,
    }
}

fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };

    if let Some(db_path) = &args.database {
        config.storage.path = db_path.clone();
    }
    if let Some(email) = &args.email {
        config.account.email = email.clone();
    }
    if let Some(password) = &args.password {
        config.account.password = Some(password.clone());
    }
    if let Some(chargepoint) = &args.chargepoint {
        config.device.chargepoint_id = chargepoint.clone();
    }

    Ok(config)
}

/// Validate everything needed to talk to the portal and build a client.
fn portal_client(config: &Config) -> anyhow::Result<Arc<GraphQlClient>> {
    config.validate()?;
    let Some(password) = config.account.password.clone() else {
        bail!("No password configured: set account.password, GROENDUS_PASSWORD or --password");
    };

    let auth = SrpAuthSession::new(config.api.request_timeout())?
        .with_endpoint(config.api.identity_url.clone());
    let client = GraphQlClient::with_options(
        config.account.email.clone(),
        password,
        Arc::new(auth),
        config.api.client_options(),
    )?;
    Ok(Arc::new(client))
}

fn open_accumulator(config: &Config) -> anyhow::Result<AccumulatorStore> {
    let store = Store::open(&config.storage.path)
        .with_context(|| format!("opening database {}", config.storage.path.display()))?;
    Ok(AccumulatorStore::new(
        Arc::new(Mutex::new(store)),
        config.device.entry_id(),
    ))
}

fn engine(config: &Config) -> anyhow::Result<SyncEngine> {
    let client = portal_client(config)?;
    let accumulator = open_accumulator(config)?;
    Ok(SyncEngine::new(
        client,
        accumulator,
        config.device.chargepoint_id.clone(),
        config.device.max_pages,
    ))
}

async fn run(config: &Config) -> anyhow::Result<()> {
    let engine = engine(config)?;
    let status = Arc::new(SyncStatus::new(
        config.device.chargepoint_id.clone(),
        config.device.poll_interval,
    ));

    let handle = Collector::new(engine, Arc::clone(&status), config.device.poll_interval()).start();

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested, waiting for the pass in flight");
    status.signal_stop();
    handle.await?;

    let stats = status.stats().await;
    info!(
        "Collector finished: {} successful pass(es), {} failed",
        stats.success_count, stats.failure_count
    );
    Ok(())
}

async fn sync_once(config: &Config) -> anyhow::Result<()> {
    let mut engine = engine(config)?;
    let snapshot = engine.run().await?;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

async fn verify(config: &Config) -> anyhow::Result<()> {
    let client = portal_client(config)?;

    let driver = client
        .fetch_metadata()
        .await
        .context("authenticating and fetching driver metadata")?;
    let page = client
        .list_transactions(&PageRequest::unsorted(1, 10))
        .await
        .context("listing transactions")?;

    println!(
        "Signed in as {}",
        driver
            .display_name()
            .unwrap_or_else(|| config.account.email.clone())
    );
    let chargepoints = driver.chargepoint_ids();
    println!("Chargepoints: {}", chargepoints.join(", "));
    if driver.chargepoint(&config.device.chargepoint_id).is_some() {
        println!("Chargepoint {}: found", config.device.chargepoint_id);
    } else {
        println!(
            "Chargepoint {}: not linked to this account",
            config.device.chargepoint_id
        );
    }
    println!(
        "Transactions: {} listed, {} on the first page",
        page.total_count
            .map_or_else(|| "unknown".to_string(), |n| n.to_string()),
        page.items.len()
    );
    Ok(())
}

async fn status(config: &Config) -> anyhow::Result<()> {
    let errors: Vec<ValidationError> = config
        .device
        .validate()
        .into_iter()
        .chain(config.storage.validate())
        .collect();
    if !errors.is_empty() {
        return Err(ConfigError::Validation(errors).into());
    }

    let accumulator = open_accumulator(config)?;
    let state = accumulator.load().await?;

    println!("Entry: {}", accumulator.key());
    println!("Total energy: {:.3} kWh", state.total_energy_kwh());
    println!("Seen transactions: {}", state.seen_count());
    if let Some(latest) = state.seen_transaction_ids().first() {
        println!("Most recent transaction: {}", latest);
    }

    let others: Vec<String> = accumulator
        .entry_ids()
        .await?
        .into_iter()
        .filter(|id| *id != config.device.entry_id())
        .collect();
    if !others.is_empty() {
        println!("Other stored entries: {}", others.join(", "));
    }
    Ok(())
}
