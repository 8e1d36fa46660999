//! reach-sync - contact confidence scoring and incremental sync
//!
//! Runs one command per invocation against the configured database and
//! prints the result as JSON on stdout. Logs go to stderr (or the configured
//! log file).

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use reach_common::config::TomlConfig;
use reach_sync::confidence::ConfidenceAggregator;
use reach_sync::lookup::{CachePolicy, GeocodeCache, GeocodingService, HttpGeocoder};
use reach_sync::store::{SqliteSyncStore, SyncStore};
use reach_sync::sync::{ChangeDetector, SmartEnricher, SyncManager};
use reach_sync::validators::{ValidatorPorts, ValidatorRegistry};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

/// Command-line arguments for reach-sync
#[derive(Parser, Debug)]
#[command(name = "reach-sync")]
#[command(about = "Confidence scoring and incremental sync for contact records")]
#[command(version)]
struct Args {
    /// Config file (overrides REACH_CONFIG and the default locations)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// SQLite database file (overrides the config file)
    #[arg(long, global = true, value_name = "PATH")]
    database: Option<PathBuf>,

    /// Owning user; every read and write is scoped to it
    #[arg(long, global = true, env = "REACH_USER_ID")]
    user: Uuid,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Detect, enrich and re-score pending changes
    Run {
        /// Scheduled sync job whose statistics this run updates
        #[arg(long)]
        sync_job: Option<Uuid>,

        /// Look-back window in days (defaults to the job's or the config's)
        #[arg(long)]
        days_back: Option<u32>,
    },

    /// Score one contact and queue re-enrichment if needed
    Score {
        #[arg(long)]
        contact: Uuid,

        /// Source label recorded in the confidence log
        #[arg(long, default_value = "manual")]
        source: String,
    },

    /// Re-queue failed change-log entries
    RequeueFailed,

    /// Change-log and contact status counts
    Summary,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = TomlConfig::load(args.config.as_deref(), args.database.as_deref())
        .context("Failed to load configuration")?;
    init_tracing(&config)?;

    info!("Starting reach-sync {}", env!("CARGO_PKG_VERSION"));
    info!("Database: {}", config.database_path.display());

    let pool = reach_common::db::init_database(&config.database_path)
        .await
        .context("Failed to open database")?;
    let store: Arc<dyn SyncStore> = Arc::new(SqliteSyncStore::new(pool));

    let ports = build_ports(&config)?;
    let registry = ValidatorRegistry::standard(&ports);

    let manager = SyncManager::new(
        store.clone(),
        ChangeDetector::new(store.clone()),
        SmartEnricher::new(store.clone(), registry.clone(), ports.geocoding.clone()),
        ConfidenceAggregator::new(store.clone(), registry),
    )
    .with_default_days_back(config.sync.days_back);

    match args.command {
        Command::Run {
            sync_job,
            days_back,
        } => print_json(&manager.run_sync(args.user, sync_job, days_back).await?),
        Command::Score { contact, source } => print_json(
            &manager
                .aggregator()
                .score_contact(args.user, contact, &source)
                .await?,
        ),
        Command::RequeueFailed => print_json(&manager.requeue_failed(args.user).await?),
        Command::Summary => print_json(&manager.sync_summary(args.user).await?),
    }
}

/// Env filter from `RUST_LOG`, else the configured level
fn init_tracing(config: &TomlConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    match &config.logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Arc::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

/// Capability ports from configuration
fn build_ports(config: &TomlConfig) -> Result<ValidatorPorts> {
    let lookup_timeout = Duration::from_millis(config.sync.lookup_timeout_ms);

    let phone_region = config
        .sync
        .default_phone_region
        .trim()
        .to_uppercase()
        .parse::<phonenumber::country::Id>()
        .map_err(|_| {
            anyhow!(
                "Unknown phone region '{}'",
                config.sync.default_phone_region
            )
        })?;

    let geocoding = match &config.geocoding.api_key {
        Some(key) if !key.trim().is_empty() => {
            let geocoder = HttpGeocoder::new(key.clone(), config.geocoding.endpoint.clone())?;
            let ttl = (config.sync.geocode_cache_ttl_secs > 0)
                .then(|| Duration::from_secs(config.sync.geocode_cache_ttl_secs));
            let cache = GeocodeCache::new(CachePolicy {
                max_entries: config.sync.geocode_cache_capacity,
                ttl,
            });
            info!("Geocoding enabled");
            Some(Arc::new(GeocodingService::new(
                Arc::new(geocoder),
                Arc::new(cache),
                lookup_timeout,
            )))
        }
        _ => {
            info!("Geocoding disabled (no API key)");
            None
        }
    };

    Ok(ValidatorPorts {
        mx: mx_lookup(),
        geocoding,
        lookup_timeout,
        phone_region,
        ..ValidatorPorts::default()
    })
}

#[cfg(feature = "dns")]
fn mx_lookup() -> Option<Arc<dyn reach_sync::lookup::MxLookup>> {
    match reach_sync::lookup::dns::SystemMxLookup::from_system_conf() {
        Ok(lookup) => Some(Arc::new(lookup)),
        Err(e) => {
            tracing::warn!("MX lookups disabled: {}", e);
            None
        }
    }
}

#[cfg(not(feature = "dns"))]
fn mx_lookup() -> Option<Arc<dyn reach_sync::lookup::MxLookup>> {
    None
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
