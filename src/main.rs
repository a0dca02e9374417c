// Module-specific lints configuration
#![allow(clippy::uninlined_format_args)]

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn, LevelFilter};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use translarr::database::{DatabaseConnection, Repository};
use translarr::media::{MediaStateEngine, NoopIndexer, SubtitleProber};
use translarr::providers::gate::UsageGate;
use translarr::queue::{EventBus, TranslationRequestService};
use translarr::scheduler::Scheduler;
use translarr::server::{create_router, AppState, DashboardAuth};
use translarr::settings::{keys, ExtractionMode, SettingsStore};
use translarr::translation::SubtitlePipeline;
use translarr::workers::{Dispatcher, WorkerPool};

/// Connection attempts before giving up on the store
const DB_CONNECT_ATTEMPTS: u32 = 5;

/// Delay between store connection attempts
const DB_CONNECT_DELAY: Duration = Duration::from_secs(2);

/// Default dashboard credentials; using them logs a prominent warning
const DEFAULT_DASHBOARD_USERNAME: &str = "admin";
const DEFAULT_DASHBOARD_PASSWORD: &str = "translarr";

#[derive(Debug, Clone, clap::ValueEnum)]
enum CliLogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<CliLogLevel> for LevelFilter {
    fn from(level: CliLogLevel) -> Self {
        match level {
            CliLogLevel::Error => LevelFilter::Error,
            CliLogLevel::Warn => LevelFilter::Warn,
            CliLogLevel::Info => LevelFilter::Info,
            CliLogLevel::Debug => LevelFilter::Debug,
            CliLogLevel::Trace => LevelFilter::Trace,
        }
    }
}

/// Automated subtitle translation daemon for media libraries
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// SQLite database path
    #[arg(long, env = "DB_CONNECTION")]
    database: Option<PathBuf>,

    /// Address the operator API binds to
    #[arg(long, env = "BIND_ADDRESS", default_value = "0.0.0.0:9876")]
    bind: String,

    /// Logging verbosity
    #[arg(short, long, value_enum, default_value = "info")]
    log_level: CliLogLevel,
}

fn main() {
    let cli = Cli::parse();

    env_logger::Builder::from_default_env()
        .filter_level(cli.log_level.clone().into())
        .init();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to start runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(cli)) {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

/// Open the store with bounded retries; an unreachable store is an
/// unrecoverable init failure
async fn connect_database(path: Option<&PathBuf>) -> Result<DatabaseConnection> {
    let mut last_error = None;

    for attempt in 1..=DB_CONNECT_ATTEMPTS {
        let result = match path {
            Some(path) => DatabaseConnection::new(path),
            None => DatabaseConnection::new_default(),
        };
        match result {
            Ok(db) => return Ok(db),
            Err(e) => {
                warn!(
                    "Store connection attempt {}/{} failed: {}",
                    attempt, DB_CONNECT_ATTEMPTS, e
                );
                last_error = Some(e);
                tokio::time::sleep(DB_CONNECT_DELAY).await;
            }
        }
    }

    Err(last_error.unwrap_or_else(|| anyhow::anyhow!("store unreachable")))
}

async fn run(cli: Cli) -> Result<()> {
    info!("translarr {} starting", env!("CARGO_PKG_VERSION"));

    let db = connect_database(cli.database.as_ref())
        .await
        .context("Store unreachable after bounded retries")?;
    let repo = Repository::new(db);

    let settings = SettingsStore::new(repo.clone());
    let seeded = settings.seed_defaults().await?;
    if seeded > 0 {
        info!("Seeded {} default settings", seeded);
    }

    // Environment worker-pool hints override the stored setting
    if let Ok(value) = std::env::var("MAX_PARALLEL_TRANSLATIONS") {
        if value.parse::<usize>().is_ok() {
            settings.set(keys::MAX_PARALLEL_TRANSLATIONS, &value).await?;
        }
    }
    let max_workers = match std::env::var("MAX_CONCURRENT_JOBS")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
    {
        Some(cap) => settings.max_workers().await?.min(cap.max(1)),
        None => settings.max_workers().await?,
    };

    // Extraction binaries must exist when settings require extraction
    let translation_settings = settings.translation_settings().await?;
    if translation_settings.extraction_mode != ExtractionMode::OnDemand {
        let extract_ok =
            SubtitleProber::binary_available(&translation_settings.extract_binary).await;
        let probe_ok = SubtitleProber::binary_available(&translation_settings.probe_binary).await;
        if !extract_ok || !probe_ok {
            anyhow::bail!(
                "extraction is required by settings but {:?}/{:?} are not invocable",
                translation_settings.probe_binary,
                translation_settings.extract_binary
            );
        }
    }

    // Startup sweep: workers did not outlive the previous process
    let pool = WorkerPool::new(max_workers);
    let events = EventBus::new();
    let service = TranslationRequestService::new(repo.clone(), pool.clone(), events);
    let swept = service.sweep_interrupted().await?;
    if swept > 0 {
        info!("Swept {} interrupted requests from the previous run", swept);
    }

    let gate = UsageGate::load(
        repo.clone(),
        settings.clone(),
        translation_settings.service_type.clone(),
    )
    .await?;
    let state_engine = MediaStateEngine::new(repo.clone(), settings.clone());
    let pipeline = SubtitlePipeline::new(repo.clone(), settings.clone(), gate.clone());

    let shutdown = CancellationToken::new();

    let dispatcher = Dispatcher::new(
        repo.clone(),
        service.clone(),
        pipeline.clone(),
        pool.clone(),
        settings.clone(),
        state_engine.clone(),
        shutdown.clone(),
    );
    let dispatcher_handle = dispatcher.spawn();

    let scheduler = Scheduler::new(
        repo.clone(),
        settings.clone(),
        state_engine.clone(),
        service.clone(),
        Arc::new(NoopIndexer),
        shutdown.clone(),
    );
    let scheduler_handles = scheduler.start();

    // Dashboard credentials from the environment; defaults are loudly unsafe
    let username = std::env::var("DASHBOARD_USERNAME")
        .unwrap_or_else(|_| DEFAULT_DASHBOARD_USERNAME.to_string());
    let password = std::env::var("DASHBOARD_PASSWORD")
        .unwrap_or_else(|_| DEFAULT_DASHBOARD_PASSWORD.to_string());
    if username == DEFAULT_DASHBOARD_USERNAME && password == DEFAULT_DASHBOARD_PASSWORD {
        warn!("==============================================================");
        warn!("Dashboard is using the DEFAULT credentials ({}/{})", username, password);
        warn!("Set DASHBOARD_USERNAME and DASHBOARD_PASSWORD in production!");
        warn!("==============================================================");
    }

    let app_state = Arc::new(AppState {
        repo: repo.clone(),
        settings: settings.clone(),
        service: service.clone(),
        state_engine,
        pipeline,
        gate,
        pool: pool.clone(),
        scheduler,
        auth: DashboardAuth::new(&username, &password),
    });
    let router = create_router(app_state);

    let listener = tokio::net::TcpListener::bind(&cli.bind)
        .await
        .with_context(|| format!("Failed to bind {}", cli.bind))?;
    info!("Operator API listening on {}", cli.bind);

    let server_shutdown = shutdown.clone();
    let server = axum::serve(listener, router)
        .with_graceful_shutdown(async move { server_shutdown.cancelled().await });

    tokio::select! {
        result = server => {
            result.context("API server failed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    // Graceful shutdown: stop the loops, then settle whatever was running
    shutdown.cancel();
    pool.signal();
    let _ = dispatcher_handle.await;
    for handle in scheduler_handles {
        let _ = handle.await;
    }
    let interrupted = service.sweep_interrupted().await?;
    if interrupted > 0 {
        info!("Marked {} running requests as interrupted", interrupted);
    }

    info!("Shutdown complete");
    Ok(())
}
