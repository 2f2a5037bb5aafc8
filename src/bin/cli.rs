//! Roster Sync CLI
//!
//! Long-running service (`run`) plus one-shot helpers for operators.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use roster_sync::{
    config,
    error::{AppError, Result},
    models::{Config, PlayerFilter},
    pipeline::{CycleOutcome, CycleScheduler, CycleState, ExecutionGuard, SyncPipeline},
    server::{self, AppState},
    services::CachedLookup,
    storage::{MemoryStore, PgPlayerStore, PlayerStore},
    utils::signal::shutdown_signal,
};
use tokio_util::sync::CancellationToken;

/// Roster Sync - game-server player roster ingestion
#[derive(Parser, Debug)]
#[command(
    name = "roster-sync",
    version,
    about = "Syncs game-server player rosters into PostgreSQL"
)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml", env = "ROSTER_SYNC_CONFIG")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the scheduler and HTTP server until SIGINT/SIGTERM
    Run {
        /// Do not start the HTTP server
        #[arg(long)]
        no_server: bool,
    },

    /// Run a single sync cycle and exit
    Once {
        /// Write to an in-memory store instead of the database
        #[arg(long)]
        dry_run: bool,
    },

    /// Validate configuration
    Validate,

    /// Look players up in the database
    Lookup {
        #[arg(long)]
        uid: Option<String>,

        #[arg(long)]
        username: Option<String>,
    },
}

/// Logger filter: `RUST_LOG` wins, then `-v`, then `logging.level`.
fn log_filter(verbose: bool, config_level: &str) -> &str {
    if verbose {
        "debug"
    } else if config_level.parse::<log::LevelFilter>().is_ok() {
        config_level
    } else {
        "info"
    }
}

/// Initialize logging from the verbosity flag and configured level.
fn init_logging(verbose: bool, config_level: &str) {
    let level = log_filter(verbose, config_level);
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

async fn connect_store(config: &Config) -> Result<Arc<PgPlayerStore>> {
    let url = config
        .database
        .url
        .as_deref()
        .ok_or_else(|| AppError::config("DATABASE_URL is not set"))?;
    let store = PgPlayerStore::connect(url, &config.database).await?;
    store.ensure_schema().await?;
    Ok(Arc::new(store))
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();

    // The file is read before the logger exists so its level can seed the filter.
    let file_config = config::load_config(&cli.config)?;
    init_logging(cli.verbose, &file_config.logging.level);

    log::info!("Roster sync starting...");
    if cli.config.exists() {
        log::info!("Loaded configuration from {}", cli.config.display());
    } else {
        log::warn!("{} not found, using defaults", cli.config.display());
    }
    let config = config::resolve(file_config)?;

    match cli.command {
        Command::Run { no_server } => run(config, no_server).await?,

        Command::Once { dry_run } => {
            let guard = ExecutionGuard::new(Duration::from_millis(config.guard.poll_interval_ms));
            let store: Arc<dyn PlayerStore> = if dry_run {
                log::info!("Dry run: writing to an in-memory store");
                Arc::new(MemoryStore::new())
            } else {
                connect_store(&config).await?
            };

            let pipeline = SyncPipeline::from_config(&config, store, guard)?;
            match pipeline.process(&CycleState::new()).await {
                CycleOutcome::Completed(result) => {
                    println!("{}", serde_json::to_string_pretty(&result)?);
                    if let Some(error) = result.error {
                        return Err(AppError::store_write("cycle", error));
                    }
                }
                CycleOutcome::Skipped(reason) => log::warn!("Cycle skipped: {:?}", reason),
            }
        }

        Command::Validate => {
            log::info!("Validating configuration...");
            // `config::load` already validated; report what was loaded.
            for source in config.source_descriptors()? {
                log::info!("✓ {} -> {}", source.tag(), source.endpoint());
            }
            log::info!("All validations passed!");
        }

        Command::Lookup { uid, username } => {
            let store = connect_store(&config).await?;
            let lookup = CachedLookup::new(store, &config.cache);
            let found = lookup.search(&PlayerFilter { uid, username }).await?;
            println!("{}", serde_json::to_string_pretty(found.players.as_ref())?);
        }
    }

    log::info!("Done!");

    Ok(())
}

async fn run(config: Config, no_server: bool) -> Result<()> {
    let store = connect_store(&config).await?;
    let guard = ExecutionGuard::new(Duration::from_millis(config.guard.poll_interval_ms));

    let pipeline = Arc::new(SyncPipeline::from_config(
        &config,
        store.clone(),
        guard.clone(),
    )?);
    let scheduler = Arc::new(CycleScheduler::new(
        pipeline,
        Duration::from_secs(config.scheduler.period_secs),
    ));
    scheduler.start();

    let server_token = CancellationToken::new();
    let server_task = if config.server.enabled && !no_server {
        let state = AppState::new(
            Arc::new(CachedLookup::new(store, &config.cache)),
            Some(Arc::clone(&scheduler)),
        );
        let bind = config.server.bind.clone();
        let token = server_token.clone();
        Some(tokio::spawn(async move {
            server::serve(&bind, state, token).await
        }))
    } else {
        None
    };

    shutdown_signal().await;
    guard.begin_shutdown();
    scheduler.stop();
    guard.await_drain().await;

    server_token.cancel();
    if let Some(task) = server_task {
        match task.await {
            Ok(Err(e)) => log::error!("HTTP server failed: {}", e),
            Err(e) => log::error!("HTTP server task panicked: {}", e),
            Ok(Ok(())) => {}
        }
    }

    log::info!("[SHUTDOWN] Drained, exiting");
    Ok(())
}
