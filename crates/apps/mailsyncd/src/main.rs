//! mailsyncd - Gmail to SQLite sync daemon
//!
//! Runs the mailsync engine periodically, once, or performs maintenance on
//! the local database.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use mailsync::{
    GmailClient, MailStore, SqliteMailStore, SyncConfig, SyncEngine, SyncError, SyncOutcome,
};
use tokio::task::JoinError;

#[derive(Parser)]
#[command(name = "mailsyncd", version)]
#[command(about = "Incrementally sync a Gmail mailbox into SQLite")]
struct Cli {
    /// Config file to use instead of ~/.config/mailsync/mailsync.json
    #[arg(short, long, env = "MAILSYNC_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Sync every `interval_secs` until interrupted (default)
    Run,
    /// Run a single sync cycle and exit
    Once,
    /// Print the current sync state as JSON
    Status,
    /// Clear a sync lock left behind by a process that died mid-run
    ResetLock,
    /// Delete all synced messages, labels and sync state
    Reset {
        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();

    // Bootstrap config directory
    if let Err(e) = config::init() {
        error!("Failed to initialize config directory: {}", e);
    }

    let settings = match &cli.config {
        Some(path) => SyncConfig::load_from(path)?,
        None => SyncConfig::load()?,
    };
    let db_path = settings.resolved_db_path()?;
    let store: Arc<dyn MailStore> = Arc::new(SqliteMailStore::new(&db_path)?);

    match cli.command.unwrap_or(Command::Run) {
        Command::Status => {
            let state = store.get_sync_state()?;
            println!("{}", serde_json::to_string_pretty(&state)?);
        }
        Command::ResetLock => {
            if store.reset_sync_lock()? {
                info!("Cleared sync lock");
            } else {
                info!("Sync lock was not held");
            }
        }
        Command::Reset { yes } => {
            if !yes {
                bail!("Refusing to delete synced data without --yes");
            }
            store.clear()?;
            info!("Deleted all synced data from {}", db_path.display());
        }
        Command::Once => {
            let engine = build_engine(&settings, store)?;
            match run_cycle(engine).await? {
                SyncOutcome::Completed(stats) | SyncOutcome::Cancelled(stats) => {
                    println!("{}", serde_json::to_string_pretty(&stats)?);
                }
                SyncOutcome::Skipped => info!("Another sync is running"),
            }
        }
        Command::Run => {
            let engine = build_engine(&settings, store)?;
            run_worker(engine, settings.interval()).await;
        }
    }

    Ok(())
}

fn build_engine(settings: &SyncConfig, store: Arc<dyn MailStore>) -> Result<Arc<SyncEngine>> {
    let tokens = mailsync::config::token_provider()?;
    let client = GmailClient::new(tokens);
    let engine = SyncEngine::new(Arc::new(client), store, settings.sync_options())?;
    Ok(Arc::new(engine))
}

async fn run_cycle(engine: Arc<SyncEngine>) -> Result<SyncOutcome> {
    let outcome = tokio::task::spawn_blocking(move || engine.run_once())
        .await
        .context("Sync task panicked")??;
    Ok(outcome)
}

/// Periodic sync until Ctrl-C or SIGTERM
///
/// A shutdown during a cycle lets the current page or history record finish
/// and checkpoint before the worker exits.
async fn run_worker(engine: Arc<SyncEngine>, interval: Duration) {
    let cancel = engine.cancel_flag();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    info!("Sync worker started, interval {}s", interval.as_secs());

    loop {
        let started = Instant::now();
        let mut cycle = tokio::task::spawn_blocking({
            let engine = engine.clone();
            move || engine.run_once()
        });

        tokio::select! {
            result = &mut cycle => log_cycle(result, interval),
            _ = &mut shutdown => {
                info!("Shutdown requested, stopping after the current unit");
                cancel.cancel();
                log_cycle(cycle.await, interval);
                break;
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(next_delay(interval, started.elapsed())) => {}
            _ = &mut shutdown => {
                info!("Shutdown requested");
                break;
            }
        }
    }

    info!("Sync worker stopped");
}

/// Time left in the current interval; a cycle that overran starts the
/// next one immediately
fn next_delay(interval: Duration, elapsed: Duration) -> Duration {
    interval.saturating_sub(elapsed)
}

fn log_cycle(result: Result<Result<SyncOutcome, SyncError>, JoinError>, interval: Duration) {
    match result {
        Ok(Ok(SyncOutcome::Skipped)) => info!("Previous sync still running, skipped this cycle"),
        Ok(Ok(_)) => {}
        Ok(Err(e)) => warn!("Sync cycle failed, next attempt in {}s: {}", interval.as_secs(), e),
        Err(e) => error!("Sync task panicked: {}", e),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
