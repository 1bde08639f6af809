//! Backup Keeper - Main entry point
//!
//! Runs the monthly backup engine as a daemon, as a single tick, or on demand.

use anyhow::Result;
use backup_keeper::{
    config::Config,
    daemon::{runner, shutdown::ShutdownCoordinator},
    utils::{self, units::format_bytes},
    BackupScheduler, TickResult,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (defaults to BACKUP_* environment variables)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Tick every `tick_interval_secs` until SIGINT/SIGTERM
    Daemon,
    /// Take a backup now, even if this month is already covered
    RunNow,
    /// Run a single scheduled tick (for cron-style drivers)
    Tick,
    /// Show the last committed month, stored entries and free space
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let _ = dotenvy::dotenv();

    // Load configuration
    let config = match &args.config {
        Some(path) => {
            let mut config = Config::from_file(path)?;
            config.apply_env_overrides()?;
            config
        }
        None => Config::from_env()?,
    };
    config.validate()?;

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    tracing::info!(
        "Starting backup-keeper v{} ({} -> {})",
        env!("CARGO_PKG_VERSION"),
        config.backup.source.display(),
        config.backup.destination.display()
    );

    std::fs::create_dir_all(&config.backup.destination)?;
    let scheduler = Arc::new(BackupScheduler::new(&config));

    match args.command {
        Command::Daemon => run_daemon(scheduler, &config).await,
        Command::RunNow => {
            let result = with_signals(|cancel| async move { scheduler.run_now(&cancel).await }).await;
            report(result)
        }
        Command::Tick => {
            let result = with_signals(|cancel| async move { scheduler.run_tick(&cancel).await }).await;
            report(result)
        }
        Command::Status => print_status(&scheduler),
    }
}

async fn run_daemon(scheduler: Arc<BackupScheduler>, config: &Config) -> Result<()> {
    let shutdown = ShutdownCoordinator::new();
    let interval = Duration::from_secs(config.backup.tick_interval_secs);

    let loop_handle = tokio::spawn(runner::run_loop(scheduler, interval, shutdown.token()));

    shutdown.wait_for_signal().await?;

    // The loop finishes the current file or eviction before returning.
    match loop_handle.await {
        Ok(stats) => tracing::info!(ticks = stats.ticks, "Daemon shutdown complete"),
        Err(e) => tracing::error!("Backup loop panicked: {}", e),
    }

    Ok(())
}

/// Run `tick` with a token that SIGINT/SIGTERM cancels.
async fn with_signals<F, Fut>(tick: F) -> TickResult
where
    F: FnOnce(tokio_util::sync::CancellationToken) -> Fut,
    Fut: std::future::Future<Output = TickResult>,
{
    let shutdown = ShutdownCoordinator::new();
    let token = shutdown.token();

    let signals = tokio::spawn(async move {
        if let Err(e) = shutdown.wait_for_signal().await {
            tracing::warn!("Failed to install signal handlers: {}", e);
        }
    });

    let result = tick(token).await;
    signals.abort();
    result
}

fn report(result: TickResult) -> Result<()> {
    match result {
        TickResult::Skipped => {
            tracing::info!("Nothing to do: this month is already backed up");
            Ok(())
        }
        TickResult::Succeeded { entry, created, evicted } => {
            tracing::info!(
                entry = %entry,
                created,
                evicted = evicted.len(),
                "Backup tick succeeded"
            );
            Ok(())
        }
        TickResult::Failed { kind, cause } => anyhow::bail!("backup tick failed ({kind}): {cause}"),
    }
}

fn print_status(scheduler: &BackupScheduler) -> Result<()> {
    let engine = scheduler.engine();
    let state = engine.load_state()?;
    let month = backup_keeper::state::MonthKey::from_date(engine.today());

    match state.last_backup_month {
        Some(last) => println!("Last backup month: {last}"),
        None => println!("Last backup month: never"),
    }
    println!("Backup due for {month}: {}", if state.is_due(month) { "yes" } else { "no" });

    let destination = engine.retention().destination();
    let free = engine.probe().free_space(destination)?;
    println!("Free space on {}: {}", destination.display(), format_bytes(free));

    let entries = engine.retention().list_entries()?;
    println!("Entries ({}, oldest first):", entries.len());
    for entry in entries {
        let size = engine.probe().tree_size(&entry.path)?;
        let files = backup_keeper::fs::walker::count_files(&entry.path)?;
        println!(
            "  {:<24} {:>12} {:>8} files  created {}",
            entry.name,
            format_bytes(size),
            files,
            entry.created_at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M")
        );
    }

    Ok(())
}
