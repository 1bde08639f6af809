//! Background driver: one scheduled tick per interval until cancelled.

use crate::scheduler::{BackupScheduler, TickResult};
use crate::utils::units::format_duration;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Tally of ticks run by [`run_loop`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub ticks: u64,
    pub succeeded: u64,
    pub skipped: u64,
    pub failed: u64,
}

impl LoopStats {
    fn record(&mut self, result: &TickResult) {
        self.ticks += 1;
        match result {
            TickResult::Skipped => self.skipped += 1,
            TickResult::Succeeded { .. } => self.succeeded += 1,
            TickResult::Failed { .. } => self.failed += 1,
        }
    }
}

/// Run a scheduled tick immediately and then every `interval` until `cancel`
/// fires. Failed ticks are logged and retried on the next interval.
pub async fn run_loop(
    scheduler: Arc<BackupScheduler>,
    interval: Duration,
    cancel: CancellationToken,
) -> LoopStats {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut stats = LoopStats::default();

    info!(interval = %format_duration(interval.as_secs()), "Backup loop started");

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let result = scheduler.run_tick(&cancel).await;
                if let TickResult::Failed { kind, cause } = &result {
                    error!(kind = %kind, cause = %cause, "Scheduled backup failed, retrying next interval");
                }
                stats.record(&result);
            }
        }
    }

    info!(
        ticks = stats.ticks,
        succeeded = stats.succeeded,
        skipped = stats.skipped,
        failed = stats.failed,
        "Backup loop stopped"
    );
    stats
}
