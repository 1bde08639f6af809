//! Monthly backup scheduling.
//!
//! A tick walks `CheckDue -> {Skip | EnsureSpace -> Execute -> Commit}`. Due-ness
//! is re-derived from the persisted month key on every tick, so a failed tick
//! needs no bookkeeping: the next one simply tries again.

pub mod lock;

use crate::config::{Config, CorruptStatePolicy};
use crate::executor::{entry_name, remove_stale_staging, BackupExecutor, CopyExecutor};
use crate::fs::probe::{FsProbe, SizeProbe};
use crate::retention::{EntryRemover, RetentionManager};
use crate::state::{MonthKey, RetentionState, StateStore};
use crate::utils::errors::{BackupError, ErrorKind, Result};
use crate::utils::units::format_bytes;
use chrono::NaiveDate;
use lock::DestinationLock;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Source of the current calendar date.
pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;
}

/// Local wall-clock date.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        chrono::Local::now().date_naive()
    }
}

/// How a tick was triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickMode {
    /// Interval or cron driven; skips when this month is already backed up.
    Scheduled,
    /// Explicit request; goes straight to the space check.
    OnDemand,
}

/// Outcome of one tick, as seen by a driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum TickResult {
    Skipped,
    Succeeded {
        entry: String,
        /// False when today's entry already existed and nothing was copied.
        created: bool,
        evicted: Vec<String>,
    },
    Failed {
        kind: ErrorKind,
        cause: String,
    },
}

impl TickResult {
    pub fn is_failed(&self) -> bool {
        matches!(self, TickResult::Failed { .. })
    }
}

/// The synchronous decision-and-action sequence behind a tick.
pub struct TickEngine {
    source: PathBuf,
    destination: PathBuf,
    min_free_reserve_bytes: u64,
    on_corrupt: CorruptStatePolicy,
    store: StateStore,
    retention: RetentionManager,
    probe: Arc<dyn SizeProbe>,
    executor: Arc<dyn BackupExecutor>,
    clock: Arc<dyn Clock>,
}

impl TickEngine {
    pub fn new(
        config: &Config,
        probe: Arc<dyn SizeProbe>,
        executor: Arc<dyn BackupExecutor>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let destination = config.backup.destination.clone();
        Self {
            source: config.backup.source.clone(),
            min_free_reserve_bytes: config.backup.min_free_reserve_bytes,
            on_corrupt: config.state.on_corrupt,
            store: StateStore::in_destination(&destination, &config.state.file_name),
            retention: RetentionManager::new(&destination, config.state.file_name.clone(), Arc::clone(&probe)),
            destination,
            probe,
            executor,
            clock,
        }
    }

    /// Replace how evicted entries are deleted.
    pub fn with_remover(mut self, remover: Arc<dyn EntryRemover>) -> Self {
        self.retention = self.retention.with_remover(remover);
        self
    }

    pub fn state_store(&self) -> &StateStore {
        &self.store
    }

    pub fn retention(&self) -> &RetentionManager {
        &self.retention
    }

    pub fn probe(&self) -> &dyn SizeProbe {
        self.probe.as_ref()
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    /// Load state, applying the configured corruption policy.
    pub fn load_state(&self) -> Result<RetentionState> {
        match self.store.load() {
            Err(BackupError::StateCorrupt { path, reason }) if self.on_corrupt == CorruptStatePolicy::Reset => {
                warn!(
                    path = %path.display(),
                    reason = %reason,
                    "State record is corrupt; treating it as empty, a backup will be taken"
                );
                Ok(RetentionState::default())
            }
            other => other,
        }
    }

    /// Run one tick.
    ///
    /// Under the destination lock, staging directories left by interrupted
    /// runs are swept first. When today's entry already exists the tick goes
    /// straight to Commit: EnsureSpace is not run, so nothing is evicted and
    /// a run that crashed between rename and commit finishes cleanly.
    pub fn tick(&self, mode: TickMode, cancel: &CancellationToken) -> Result<TickResult> {
        let today = self.clock.today();
        let month = MonthKey::from_date(today);

        // CheckDue is read-only so a skipped tick mutates nothing.
        if mode == TickMode::Scheduled && !self.load_state()?.is_due(month) {
            info!(month = %month, "Backup for this month already committed, skipping");
            return Ok(TickResult::Skipped);
        }

        std::fs::create_dir_all(&self.destination)?;
        let _lock = DestinationLock::acquire(&self.destination)?;

        // Re-check under the lock: another process may have committed meanwhile.
        let mut state = self.load_state()?;
        if mode == TickMode::Scheduled && !state.is_due(month) {
            info!(month = %month, "Backup committed by a concurrent run, skipping");
            return Ok(TickResult::Skipped);
        }
        if let Some(last) = state.last_backup_month.filter(|last| *last > month) {
            warn!(stored = %last, current = %month, "State records a later month than today");
        }

        remove_stale_staging(&self.destination)?;

        let name = entry_name(today);
        let (entry, created, evicted) = if self.destination.join(&name).exists() {
            info!(entry = %name, "Today's backup already exists, committing without copying");
            (name, false, Vec::new())
        } else {
            let evicted = self.ensure_space(cancel)?;
            if cancel.is_cancelled() {
                return Err(BackupError::Cancelled);
            }
            let entry = self
                .executor
                .create_entry(&self.source, &self.destination, today, cancel)?;
            (entry, true, evicted)
        };

        if state.advance_to(month) {
            self.store.save(&state)?;
        }
        info!(entry = %entry, month = %month, created, "Backup committed");

        Ok(TickResult::Succeeded {
            entry,
            created,
            evicted,
        })
    }

    /// EnsureSpace: free `source size + reserve` bytes, evicting if short.
    fn ensure_space(&self, cancel: &CancellationToken) -> Result<Vec<String>> {
        let projected = self.probe.tree_size(&self.source)?;
        let required = projected.saturating_add(self.min_free_reserve_bytes);
        let free = self.probe.free_space(&self.destination)?;

        info!(
            projected = %format_bytes(projected),
            required = %format_bytes(required),
            free = %format_bytes(free),
            "Space budget computed"
        );

        if free >= required {
            return Ok(Vec::new());
        }

        let report = self.retention.ensure_free_space(required, cancel)?;
        Ok(report.evicted)
    }
}

/// Entry point for drivers. Scheduled and on-demand ticks share one guard,
/// so they never overlap within a process; a file lock in the destination
/// extends that across processes.
pub struct BackupScheduler {
    engine: Arc<TickEngine>,
    tick_guard: Mutex<()>,
}

impl BackupScheduler {
    /// Scheduler over the real filesystem and wall clock.
    pub fn new(config: &Config) -> Self {
        Self::with_parts(config, Arc::new(FsProbe), Arc::new(CopyExecutor), Arc::new(SystemClock))
    }

    pub fn with_parts(
        config: &Config,
        probe: Arc<dyn SizeProbe>,
        executor: Arc<dyn BackupExecutor>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::from_engine(TickEngine::new(config, probe, executor, clock))
    }

    pub fn from_engine(engine: TickEngine) -> Self {
        Self {
            engine: Arc::new(engine),
            tick_guard: Mutex::new(()),
        }
    }

    pub fn engine(&self) -> &TickEngine {
        &self.engine
    }

    /// Scheduled tick: skips when this month is already backed up.
    pub async fn run_tick(&self, cancel: &CancellationToken) -> TickResult {
        self.run(TickMode::Scheduled, cancel).await
    }

    /// On-demand tick: bypasses the due check.
    pub async fn run_now(&self, cancel: &CancellationToken) -> TickResult {
        self.run(TickMode::OnDemand, cancel).await
    }

    async fn run(&self, mode: TickMode, cancel: &CancellationToken) -> TickResult {
        let _guard = self.tick_guard.lock().await;

        let engine = Arc::clone(&self.engine);
        let cancel = cancel.clone();
        let outcome = tokio::task::spawn_blocking(move || engine.tick(mode, &cancel)).await;

        match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                warn!(kind = %e.kind(), error = %e, "Backup tick failed");
                TickResult::Failed {
                    kind: e.kind(),
                    cause: e.to_string(),
                }
            }
            Err(e) => {
                warn!(error = %e, "Backup tick task panicked");
                TickResult::Failed {
                    kind: ErrorKind::Io,
                    cause: format!("tick task failed: {e}"),
                }
            }
        }
    }
}
