mod common;

use backup_keeper::executor::CopyExecutor;
use backup_keeper::state::{StateStore, DEFAULT_STATE_FILE};
use backup_keeper::{BackupScheduler, ErrorKind, TickResult};
use common::{date, FixedClock, FixedVolume, Workspace};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const GB: u64 = 1_000;

fn scheduler(ws: &Workspace, reserve: u64, capacity: u64, today: chrono::NaiveDate) -> BackupScheduler {
    BackupScheduler::with_parts(
        &ws.config(reserve),
        Arc::new(FixedVolume {
            destination: ws.destination.clone(),
            capacity,
        }),
        Arc::new(CopyExecutor),
        Arc::new(FixedClock(today)),
    )
}

#[tokio::test]
async fn low_space_scenario_replaces_old_entry() {
    // Source 2, reserve 5, one prior entry of 3 on a volume with 4 free.
    let ws = Workspace::new();
    ws.source_file("data/big.bin", 2 * GB as usize);
    ws.entry("backup_2026-09-15", 3 * GB as usize);

    let scheduler = scheduler(&ws, 5 * GB, 7 * GB, date(2026, 10, 19));
    let result = scheduler.run_tick(&CancellationToken::new()).await;

    assert_eq!(
        result,
        TickResult::Succeeded {
            entry: "backup_2026-10-19".into(),
            created: true,
            evicted: vec!["backup_2026-09-15".into()],
        }
    );
    assert_eq!(ws.listing(), vec!["backup_2026-10-19", DEFAULT_STATE_FILE]);
}

#[tokio::test]
async fn evicts_in_age_order_and_no_more_than_needed() {
    let ws = Workspace::new();
    ws.source_file("a.bin", 100);
    ws.entry("backup_2026-07-01", 100);
    ws.entry("backup_2026-08-01", 100);
    ws.entry("backup_2026-09-01", 100);

    // 300 used of 400; required 100 + 200 reserve = 300, so two must go.
    let scheduler = scheduler(&ws, 200, 400, date(2026, 10, 1));
    let result = scheduler.run_tick(&CancellationToken::new()).await;

    match result {
        TickResult::Succeeded { evicted, .. } => {
            assert_eq!(evicted, vec!["backup_2026-07-01", "backup_2026-08-01"]);
        }
        other => panic!("expected success, got {other:?}"),
    }
    assert_eq!(
        ws.listing(),
        vec!["backup_2026-09-01", "backup_2026-10-01", DEFAULT_STATE_FILE]
    );
}

#[tokio::test]
async fn exhausted_destination_fails_without_copying() {
    let ws = Workspace::new();
    ws.source_file("a.bin", 500);

    let scheduler = scheduler(&ws, 1_000, 1_000, date(2026, 10, 19));
    match scheduler.run_tick(&CancellationToken::new()).await {
        TickResult::Failed { kind, .. } => assert_eq!(kind, ErrorKind::InsufficientSpace),
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(ws.listing().is_empty());
}

#[tokio::test]
async fn commit_survives_restart() {
    let ws = Workspace::new();
    ws.source_file("a.bin", 10);

    {
        let scheduler = scheduler(&ws, 0, 10_000, date(2026, 10, 19));
        assert!(matches!(
            scheduler.run_tick(&CancellationToken::new()).await,
            TickResult::Succeeded { .. }
        ));
    }

    // A fresh store and scheduler stand in for a restarted process.
    let store = StateStore::in_destination(&ws.destination, DEFAULT_STATE_FILE);
    assert_eq!(
        store.load().unwrap().last_backup_month.map(|m| m.to_string()).as_deref(),
        Some("2026-10")
    );

    let restarted = scheduler(&ws, 0, 10_000, date(2026, 10, 20));
    assert_eq!(restarted.run_tick(&CancellationToken::new()).await, TickResult::Skipped);
}

#[tokio::test]
async fn repeated_ticks_leave_one_entry_per_day() {
    let ws = Workspace::new();
    ws.source_file("nested/deeper/file.txt", 64);

    let scheduler = scheduler(&ws, 0, 10_000, date(2026, 10, 19));
    let cancel = CancellationToken::new();

    assert!(matches!(scheduler.run_tick(&cancel).await, TickResult::Succeeded { created: true, .. }));
    assert_eq!(scheduler.run_tick(&cancel).await, TickResult::Skipped);
    assert!(matches!(
        scheduler.run_now(&cancel).await,
        TickResult::Succeeded { created: false, .. }
    ));

    assert_eq!(ws.listing(), vec!["backup_2026-10-19", DEFAULT_STATE_FILE]);
    assert!(ws
        .destination
        .join("backup_2026-10-19/nested/deeper/file.txt")
        .exists());
}

#[tokio::test]
async fn default_scheduler_uses_real_filesystem() {
    let ws = Workspace::new();
    ws.source_file("hello.txt", 5);

    let scheduler = BackupScheduler::new(&ws.config(0));
    let cancel = CancellationToken::new();

    assert!(matches!(scheduler.run_tick(&cancel).await, TickResult::Succeeded { .. }));
    assert_eq!(scheduler.run_tick(&cancel).await, TickResult::Skipped);
    assert_eq!(ws.listing().len(), 2);
}
