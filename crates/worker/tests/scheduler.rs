mod common;

use std::time::Duration;

use chrono::{FixedOffset, Utc};
use serde_json::json;

use common::{wait_for_status, Harness, ScriptedAdapter};
use ferry_core::run_events::{SEVERITY_ERROR, SOURCE_SCHEDULER};
use ferry_core::schedule::{IntervalUnit, Schedule};
use ferry_db::models::status::MigrationRunStatus;
use ferry_worker::Scheduler;

fn scheduler(h: &Harness) -> Scheduler {
    Scheduler::new(
        h.store.clone(),
        h.coordinator.clone(),
        FixedOffset::east_opt(0).unwrap(),
        Duration::from_millis(50),
        Duration::from_secs(60),
    )
}

fn every_second() -> Schedule {
    Schedule::Interval {
        every: 1,
        unit: IntervalUnit::Seconds,
    }
}

#[tokio::test]
async fn due_entry_starts_a_cron_run() {
    let h = Harness::new(ScriptedAdapter::default());
    h.adapter.set_table("users", 3);
    let migration_id = h.simple_migration("users");
    let scheduler = scheduler(&h);
    scheduler.upsert(migration_id, every_second());

    let at = Utc::now() + chrono::Duration::seconds(10);
    assert_eq!(scheduler.tick(at).await, vec![migration_id]);
    assert!(scheduler.next_fire(migration_id).unwrap() > at);

    let runs = h.store.runs_for(migration_id);
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].trigger, "cron");
    wait_for_status(&h.store, runs[0].id, MigrationRunStatus::Success).await;
}

#[tokio::test]
async fn entries_not_yet_due_do_nothing() {
    let h = Harness::new(ScriptedAdapter::default());
    let migration_id = h.simple_migration("users");
    let scheduler = scheduler(&h);
    scheduler.upsert(
        migration_id,
        Schedule::Interval {
            every: 1,
            unit: IntervalUnit::Hours,
        },
    );

    assert!(scheduler.tick(Utc::now()).await.is_empty());
    assert!(h.store.runs_for(migration_id).is_empty());
}

#[tokio::test]
async fn fire_is_skipped_while_a_run_is_in_progress() {
    let h = Harness::new(ScriptedAdapter::default());
    let migration_id = h.simple_migration("users");
    h.store
        .insert_run(migration_id, MigrationRunStatus::Running, "elsewhere");
    let scheduler = scheduler(&h);
    scheduler.upsert(migration_id, every_second());

    let at = Utc::now() + chrono::Duration::seconds(10);
    assert!(scheduler.tick(at).await.is_empty());
    assert_eq!(h.store.runs_for(migration_id).len(), 1);

    // The skipped fire was consumed, not queued.
    assert!(scheduler.tick(at).await.is_empty());
    assert!(scheduler.next_fire(migration_id).unwrap() > at);
}

#[tokio::test]
async fn start_failures_are_logged() {
    let h = Harness::new(ScriptedAdapter::default());
    let migration_id = h.simple_migration("users");
    h.store.update_migration(migration_id, |m| m.is_active = false);
    let scheduler = scheduler(&h);
    scheduler.upsert(migration_id, every_second());

    let at = Utc::now() + chrono::Duration::seconds(10);
    assert!(scheduler.tick(at).await.is_empty());

    let errors = h.store.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].severity, SEVERITY_ERROR);
    assert_eq!(errors[0].source, SOURCE_SCHEDULER);
    assert_eq!(errors[0].trigger.as_deref(), Some("cron"));
    assert_eq!(errors[0].migration_id, Some(migration_id));
}

#[tokio::test]
async fn refresh_tracks_active_scheduled_migrations() {
    let h = Harness::new(ScriptedAdapter::default());
    let configs = json!([]);
    let interval = json!({"type": "interval", "every": 5, "unit": "minutes"});

    let scheduled = h.store.add_migration(configs.clone(), json!([]), Some(interval.clone()));
    let inactive = h.store.add_migration(configs.clone(), json!([]), Some(interval.clone()));
    h.store.update_migration(inactive, |m| m.is_active = false);
    let unscheduled = h.store.add_migration(configs.clone(), json!([]), None);
    let invalid = h.store.add_migration(
        configs.clone(),
        json!([]),
        Some(json!({"type": "interval", "every": 0, "unit": "seconds"})),
    );

    let scheduler = scheduler(&h);
    assert_eq!(scheduler.refresh().await.unwrap(), 1);
    let first_fire = scheduler.next_fire(scheduled).unwrap();
    assert!(scheduler.next_fire(inactive).is_none());
    assert!(scheduler.next_fire(unscheduled).is_none());
    assert!(scheduler.next_fire(invalid).is_none());

    // Unchanged schedules keep their pending fire.
    assert_eq!(scheduler.refresh().await.unwrap(), 1);
    assert_eq!(scheduler.next_fire(scheduled), Some(first_fire));

    h.store.update_migration(scheduled, |m| m.cron_expression = None);
    assert_eq!(scheduler.refresh().await.unwrap(), 0);
    assert!(scheduler.is_empty());
}

#[tokio::test]
async fn upsert_and_remove() {
    let h = Harness::new(ScriptedAdapter::default());
    let scheduler = scheduler(&h);
    scheduler.upsert(7, every_second());
    assert_eq!(scheduler.len(), 1);
    assert!(scheduler.remove(7));
    assert!(!scheduler.remove(7));
    assert!(scheduler.is_empty());
}

#[tokio::test]
async fn run_loop_stops_on_cancel() {
    let h = Harness::new(ScriptedAdapter::default());
    let scheduler = std::sync::Arc::new(scheduler(&h));
    let cancel = tokio_util::sync::CancellationToken::new();

    let task = {
        let scheduler = std::sync::Arc::clone(&scheduler);
        let cancel = cancel.clone();
        tokio::spawn(async move { scheduler.run(cancel).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("scheduler loop exits")
        .unwrap();
}
