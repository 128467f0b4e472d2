mod common;

use assert_matches::assert_matches;
use serde_json::json;

use common::{wait_for_status, Harness, ScriptedAdapter};
use ferry_core::run_events::{EVENT_MIGRATION_RUN_CHANGED, SEVERITY_ERROR, SOURCE_RUNNER};
use ferry_core::run_lifecycle::RunTrigger;
use ferry_db::models::status::MigrationRunStatus;
use ferry_worker::{CoordinatorError, RunOutcome};

#[tokio::test]
async fn run_completes_and_publishes_each_progress_update() {
    let h = Harness::new(ScriptedAdapter::default());
    h.adapter.set_table("users", 150);
    let migration_id = h.simple_migration("users");
    let mut rx = h.events.subscribe();

    let (run_id, outcome) = h
        .coordinator
        .run_to_completion(migration_id, RunTrigger::Manual)
        .await
        .unwrap();
    assert_eq!(outcome, RunOutcome::Success);

    let run = h.store.run(run_id);
    assert_eq!(run.status(), Some(MigrationRunStatus::Success));
    assert_eq!(run.progress, vec![100]);
    assert_eq!(run.trigger, "manual");
    assert!(run.started_at.is_some());
    assert!(run.finished_at.is_some());
    assert!(h.coordinator.process().owns(run.instance_id()));

    let mut snapshots = Vec::new();
    while let Ok(event) = rx.try_recv() {
        assert_eq!(event.event_type, EVENT_MIGRATION_RUN_CHANGED);
        assert_eq!(event.source_entity_id, Some(run_id));
        snapshots.push(event.payload);
    }
    let statuses: Vec<&str> = snapshots.iter().filter_map(|p| p["status"].as_str()).collect();
    assert_eq!(statuses.first(), Some(&"pending"));
    assert_eq!(statuses.last(), Some(&"success"));
    assert!(snapshots.iter().any(|p| p["progress"] == json!([50])));
    assert!(snapshots.iter().any(|p| p["progress"] == json!([100])));
    assert!(h.coordinator.active_runs().is_empty());
}

#[tokio::test]
async fn inactive_and_unknown_migrations_are_refused() {
    let h = Harness::new(ScriptedAdapter::default());
    let migration_id = h.simple_migration("users");
    h.store.update_migration(migration_id, |m| m.is_active = false);

    assert_matches!(
        h.coordinator.start(migration_id, RunTrigger::Api).await,
        Err(CoordinatorError::Inactive(id)) if id == migration_id
    );
    assert_matches!(
        h.coordinator.start(9_999, RunTrigger::Api).await,
        Err(CoordinatorError::NotFound { id: 9_999, .. })
    );
    assert!(h.store.runs_for(migration_id).is_empty());
}

#[tokio::test]
async fn stage_failure_fails_the_run_and_logs_it() {
    let h = Harness::new(ScriptedAdapter::default());
    h.adapter.set_table("users", 3);
    let source = h.store.add_data_source("sqlite");
    let migration_id = h.store.add_migration(
        json!([
            {"id": "users", "type": "sql",
             "params": {"dataSourceId": source, "query": "SELECT * FROM users"}},
            {"id": "joined", "type": "merge",
             "params": {"leftDatasetId": "users", "rightDatasetId": "orders", "rules": []}}
        ]),
        json!([]),
        None,
    );

    let (run_id, outcome) = h
        .coordinator
        .run_to_completion(migration_id, RunTrigger::Cron)
        .await
        .unwrap();
    assert_matches!(outcome, RunOutcome::Failed(ref msg) if msg.contains("orders"));

    let run = h.store.run(run_id);
    assert_eq!(run.status(), Some(MigrationRunStatus::Failed));
    assert!(run.finished_at.is_some());
    assert_eq!(run.error.as_deref(), Some("Stage 'joined' references unknown dataset 'orders'"));

    let errors = h.store.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].severity, SEVERITY_ERROR);
    assert_eq!(errors[0].source, SOURCE_RUNNER);
    assert_eq!(errors[0].trigger.as_deref(), Some("cron"));
    assert_eq!(errors[0].run_id, Some(run_id));
    assert_eq!(errors[0].migration_id, Some(migration_id));
    assert!(errors[0].stack.as_deref().unwrap_or_default().contains("ConfigReference"));
}

#[tokio::test]
async fn missing_data_source_fails_the_run() {
    let h = Harness::new(ScriptedAdapter::default());
    let migration_id = h.store.add_migration(
        json!([{"id": "users", "type": "sql",
                "params": {"dataSourceId": 999, "query": "SELECT * FROM users"}}]),
        json!([]),
        None,
    );

    let (_, outcome) = h
        .coordinator
        .run_to_completion(migration_id, RunTrigger::Manual)
        .await
        .unwrap();
    assert_eq!(outcome, RunOutcome::Failed("Data source 999 not found".into()));
}

#[tokio::test]
async fn stop_cancels_a_running_run_once() {
    let (adapter, gate) = ScriptedAdapter::gated();
    let h = Harness::new(adapter);
    h.adapter.set_table("users", 250);
    let migration_id = h.simple_migration("users");

    let started = h.coordinator.start(migration_id, RunTrigger::Manual).await.unwrap();
    let run_id = started.run.id;
    wait_for_status(&h.store, run_id, MigrationRunStatus::Running).await;

    assert!(h.coordinator.stop(run_id).await.unwrap());
    gate.add_permits(10);

    assert_eq!(started.outcome().await.unwrap(), RunOutcome::Canceled);
    let run = h.store.run(run_id);
    assert_eq!(run.status(), Some(MigrationRunStatus::Canceled));
    assert!(run.finished_at.is_some());

    assert!(!h.coordinator.stop(run_id).await.unwrap());
    assert!(h.coordinator.active_runs().is_empty());
}

#[tokio::test]
async fn second_start_is_refused_while_running() {
    let (adapter, gate) = ScriptedAdapter::gated();
    let h = Harness::new(adapter);
    h.adapter.set_table("users", 10);
    let migration_id = h.simple_migration("users");

    let started = h.coordinator.start(migration_id, RunTrigger::Manual).await.unwrap();
    assert!(h.coordinator.is_running(migration_id));
    assert_matches!(
        h.coordinator.start(migration_id, RunTrigger::Api).await,
        Err(CoordinatorError::AlreadyRunning(id)) if id == migration_id
    );

    let active = h.coordinator.active_runs();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].run_id, started.run.id);
    assert_eq!(active[0].migration_id, migration_id);

    gate.add_permits(10);
    assert_eq!(started.outcome().await.unwrap(), RunOutcome::Success);
    assert!(!h.coordinator.is_running(migration_id));
    assert_eq!(h.store.runs_for(migration_id).len(), 1);
}

#[tokio::test]
async fn save_mappings_write_every_final_result() {
    let h = Harness::new(ScriptedAdapter::default());
    h.adapter.set_table("users", 150);
    let source = h.store.add_data_source("sqlite");
    let migration_id = h.store.add_migration(
        json!([{"id": "users", "type": "sql",
                "params": {"dataSourceId": source, "query": "SELECT * FROM users"}}]),
        json!([{"dataSourceId": source, "table": "archive",
                "columns": [{"source": "id", "target": "id"},
                            {"source": "label", "target": "label"}]}]),
        None,
    );

    let (_, outcome) = h
        .coordinator
        .run_to_completion(migration_id, RunTrigger::Manual)
        .await
        .unwrap();
    assert_eq!(outcome, RunOutcome::Success);

    let statements = h.adapter.statements();
    assert_eq!(statements.len(), 2);
    assert!(statements[0]
        .sql
        .starts_with("INSERT INTO archive (id, label) VALUES ($1, $2), ($3, $4)"));
    assert_eq!(statements[0].variables.len(), 200);
    assert_eq!(statements[1].variables.len(), 100);
}

#[tokio::test]
async fn shutdown_interrupts_and_leaves_the_row_for_recovery() {
    let (adapter, gate) = ScriptedAdapter::gated();
    let h = Harness::new(adapter);
    h.adapter.set_table("users", 250);
    let migration_id = h.simple_migration("users");

    let started = h.coordinator.start(migration_id, RunTrigger::Manual).await.unwrap();
    let run_id = started.run.id;
    wait_for_status(&h.store, run_id, MigrationRunStatus::Running).await;

    h.shutdown.cancel();
    gate.add_permits(10);

    assert_eq!(started.outcome().await.unwrap(), RunOutcome::Interrupted);
    let run = h.store.run(run_id);
    assert_eq!(run.status(), Some(MigrationRunStatus::Running));
    assert!(run.finished_at.is_none());
    assert!(h.coordinator.drain(std::time::Duration::from_secs(1)).await);
}

#[tokio::test]
async fn migration_params_reach_the_first_stage() {
    let h = Harness::new(ScriptedAdapter::default());
    h.adapter.set_table("tenant_rows", 1);
    let source = h.store.add_data_source("sqlite");
    let migration_id = h.store.add_migration(
        json!([{"id": "rows", "type": "sql",
                "params": {"dataSourceId": source,
                           "query": "SELECT * FROM tenant_rows WHERE tenant = {{tenant}}"}}]),
        json!([]),
        None,
    );
    h.store.update_migration(migration_id, |m| {
        m.params = json!([{"key": "tenant", "type": "number", "value": 3}]);
    });

    let (_, outcome) = h
        .coordinator
        .run_to_completion(migration_id, RunTrigger::Manual)
        .await
        .unwrap();
    assert_eq!(outcome, RunOutcome::Success);

    // Without the migration param the placeholder would not resolve.
    h.store.update_migration(migration_id, |m| m.params = json!([]));
    let (_, outcome) = h
        .coordinator
        .run_to_completion(migration_id, RunTrigger::Manual)
        .await
        .unwrap();
    assert_matches!(outcome, RunOutcome::Failed(ref msg) if msg.contains("tenant"));
}
