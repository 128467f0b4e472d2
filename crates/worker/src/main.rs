use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ferry_core::schedule::utc_offset;
use ferry_db::{PgRunStore, RunStore};
use ferry_events::EventBus;
use ferry_sql::{SqlAdapter, SqlxAdapter};
use ferry_worker::{OrphanRecovery, ProcessContext, RunCoordinator, Scheduler, WorkerConfig};

const DEFAULT_LOG_FILTER: &str = "ferry_worker=debug,ferry_pipeline=debug,ferry_sql=info";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    init_tracing();

    // --- Configuration ---
    let config = WorkerConfig::from_env();
    let process = ProcessContext::new();
    tracing::info!(
        instance_id = %process.instance_id,
        pid = process.pid,
        "Worker starting",
    );

    // --- Database ---
    let pool = ferry_db::create_pool(&config.database_url, config.db_max_connections)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connection pool created");

    ferry_db::health_check(&pool)
        .await
        .context("Database health check failed")?;
    tracing::info!("Database health check passed");

    ferry_db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database migrations applied");

    // --- Event bus ---
    let event_bus = Arc::new(EventBus::default());
    tracing::info!("Event bus created");

    // --- Coordinator ---
    let shutdown = CancellationToken::new();
    let store: Arc<dyn RunStore> = Arc::new(PgRunStore::new(pool));
    let adapter: Arc<dyn SqlAdapter> = Arc::new(SqlxAdapter::new());
    let coordinator = RunCoordinator::new(
        Arc::clone(&store),
        adapter,
        Arc::clone(&event_bus),
        process,
        shutdown.clone(),
    );

    // --- Orphan recovery (background) ---
    let recovery_handle = OrphanRecovery::new(Arc::clone(&store), Arc::clone(&coordinator)).spawn();

    // --- Scheduler ---
    let offset = utc_offset(config.utc_offset_minutes).context("Invalid scheduler UTC offset")?;
    let scheduler = Scheduler::new(
        Arc::clone(&store),
        Arc::clone(&coordinator),
        offset,
        config.scheduler_tick,
        config.schedule_refresh,
    );
    let scheduler_cancel = shutdown.child_token();
    let scheduler_handle = tokio::spawn(async move {
        scheduler.run(scheduler_cancel).await;
    });

    tracing::info!("Worker services started (recovery, scheduler)");

    shutdown_signal().await;

    // --- Shutdown ---
    shutdown.cancel();

    let _ = tokio::time::timeout(Duration::from_secs(5), scheduler_handle).await;
    tracing::info!("Scheduler stopped");

    if !recovery_handle.is_finished() {
        recovery_handle.abort();
        tracing::warn!("Orphan recovery aborted before completion");
    }

    let active = coordinator.active_runs().len();
    tracing::info!(active, "Waiting for run drivers to stop");
    coordinator.drain(config.shutdown_timeout).await;

    drop(event_bus);
    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Human-readable output by default, JSON lines when `LOG_FORMAT=json`.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
