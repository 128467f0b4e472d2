use std::time::Duration;

/// Worker configuration loaded from environment variables.
///
/// Everything except `DATABASE_URL` has a default suitable for local
/// development.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Postgres URL for the runner's own tables.
    pub database_url: String,
    /// Upper bound of the state-store pool (default: `10`).
    pub db_max_connections: u32,
    /// How often due schedules are checked (default: 1 s).
    pub scheduler_tick: Duration,
    /// How often schedule definitions are reloaded (default: 60 s).
    pub schedule_refresh: Duration,
    /// Offset schedules are evaluated at, in minutes east of UTC (default: `0`).
    pub utc_offset_minutes: i32,
    /// How long shutdown waits for in-flight runs (default: 10 s).
    pub shutdown_timeout: Duration,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                        | Default  |
    /// |--------------------------------|----------|
    /// | `DATABASE_URL`                 | required |
    /// | `DB_MAX_CONNECTIONS`           | `10`     |
    /// | `SCHEDULER_TICK_MS`            | `1000`   |
    /// | `SCHEDULE_REFRESH_SECS`        | `60`     |
    /// | `SCHEDULER_UTC_OFFSET_MINUTES` | `0`      |
    /// | `SHUTDOWN_TIMEOUT_SECS`        | `10`     |
    pub fn from_env() -> Self {
        let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

        let db_max_connections: u32 = std::env::var("DB_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".into())
            .parse()
            .expect("DB_MAX_CONNECTIONS must be a valid u32");

        let scheduler_tick_ms: u64 = std::env::var("SCHEDULER_TICK_MS")
            .unwrap_or_else(|_| "1000".into())
            .parse()
            .expect("SCHEDULER_TICK_MS must be a valid u64");

        let schedule_refresh_secs: u64 = std::env::var("SCHEDULE_REFRESH_SECS")
            .unwrap_or_else(|_| "60".into())
            .parse()
            .expect("SCHEDULE_REFRESH_SECS must be a valid u64");

        let utc_offset_minutes: i32 = std::env::var("SCHEDULER_UTC_OFFSET_MINUTES")
            .unwrap_or_else(|_| "0".into())
            .parse()
            .expect("SCHEDULER_UTC_OFFSET_MINUTES must be a valid i32");

        let shutdown_timeout_secs: u64 = std::env::var("SHUTDOWN_TIMEOUT_SECS")
            .unwrap_or_else(|_| "10".into())
            .parse()
            .expect("SHUTDOWN_TIMEOUT_SECS must be a valid u64");

        Self {
            database_url,
            db_max_connections,
            scheduler_tick: Duration::from_millis(scheduler_tick_ms.max(1)),
            schedule_refresh: Duration::from_secs(schedule_refresh_secs.max(1)),
            utc_offset_minutes,
            shutdown_timeout: Duration::from_secs(shutdown_timeout_secs),
        }
    }
}
