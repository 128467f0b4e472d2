//! Migration worker: drives runs, recovers orphans, fires schedules.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod process;
pub mod recovery;
pub mod scheduler;

pub use config::WorkerConfig;
pub use coordinator::{ActiveRun, RunCoordinator, RunOutcome, StartedRun};
pub use error::CoordinatorError;
pub use process::ProcessContext;
pub use recovery::{OrphanRecovery, RecoveryReport};
pub use scheduler::Scheduler;
