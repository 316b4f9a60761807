//! # Tash Process
//!
//! Runs external task processes without blocking the caller.
//! Includes the process runner, the platform process-group handling,
//! the task executor that publishes lifecycle events, and the one-shot
//! task lister.

pub mod executor;
pub mod list;
pub mod process;

pub use executor::{
    ExecutorConfig, ExecutorError, ExecutorState, TaskExecutor, CANCEL_REQUESTED, CANCEL_SENT,
};
pub use list::{list_tasks, ListConfig};
pub use process::{
    ExitOutcome, LineStream, PlatformProcessGroup, ProcessGroup, ProcessRunner, RunningProcess,
};
