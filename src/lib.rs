//! # Tash
//!
//! Runs Taskfile tasks from a terminal and streams their output live.
//!
//! ## Architecture
//!
//! Tash is organized as a workspace with multiple crates:
//!
//! 1. **tash-core** - Message bus, task event model, error types
//! 2. **tash-process** - Process runner, process groups, task executor, task listing
//! 3. **tash-settings** - Configuration files
//! 4. **tash** - Logging setup and the command line consumer
//!
//! The executor never talks to its consumer directly. Everything it has to
//! say (output lines, command state, completion, failures) goes over the
//! [`TaskBus`] on the topics named by [`TaskTopic`].

pub mod listing;

pub use listing::{format_task_list, join_printer, parse_task_list, TaskDescriptor};

pub use tash_core::{
    message_handler, CancelHandle, CommandState, Delivery, DeliveryReport, Error, MessageBus,
    MessageBusConfig, MessageHandler, OutputLine, ProcessError, ProcessSnapshot, Publisher,
    Result, SubscriptionError, SubscriptionKey, TaskBus, TaskFailure, TaskMessage, TaskTopic,
    Topic, TopicMessage,
};

pub use tash_process::{
    list_tasks, ExecutorConfig, ExecutorError, ExecutorState, ListConfig, TaskExecutor,
};

pub use tash_settings::{Config, SettingsError};

/// Package version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date, set by the build script
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human readable, multi-line
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

/// Initialize logging
///
/// Logs go to stderr; stdout is reserved for task output. `RUST_LOG`
/// overrides the default `info` level.
pub fn init_logging(format: LogFormat) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_level(true)
                    .with_thread_ids(true)
                    .with_line_number(true)
                    .pretty(),
            )
            .try_init()?,
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .json(),
            )
            .try_init()?,
    }

    Ok(())
}
