//! Error handling for Tash
//!
//! Provides error types for every layer of the core:
//! - Subscription errors (message bus registry)
//! - Process errors (spawning, waiting, exit classification, cancellation)
//!
//! All error types use `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Subscription error type
///
/// Returned synchronously from [`crate::msgbus::MessageBus::subscribe`];
/// a malformed subscribe request is never silently dropped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    /// The handler cannot accept messages (its receiving side is gone)
    #[error("Uninitialised subscriber channel")]
    InvalidHandler,

    /// A unique subscriber key could not be minted
    #[error("Error generating key: {0}")]
    KeyGeneration(String),

    /// The bus no longer accepts subscriptions
    #[error("Message bus is closed")]
    Closed,
}

/// Process error type
///
/// Represents every way a task execution attempt can end badly,
/// from failing to start the executable to a failed cancellation signal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessError {
    /// The executable could not be started
    #[error("failed to start {program}: {reason}")]
    Spawn {
        /// The executable that was requested.
        program: String,
        /// Why the OS refused to start it.
        reason: String,
    },

    /// A standard stream pipe could not be attached
    #[error("failed to attach {stream} pipe")]
    Pipe {
        /// Name of the stream ("stdout" or "stderr").
        stream: &'static str,
    },

    /// Waiting on the process failed
    #[error("failed waiting for process: {0}")]
    Wait(String),

    /// The process exited with a non-zero code
    #[error("task failed with exit code {code}")]
    Exit {
        /// The exit code reported by the OS.
        code: i32,
    },

    /// The process was terminated by a signal
    #[error("task terminated by signal {}", signal.map(|s| s.to_string()).unwrap_or_else(|| "unknown".to_string()))]
    Terminated {
        /// The signal number, when the platform reports one.
        signal: Option<i32>,
    },

    /// The interrupt/kill syscall itself failed
    #[error("Error cancelling task: {0}")]
    CancelSignal(String),
}

impl ProcessError {
    /// Create a spawn error from any displayable reason
    pub fn spawn(program: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Spawn {
            program: program.into(),
            reason: reason.to_string(),
        }
    }

    /// The exit code carried by this error, if any
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Exit { code } => Some(*code),
            _ => None,
        }
    }

    /// Check if this error happened before the process was running
    pub fn is_spawn_failure(&self) -> bool {
        matches!(self, Self::Spawn { .. } | Self::Pipe { .. })
    }
}

/// Main error type for Tash
#[derive(Error, Debug)]
pub enum Error {
    /// Subscription error
    #[error(transparent)]
    Subscription(#[from] SubscriptionError),

    /// Process error
    #[error(transparent)]
    Process(#[from] ProcessError),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other errors
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a message
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }
}

/// Result type using Tash Error
pub type Result<T> = std::result::Result<T, Error>;
