//! Task event payloads.
//!
//! Everything here is a read-only copy. Consumers never get a live reference
//! to the process the executor owns; the only control they get is a
//! [`CancelHandle`].

use super::topic::TaskTopic;
use crate::error::ProcessError;
use crate::msgbus::TopicMessage;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

/// A single line of task output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    /// Line text without the trailing newline.
    pub text: String,
    /// Originating process; `None` for lines produced by the executor itself.
    pub pid: Option<u32>,
}

impl OutputLine {
    /// Line read from a running process
    pub fn from_process(pid: u32, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            pid: Some(pid),
        }
    }

    /// Informational line produced by the executor
    pub fn info(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            pid: None,
        }
    }
}

impl std::fmt::Display for OutputLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.text)
    }
}

/// Read-only snapshot of a started process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSnapshot {
    /// OS process id (also the process group id on POSIX).
    pub pid: u32,
    /// Task identifier passed to the executable.
    pub task: String,
    /// Executable that was started.
    pub program: String,
    /// When the process was started.
    pub started_at: DateTime<Utc>,
}

/// Request-only view of an execution's cancellation token
#[derive(Debug, Clone)]
pub struct CancelHandle(CancellationToken);

impl CancelHandle {
    /// Wrap a token
    pub fn new(token: CancellationToken) -> Self {
        Self(token)
    }

    /// Request cancellation of the execution
    pub fn cancel(&self) {
        self.0.cancel();
    }

    /// Check if cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        self.0.is_cancelled()
    }
}

/// Process handle and running flag as seen at one moment
#[derive(Debug, Clone, Default)]
pub struct CommandState {
    /// The running process, or `None` once it has exited or was never started.
    pub process: Option<ProcessSnapshot>,
    /// Whether the executor considers a process to be running.
    pub running: bool,
    /// Cancellation control for the running execution.
    pub cancel: Option<CancelHandle>,
}

impl CommandState {
    /// State announced when a process has started
    pub fn started(process: ProcessSnapshot, cancel: CancelHandle) -> Self {
        Self {
            process: Some(process),
            running: true,
            cancel: Some(cancel),
        }
    }

    /// State announced once the handle has been invalidated
    pub fn cleared() -> Self {
        Self::default()
    }
}

/// A terminal failure of one execution attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    /// Task identifier of the failed attempt.
    pub task: String,
    /// What went wrong.
    pub error: ProcessError,
    /// Whether cancellation had been requested before the failure.
    pub cancelled: bool,
}

impl TaskFailure {
    /// Create a new failure
    pub fn new(task: impl Into<String>, error: ProcessError) -> Self {
        Self {
            task: task.into(),
            error,
            cancelled: false,
        }
    }

    /// Mark the failure as the result of a cancellation request
    pub fn cancelled(mut self) -> Self {
        self.cancelled = true;
        self
    }
}

impl std::fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.cancelled {
            write!(f, "task {} cancelled: {}", self.task, self.error)
        } else {
            write!(f, "task {}: {}", self.task, self.error)
        }
    }
}

/// Event published by the task executor and the task lister
#[derive(Debug, Clone)]
pub enum TaskMessage {
    /// Standard output line
    Output(OutputLine),
    /// Standard error line
    ErrorOutput(OutputLine),
    /// Terminal failure, or a failed cancellation signal
    Error(TaskFailure),
    /// Process handle snapshot
    Command(CommandState),
    /// Successful completion
    Done {
        /// Task identifier that completed.
        task: String,
    },
    /// Raw task list produced by the lister
    ListDone(String),
    /// Task list refresh failure
    ListError(String),
}

impl TaskMessage {
    /// Topic this message is published on
    pub fn topic(&self) -> TaskTopic {
        match self {
            Self::Output(_) => TaskTopic::Output,
            Self::ErrorOutput(_) => TaskTopic::OutputErr,
            Self::Error(_) => TaskTopic::Error,
            Self::Command(_) => TaskTopic::Command,
            Self::Done { .. } => TaskTopic::Done,
            Self::ListDone(_) => TaskTopic::ListDone,
            Self::ListError(_) => TaskTopic::ListError,
        }
    }

    /// Wrap the message in an envelope addressed to its topic
    pub fn into_topic_message(self) -> TopicMessage<TaskMessage> {
        TopicMessage::new(self.topic(), self)
    }

    /// Check if this message ends an execution attempt
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Done { .. } => true,
            Self::Error(failure) => !matches!(failure.error, ProcessError::CancelSignal(_)),
            _ => false,
        }
    }
}

impl From<TaskMessage> for TopicMessage<TaskMessage> {
    fn from(msg: TaskMessage) -> Self {
        msg.into_topic_message()
    }
}
