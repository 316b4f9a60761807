//! Task executor
//!
//! Drives one task execution at a time through
//! `Idle -> Starting -> Running -> {Completed | Failed | Cancelled}` and
//! turns every lifecycle step into a [`TaskMessage`] on the bus.
//!
//! Publishing never waits on consumers. Ordering comes from publishing in
//! sequence, since the bus hands each consumer its envelopes in publish order:
//! - lines of one stream are published in the order they were read
//! - all output is published before the terminal event
//! - the cleared command state is published before the terminal event
//!
//! Batch execution is left to the consumer, which calls [`TaskExecutor::start`]
//! again from its `Done` handler.

use crate::process::{ExitOutcome, LineStream, ProcessGroup, ProcessRunner, RunningProcess};
use chrono::Utc;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tash_core::{
    CancelHandle, CommandState, OutputLine, ProcessError, ProcessSnapshot, Publisher,
    TaskFailure, TaskMessage,
};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Informational line published when cancellation is requested
pub const CANCEL_REQUESTED: &str = "Task cancellation requested";

/// Informational line published once the interrupt has been sent
pub const CANCEL_SENT: &str = "Task cancelled";

/// Configuration for the task executor
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Executable that runs tasks.
    pub program: String,
    /// Arguments placed before the task id.
    pub base_args: Vec<String>,
    /// Working directory; inherited when `None`.
    pub current_dir: Option<PathBuf>,
    /// How long to wait after a failed cancellation signal before killing the child.
    pub cancel_grace: Duration,
    /// How long to keep draining output pipes after the process exits.
    pub drain_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            program: "task".to_string(),
            base_args: Vec::new(),
            current_dir: None,
            cancel_grace: Duration::from_secs(5),
            drain_timeout: Duration::from_secs(2),
        }
    }
}

/// Executor lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorState {
    /// Nothing has run yet, or the last start failed to spawn
    Idle,
    /// An execution has been claimed and the process is being spawned
    Starting,
    /// The process is running
    Running,
    /// The last execution exited cleanly
    Completed,
    /// The last execution failed
    Failed,
    /// The last execution ended after a cancellation request
    Cancelled,
}

impl ExecutorState {
    /// Check if an execution is in flight
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }
}

impl std::fmt::Display for ExecutorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Starting => write!(f, "Starting"),
            Self::Running => write!(f, "Running"),
            Self::Completed => write!(f, "Completed"),
            Self::Failed => write!(f, "Failed"),
            Self::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Errors returned synchronously by the executor
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutorError {
    /// Another execution is still in flight
    #[error("task {0} is already running")]
    AlreadyRunning(String),
}

struct Execution {
    task: String,
    /// `None` once the process has exited and cancelling has no effect.
    token: Option<CancellationToken>,
}

struct Shared {
    state: ExecutorState,
    current: Option<Execution>,
}

type TaskPublisher = Arc<dyn Publisher<TaskMessage>>;

/// Runs tasks one at a time and publishes their lifecycle
///
/// Cloning is cheap; clones drive the same executor.
#[derive(Clone)]
pub struct TaskExecutor {
    bus: TaskPublisher,
    runner: ProcessRunner,
    config: ExecutorConfig,
    shared: Arc<Mutex<Shared>>,
}

impl TaskExecutor {
    /// Create an executor publishing on `bus`
    pub fn new(bus: impl Publisher<TaskMessage> + 'static, config: ExecutorConfig) -> Self {
        let runner = ProcessRunner::new(config.program.clone())
            .with_args(config.base_args.clone())
            .with_current_dir(config.current_dir.clone());
        Self {
            bus: Arc::new(bus),
            runner,
            config,
            shared: Arc::new(Mutex::new(Shared {
                state: ExecutorState::Idle,
                current: None,
            })),
        }
    }

    /// Run task processes in `group` instead of the platform default
    pub fn with_process_group(mut self, group: Arc<dyn ProcessGroup>) -> Self {
        self.runner = self.runner.with_process_group(group);
        self
    }

    /// Current lifecycle state
    pub fn state(&self) -> ExecutorState {
        self.shared.lock().state
    }

    /// Task id of the execution in flight
    pub fn current_task(&self) -> Option<String> {
        self.shared.lock().current.as_ref().map(|e| e.task.clone())
    }

    /// Check if an execution is in flight
    pub fn is_running(&self) -> bool {
        self.shared.lock().current.is_some()
    }

    /// Start `task` on a background task
    ///
    /// The returned handle resolves to the terminal state once the terminal
    /// event has been published. Fails if an execution is already in flight.
    pub fn start(&self, task: impl Into<String>) -> Result<JoinHandle<ExecutorState>, ExecutorError> {
        let task = task.into();
        let token = self.claim(&task)?;
        let this = self.clone();
        Ok(tokio::spawn(async move { this.run(task, token).await }))
    }

    /// Run `task` to completion on the calling task
    pub async fn execute(&self, task: impl Into<String>) -> Result<ExecutorState, ExecutorError> {
        let task = task.into();
        let token = self.claim(&task)?;
        Ok(self.run(task, token).await)
    }

    /// Request cancellation of the execution in flight
    ///
    /// Returns false when nothing is running, or when the process has already
    /// exited and only the terminal events are still being published. Calling
    /// it repeatedly is harmless.
    pub fn cancel(&self) -> bool {
        match &self.shared.lock().current {
            Some(Execution {
                task,
                token: Some(token),
            }) => {
                tracing::info!("cancellation requested for task {}", task);
                token.cancel();
                true
            }
            _ => false,
        }
    }

    /// Get the current configuration
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    fn claim(&self, task: &str) -> Result<CancellationToken, ExecutorError> {
        let mut shared = self.shared.lock();
        if let Some(execution) = &shared.current {
            return Err(ExecutorError::AlreadyRunning(execution.task.clone()));
        }
        let token = CancellationToken::new();
        shared.current = Some(Execution {
            task: task.to_string(),
            token: Some(token.clone()),
        });
        shared.state = ExecutorState::Starting;
        Ok(token)
    }

    fn set_state(&self, state: ExecutorState) {
        self.shared.lock().state = state;
    }

    /// Stop accepting cancellation; the process is gone
    fn disarm(&self) {
        if let Some(execution) = self.shared.lock().current.as_mut() {
            execution.token = None;
        }
    }

    /// Free the execution slot. Must run before any terminal event is
    /// published: consumers start the next task from their `Done` handler.
    fn release(&self, state: ExecutorState) {
        let mut shared = self.shared.lock();
        shared.state = state;
        shared.current = None;
    }

    fn publish(&self, msg: TaskMessage) {
        self.bus.publish(msg.into_topic_message());
    }

    async fn run(&self, task: String, token: CancellationToken) -> ExecutorState {
        let (state, outcome) = self.drive(&task, &token).await;
        self.release(state);

        match &outcome {
            TaskMessage::Done { .. } => tracing::info!("task {} completed", task),
            TaskMessage::Error(failure) => tracing::warn!("{}", failure),
            _ => {}
        }

        self.publish(TaskMessage::Command(CommandState::cleared()));
        self.publish(outcome);
        state
    }

    async fn drive(&self, task: &str, token: &CancellationToken) -> (ExecutorState, TaskMessage) {
        let mut process = match self.runner.spawn([task]) {
            Ok(process) => process,
            Err(e) => {
                tracing::error!("failed to start task {}: {}", task, e);
                return (
                    ExecutorState::Idle,
                    TaskMessage::Error(TaskFailure::new(task, e)),
                );
            }
        };

        let pid = process.pid();
        let snapshot = ProcessSnapshot {
            pid,
            task: task.to_string(),
            program: self.runner.program().to_string(),
            started_at: Utc::now(),
        };
        tracing::info!("task {} started (pid {})", task, pid);

        self.set_state(ExecutorState::Running);
        self.publish(TaskMessage::Command(CommandState::started(
            snapshot,
            CancelHandle::new(token.clone()),
        )));

        let pumps = [
            process
                .take_stdout()
                .map(|lines| tokio::spawn(pump(self.bus.clone(), lines, pid, TaskMessage::Output))),
            process
                .take_stderr()
                .map(|lines| tokio::spawn(pump(self.bus.clone(), lines, pid, TaskMessage::ErrorOutput))),
        ];

        let (outcome, cancel_requested) = self.supervise(&mut process, task, token).await;
        self.disarm();

        let drain_deadline = Instant::now() + self.config.drain_timeout;
        for mut pump in pumps.into_iter().flatten() {
            if tokio::time::timeout_at(drain_deadline, &mut pump)
                .await
                .is_err()
            {
                tracing::warn!("output of task {} still open after exit, detaching", task);
                pump.abort();
            }
        }

        let failure = match outcome.and_then(ExitOutcome::into_result) {
            Ok(()) => {
                return (
                    ExecutorState::Completed,
                    TaskMessage::Done {
                        task: task.to_string(),
                    },
                )
            }
            Err(error) => TaskFailure::new(task, error),
        };

        if cancel_requested {
            (ExecutorState::Cancelled, TaskMessage::Error(failure.cancelled()))
        } else {
            (ExecutorState::Failed, TaskMessage::Error(failure))
        }
    }

    /// Wait for exit while watching the cancellation token
    async fn supervise(
        &self,
        process: &mut RunningProcess,
        task: &str,
        token: &CancellationToken,
    ) -> (Result<ExitOutcome, ProcessError>, bool) {
        let mut cancel_requested = false;
        let mut kill_deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                outcome = process.wait() => return (outcome, cancel_requested),

                _ = token.cancelled(), if !cancel_requested => {
                    cancel_requested = true;
                    self.publish(TaskMessage::ErrorOutput(OutputLine::info(CANCEL_REQUESTED)));

                    match process.interrupt() {
                        Ok(()) => {
                            tracing::info!("interrupt sent to task {} (pid {})", task, process.pid());
                            self.publish(TaskMessage::Output(OutputLine::info(CANCEL_SENT)));
                        }
                        Err(e) => {
                            // The process state is unknown now; keep the handle
                            // and fall back to a kill after the grace period.
                            tracing::error!("failed to interrupt task {}: {}", task, e);
                            self.publish(TaskMessage::Error(TaskFailure::new(
                                task,
                                ProcessError::CancelSignal(e.to_string()),
                            )));
                            kill_deadline = Some(Instant::now() + self.config.cancel_grace);
                        }
                    }
                }

                _ = tokio::time::sleep_until(kill_deadline.unwrap_or_else(Instant::now)), if kill_deadline.is_some() => {
                    kill_deadline = None;
                    tracing::warn!(
                        "task {} still running {:?} after failed interrupt, killing pid {}",
                        task,
                        self.config.cancel_grace,
                        process.pid()
                    );
                    if let Err(e) = process.kill() {
                        tracing::error!("failed to kill task {}: {}", task, e);
                        self.publish(TaskMessage::Error(TaskFailure::new(
                            task,
                            ProcessError::CancelSignal(e.to_string()),
                        )));
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for TaskExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskExecutor")
            .field("runner", &self.runner)
            .field("state", &self.state())
            .field("current_task", &self.current_task())
            .finish()
    }
}

/// Publish every line of one stream, in order
///
/// A read error ends the pump; the exit code stays authoritative.
async fn pump(bus: TaskPublisher, mut lines: LineStream, pid: u32, wrap: fn(OutputLine) -> TaskMessage) {
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let msg = wrap(OutputLine::from_process(pid, line));
                bus.publish(msg.into_topic_message());
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("error reading output of pid {}: {}", pid, e);
                break;
            }
        }
    }
}
