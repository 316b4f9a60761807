//! Process runner
//!
//! Spawns an external command in its own process group with both output pipes
//! attached, and classifies how it ended.
//!
//! Arguments are passed as a vector; nothing is interpolated by a shell.

mod group;
mod lines;

pub use group::*;
pub use lines::LineStream;

use std::ffi::OsStr;
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use tash_core::ProcessError;
use tokio::process::{Child, Command};

/// How a process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Exited with code zero
    Success,
    /// Exited with a non-zero code
    Code(i32),
    /// Terminated by a signal (signal number when the platform reports one)
    Signal(Option<i32>),
}

impl ExitOutcome {
    /// Check if the process exited cleanly
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Convert to a result, failing for anything but a clean exit
    pub fn into_result(self) -> Result<(), ProcessError> {
        match self {
            Self::Success => Ok(()),
            Self::Code(code) => Err(ProcessError::Exit { code }),
            Self::Signal(signal) => Err(ProcessError::Terminated { signal }),
        }
    }
}

impl From<ExitStatus> for ExitOutcome {
    fn from(status: ExitStatus) -> Self {
        if status.success() {
            return Self::Success;
        }
        match status.code() {
            Some(code) => Self::Code(code),
            None => Self::Signal(exit_signal(&status)),
        }
    }
}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

/// Launches one executable with a fixed argument prefix
#[derive(Clone)]
pub struct ProcessRunner {
    program: String,
    base_args: Vec<String>,
    current_dir: Option<PathBuf>,
    group: Arc<dyn ProcessGroup>,
}

impl ProcessRunner {
    /// Create a runner for `program` using the platform process group
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            base_args: Vec::new(),
            current_dir: None,
            group: Arc::new(PlatformProcessGroup::default()),
        }
    }

    /// Arguments placed before the per-spawn arguments
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.base_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Run in `dir` instead of the inherited working directory
    pub fn with_current_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.current_dir = dir;
        self
    }

    /// Replace the process group implementation
    pub fn with_process_group(mut self, group: Arc<dyn ProcessGroup>) -> Self {
        self.group = group;
        self
    }

    /// Executable this runner starts
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Start the executable with `args` appended to the base arguments
    pub fn spawn<I, S>(&self, args: I) -> Result<RunningProcess, ProcessError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut command = Command::new(&self.program);
        command
            .args(&self.base_args)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.current_dir {
            command.current_dir(dir);
        }
        self.group.configure(&mut command);

        let mut child = command
            .spawn()
            .map_err(|e| ProcessError::spawn(&self.program, e))?;
        let pid = child
            .id()
            .ok_or_else(|| ProcessError::spawn(&self.program, "process exited before it was tracked"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or(ProcessError::Pipe { stream: "stdout" })?;
        let stderr = child
            .stderr
            .take()
            .ok_or(ProcessError::Pipe { stream: "stderr" })?;

        tracing::debug!(
            "spawned {} (pid {}, {} process group)",
            self.program,
            pid,
            self.group.name()
        );

        Ok(RunningProcess {
            child,
            pid,
            stdout: Some(LineStream::new(stdout)),
            stderr: Some(LineStream::new(stderr)),
            group: Arc::clone(&self.group),
        })
    }
}

impl std::fmt::Debug for ProcessRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessRunner")
            .field("program", &self.program)
            .field("base_args", &self.base_args)
            .field("current_dir", &self.current_dir)
            .field("group", &self.group.name())
            .finish()
    }
}

/// A started process
///
/// Dropping it kills the immediate child.
pub struct RunningProcess {
    child: Child,
    pid: u32,
    stdout: Option<LineStream>,
    stderr: Option<LineStream>,
    group: Arc<dyn ProcessGroup>,
}

impl RunningProcess {
    /// OS process id, which is also the process group id on POSIX
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Standard output lines; `None` if already taken
    pub fn take_stdout(&mut self) -> Option<LineStream> {
        self.stdout.take()
    }

    /// Standard error lines; `None` if already taken
    pub fn take_stderr(&mut self) -> Option<LineStream> {
        self.stderr.take()
    }

    /// Interrupt the whole process group
    pub fn interrupt(&mut self) -> io::Result<()> {
        self.group.interrupt(&mut self.child)
    }

    /// Forcefully kill the immediate child
    pub fn kill(&mut self) -> io::Result<()> {
        match self.child.start_kill() {
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => Ok(()),
            other => other,
        }
    }

    /// Wait for the process to exit
    ///
    /// Cancel safe: dropping the future leaves the process untouched.
    pub async fn wait(&mut self) -> Result<ExitOutcome, ProcessError> {
        self.child
            .wait()
            .await
            .map(ExitOutcome::from)
            .map_err(|e| ProcessError::Wait(e.to_string()))
    }
}

impl std::fmt::Debug for RunningProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunningProcess")
            .field("pid", &self.pid)
            .field("group", &self.group.name())
            .finish_non_exhaustive()
    }
}
