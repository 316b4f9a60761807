//! Platform process-group handling
//!
//! Tasks run in a process group of their own so that an interrupt reaches
//! every process the task spawned, not just the immediate child.
//!
//! - POSIX: `setpgid(0, 0)` in the child before exec, `SIGINT` sent to the
//!   negated group id on cancel
//! - Windows: `CREATE_NEW_PROCESS_GROUP` creation flag, forceful termination
//!   of the immediate process on cancel

use std::io;
use tokio::process::{Child, Command};

/// Capability to isolate a child in its own group and interrupt that group
pub trait ProcessGroup: Send + Sync {
    /// Prepare `command` so the spawned child leads a new process group
    fn configure(&self, command: &mut Command);

    /// Ask the child's process group to terminate
    ///
    /// A child that has already exited is not an error.
    fn interrupt(&self, child: &mut Child) -> io::Result<()>;

    /// Short name used in logs
    fn name(&self) -> &'static str;
}

/// POSIX process groups with `SIGINT` delivery
#[cfg(unix)]
#[derive(Debug, Clone, Copy, Default)]
pub struct PosixProcessGroup;

#[cfg(unix)]
impl ProcessGroup for PosixProcessGroup {
    fn configure(&self, command: &mut Command) {
        // SAFETY: setpgid is async-signal-safe and only changes the process group
        unsafe {
            command.pre_exec(|| {
                if libc::setpgid(0, 0) == -1 {
                    return Err(io::Error::last_os_error());
                }
                Ok(())
            });
        }
    }

    fn interrupt(&self, child: &mut Child) -> io::Result<()> {
        // No id means the child has already been reaped
        let Some(pid) = child.id() else {
            return Ok(());
        };
        let pgid = libc::pid_t::try_from(pid)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;

        // SAFETY: kill has no memory-safety preconditions
        if unsafe { libc::kill(-pgid, libc::SIGINT) } == -1 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::ESRCH) {
                return Ok(());
            }
            return Err(err);
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "posix"
    }
}

/// Native process groups with forceful termination
#[cfg(windows)]
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeProcessGroup;

#[cfg(windows)]
impl NativeProcessGroup {
    const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
}

#[cfg(windows)]
impl ProcessGroup for NativeProcessGroup {
    fn configure(&self, command: &mut Command) {
        command.creation_flags(Self::CREATE_NEW_PROCESS_GROUP);
    }

    fn interrupt(&self, child: &mut Child) -> io::Result<()> {
        match child.start_kill() {
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => Ok(()),
            other => other,
        }
    }

    fn name(&self) -> &'static str {
        "native"
    }
}

/// Process group implementation for the build target
#[cfg(unix)]
pub type PlatformProcessGroup = PosixProcessGroup;

/// Process group implementation for the build target
#[cfg(windows)]
pub type PlatformProcessGroup = NativeProcessGroup;
