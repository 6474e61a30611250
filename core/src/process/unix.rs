//! Unix process handles with session-based detachment
//!
//! Daemonized children are placed in their own session via `setsid()`
//! in a `pre_exec` hook: the child becomes session and process group
//! leader with no controlling terminal, and termination signals can be
//! delivered to the whole group through the negative process ID.
//! Foreground children are spawned without a new session so they stay
//! attached to the invoking terminal.

// Process management requires libc::setsid() in pre_exec
#![allow(unsafe_code)]

use crate::error::{CoreError, Result};
use crate::process::{ManagedProcess, ProcessExit};
use async_trait::async_trait;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::os::unix::process::CommandExt;
use std::os::unix::process::ExitStatusExt;
use tokio::process::{Child, Command};
use tracing::{debug, error};

/// A spawned child process
#[derive(Debug)]
pub struct ChildProcess {
    pid: Pid,
    /// Whether the child leads its own session (and thus its own group)
    session_leader: bool,
    child: Child,
}

/// Spawn a command in its own session, detached from the terminal.
///
/// Used for daemonized children: signals sent through
/// [`ManagedProcess::signal`] target the entire process group so
/// grandchildren are cleaned up too.
pub fn spawn_session(command: Command) -> Result<ChildProcess> {
    spawn_inner(command, true)
}

/// Spawn a command attached to the invoking process.
///
/// Used for foreground runs; the child shares the caller's session and
/// is only ever waited on, never signaled through the group.
pub fn spawn_attached(command: Command) -> Result<ChildProcess> {
    spawn_inner(command, false)
}

fn spawn_inner(mut command: Command, new_session: bool) -> Result<ChildProcess> {
    debug!(
        "Spawning process: {:?} (new_session: {})",
        command.as_std().get_program(),
        new_session
    );

    if new_session {
        // Safety: setsid() is async-signal-safe and appropriate for use
        // in pre_exec.
        unsafe {
            command.pre_exec(|| {
                if libc::setsid() == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
    }

    let child = command.spawn().map_err(|e| {
        error!("Failed to spawn process: {}", e);
        CoreError::LaunchFailed(e.to_string())
    })?;

    let raw_pid = child
        .id()
        .ok_or_else(|| CoreError::LaunchFailed("spawned child did not have a PID".to_string()))?;
    let pid = Pid::from_raw(raw_pid as i32);
    debug!("Spawned process {}", pid);

    Ok(ChildProcess {
        pid,
        session_leader: new_session,
        child,
    })
}

impl ChildProcess {
    /// Take the stdout handle for async reading, if piped
    pub fn take_stdout(&mut self) -> Option<tokio::process::ChildStdout> {
        self.child.stdout.take()
    }

    /// Take the stderr handle for async reading, if piped
    pub fn take_stderr(&mut self) -> Option<tokio::process::ChildStderr> {
        self.child.stderr.take()
    }

    fn deliver(&self, signal: Signal) -> Result<()> {
        // Signals target the group; only valid for session leaders.
        debug!("Sending {} to process group {}", signal, self.pid);
        match killpg(self.pid, signal) {
            Ok(()) => Ok(()),
            // Already exited
            Err(nix::errno::Errno::ESRCH) => {
                debug!("Process group {} already exited", self.pid);
                Ok(())
            }
            // Likely exited and the pid was reused by another owner
            Err(nix::errno::Errno::EPERM) => {
                debug!(
                    "Permission denied signaling process group {} (likely already exited)",
                    self.pid
                );
                Ok(())
            }
            Err(e) => {
                error!("Failed to send {} to process group {}: {}", signal, self.pid, e);
                Err(CoreError::ProcessSignal(format!(
                    "failed to send {} to process group {}: {}",
                    signal, self.pid, e
                )))
            }
        }
    }
}

fn exit_from_status(status: std::process::ExitStatus) -> ProcessExit {
    ProcessExit {
        code: status.code(),
        signal: status.signal(),
    }
}

#[async_trait]
impl ManagedProcess for ChildProcess {
    fn pid(&self) -> u32 {
        self.pid.as_raw() as u32
    }

    fn try_wait(&mut self) -> Result<Option<ProcessExit>> {
        let status = self.child.try_wait().map_err(|e| {
            CoreError::ProcessWait(format!("failed to poll process {}: {}", self.pid, e))
        })?;
        Ok(status.map(exit_from_status))
    }

    async fn wait(&mut self) -> Result<ProcessExit> {
        let status = self.child.wait().await.map_err(|e| {
            CoreError::ProcessWait(format!("failed to wait for process {}: {}", self.pid, e))
        })?;
        Ok(exit_from_status(status))
    }

    fn signal(&mut self, signal: i32) -> Result<()> {
        debug_assert!(self.session_leader, "group signals require a session leader");
        let signal = Signal::try_from(signal)
            .map_err(|e| CoreError::ProcessSignal(format!("invalid signal {signal}: {e}")))?;
        self.deliver(signal)
    }

    fn kill(&mut self) -> Result<()> {
        debug_assert!(self.session_leader, "group signals require a session leader");
        self.deliver(Signal::SIGKILL)
    }
}
