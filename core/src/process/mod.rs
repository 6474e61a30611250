//! Process handles for the monitor loop
//!
//! [`ManagedProcess`] abstracts the OS process handle so the monitor
//! loop can be exercised in tests with a mock implementation. The real
//! implementation lives in [`unix`].

use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

#[cfg(unix)]
pub mod unix;

/// Exit information for a managed process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    /// Exit code, if the process exited normally
    pub code: Option<i32>,
    /// Signal that terminated the process, if any
    pub signal: Option<i32>,
}

impl ProcessExit {
    /// Whether the process exited successfully
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Trait representing a launched process that can be observed and signaled
#[async_trait]
pub trait ManagedProcess: Send {
    /// OS process identifier
    fn pid(&self) -> u32;

    /// Check for exit without blocking; `Some` once the process is gone
    fn try_wait(&mut self) -> Result<Option<ProcessExit>>;

    /// Block until the process exits
    async fn wait(&mut self) -> Result<ProcessExit>;

    /// Deliver a termination signal
    fn signal(&mut self, signal: i32) -> Result<()>;

    /// Deliver SIGKILL
    fn kill(&mut self) -> Result<()>;
}

/// How often the bounded waits below re-check for process exit.
const WAIT_TICK: Duration = Duration::from_millis(100);

/// Final wait after SIGKILL before giving up on the process entirely.
const KILL_WAIT: Duration = Duration::from_secs(5);

/// Deliver a termination signal, wait up to `grace`, then escalate.
///
/// Sends the configured signal first and polls for exit during the
/// grace period; a process that has not exited by then gets SIGKILL.
pub async fn stop(
    process: &mut dyn ManagedProcess,
    signal: i32,
    grace: Duration,
) -> Result<ProcessExit> {
    let pid = process.pid();
    debug!("Sending signal {} to process {}", signal, pid);
    process.signal(signal)?;

    let start = tokio::time::Instant::now();
    while start.elapsed() < grace {
        if let Some(exit) = process.try_wait()? {
            debug!("Process {} exited after signal {}: {:?}", pid, signal, exit);
            return Ok(exit);
        }
        tokio::time::sleep(WAIT_TICK).await;
    }

    warn!(
        "Process {} did not exit within {:?} after signal {}, using SIGKILL",
        pid, grace, signal
    );
    process.kill()?;

    let kill_start = tokio::time::Instant::now();
    while kill_start.elapsed() < KILL_WAIT {
        if let Some(exit) = process.try_wait()? {
            debug!("Process {} exited after SIGKILL: {:?}", pid, exit);
            return Ok(exit);
        }
        tokio::time::sleep(WAIT_TICK).await;
    }

    Err(crate::error::CoreError::ProcessWait(format!(
        "process {pid} did not exit even after SIGKILL within {KILL_WAIT:?}"
    )))
}

/// Mock process for exercising the monitor loop without real children.
///
/// Clones share state, so tests can keep a handle while the loop owns
/// a mutable reference.
#[cfg(test)]
#[derive(Debug, Clone)]
pub struct MockProcess {
    pid: u32,
    state: std::sync::Arc<std::sync::Mutex<MockState>>,
}

#[cfg(test)]
#[derive(Debug)]
struct MockState {
    exit: Option<ProcessExit>,
    signals: Vec<i32>,
    killed: bool,
    responds_to_signals: bool,
}

#[cfg(test)]
impl MockProcess {
    /// Create a mock that exits as soon as it is signaled
    pub fn new(pid: u32) -> Self {
        Self::with_behavior(pid, true)
    }

    /// Create a mock that ignores termination signals (only SIGKILL works)
    pub fn stubborn(pid: u32) -> Self {
        Self::with_behavior(pid, false)
    }

    fn with_behavior(pid: u32, responds_to_signals: bool) -> Self {
        Self {
            pid,
            state: std::sync::Arc::new(std::sync::Mutex::new(MockState {
                exit: None,
                signals: Vec::new(),
                killed: false,
                responds_to_signals,
            })),
        }
    }

    /// Simulate a natural exit with the given code
    pub fn exit_now(&self, code: i32) {
        let mut state = self.state.lock().unwrap();
        state.exit = Some(ProcessExit {
            code: Some(code),
            signal: None,
        });
    }

    /// Signals delivered to the mock so far
    pub fn delivered_signals(&self) -> Vec<i32> {
        self.state.lock().unwrap().signals.clone()
    }

    /// Whether the mock received SIGKILL
    pub fn was_killed(&self) -> bool {
        self.state.lock().unwrap().killed
    }
}

#[cfg(test)]
#[async_trait]
impl ManagedProcess for MockProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn try_wait(&mut self) -> Result<Option<ProcessExit>> {
        Ok(self.state.lock().unwrap().exit)
    }

    async fn wait(&mut self) -> Result<ProcessExit> {
        loop {
            if let Some(exit) = self.state.lock().unwrap().exit {
                return Ok(exit);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn signal(&mut self, signal: i32) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.signals.push(signal);
        if state.responds_to_signals {
            state.exit = Some(ProcessExit {
                code: None,
                signal: Some(signal),
            });
        }
        Ok(())
    }

    fn kill(&mut self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.killed = true;
        state.exit = Some(ProcessExit {
            code: None,
            signal: Some(9),
        });
        Ok(())
    }
}
