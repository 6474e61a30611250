//! Controller: the public lifecycle operations
//!
//! Composes the launcher, the state store, and the monitor loop into
//! the three operations of the process manager: `run` (foreground,
//! untracked), `start` (fork + daemonize + monitor), and `stop`
//! (remove the cooperative registry marker). `list` exposes the
//! registry contents for status output.

use crate::error::{CoreError, Result};
use crate::launcher::{self, EnvOverride, OutputMode, RunnableProcess};
use crate::monitor::MonitorLoop;
use crate::process::unix::{self, ChildProcess};
use crate::process::ManagedProcess;
use crate::registry::{SqliteStore, StateStore};
use nix::unistd::{fork, setsid, ForkResult};
use schema::{ProcessConfig, ProcessRecord, StartStatus};
use std::io::IsTerminal;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

/// Which stream a line of output came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Callback consuming a foreground child's output line by line
pub type OutputCallback = Box<dyn FnMut(OutputStream, &str) + Send>;

/// Process lifecycle controller
#[derive(Debug, Default)]
pub struct Controller {
    store_path: Option<PathBuf>,
    monitor: MonitorLoop,
    env_override: Option<EnvOverride>,
}

impl Controller {
    /// Create a controller using the default registry path
    pub fn new() -> Self {
        Self::default()
    }

    /// Use an explicit registry file instead of `<cwd>/.pids.db`
    pub fn with_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = Some(path.into());
        self
    }

    /// Override the monitor loop timing, mainly for tests
    pub fn with_monitor(mut self, monitor: MonitorLoop) -> Self {
        self.monitor = monitor;
        self
    }

    /// Apply an environment passthrough override to launched children
    pub fn with_env_override(mut self, env_override: Option<EnvOverride>) -> Self {
        self.env_override = env_override;
        self
    }

    fn open_store(&self) -> Result<SqliteStore> {
        match &self.store_path {
            Some(path) => SqliteStore::open(path),
            None => SqliteStore::open_default(),
        }
    }

    fn prepare(&self, config: &ProcessConfig) -> Result<RunnableProcess> {
        let mut runnable = launcher::prepare(config)?;
        if let Some(env_override) = &self.env_override {
            runnable.apply(env_override);
        }
        Ok(runnable)
    }

    /// Run a command in the foreground, untracked, and block until it
    /// exits.
    ///
    /// With `disable_output` the child's output is discarded and any
    /// callback is ignored. Otherwise the child attaches to the
    /// invoking terminal when there is one (best effort; the callback
    /// is ignored once attached), and falls back to streaming piped
    /// output through the callback.
    ///
    /// A non-zero exit fails with [`CoreError::ProcessFailed`]; the
    /// message carries a verbosity hint when output was disabled.
    pub async fn run(
        &self,
        config: &ProcessConfig,
        disable_output: bool,
        callback: Option<OutputCallback>,
    ) -> Result<()> {
        let runnable = self.prepare(config)?;

        let exit = match callback {
            Some(mut callback) if !disable_output && !std::io::stdout().is_terminal() => {
                let mut child = unix::spawn_attached(runnable.command(OutputMode::Piped))?;
                pump_output(&mut child, &mut callback).await?;
                child.wait().await?
            }
            _ => {
                let mode = if disable_output {
                    OutputMode::Discard
                } else {
                    OutputMode::Inherit
                };
                let mut child = unix::spawn_attached(runnable.command(mode))?;
                child.wait().await?
            }
        };

        if !exit.success() {
            let mut message = "Process terminated unexpectedly.".to_string();
            if disable_output {
                message.push_str(" Run the command again with the -v option for more details.");
            }
            return Err(CoreError::ProcessFailed(message));
        }
        Ok(())
    }

    /// Launch a command as a daemonized background process.
    ///
    /// Forks the calling process. The parent returns
    /// [`StartStatus::Started`] immediately and has no further
    /// responsibility. The child detaches into a new session, launches
    /// the command with output disabled, registers it in the state
    /// store only after the launch is confirmed, and then blocks in
    /// the monitor loop until the command is gone, returning
    /// [`StartStatus::Stopped`].
    ///
    /// Must be called before any async runtime exists in the process:
    /// the detached child builds its own current-thread runtime after
    /// the fork.
    pub fn start(&self, config: &ProcessConfig) -> Result<StartStatus> {
        // Resolve the executable before forking so a bad command line
        // surfaces in the calling process, not in the detached child.
        let runnable = self.prepare(config)?;

        // Safety: no runtime or threads of ours exist yet; the child
        // immediately re-enters known code.
        match unsafe { fork() } {
            Err(e) => Err(CoreError::ForkFailed(e.to_string())),
            Ok(ForkResult::Parent { child }) => {
                info!("Forked background controller {}", child);
                Ok(StartStatus::Started)
            }
            Ok(ForkResult::Child) => {
                setsid().map_err(|e| CoreError::DetachFailed(e.to_string()))?;

                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()?;
                runtime.block_on(self.supervise(runnable, config))?;
                Ok(StartStatus::Stopped)
            }
        }
    }

    /// Daemon body: launch, register, monitor. Runs only in the
    /// detached child.
    async fn supervise(&self, runnable: RunnableProcess, config: &ProcessConfig) -> Result<()> {
        let store = self.open_store()?;

        let mut child = unix::spawn_session(runnable.command(OutputMode::Discard))?;

        // Never register a process that did not actually start: a
        // child that is gone right after spawn failed to launch.
        if child.try_wait()?.is_some() {
            return Err(CoreError::LaunchFailed(format!(
                "'{}' exited immediately",
                config.command_line()
            )));
        }

        let pid = child.pid();
        store
            .add(ProcessRecord {
                pid,
                config: config.clone(),
            })
            .await?;

        let state = self
            .monitor
            .run(&store, &mut child, runnable.signal())
            .await?;
        info!("Monitor loop for {} finished in state {:?}", pid, state);
        Ok(())
    }

    /// Request termination of a managed process.
    ///
    /// Removes the registry record only; the monitor loop running in
    /// the daemonized process observes the removal on its next poll
    /// and delivers the signal. Termination is eventually consistent,
    /// bounded by poll interval plus grace period.
    pub async fn stop(&self, pid: u32) -> Result<()> {
        let store = self.open_store()?;
        if !store.exists(pid).await? {
            return Err(CoreError::UnknownProcess(pid));
        }
        store.remove(pid).await
    }

    /// All currently managed processes, in no particular order
    pub async fn list(&self) -> Result<Vec<ProcessRecord>> {
        let store = self.open_store()?;
        store.all().await
    }
}

/// Stream piped stdout/stderr lines to the callback until both close.
async fn pump_output(child: &mut ChildProcess, callback: &mut OutputCallback) -> Result<()> {
    let stdout = child
        .take_stdout()
        .ok_or_else(|| CoreError::ProcessWait("child stdout was not piped".to_string()))?;
    let stderr = child
        .take_stderr()
        .ok_or_else(|| CoreError::ProcessWait("child stderr was not piped".to_string()))?;

    let mut out_lines = BufReader::new(stdout).lines();
    let mut err_lines = BufReader::new(stderr).lines();
    let mut out_done = false;
    let mut err_done = false;

    while !(out_done && err_done) {
        tokio::select! {
            line = out_lines.next_line(), if !out_done => match line? {
                Some(line) => callback(OutputStream::Stdout, &line),
                None => out_done = true,
            },
            line = err_lines.next_line(), if !err_done => match line? {
                Some(line) => callback(OutputStream::Stderr, &line),
                None => err_done = true,
            },
        }
    }
    Ok(())
}
