//! Process launcher: executable resolution and process descriptions
//!
//! [`prepare`] turns a [`ProcessConfig`] into a [`RunnableProcess`]: the
//! first command token resolved to an absolute executable path, the
//! remaining tokens as arguments, bound to the current working
//! directory with the environment inherited and no execution timeout.
//! The only side effect is the executable lookup itself (a filesystem
//! read); spawning is left to the process layer.

use crate::error::{CoreError, Result};
use nix::sys::signal::Signal;
use schema::ProcessConfig;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// How the child's stdio should be wired up when spawned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Discard all output (daemonized and quiet runs)
    Discard,
    /// Attach to the invoking terminal
    Inherit,
    /// Pipe stdout/stderr for the caller to consume
    Piped,
}

/// A process description ready to spawn
///
/// Bound to a resolved absolute executable path, its arguments, the
/// working directory of the invoking process, and the termination
/// signal from the configuration.
#[derive(Debug, Clone)]
pub struct RunnableProcess {
    program: PathBuf,
    args: Vec<String>,
    working_dir: PathBuf,
    signal: i32,
    env_removals: Vec<String>,
}

impl RunnableProcess {
    /// The resolved absolute executable path
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Arguments passed to the executable
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// The termination signal for this process
    pub fn signal(&self) -> i32 {
        self.signal
    }

    /// Apply an environment passthrough override
    pub fn apply(&mut self, env_override: &EnvOverride) {
        self.env_removals.push(env_override.key.clone());
    }

    /// Build a spawnable command with the requested output wiring.
    ///
    /// The child inherits the full environment except for keys cleared
    /// by an applied [`EnvOverride`].
    pub fn command(&self, output: OutputMode) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        command.current_dir(&self.working_dir);
        for key in &self.env_removals {
            command.env_remove(key);
        }
        match output {
            OutputMode::Discard => {
                command.stdin(Stdio::null());
                command.stdout(Stdio::null());
                command.stderr(Stdio::null());
            }
            OutputMode::Inherit => {
                command.stdin(Stdio::inherit());
                command.stdout(Stdio::inherit());
                command.stderr(Stdio::inherit());
            }
            OutputMode::Piped => {
                command.stdin(Stdio::null());
                command.stdout(Stdio::piped());
                command.stderr(Stdio::piped());
            }
        }
        command
    }
}

/// Environment passthrough hook
///
/// A narrow compatibility seam for host frameworks whose dotenv layer
/// unsets or overrides an application-environment variable: when the
/// framework's bookkeeping variable names the key, the key is cleared
/// from the child environment while the rest of the environment is
/// still inherited. The controller decides whether to apply this; it
/// is not baked into [`prepare`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvOverride {
    key: String,
}

impl EnvOverride {
    /// Detect the override from the current environment.
    ///
    /// Returns `Some` when `control_var` is set and its comma-separated
    /// value contains `key`.
    pub fn from_env(control_var: &str, key: &str) -> Option<Self> {
        match std::env::var(control_var) {
            Ok(vars) if vars.split(',').any(|v| v.trim() == key) => Some(Self {
                key: key.to_string(),
            }),
            _ => None,
        }
    }
}

/// Resolve a configuration into a runnable process description.
///
/// Fails with [`CoreError::ExecutableNotFound`] when the first command
/// token cannot be resolved against the search path, and with
/// [`CoreError::InvalidConfig`] for an empty command line or an
/// unknown signal number.
pub fn prepare(config: &ProcessConfig) -> Result<RunnableProcess> {
    let (name, args) = config
        .command
        .split_first()
        .ok_or_else(|| CoreError::InvalidConfig("command line cannot be empty".to_string()))?;

    let signal = config.signal_or_default();
    Signal::try_from(signal)
        .map_err(|_| CoreError::InvalidConfig(format!("unknown signal number {signal}")))?;

    let program = find_executable(name)
        .ok_or_else(|| CoreError::ExecutableNotFound(name.clone()))?;
    let working_dir = std::env::current_dir()?;

    debug!("Resolved '{}' to {:?}", name, program);

    Ok(RunnableProcess {
        program,
        args: args.to_vec(),
        working_dir,
        signal,
        env_removals: Vec::new(),
    })
}

/// Resolve an executable name to an absolute path.
///
/// Names containing a path separator are checked directly (relative
/// ones against the working directory); bare names are searched on
/// `PATH`.
fn find_executable(name: &str) -> Option<PathBuf> {
    let candidate = PathBuf::from(name);
    if candidate.components().count() > 1 {
        let absolute = if candidate.is_absolute() {
            candidate
        } else {
            std::env::current_dir().ok()?.join(candidate)
        };
        return is_executable(&absolute).then_some(absolute);
    }

    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|p| is_executable(p))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}
