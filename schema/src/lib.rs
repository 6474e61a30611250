//! Schema definitions for bgproc
//!
//! This crate contains the shared data structures used across the
//! bgproc ecosystem: the launch configuration handed to the process
//! launcher and the registry record tying a running pid to that
//! configuration. All types here implement JSON Schema generation
//! for external consumption.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Default termination signal (SIGTERM) used when a configuration does
/// not specify one.
pub const DEFAULT_SIGNAL: i32 = 15;

/// Immutable launch configuration for a managed process
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessConfig {
    /// Command line: executable name followed by its arguments
    pub command: Vec<String>,
    /// Termination signal to deliver on stop; `None` means SIGTERM
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal: Option<i32>,
}

impl ProcessConfig {
    /// Create a configuration from a command line and an optional signal
    pub fn new(command: Vec<String>, signal: Option<i32>) -> Self {
        Self { command, signal }
    }

    /// The termination signal to use, falling back to SIGTERM
    pub fn signal_or_default(&self) -> i32 {
        self.signal.unwrap_or(DEFAULT_SIGNAL)
    }

    /// The command line joined for display purposes
    pub fn command_line(&self) -> String {
        self.command.join(" ")
    }
}

/// A registry entry: this pid is currently managed and should keep running
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessRecord {
    /// OS process identifier of the managed process
    pub pid: u32,
    /// The configuration that launched it
    pub config: ProcessConfig,
}

/// Result of a daemonized start
///
/// The forking parent observes `Started`; the detached child observes
/// `Stopped` once its monitor loop has exited.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum StartStatus {
    /// The background process was forked; the caller has no further responsibility
    Started,
    /// The monitor loop has exited and the managed process is gone
    Stopped,
}

/// States of the monitor loop
///
/// ```text
/// Running → Stopping → Terminated
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum MonitorState {
    /// Registry record present and the process is alive
    Running,
    /// Record removed; termination signal in flight
    Stopping,
    /// The process has exited (terminal state)
    Terminated,
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemars::schema_for;

    #[test]
    fn test_config_serialization_roundtrip() {
        let config = ProcessConfig::new(vec!["sleep".to_string(), "100".to_string()], Some(2));
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("sleep"));

        let back: ProcessConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_signal_is_omitted_when_absent() {
        let config = ProcessConfig::new(vec!["true".to_string()], None);
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("signal"));
    }

    #[test]
    fn test_signal_default() {
        let config = ProcessConfig::new(vec!["true".to_string()], None);
        assert_eq!(config.signal_or_default(), DEFAULT_SIGNAL);

        let config = ProcessConfig::new(vec!["true".to_string()], Some(9));
        assert_eq!(config.signal_or_default(), 9);
    }

    #[test]
    fn test_command_line_display() {
        let config = ProcessConfig::new(vec!["echo".to_string(), "hello".to_string()], None);
        assert_eq!(config.command_line(), "echo hello");
    }

    #[test]
    fn test_record_serialization() {
        let record = ProcessRecord {
            pid: 4242,
            config: ProcessConfig::new(vec!["sleep".to_string(), "100".to_string()], None),
        };
        let json = serde_json::to_string(&record).unwrap();
        let back: ProcessRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_schema_generation() {
        // Just check that schemas can be generated without panicking
        let _config_schema = schema_for!(ProcessConfig);
        let _record_schema = schema_for!(ProcessRecord);
        let _status_schema = schema_for!(StartStatus);
        let _state_schema = schema_for!(MonitorState);
    }
}
