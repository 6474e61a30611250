//! Core error types and utilities

use thiserror::Error;

/// Core-specific error types
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Unable to find the '{0}' binary")]
    ExecutableNotFound(String),

    #[error("Invalid process configuration: {0}")]
    InvalidConfig(String),

    #[error("Unable to fork the controller process: {0}")]
    ForkFailed(String),

    #[error("Unable to set the child process as session leader: {0}")]
    DetachFailed(String),

    #[error("Unable to start the background process: {0}")]
    LaunchFailed(String),

    #[error("{0}")]
    ProcessFailed(String),

    #[error("The process with PID {0} does not exist")]
    UnknownProcess(u32),

    #[error("Could not open PID state file: {0}")]
    StoreUnavailable(String),

    #[error("Process signal error: {0}")]
    ProcessSignal(String),

    #[error("Process wait error: {0}")]
    ProcessWait(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoreError {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::ExecutableNotFound(_) => "PROC001",
            CoreError::InvalidConfig(_) => "PROC002",
            CoreError::ForkFailed(_) => "PROC003",
            CoreError::DetachFailed(_) => "PROC004",
            CoreError::LaunchFailed(_) => "PROC005",
            CoreError::ProcessFailed(_) => "PROC006",
            CoreError::UnknownProcess(_) => "PROC007",
            CoreError::StoreUnavailable(_) => "PROC008",
            CoreError::ProcessSignal(_) => "PROC009",
            CoreError::ProcessWait(_) => "PROC010",
            CoreError::IoError(_) => "PROC011",
            CoreError::Database(_) => "PROC012",
            CoreError::Serialization(_) => "PROC013",
        }
    }
}

/// Core-specific result type
pub type Result<T> = std::result::Result<T, CoreError>;
