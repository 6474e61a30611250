//! Core functionality for the bgproc process manager
//!
//! This crate contains the state store, the launcher, the monitor
//! loop, and the controller that ties them into the run/start/stop
//! lifecycle. The CLI crate is a thin argument-parsing layer on top.

pub mod controller;
pub mod error;
pub mod launcher;
pub mod monitor;
#[cfg(unix)]
pub mod process;
pub mod registry;


// Re-export schema types for convenience
pub use schema::*;

pub use controller::{Controller, OutputCallback, OutputStream};
pub use error::{CoreError, Result};
pub use launcher::{EnvOverride, OutputMode, RunnableProcess};
pub use monitor::MonitorLoop;
pub use registry::{SqliteStore, StateStore};
