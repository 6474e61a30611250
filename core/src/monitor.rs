//! Monitor loop tying a child's lifetime to its registry record
//!
//! Runs as the main body of the daemonized process. Once per poll
//! interval it checks whether the registry still holds a record for
//! its child's pid; removal of the record is the stop request. The
//! loop is the only signal-delivery path:
//!
//! ```text
//! Running ──record absent──▶ Stopping ──process exits──▶ Terminated
//! ```
//!
//! Stop latency is bounded by the poll interval (detection) plus the
//! grace period (SIGKILL escalation); there is no push channel.

use crate::error::Result;
use crate::process::{self, ManagedProcess};
use crate::registry::StateStore;
use schema::MonitorState;
use std::time::Duration;
use tracing::{info, warn};

/// Default interval between registry polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default wait after the termination signal before SIGKILL.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// The polling control loop for one daemonized process
#[derive(Debug, Clone, Copy)]
pub struct MonitorLoop {
    poll_interval: Duration,
    grace_period: Duration,
}

impl Default for MonitorLoop {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }
}

impl MonitorLoop {
    /// Create a loop with explicit timing, mainly for tests
    pub fn new(poll_interval: Duration, grace_period: Duration) -> Self {
        Self {
            poll_interval,
            grace_period,
        }
    }

    /// Supervise `process` until it exits, delivering `signal` once its
    /// registry record disappears.
    ///
    /// Cleans up the process's own record before returning; the result
    /// is always [`MonitorState::Terminated`] on success.
    pub async fn run(
        &self,
        store: &dyn StateStore,
        process: &mut dyn ManagedProcess,
        signal: i32,
    ) -> Result<MonitorState> {
        let pid = process.pid();
        let mut state = MonitorState::Running;

        info!("Monitoring process {}", pid);

        loop {
            if let Some(exit) = process.try_wait()? {
                info!("Process {} exited: {:?}", pid, exit);
                state = MonitorState::Terminated;
                break;
            }

            match state {
                MonitorState::Running => match store.exists(pid).await {
                    Ok(true) => {
                        tokio::time::sleep(self.poll_interval).await;
                    }
                    Ok(false) => {
                        info!("Registry record for {} removed, stopping", pid);
                        state = MonitorState::Stopping;
                        if let Err(e) = process::stop(process, signal, self.grace_period).await {
                            warn!("Failed to stop process {}: {}", pid, e);
                        }
                    }
                    // A flaky registry must not take down a healthy
                    // process; treat the record as still present.
                    Err(e) => {
                        warn!("State store unreachable, keeping process {} running: {}", pid, e);
                        tokio::time::sleep(self.poll_interval).await;
                    }
                },
                MonitorState::Stopping => {
                    // Signal already in flight; keep watching for exit.
                    tokio::time::sleep(self.poll_interval).await;
                }
                MonitorState::Terminated => break,
            }
        }

        // Cleanup of the record is part of loop termination. Idempotent:
        // the stop path already removed it.
        if let Err(e) = store.remove(pid).await {
            warn!("Failed to clean up registry record for {}: {}", pid, e);
        }

        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use crate::process::MockProcess;
    use crate::registry::SqliteStore;
    use async_trait::async_trait;
    use schema::{ProcessConfig, ProcessRecord};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Store whose first N `exists` reads fail, simulating a registry
    /// that is temporarily unreachable.
    #[derive(Debug, Clone)]
    struct FlakyStore {
        failures_left: Arc<AtomicUsize>,
        present: Arc<AtomicBool>,
    }

    impl FlakyStore {
        fn new(failures: usize) -> Self {
            Self {
                failures_left: Arc::new(AtomicUsize::new(failures)),
                present: Arc::new(AtomicBool::new(true)),
            }
        }

        fn remove_record(&self) {
            self.present.store(false, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl StateStore for FlakyStore {
        async fn add(&self, _record: ProcessRecord) -> Result<()> {
            Ok(())
        }

        async fn get(&self, _pid: u32) -> Result<Option<ProcessRecord>> {
            Ok(None)
        }

        async fn exists(&self, _pid: u32) -> Result<bool> {
            let failing = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(CoreError::StoreUnavailable(
                    "database is locked".to_string(),
                ));
            }
            Ok(self.present.load(Ordering::SeqCst))
        }

        async fn remove(&self, _pid: u32) -> Result<()> {
            self.present.store(false, Ordering::SeqCst);
            Ok(())
        }

        async fn all(&self) -> Result<Vec<ProcessRecord>> {
            Ok(Vec::new())
        }
    }

    fn fast_loop() -> MonitorLoop {
        MonitorLoop::new(Duration::from_millis(10), Duration::from_millis(100))
    }

    async fn registered_store(pid: u32) -> SqliteStore {
        let store = SqliteStore::open_memory().unwrap();
        store
            .add(ProcessRecord {
                pid,
                config: ProcessConfig::new(vec!["sleep".to_string(), "100".to_string()], None),
            })
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_record_removal_triggers_signal() {
        let pid = 4001;
        let store = registered_store(pid).await;
        let mock = MockProcess::new(pid);

        let monitor = fast_loop();
        let store_clone = store.clone();
        let mut process = mock.clone();
        let task = tokio::spawn(async move {
            monitor.run(&store_clone, &mut process, 15).await
        });

        // Give the loop a few ticks while the record is present
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(mock.delivered_signals().is_empty());

        // Removing the record is the stop request
        store.remove(pid).await.unwrap();

        let state = task.await.unwrap().unwrap();
        assert_eq!(state, MonitorState::Terminated);
        assert_eq!(mock.delivered_signals(), vec![15]);
        assert!(!mock.was_killed());
    }

    #[tokio::test]
    async fn test_natural_exit_cleans_up_record() {
        let pid = 4002;
        let store = registered_store(pid).await;
        let mock = MockProcess::new(pid);

        let monitor = fast_loop();
        let store_clone = store.clone();
        let mut process = mock.clone();
        let task = tokio::spawn(async move {
            monitor.run(&store_clone, &mut process, 15).await
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        mock.exit_now(0);

        let state = task.await.unwrap().unwrap();
        assert_eq!(state, MonitorState::Terminated);
        // The loop removed its own record on the way out
        assert!(!store.exists(pid).await.unwrap());
        assert!(mock.delivered_signals().is_empty());
    }

    #[tokio::test]
    async fn test_stubborn_process_gets_killed_after_grace() {
        let pid = 4003;
        let store = registered_store(pid).await;
        let mock = MockProcess::stubborn(pid);

        let monitor = fast_loop();
        let store_clone = store.clone();
        let mut process = mock.clone();
        let task = tokio::spawn(async move {
            monitor.run(&store_clone, &mut process, 15).await
        });

        store.remove(pid).await.unwrap();

        let state = task.await.unwrap().unwrap();
        assert_eq!(state, MonitorState::Terminated);
        assert_eq!(mock.delivered_signals(), vec![15]);
        assert!(mock.was_killed());
    }

    #[tokio::test]
    async fn test_store_errors_keep_process_running() {
        let pid = 4005;
        let store = FlakyStore::new(3);
        let mock = MockProcess::new(pid);

        let monitor = fast_loop();
        let store_clone = store.clone();
        let mut process = mock.clone();
        let task = tokio::spawn(async move {
            monitor.run(&store_clone, &mut process, 15).await
        });

        // Ride out the failing reads plus a few healthy polls; an
        // unreachable registry must not be taken as a stop request.
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(mock.delivered_signals().is_empty());
        assert_eq!(store.failures_left.load(Ordering::SeqCst), 0);

        // Only an affirmative "record absent" triggers the stop
        store.remove_record();

        let state = task.await.unwrap().unwrap();
        assert_eq!(state, MonitorState::Terminated);
        assert_eq!(mock.delivered_signals(), vec![15]);
    }

    #[tokio::test]
    async fn test_configured_signal_is_delivered() {
        let pid = 4004;
        let store = registered_store(pid).await;
        let mock = MockProcess::new(pid);

        let monitor = fast_loop();
        let store_clone = store.clone();
        let mut process = mock.clone();
        let task = tokio::spawn(async move {
            // SIGINT configured instead of the default
            monitor.run(&store_clone, &mut process, 2).await
        });

        store.remove(pid).await.unwrap();

        task.await.unwrap().unwrap();
        assert_eq!(mock.delivered_signals(), vec![2]);
    }
}
