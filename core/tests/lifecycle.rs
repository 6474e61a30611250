//! End-to-end lifecycle tests without forking
//!
//! Exercises the launch / register / monitor / stop path with real
//! child processes. The daemonizing fork itself is left to manual and
//! shell-level testing; everything after it runs here in-process.

#![cfg(unix)]

use bgproc_core::launcher::{prepare, OutputMode};
use bgproc_core::process::unix::spawn_session;
use bgproc_core::process::ManagedProcess;
use bgproc_core::registry::{SqliteStore, StateStore};
use bgproc_core::{Controller, MonitorLoop, MonitorState, ProcessConfig, ProcessRecord};
use nix::unistd::Pid;
use std::path::Path;
use std::time::Duration;

fn fast_monitor() -> MonitorLoop {
    MonitorLoop::new(Duration::from_millis(10), Duration::from_millis(500))
}

fn config(args: &[&str]) -> ProcessConfig {
    ProcessConfig::new(args.iter().map(|s| s.to_string()).collect(), None)
}

/// Launch a real child in its own session and register it, the way the
/// daemonized controller does after its fork.
async fn launch_registered(
    store: &SqliteStore,
    config: &ProcessConfig,
) -> (u32, tokio::task::JoinHandle<MonitorState>) {
    let runnable = prepare(config).unwrap();
    let mut child = spawn_session(runnable.command(OutputMode::Discard)).unwrap();
    let pid = child.pid();

    store
        .add(ProcessRecord {
            pid,
            config: config.clone(),
        })
        .await
        .unwrap();

    let monitor = fast_monitor();
    let store = store.clone();
    let signal = runnable.signal();
    let task = tokio::spawn(async move { monitor.run(&store, &mut child, signal).await.unwrap() });
    (pid, task)
}

fn process_is_gone(pid: u32) -> bool {
    nix::sys::signal::kill(Pid::from_raw(pid as i32), None) == Err(nix::errno::Errno::ESRCH)
}

#[tokio::test]
async fn test_stop_terminates_managed_process() {
    let dir = tempfile::tempdir().unwrap();
    let store_path = dir.path().join(".pids.db");
    let store = SqliteStore::open(&store_path).unwrap();

    let (pid, task) = launch_registered(&store, &config(&["sleep", "30"])).await;

    // Give the monitor a few polls while the record is present
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!process_is_gone(pid));

    // Cooperative stop through the controller: remove the record
    let controller = Controller::new().with_store_path(&store_path);
    controller.stop(pid).await.unwrap();

    let state = task.await.unwrap();
    assert_eq!(state, MonitorState::Terminated);
    assert!(process_is_gone(pid));
    assert!(store.all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_natural_exit_cleans_up_registry() {
    let dir = tempfile::tempdir().unwrap();
    let store_path = dir.path().join(".pids.db");
    let store = SqliteStore::open(&store_path).unwrap();

    let (pid, task) = launch_registered(&store, &config(&["sh", "-c", "exit 0"])).await;

    let state = task.await.unwrap();
    assert_eq!(state, MonitorState::Terminated);
    assert!(!store.exists(pid).await.unwrap());
}

#[tokio::test]
async fn test_two_processes_stop_independently() {
    let dir = tempfile::tempdir().unwrap();
    let store_path = dir.path().join(".pids.db");
    let store = SqliteStore::open(&store_path).unwrap();

    let (first, first_task) = launch_registered(&store, &config(&["sleep", "30"])).await;
    let (second, second_task) = launch_registered(&store, &config(&["sleep", "30"])).await;

    let controller = Controller::new().with_store_path(&store_path);
    controller.stop(first).await.unwrap();

    first_task.await.unwrap();
    assert!(process_is_gone(first));
    // The other process is untouched and still registered
    assert!(!process_is_gone(second));
    assert!(store.exists(second).await.unwrap());

    controller.stop(second).await.unwrap();
    second_task.await.unwrap();
    assert!(process_is_gone(second));
}

#[tokio::test]
async fn test_list_shows_registered_processes() {
    let dir = tempfile::tempdir().unwrap();
    let store_path = dir.path().join(".pids.db");
    let store = SqliteStore::open(&store_path).unwrap();

    let sleep_config = config(&["sleep", "30"]);
    let (pid, task) = launch_registered(&store, &sleep_config).await;

    let controller = Controller::new().with_store_path(&store_path);
    let records = controller.list().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].pid, pid);
    assert_eq!(records[0].config, sleep_config);

    controller.stop(pid).await.unwrap();
    task.await.unwrap();
    assert!(controller.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_registry_survives_reopen_while_process_runs() {
    let dir = tempfile::tempdir().unwrap();
    let store_path = dir.path().join(".pids.db");
    let store = SqliteStore::open(&store_path).unwrap();

    let (pid, task) = launch_registered(&store, &config(&["sleep", "30"])).await;

    // A second handle on the same file sees the record, like a stop
    // invocation from another shell would.
    let reopened = SqliteStore::open(&store_path).unwrap();
    assert!(reopened.exists(pid).await.unwrap());
    reopened.remove(pid).await.unwrap();

    task.await.unwrap();
    assert!(process_is_gone(pid));
    assert!(Path::new(&store_path).exists());
}
