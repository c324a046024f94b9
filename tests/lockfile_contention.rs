//! Lock files shared with other processes
//!
//! Another process holds the marker; the lock is acquired only once that
//! process removes it.

use devhooks::safety::lockfile::{lockfile_path, LockOptions, Lockfile};
use devhooks::HookError;
use std::process::Command;
use std::time::{Duration, Instant};

#[test]
fn test_lock_released_by_other_process() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("_dev_dri_card0");
    let marker = lockfile_path(&target);

    // noclobber makes the shell create the marker with O_EXCL
    let status = Command::new("sh")
        .arg("-c")
        .arg(format!("set -C; : > '{}'", marker.display()))
        .status()
        .unwrap();
    assert!(status.success());

    let mut holder = Command::new("sh")
        .arg("-c")
        .arg(format!("sleep 0.3; rm -f '{}'", marker.display()))
        .spawn()
        .unwrap();

    let start = Instant::now();
    let lock = Lockfile::acquire(&target).unwrap();
    assert!(start.elapsed() >= Duration::from_millis(250));
    assert!(holder.wait().unwrap().success());

    // While we hold it, a shell cannot take it either
    let status = Command::new("sh")
        .arg("-c")
        .arg(format!("set -C; : > '{}'", marker.display()))
        .status()
        .unwrap();
    assert!(!status.success());

    drop(lock);
    assert!(!marker.exists());
}

#[test]
fn test_timeout_against_foreign_holder() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("resource");
    std::fs::write(lockfile_path(&target), b"").unwrap();

    let options = LockOptions {
        timeout: Some(Duration::from_millis(250)),
        ..LockOptions::default()
    };
    let err = Lockfile::acquire_with(&target, options).unwrap_err();
    assert!(matches!(err.kind(), HookError::LockTimeout { .. }));
    assert!(err.to_string().contains("250 milliseconds"));

    // The foreign marker is left alone
    assert!(lockfile_path(&target).exists());
}
