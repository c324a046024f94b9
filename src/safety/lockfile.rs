/// Cross-process mutual exclusion through an exclusively created marker file
/// The marker `<target>.lock` exists exactly while the lock is held
use crate::config::types::{Context, HookError, Result};
use log::{debug, warn};
use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

/// Pause between two creation attempts
const BACKOFF: Duration = Duration::from_millis(100);

/// Default interval between "still waiting" warnings
pub const DEFAULT_WARNING_INTERVAL: Duration = Duration::from_millis(1000);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LockOptions {
    /// `None` waits forever
    pub timeout: Option<Duration>,
    pub warning_interval: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            warning_interval: DEFAULT_WARNING_INTERVAL,
        }
    }
}

/// A held lock on `target`. Not `Clone`: moving it moves the lock, and the
/// marker is removed once, by whoever owns it last.
#[derive(Debug)]
#[must_use = "the lock is released as soon as the Lockfile is dropped"]
pub struct Lockfile {
    lockfile: PathBuf,
    held: bool,
}

impl Lockfile {
    /// Wait for the lock without a timeout.
    pub fn acquire(target: &Path) -> Result<Self> {
        Self::acquire_with(target, LockOptions::default())
    }

    pub fn acquire_with(target: &Path, options: LockOptions) -> Result<Self> {
        let lockfile = lockfile_path(target);
        let start = Instant::now();
        let mut next_warning = options.warning_interval;

        debug!("Acquiring lock on {}", lockfile.display());
        loop {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&lockfile)
            {
                Ok(_) => {
                    debug!(
                        "Acquired lock on {} after {:?}",
                        lockfile.display(),
                        start.elapsed()
                    );
                    return Ok(Self {
                        lockfile,
                        held: true,
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!("Failed to create lock file {}", lockfile.display())
                    })
                }
            }

            let waited = start.elapsed();
            if let Some(timeout) = options.timeout {
                if waited >= timeout {
                    return Err(HookError::LockTimeout {
                        lockfile,
                        timeout,
                        waited,
                    }
                    .into());
                }
            }
            if !options.warning_interval.is_zero() && waited >= next_warning {
                warn!(
                    "Still waiting for lock on {} (waited {} ms)",
                    lockfile.display(),
                    waited.as_millis()
                );
                while next_warning <= waited {
                    next_warning += options.warning_interval;
                }
            }

            thread::sleep(BACKOFF);
        }
    }

    pub fn path(&self) -> &Path {
        &self.lockfile
    }

    pub fn is_held(&self) -> bool {
        self.held
    }

    /// Release now instead of at drop, reporting failure.
    pub fn release(mut self) -> Result<()> {
        self.remove_marker()
    }

    fn remove_marker(&mut self) -> Result<()> {
        if !self.held {
            return Ok(());
        }
        self.held = false;
        std::fs::remove_file(&self.lockfile)
            .with_context(|| format!("Failed to release lock file {}", self.lockfile.display()))?;
        debug!("Released lock on {}", self.lockfile.display());
        Ok(())
    }
}

impl Drop for Lockfile {
    fn drop(&mut self) {
        if let Err(e) = self.remove_marker() {
            log::error!("{}", e);
        }
    }
}

/// `<target>.lock`
pub fn lockfile_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_os_string();
    name.push(".lock");
    PathBuf::from(name)
}
