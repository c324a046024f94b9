//! Configuration and error types
//!
//! Container state, OCI bundle access, logging setup and the validated
//! hook configuration assembled by the command line layer.

pub mod bundle;
pub mod logging;
pub mod types;

use crate::safety::LockOptions;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub use bundle::{BundleConfig, ContainerState};
pub use logging::LoggingConfig;

/// Per-device serialization of concurrent hook instances
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LockConfig {
    pub dir: PathBuf,
    /// `None` waits forever
    pub timeout_ms: Option<u64>,
    pub warning_ms: u64,
}

impl LockConfig {
    pub fn options(&self) -> LockOptions {
        LockOptions {
            timeout: self.timeout_ms.map(Duration::from_millis),
            warning_interval: Duration::from_millis(self.warning_ms),
        }
    }

    /// `<dir>/<device path with '/' replaced by '_'>`
    pub fn target_for(&self, device: &Path) -> PathBuf {
        let name = device.to_string_lossy().replace('/', "_");
        self.dir.join(name)
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct HookConfig {
    /// `<host path>[:<container path>][:<access>]` requests
    pub devices: Vec<String>,
    pub lock: Option<LockConfig>,
    /// Prepended to `/proc/<pid>/...` and cgroup mount points
    pub proc_prefix: PathBuf,
    pub enter_pid_namespace: bool,
    pub logging: LoggingConfig,
}

impl Default for HookConfig {
    fn default() -> Self {
        Self {
            devices: Vec::new(),
            lock: None,
            proc_prefix: PathBuf::from("/"),
            enter_pid_namespace: true,
            logging: LoggingConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_target_flattens_device_path() {
        let lock = LockConfig {
            dir: PathBuf::from("/run/hooks/locks"),
            timeout_ms: Some(500),
            warning_ms: 1000,
        };
        assert_eq!(
            lock.target_for(Path::new("/dev/dri/card0")),
            PathBuf::from("/run/hooks/locks/_dev_dri_card0")
        );
        let options = lock.options();
        assert_eq!(options.timeout, Some(Duration::from_millis(500)));
        assert_eq!(options.warning_interval, Duration::from_millis(1000));
    }
}
