//! Device injection into an already created container.
//!
//! Every request is parsed (and its host node inspected) before the hook
//! joins the container's namespaces. Each device is then bind mounted into
//! the rootfs and whitelisted in the container's devices cgroup, optionally
//! under a per-device lock.

use crate::config::types::{Context, Result};
use crate::config::{BundleConfig, ContainerState, HookConfig};
use crate::device::{DeviceMountRequest, DeviceParser};
use crate::kernel::cgroup::DevicesCgroup;
use crate::kernel::mount::validated_bind_mount;
use crate::kernel::namespace::{enter_namespaces, NamespaceKind};
use crate::safety::Lockfile;

pub struct DeviceHook {
    config: HookConfig,
    state: ContainerState,
    bundle: BundleConfig,
    parser: DeviceParser,
}

impl DeviceHook {
    pub fn new(config: HookConfig, state: ContainerState, bundle: BundleConfig) -> Self {
        let parser = DeviceParser::new(bundle.rootfs_dir(), bundle.identity());
        Self {
            config,
            state,
            bundle,
            parser,
        }
    }

    /// Parse every configured request. No device is injected if one is invalid.
    pub fn parse_devices(&self) -> Result<Vec<DeviceMountRequest>> {
        self.config
            .devices
            .iter()
            .map(|request| self.parser.parse_device_request(request))
            .collect()
    }

    pub fn activate(&self) -> Result<()> {
        if self.config.devices.is_empty() {
            log::info!("No device mounts to perform");
            return Ok(());
        }

        let devices = self.parse_devices()?;
        let pid = self.state.require_pid()?;

        let mut namespaces = vec![NamespaceKind::Mount];
        if self.config.enter_pid_namespace {
            namespaces.push(NamespaceKind::Pid);
        }
        enter_namespaces(&self.config.proc_prefix.join("proc"), pid, &namespaces)
            .with_context(|| format!("Failed to enter namespaces of container pid {}", pid))?;

        let cgroup = DevicesCgroup::new(&self.config.proc_prefix, pid);
        for device in &devices {
            self.inject(device, &cgroup).with_context(|| {
                format!("Failed to inject device {}", device.source().display())
            })?;
        }

        log::info!("Injected {} device(s) into container pid {}", devices.len(), pid);
        Ok(())
    }

    /// Mount and whitelist one device.
    pub fn inject(&self, device: &DeviceMountRequest, cgroup: &DevicesCgroup) -> Result<()> {
        let lock = match &self.config.lock {
            Some(lock) => Some(Lockfile::acquire_with(
                &lock.target_for(device.source()),
                lock.options(),
            )?),
            None => None,
        };

        validated_bind_mount(device.mount_request(), Some(self.bundle.bundle_dir()))?;
        cgroup.whitelist(&device.cgroup_rule())?;

        if let Some(lock) = lock {
            lock.release()?;
        }
        log::info!(
            "Injected {} as {} ({})",
            device.source().display(),
            device.destination().display(),
            device.access()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::HookError;
    use std::path::Path;

    const CONFIG: &str = r#"{
        "root": {"path": "rootfs"},
        "process": {"user": {"uid": 1000, "gid": 1000}, "env": []}
    }"#;

    fn hook(devices: &[&str], pid: Option<i32>) -> DeviceHook {
        let bundle = BundleConfig::from_json(Path::new("/var/bundle"), CONFIG).unwrap();
        let state = ContainerState {
            bundle: "/var/bundle".into(),
            pid,
            id: None,
            status: None,
        };
        let config = HookConfig {
            devices: devices.iter().map(|d| d.to_string()).collect(),
            ..HookConfig::default()
        };
        DeviceHook::new(config, state, bundle)
    }

    #[test]
    fn nothing_to_do_without_devices() {
        assert!(hook(&[], None).activate().is_ok());
    }

    #[test]
    fn invalid_request_fails_before_entering_namespaces() {
        let err = hook(&["/dev/null", "/dev/null:/a:/b:rw"], Some(1))
            .activate()
            .unwrap_err();
        assert!(matches!(err.kind(), HookError::TooManyTokens { .. }));
    }

    #[test]
    fn missing_pid_is_a_config_error() {
        let err = hook(&["/dev/null"], None).activate().unwrap_err();
        assert!(matches!(err.kind(), HookError::Config(_)));
    }

    #[test]
    fn devices_use_bundle_rootfs_and_identity() {
        let devices = hook(&["/dev/null:/dev/fake0:rw"], Some(1))
            .parse_devices()
            .unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].rootfs_dir(), Path::new("/var/bundle/rootfs"));
        assert_eq!(devices[0].identity().uid(), 1000);
        assert_eq!(devices[0].cgroup_rule().to_string(), "c 1:3 rw");
    }
}
