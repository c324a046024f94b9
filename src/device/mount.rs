//! A mount request for a character or block device.

use super::access::DeviceAccess;
use crate::config::types::{Context, HookError, Result};
use crate::kernel::cgroup::DeviceRule;
use crate::kernel::credentials::Identity;
use crate::kernel::mount::MountRequest;
use nix::mount::MsFlags;
use nix::sys::stat::{major, minor};
use std::fmt;
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::Path;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceType {
    Char,
    Block,
}

impl DeviceType {
    pub fn as_char(self) -> char {
        match self {
            DeviceType::Char => 'c',
            DeviceType::Block => 'b',
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// A [`MountRequest`] whose source is a device node, plus that node's type and
/// numbers as read when the request was built.
#[derive(Clone, Debug)]
pub struct DeviceMountRequest {
    mount: MountRequest,
    device_type: DeviceType,
    major: u64,
    minor: u64,
    access: DeviceAccess,
}

impl DeviceMountRequest {
    /// Fails with `NotADeviceFile` unless the source (symlinks followed) is a
    /// character or block special file.
    pub fn new(mount: MountRequest, access: DeviceAccess) -> Result<Self> {
        let source = mount.source();
        let meta = std::fs::metadata(source)
            .with_context(|| format!("Failed to stat device {}", source.display()))?;

        let file_type = meta.file_type();
        let device_type = if file_type.is_char_device() {
            DeviceType::Char
        } else if file_type.is_block_device() {
            DeviceType::Block
        } else {
            return Err(HookError::NotADeviceFile {
                path: source.to_path_buf(),
            }
            .into());
        };

        let rdev = meta.rdev();
        Ok(Self {
            device_type,
            major: major(rdev),
            minor: minor(rdev),
            access,
            mount,
        })
    }

    pub fn mount_request(&self) -> &MountRequest {
        &self.mount
    }

    pub fn source(&self) -> &Path {
        self.mount.source()
    }

    pub fn destination(&self) -> &Path {
        self.mount.destination()
    }

    pub fn flags(&self) -> MsFlags {
        self.mount.flags()
    }

    pub fn rootfs_dir(&self) -> &Path {
        self.mount.rootfs_dir()
    }

    pub fn identity(&self) -> &Identity {
        self.mount.identity()
    }

    pub fn device_type(&self) -> DeviceType {
        self.device_type
    }

    pub fn major(&self) -> u64 {
        self.major
    }

    pub fn minor(&self) -> u64 {
        self.minor
    }

    pub fn access(&self) -> DeviceAccess {
        self.access
    }

    /// The devices cgroup entry that grants this device's access
    pub fn cgroup_rule(&self) -> DeviceRule {
        DeviceRule {
            device_type: self.device_type.as_char(),
            major: self.major,
            minor: self.minor,
            access: self.access.as_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(source: &Path) -> MountRequest {
        MountRequest::new(
            source,
            "/dev/null",
            MsFlags::MS_REC | MsFlags::MS_PRIVATE,
            "/rootfs",
            Identity::new(1000, 1000, Vec::new()),
        )
        .unwrap()
    }

    #[test]
    fn dev_null_is_char_device_1_3() {
        let device =
            DeviceMountRequest::new(request(Path::new("/dev/null")), DeviceAccess::ALL).unwrap();
        assert_eq!(device.device_type(), DeviceType::Char);
        assert_eq!(device.major(), 1);
        assert_eq!(device.minor(), 3);
        assert_eq!(device.cgroup_rule().to_string(), "c 1:3 rwm");
    }

    #[test]
    fn regular_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("not-a-device");
        std::fs::write(&file, b"").unwrap();

        let err = DeviceMountRequest::new(request(&file), DeviceAccess::ALL).unwrap_err();
        assert!(matches!(err.kind(), HookError::NotADeviceFile { .. }));
    }

    #[test]
    fn symlink_to_device_is_followed() {
        let dir = tempfile::tempdir().unwrap();
        let link = dir.path().join("null-link");
        std::os::unix::fs::symlink("/dev/null", &link).unwrap();

        let device = DeviceMountRequest::new(request(&link), DeviceAccess::ALL).unwrap();
        assert_eq!((device.major(), device.minor()), (1, 3));
        assert_eq!(device.source(), link.as_path());
    }
}
