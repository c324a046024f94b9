//! Bind mount request value object.

use crate::config::types::{HookError, PathSide, Result};
use crate::kernel::credentials::Identity;
use nix::mount::MsFlags;
use std::path::{Path, PathBuf};

/// A bind mount of a host path onto a path inside a container rootfs.
#[derive(Clone, Debug)]
pub struct MountRequest {
    source: PathBuf,
    destination: PathBuf,
    flags: MsFlags,
    rootfs_dir: PathBuf,
    identity: Identity,
}

impl MountRequest {
    /// Both paths must be non-empty and absolute.
    pub fn new(
        source: impl Into<PathBuf>,
        destination: impl Into<PathBuf>,
        flags: MsFlags,
        rootfs_dir: impl Into<PathBuf>,
        identity: Identity,
    ) -> Result<Self> {
        let source = source.into();
        let destination = destination.into();
        validate_absolute(PathSide::Host, &source)?;
        validate_absolute(PathSide::Container, &destination)?;
        Ok(Self {
            source,
            destination,
            flags,
            rootfs_dir: rootfs_dir.into(),
            identity,
        })
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn flags(&self) -> MsFlags {
        self.flags
    }

    pub fn rootfs_dir(&self) -> &Path {
        &self.rootfs_dir
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn is_read_only(&self) -> bool {
        self.flags.contains(MsFlags::MS_RDONLY)
    }
}

pub(crate) fn validate_absolute(side: PathSide, path: &Path) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Err(HookError::InvalidMountPath {
            side,
            path: String::new(),
            reason: "path is empty".to_string(),
        }
        .into());
    }
    if !path.is_absolute() {
        return Err(HookError::InvalidMountPath {
            side,
            path: path.display().to_string(),
            reason: "path must be absolute".to_string(),
        }
        .into());
    }
    Ok(())
}
