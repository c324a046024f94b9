//! Cgroup v1 devices whitelist.

use crate::config::types::{Context, HookError, Result};
use std::cell::OnceCell;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

const DEVICES_SUBSYSTEM: &str = "devices";

/// One `devices.allow` entry
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceRule {
    pub device_type: char,
    pub major: u64,
    pub minor: u64,
    pub access: String,
}

impl fmt::Display for DeviceRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}:{} {}",
            self.device_type, self.major, self.minor, self.access
        )
    }
}

fn proc_file(proc_prefix: &Path, pid: i32, name: &str) -> PathBuf {
    proc_prefix
        .join("proc")
        .join(pid.to_string())
        .join(name)
}

fn under_prefix(proc_prefix: &Path, path: &Path) -> PathBuf {
    proc_prefix.join(path.strip_prefix("/").unwrap_or(path))
}

/// Find `(mount root, mount point)` of the hierarchy that carries `subsystem`,
/// as seen by `pid`.
pub fn find_subsystem_mount_paths(
    subsystem: &str,
    proc_prefix: &Path,
    pid: i32,
) -> Result<(PathBuf, PathBuf)> {
    let mountinfo = proc_file(proc_prefix, pid, "mountinfo");
    let content = fs::read_to_string(&mountinfo)
        .with_context(|| format!("Failed to read {}", mountinfo.display()))?;

    for line in content.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 10 {
            continue;
        }
        let fs_type = fields[fields.len() - 3];
        let super_options = fields[fields.len() - 1];
        if fs_type != "cgroup" || !super_options.split(',').any(|opt| opt == subsystem) {
            continue;
        }

        let mount_root = fields[3];
        if mount_root.starts_with("/..") {
            return Err(HookError::CgroupNotFound(format!(
                "{} hierarchy root {} belongs to a parent cgroup namespace ({})",
                subsystem,
                mount_root,
                mountinfo.display()
            ))
            .into());
        }
        log::debug!(
            "Found {} hierarchy: root {} mounted on {}",
            subsystem,
            mount_root,
            fields[4]
        );
        return Ok((PathBuf::from(mount_root), PathBuf::from(fields[4])));
    }

    Err(HookError::CgroupNotFound(format!(
        "no cgroup v1 hierarchy with subsystem '{}' in {}",
        subsystem,
        mountinfo.display()
    ))
    .into())
}

/// Path of `pid`'s cgroup for `subsystem`, relative to the hierarchy's mount root
pub fn find_cgroup_path_in_hierarchy(
    subsystem: &str,
    proc_prefix: &Path,
    pid: i32,
    mount_root: &Path,
) -> Result<PathBuf> {
    let cgroup_file = proc_file(proc_prefix, pid, "cgroup");
    let content = fs::read_to_string(&cgroup_file)
        .with_context(|| format!("Failed to read {}", cgroup_file.display()))?;

    for line in content.lines() {
        let mut parts = line.splitn(3, ':');
        let (_id, controllers, path) = match (parts.next(), parts.next(), parts.next()) {
            (Some(id), Some(controllers), Some(path)) => (id, controllers, path),
            _ => continue,
        };
        if !controllers.split(',').any(|c| c == subsystem) {
            continue;
        }

        if path.starts_with("/..") {
            return Err(HookError::CgroupNotFound(format!(
                "{} cgroup {} of pid {} is outside of its cgroup namespace",
                subsystem, path, pid
            ))
            .into());
        }

        let path = Path::new(path);
        let relative = if mount_root != Path::new("/") && path.starts_with(mount_root) {
            path.strip_prefix(mount_root).unwrap_or(path)
        } else {
            path.strip_prefix("/").unwrap_or(path)
        };
        return Ok(relative.to_path_buf());
    }

    Err(HookError::CgroupNotFound(format!(
        "no '{}' entry in {}",
        subsystem,
        cgroup_file.display()
    ))
    .into())
}

/// Absolute path of `pid`'s cgroup directory for `subsystem`.
///
/// The hierarchy's mount point is read from mountinfo and resolved under
/// `proc_prefix`, so a prefixed tree carries its own cgroup mounts.
pub fn find_cgroup_path(subsystem: &str, proc_prefix: &Path, pid: i32) -> Result<PathBuf> {
    let (mount_root, mount_point) = find_subsystem_mount_paths(subsystem, proc_prefix, pid)?;
    let relative = find_cgroup_path_in_hierarchy(subsystem, proc_prefix, pid, &mount_root)?;
    let cgroup_path = under_prefix(proc_prefix, &mount_point).join(relative);

    if !cgroup_path.is_dir() {
        return Err(HookError::CgroupNotFound(format!(
            "{} cgroup directory {} of pid {} does not exist",
            subsystem,
            cgroup_path.display(),
            pid
        ))
        .into());
    }
    log::debug!("Found {} cgroup of pid {}: {}", subsystem, pid, cgroup_path.display());
    Ok(cgroup_path)
}

/// Append `rule` to `<cgroup>/devices.allow`
pub fn whitelist_device(devices_cgroup: &Path, rule: &DeviceRule) -> Result<()> {
    let allow_file = devices_cgroup.join("devices.allow");
    let write_failed = |e: std::io::Error| HookError::CgroupWriteFailed {
        path: allow_file.clone(),
        reason: e.to_string(),
    };

    let mut file = fs::OpenOptions::new()
        .append(true)
        .open(&allow_file)
        .map_err(write_failed)?;
    file.write_all(format!("{}\n", rule).as_bytes())
        .map_err(write_failed)?;

    log::debug!("Whitelisted '{}' in {}", rule, allow_file.display());
    Ok(())
}

/// The devices cgroup of one process, looked up on first use and then reused
#[derive(Debug)]
pub struct DevicesCgroup {
    proc_prefix: PathBuf,
    pid: i32,
    path: OnceCell<PathBuf>,
}

impl DevicesCgroup {
    pub fn new(proc_prefix: impl Into<PathBuf>, pid: i32) -> Self {
        Self {
            proc_prefix: proc_prefix.into(),
            pid,
            path: OnceCell::new(),
        }
    }

    pub fn path(&self) -> Result<&Path> {
        if let Some(path) = self.path.get() {
            return Ok(path);
        }
        let found = find_cgroup_path(DEVICES_SUBSYSTEM, &self.proc_prefix, self.pid)
            .with_context(|| format!("Failed to find devices cgroup of pid {}", self.pid))?;
        Ok(self.path.get_or_init(|| found))
    }

    pub fn whitelist(&self, rule: &DeviceRule) -> Result<()> {
        let path = self.path()?;
        whitelist_device(path, rule)
            .with_context(|| format!("Failed to whitelist device '{}' for pid {}", rule, self.pid))
    }
}
