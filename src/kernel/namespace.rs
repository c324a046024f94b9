/// Joining the namespaces of an already running process
/// Mount namespace first, then PID namespace
use crate::config::types::{HookError, Result};

use nix::sched::{setns, CloneFlags};
use std::fs::File;
use std::path::{Path, PathBuf};

/// Namespaces a hook can join
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NamespaceKind {
    Mount,
    Pid,
}

impl NamespaceKind {
    fn file_name(self) -> &'static str {
        match self {
            NamespaceKind::Mount => "mnt",
            NamespaceKind::Pid => "pid",
        }
    }

    fn clone_flag(self) -> CloneFlags {
        match self {
            NamespaceKind::Mount => CloneFlags::CLONE_NEWNS,
            NamespaceKind::Pid => CloneFlags::CLONE_NEWPID,
        }
    }
}

/// Join the mount and PID namespaces of `pid`
pub fn enter_namespaces_of(pid: i32) -> Result<()> {
    enter_namespaces(Path::new("/proc"), pid, &[NamespaceKind::Mount, NamespaceKind::Pid])
}

/// Join the given namespaces of `pid`, in order, using `<proc_dir>/<pid>/ns/*`
///
/// Every namespace file is opened before the first join, so a missing file
/// never leaves the process in a mixed state. The PID namespace only applies
/// to children forked afterwards.
pub fn enter_namespaces(proc_dir: &Path, pid: i32, kinds: &[NamespaceKind]) -> Result<()> {
    let mut handles: Vec<(NamespaceKind, PathBuf, File)> = Vec::with_capacity(kinds.len());
    for kind in kinds {
        let ns_file = proc_dir
            .join(pid.to_string())
            .join("ns")
            .join(kind.file_name());
        let file = File::open(&ns_file).map_err(|e| HookError::NamespaceEntryFailed {
            ns_file: ns_file.clone(),
            reason: format!("failed to open: {}", e),
        })?;
        handles.push((*kind, ns_file, file));
    }

    for (kind, ns_file, file) in &handles {
        setns(file, kind.clone_flag()).map_err(|e| HookError::NamespaceEntryFailed {
            ns_file: ns_file.clone(),
            reason: format!("setns failed: {}", e),
        })?;
        log::debug!("Entered namespace {}", ns_file.display());
    }

    log::info!("Entered namespaces {:?} of pid {}", kinds, pid);
    Ok(())
}
