/// Bind mounts into a container rootfs under the container's identity
use super::request::MountRequest;
use crate::config::types::{BindMountCause, Context, Error, HookError, PathSide, Result};
use crate::kernel::credentials::{FilesystemIdentityGuard, IdentityGuard};

use nix::mount::{mount, MsFlags};
use nix::unistd::{chown, Gid, Uid};
use std::collections::VecDeque;
use std::ffi::{OsStr, OsString};
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Component, Path, PathBuf};

/// Same limit as the kernel's path walk
const MAX_SYMLINK_HOPS: usize = 40;

/// Resolve `path` as if `rootfs` were `/`.
///
/// Symlinks are followed inside the rootfs: absolute targets restart at the
/// rootfs root, relative ones continue from the link's directory, and `..`
/// never climbs above the rootfs root. Missing trailing components are kept
/// as they are.
pub fn realpath_within_rootfs(rootfs: &Path, path: &Path) -> Result<PathBuf> {
    let mut resolved: Vec<OsString> = Vec::new();
    let mut pending = components_of(path);
    let mut hops = 0;

    while let Some(component) = pending.pop_front() {
        if component.as_os_str() == OsStr::new("..") {
            resolved.pop();
            continue;
        }

        let candidate = join_components(rootfs, &resolved).join(&component);
        let is_symlink = fs::symlink_metadata(&candidate)
            .map(|meta| meta.file_type().is_symlink())
            .unwrap_or(false);
        if !is_symlink {
            resolved.push(component);
            continue;
        }

        hops += 1;
        if hops > MAX_SYMLINK_HOPS {
            return Err(escape(
                rootfs,
                path,
                format!("more than {} levels of symbolic links", MAX_SYMLINK_HOPS),
            ));
        }

        let target = fs::read_link(&candidate)
            .with_context(|| format!("Failed to read symlink {}", candidate.display()))?;
        if target.is_absolute() {
            resolved.clear();
        }
        let mut next = components_of(&target);
        next.extend(pending);
        pending = next;
    }

    let real = join_components(rootfs, &resolved);
    ensure_inside_rootfs(rootfs, &real, path)?;
    log::debug!(
        "Resolved {} within rootfs {} to {}",
        path.display(),
        rootfs.display(),
        real.display()
    );
    Ok(real)
}

fn components_of(path: &Path) -> VecDeque<OsString> {
    path.components()
        .filter_map(|component| match component {
            Component::Normal(name) => Some(name.to_os_string()),
            Component::ParentDir => Some(OsString::from("..")),
            Component::RootDir | Component::CurDir | Component::Prefix(_) => None,
        })
        .collect()
}

fn join_components(rootfs: &Path, components: &[OsString]) -> PathBuf {
    let mut path = rootfs.to_path_buf();
    path.extend(components);
    path
}

fn escape(rootfs: &Path, path: &Path, reason: String) -> Error {
    HookError::InvalidMountPath {
        side: PathSide::Container,
        path: path.display().to_string(),
        reason: format!("cannot be resolved within rootfs {}: {}", rootfs.display(), reason),
    }
    .into()
}

fn deepest_existing_ancestor(path: &Path) -> Option<&Path> {
    path.ancestors()
        .find(|ancestor| fs::symlink_metadata(ancestor).is_ok())
}

fn ensure_inside_rootfs(rootfs: &Path, real: &Path, requested: &Path) -> Result<()> {
    let canonical_rootfs = fs::canonicalize(rootfs)
        .with_context(|| format!("Failed to canonicalize rootfs {}", rootfs.display()))?;
    let existing = match deepest_existing_ancestor(real) {
        Some(existing) => existing,
        None => return Err(escape(rootfs, requested, "no existing ancestor".to_string())),
    };
    let canonical = fs::canonicalize(existing)
        .with_context(|| format!("Failed to canonicalize {}", existing.display()))?;
    if !canonical.starts_with(&canonical_rootfs) {
        return Err(escape(
            rootfs,
            requested,
            format!("{} is outside of the rootfs", canonical.display()),
        ));
    }
    Ok(())
}

/// Filesystem device ids a mount destination may live on
pub fn allowed_devices(rootfs: &Path, bundle_dir: Option<&Path>) -> Result<Vec<u64>> {
    let mut devices = Vec::new();
    let rootfs_meta = fs::metadata(rootfs)
        .with_context(|| format!("Failed to stat rootfs {}", rootfs.display()))?;
    devices.push(rootfs_meta.dev());

    let mut optional = vec![PathBuf::from("/tmp"), rootfs.join("dev")];
    if let Some(bundle_dir) = bundle_dir {
        optional.push(bundle_dir.join("overlay/rootfs-lower"));
    }
    for candidate in optional {
        if let Ok(meta) = fs::metadata(&candidate) {
            if !devices.contains(&meta.dev()) {
                devices.push(meta.dev());
            }
        }
    }
    Ok(devices)
}

/// Whether `path` (or the directory that would contain it) is on one of `allowed`
pub fn is_path_on_allowed_device(path: &Path, allowed: &[u64]) -> Result<bool> {
    let probe = match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => path,
        Ok(_) => path.parent().unwrap_or(path),
        Err(_) => deepest_existing_ancestor(path).unwrap_or(path),
    };
    let meta = fs::metadata(probe)
        .with_context(|| format!("Failed to stat {}", probe.display()))?;
    Ok(allowed.contains(&meta.dev()))
}

/// Create every missing directory of `path`, owned by uid/gid
pub fn create_folders_if_necessary(path: &Path, uid: u32, gid: u32) -> Result<()> {
    let missing: Vec<&Path> = path
        .ancestors()
        .take_while(|ancestor| fs::symlink_metadata(ancestor).is_err())
        .collect();

    for dir in missing.into_iter().rev() {
        fs::create_dir(dir)
            .with_context(|| format!("Failed to create directory {}", dir.display()))?;
        chown(dir, Some(Uid::from_raw(uid)), Some(Gid::from_raw(gid))).map_err(|e| {
            Error::from(std::io::Error::from(e))
                .push_context(format!("Failed to chown {} to {}:{}", dir.display(), uid, gid))
        })?;
        log::debug!("Created directory {}", dir.display());
    }
    Ok(())
}

/// Create an empty file at `path` (and its missing parents), owned by uid/gid
pub fn create_file_if_necessary(path: &Path, uid: u32, gid: u32) -> Result<()> {
    if fs::symlink_metadata(path).is_ok() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        create_folders_if_necessary(parent, uid, gid)?;
    }
    fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .with_context(|| format!("Failed to create file {}", path.display()))?;
    chown(path, Some(Uid::from_raw(uid)), Some(Gid::from_raw(gid))).map_err(|e| {
        Error::from(std::io::Error::from(e))
            .push_context(format!("Failed to chown {} to {}:{}", path.display(), uid, gid))
    })?;
    log::debug!("Created file {}", path.display());
    Ok(())
}

/// Recursive bind mount, remounted nosuid (and read-only when `flags` has
/// MS_RDONLY), then made private
pub fn bind_mount(from: &Path, to: &Path, flags: MsFlags) -> Result<()> {
    let syscall_failed = |call_flags: MsFlags, e: nix::Error| -> Error {
        HookError::BindMountFailed {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
            flags: u64::from(call_flags.bits()),
            cause: BindMountCause::Syscall,
            reason: e.to_string(),
        }
        .into()
    };

    let bind_flags = MsFlags::MS_BIND | MsFlags::MS_REC;
    mount(Some(from), to, Some("bind"), bind_flags, None::<&str>)
        .map_err(|e| syscall_failed(bind_flags, e))?;

    let mut remount_flags =
        MsFlags::MS_REMOUNT | MsFlags::MS_BIND | MsFlags::MS_NOSUID | MsFlags::MS_REC;
    if flags.contains(MsFlags::MS_RDONLY) {
        remount_flags |= MsFlags::MS_RDONLY;
    }
    mount(Some(from), to, Some("bind"), remount_flags, None::<&str>)
        .map_err(|e| syscall_failed(remount_flags, e))?;

    let propagation_flags = MsFlags::MS_PRIVATE | MsFlags::MS_REC;
    mount(None::<&str>, to, None::<&str>, propagation_flags, None::<&str>)
        .map_err(|e| syscall_failed(propagation_flags, e))?;

    log::debug!("Bind mounted {} on {}", from.display(), to.display());
    Ok(())
}

/// Bind mount `request.source()` onto `request.destination()` inside the rootfs.
///
/// Validation runs with the container's effective identity, mount point
/// creation as root (then chowned to the container identity), and the mount
/// itself as root with the container's filesystem identity. The previous
/// identity is restored on every path. A mount left in place by a later
/// failure is reported, not undone.
pub fn validated_bind_mount(request: &MountRequest, bundle_dir: Option<&Path>) -> Result<()> {
    let rootfs = request.rootfs_dir();
    let identity = request.identity();
    let fail = |cause: BindMountCause, reason: String| mount_failure(request, cause, reason);

    log::debug!(
        "Bind mounting {} on container's {} as {}",
        request.source().display(),
        request.destination().display(),
        identity
    );

    let user_guard = IdentityGuard::switch_to(identity).map_err(|e| {
        e.wrap(fail(
            BindMountCause::Permission,
            format!("cannot switch to {}", identity),
        ))
    })?;

    let source = fs::canonicalize(request.source()).map_err(|e| {
        Error::from(e).wrap(fail(
            BindMountCause::Permission,
            format!("source is not accessible to {}", identity),
        ))
    })?;

    let destination = realpath_within_rootfs(rootfs, request.destination()).map_err(|e| {
        let cause = match e.kind() {
            HookError::InvalidMountPath { .. } => BindMountCause::RootfsEscape,
            _ => BindMountCause::Syscall,
        };
        e.wrap(fail(cause, "failed to resolve destination".to_string()))
    })?;

    let allowed = allowed_devices(rootfs, bundle_dir)
        .map_err(|e| e.wrap(fail(BindMountCause::Syscall, "cannot stat rootfs".to_string())))?;
    let on_allowed_device = is_path_on_allowed_device(&destination, &allowed)
        .map_err(|e| e.wrap(fail(BindMountCause::Syscall, "cannot stat destination".to_string())))?;
    if !on_allowed_device {
        return Err(fail(
            BindMountCause::Permission,
            format!(
                "destination {} is not on the rootfs, /tmp or the bundle's lower overlay",
                destination.display()
            ),
        )
        .into());
    }

    let source_is_dir = fs::metadata(&source)
        .map(|meta| meta.is_dir())
        .map_err(|e| Error::from(e).wrap(fail(BindMountCause::Permission, "cannot stat source".to_string())))?;

    user_guard
        .restore()
        .map_err(|e| restore_failed(request, e, "root identity"))?;

    let created = if source_is_dir {
        create_folders_if_necessary(&destination, identity.uid(), identity.gid())
    } else {
        create_file_if_necessary(&destination, identity.uid(), identity.gid())
    };
    created.map_err(|e| {
        e.wrap(fail(BindMountCause::Syscall, "cannot create mount point".to_string()))
    })?;

    let fs_guard = FilesystemIdentityGuard::set(identity.uid(), identity.gid()).map_err(|e| {
        e.wrap(fail(
            BindMountCause::Permission,
            "cannot set filesystem identity".to_string(),
        ))
    })?;

    bind_mount(&source, &destination, request.flags()).with_context(|| {
        format!(
            "Failed to bind mount {} on container's {}",
            request.source().display(),
            request.destination().display()
        )
    })?;

    fs_guard
        .restore()
        .map_err(|e| restore_failed(request, e, "filesystem identity"))?;

    log::info!(
        "Bind mounted {} on container's {}",
        source.display(),
        request.destination().display()
    );
    Ok(())
}

fn mount_failure(request: &MountRequest, cause: BindMountCause, reason: String) -> HookError {
    HookError::BindMountFailed {
        from: request.source().to_path_buf(),
        to: request.destination().to_path_buf(),
        flags: u64::from(request.flags().bits()),
        cause,
        reason,
    }
}

fn restore_failed(request: &MountRequest, err: Error, what: &str) -> Error {
    err.wrap(mount_failure(
        request,
        BindMountCause::Syscall,
        format!("cannot restore {}", what),
    ))
}
