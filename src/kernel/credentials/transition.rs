//! Effective and filesystem identity switching.
//!
//! CRITICAL: setegid MUST be called BEFORE seteuid, and a failed seteuid
//! rolls the egid back so the process never ends up half-switched.

use super::identity::Identity;
use crate::config::types::{HookError, Result};
use nix::unistd::{getegid, geteuid, getresgid, getresuid, setegid, seteuid, setgroups};
use nix::unistd::{setfsgid, setfsuid, Gid, Uid};

/// Switch effective uid/gid (and supplementary groups, when allowed) to `target`.
pub fn switch_identity(target: &Identity) -> Result<()> {
    log::debug!("Switching identity to {}", target);
    log_process_ids();

    let was_root = geteuid().is_root();
    let previous_egid = getegid();

    // Only root may call setgroups
    if was_root {
        set_supplementary_groups(target.supplementary_gids())?;
    }

    // CRITICAL: GID before UID
    setegid(Gid::from_raw(target.gid())).map_err(|e| {
        HookError::IdentitySwitchFailed(format!("Failed to setegid({}): {}", target.gid(), e))
    })?;

    if let Err(e) = seteuid(Uid::from_raw(target.uid())) {
        let mut msg = format!("Failed to seteuid({}): {}", target.uid(), e);
        if let Err(rollback) = setegid(previous_egid) {
            msg.push_str(&format!(
                "; additionally failed to restore egid {}: {}",
                previous_egid, rollback
            ));
        }
        return Err(HookError::IdentitySwitchFailed(msg).into());
    }

    // Back to root: groups can be restored only now
    if !was_root && target.is_root() {
        set_supplementary_groups(target.supplementary_gids())?;
    }

    log_process_ids();
    log::debug!("Switched identity to {}", target);
    Ok(())
}

fn set_supplementary_groups(gids: &[u32]) -> Result<()> {
    let groups: Vec<Gid> = gids.iter().copied().map(Gid::from_raw).collect();
    setgroups(&groups).map_err(|e| {
        HookError::IdentitySwitchFailed(format!(
            "Failed to set supplementary groups {:?}: {}",
            gids, e
        ))
    })?;
    Ok(())
}

/// Set the filesystem uid. Returns the previous filesystem uid.
///
/// setfsuid never reports failure directly, so the call is repeated and the
/// value it reports back must be the requested uid.
pub fn set_filesystem_uid(uid: u32) -> Result<u32> {
    let previous = setfsuid(Uid::from_raw(uid));
    let current = setfsuid(Uid::from_raw(uid));
    if current.as_raw() != uid {
        return Err(HookError::IdentitySwitchFailed(format!(
            "Failed to set filesystem uid to {} (still {})",
            uid, current
        ))
        .into());
    }
    log::debug!("Set filesystem uid {} (was {})", uid, previous);
    Ok(previous.as_raw())
}

/// Set the filesystem gid. Returns the previous filesystem gid.
pub fn set_filesystem_gid(gid: u32) -> Result<u32> {
    let previous = setfsgid(Gid::from_raw(gid));
    let current = setfsgid(Gid::from_raw(gid));
    if current.as_raw() != gid {
        return Err(HookError::IdentitySwitchFailed(format!(
            "Failed to set filesystem gid to {} (still {})",
            gid, current
        ))
        .into());
    }
    log::debug!("Set filesystem gid {} (was {})", gid, previous);
    Ok(previous.as_raw())
}

fn log_process_ids() {
    if !log::log_enabled!(log::Level::Debug) {
        return;
    }
    match (getresuid(), getresgid()) {
        (Ok(u), Ok(g)) => log::debug!(
            "ruid={} euid={} suid={} rgid={} egid={} sgid={}",
            u.real,
            u.effective,
            u.saved,
            g.real,
            g.effective,
            g.saved
        ),
        (Err(e), _) | (_, Err(e)) => log::debug!("Failed to read process ids: {}", e),
    }
}

/// Switches to a target identity and switches back to the previous one when dropped.
#[must_use]
pub struct IdentityGuard {
    previous: Option<Identity>,
}

impl IdentityGuard {
    pub fn switch_to(target: &Identity) -> Result<Self> {
        let previous = Identity::current();
        switch_identity(target)?;
        Ok(Self {
            previous: Some(previous),
        })
    }

    /// Restore the previous identity now, reporting failure.
    pub fn restore(mut self) -> Result<()> {
        match self.previous.take() {
            Some(previous) => switch_identity(&previous),
            None => Ok(()),
        }
    }
}

impl Drop for IdentityGuard {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            if let Err(e) = switch_identity(&previous) {
                log::error!("Failed to restore identity {}: {}", previous, e);
            }
        }
    }
}

/// Sets the filesystem uid/gid and restores the previous values when dropped.
#[must_use]
pub struct FilesystemIdentityGuard {
    previous: Option<(u32, u32)>,
}

impl FilesystemIdentityGuard {
    pub fn set(uid: u32, gid: u32) -> Result<Self> {
        let previous_gid = set_filesystem_gid(gid)?;
        let previous_uid = match set_filesystem_uid(uid) {
            Ok(previous_uid) => previous_uid,
            Err(e) => {
                if let Err(rollback) = set_filesystem_gid(previous_gid) {
                    log::error!("Failed to restore filesystem gid {}: {}", previous_gid, rollback);
                }
                return Err(e);
            }
        };
        Ok(Self {
            previous: Some((previous_uid, previous_gid)),
        })
    }

    fn reset(&mut self) -> Result<()> {
        if let Some((uid, gid)) = self.previous.take() {
            set_filesystem_uid(uid)?;
            set_filesystem_gid(gid)?;
        }
        Ok(())
    }

    pub fn restore(mut self) -> Result<()> {
        self.reset()
    }
}

impl Drop for FilesystemIdentityGuard {
    fn drop(&mut self) {
        if let Err(e) = self.reset() {
            log::error!("Failed to restore filesystem identity: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn switch_to_current_identity_succeeds() {
        let current = Identity::current();
        assert!(switch_identity(&current).is_ok());
        assert_eq!(Identity::current().uid(), current.uid());
        assert_eq!(Identity::current().gid(), current.gid());
    }

    #[test]
    fn identity_guard_round_trip() {
        let current = Identity::current();
        let guard = IdentityGuard::switch_to(&current).unwrap();
        guard.restore().unwrap();
        assert_eq!(Identity::current().uid(), current.uid());
    }

    #[test]
    fn unprivileged_uid_switch_is_refused() {
        if geteuid().is_root() {
            return;
        }
        let before = Identity::current();
        let target = Identity::new(before.uid() + 1, before.gid(), Vec::new());
        let err = switch_identity(&target).unwrap_err();
        assert!(matches!(err.kind(), HookError::IdentitySwitchFailed(_)));
        assert_eq!(getegid().as_raw(), before.gid());
        assert_eq!(geteuid().as_raw(), before.uid());
    }

    // glibc rejects seteuid(-1) with EINVAL, so the egid switch is the only
    // step that succeeds.
    #[cfg(target_env = "gnu")]
    #[test]
    fn failed_uid_switch_rolls_back_egid() {
        if !geteuid().is_root() {
            return;
        }
        let before = Identity::current();
        let other_gid = if before.gid() == 65534 { 65533 } else { 65534 };
        let target = Identity::new(u32::MAX, other_gid, before.supplementary_gids().to_vec());

        let err = switch_identity(&target).unwrap_err();
        match err.kind() {
            HookError::IdentitySwitchFailed(msg) => assert!(msg.contains("seteuid")),
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(getegid().as_raw(), before.gid());
        assert_eq!(geteuid().as_raw(), before.uid());
    }

    #[test]
    fn filesystem_uid_follows_effective_uid() {
        let euid = geteuid().as_raw();
        let egid = getegid().as_raw();
        let guard = FilesystemIdentityGuard::set(euid, egid).unwrap();
        guard.restore().unwrap();
        assert_eq!(set_filesystem_uid(euid).unwrap(), euid);
    }
}
