//! User/group/supplementary-groups triple.

use nix::unistd::{getegid, geteuid, getgroups};
use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    uid: u32,
    gid: u32,
    supplementary_gids: Vec<u32>,
}

impl Identity {
    pub fn new(uid: u32, gid: u32, supplementary_gids: Vec<u32>) -> Self {
        Self {
            uid,
            gid,
            supplementary_gids,
        }
    }

    /// Effective uid/gid and supplementary groups of the calling process.
    pub fn current() -> Self {
        let supplementary_gids = match getgroups() {
            Ok(groups) => groups.into_iter().map(|g| g.as_raw()).collect(),
            Err(e) => {
                log::warn!("Failed to read supplementary groups: {}", e);
                Vec::new()
            }
        };
        Self {
            uid: geteuid().as_raw(),
            gid: getegid().as_raw(),
            supplementary_gids,
        }
    }

    pub fn uid(&self) -> u32 {
        self.uid
    }

    pub fn gid(&self) -> u32 {
        self.gid
    }

    pub fn supplementary_gids(&self) -> &[u32] {
        &self.supplementary_gids
    }

    pub fn is_root(&self) -> bool {
        self.uid == 0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "uid={} gid={} groups={:?}", self.uid, self.gid, self.supplementary_gids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_matches_effective_ids() {
        let identity = Identity::current();
        assert_eq!(identity.uid(), geteuid().as_raw());
        assert_eq!(identity.gid(), getegid().as_raw());
    }

    #[test]
    fn display_lists_all_ids() {
        let identity = Identity::new(1000, 100, vec![10, 20]);
        assert_eq!(identity.to_string(), "uid=1000 gid=100 groups=[10, 20]");
        assert!(!identity.is_root());
    }
}
