//! Process identity and effective/filesystem uid+gid transitions.
//!
//! CRITICAL: groups, then gid, then uid. Once the uid is dropped the process
//! may no longer be allowed to change its gid.

mod identity;
mod transition;

pub use identity::Identity;
pub use transition::{
    set_filesystem_gid, set_filesystem_uid, switch_identity, FilesystemIdentityGuard,
    IdentityGuard,
};
