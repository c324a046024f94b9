//! Bind mounts into container rootfs trees
//!
//! Destination resolution is confined to the rootfs; mounts run as root with
//! the container's filesystem identity.

pub mod filesystem;
pub mod request;

pub use filesystem::{bind_mount, realpath_within_rootfs, validated_bind_mount};
pub use request::MountRequest;
