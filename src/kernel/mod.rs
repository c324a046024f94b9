//! Thin wrappers around Linux kernel primitives.
//!
//! Dependency direction: credentials -> namespace -> mount -> cgroup

pub mod cgroup;
pub mod credentials;
pub mod mount;
pub mod namespace;
