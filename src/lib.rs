//! devhooks: OCI hooks that inject host devices into already created containers
//!
//! The hooks run on the host after the container is created and before its
//! process starts. Device nodes are bind mounted into the container's rootfs
//! from inside its mount namespace, then granted in its devices cgroup.
//!
//! # Architecture
//!
//! ## Kernel Primitives ([`kernel`])
//! - [`kernel::credentials`]: Identities, effective and filesystem uid/gid switching
//! - [`kernel::namespace`]: Joining the mount and PID namespaces of a process
//! - [`kernel::mount`]: Rootfs-confined bind mounts
//! - [`kernel::cgroup`]: cgroup v1 devices whitelist
//!
//! ## Devices ([`device`])
//! - [`device::access`]: `rwm` access letters
//! - [`device::parser`]: `<host>[:<container>][:<access>]` requests
//! - [`device::mount`]: Device node inspection (type, major, minor)
//! - [`device::amdgpu`]: AMD GPU discovery and `ROCR_VISIBLE_DEVICES`
//!
//! ## Safety ([`safety`])
//! - [`safety::lockfile`]: Cross-process lock files
//!
//! ## Configuration ([`config`])
//! - [`config::types`]: Error kinds and error traces
//! - [`config::bundle`]: Container state and OCI bundle `config.json`
//! - [`config::logging`]: Logger setup owned by the entry point
//!
//! ## Hooks ([`hook`], [`cli`])
//! - [`hook`]: Parse, enter namespaces, mount, whitelist
//! - [`cli`]: Argument parsing shared by the `device-hook` and `amdgpu-hook` binaries
//!
//! Hooks are single threaded: uid/gid switches are process wide.

// Kernel Primitives
pub mod kernel;

// Device requests
pub mod device;

// Cross-process coordination
pub mod safety;

// Configuration
pub mod config;

// Hook orchestration
pub mod hook;

// CLI entrypoint wiring shared by the hook binaries.
pub mod cli;

pub use config::types::{Error, HookError, Result};
