//! Cross-process coordination
//!
//! Serializes hook instances that touch the same host resource.

pub mod lockfile;

pub use lockfile::{LockOptions, Lockfile};
