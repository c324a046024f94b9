//! Device cgroup access control
//!
//! Only the cgroup v1 `devices` controller is handled.

pub mod v1;

pub use v1::{whitelist_device, DeviceRule, DevicesCgroup};
