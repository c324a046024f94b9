//! `r`/`w`/`m` device access letters.

use crate::config::types::{HookError, Result};
use std::fmt;
use std::str::FromStr;

/// Read, write and mknod permissions on a device
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceAccess {
    read: bool,
    write: bool,
    mknod: bool,
}

impl DeviceAccess {
    pub const ALL: DeviceAccess = DeviceAccess {
        read: true,
        write: true,
        mknod: true,
    };

    /// Each of `r`, `w`, `m` at most once, in any order.
    pub fn parse(access: &str) -> Result<Self> {
        let invalid = |reason: &str| HookError::InvalidAccessSpec {
            access: access.to_string(),
            reason: reason.to_string(),
        };

        if access.is_empty() {
            return Err(invalid("empty access").into());
        }
        if access.len() > 3 {
            return Err(invalid("more than 3 characters").into());
        }

        let mut parsed = DeviceAccess {
            read: false,
            write: false,
            mknod: false,
        };
        for c in access.chars() {
            let flag = match c {
                'r' => &mut parsed.read,
                'w' => &mut parsed.write,
                'm' => &mut parsed.mknod,
                _ => return Err(invalid(&format!("unexpected character '{}'", c)).into()),
            };
            if *flag {
                return Err(invalid(&format!("repeated character '{}'", c)).into());
            }
            *flag = true;
        }
        Ok(parsed)
    }

    pub fn is_read_allowed(&self) -> bool {
        self.read
    }

    pub fn is_write_allowed(&self) -> bool {
        self.write
    }

    pub fn is_mknod_allowed(&self) -> bool {
        self.mknod
    }

    /// Canonical form: the allowed subset of "rwm", in that order
    pub fn as_string(&self) -> String {
        let mut out = String::with_capacity(3);
        if self.read {
            out.push('r');
        }
        if self.write {
            out.push('w');
        }
        if self.mknod {
            out.push('m');
        }
        out
    }
}

impl Default for DeviceAccess {
    fn default() -> Self {
        Self::ALL
    }
}

impl FromStr for DeviceAccess {
    type Err = crate::config::types::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for DeviceAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_and_partial_access() {
        let all = DeviceAccess::parse("rwm").unwrap();
        assert!(all.is_read_allowed() && all.is_write_allowed() && all.is_mknod_allowed());

        let rw = DeviceAccess::parse("rw").unwrap();
        assert!(rw.is_read_allowed());
        assert!(rw.is_write_allowed());
        assert!(!rw.is_mknod_allowed());
    }

    #[test]
    fn canonical_order() {
        assert_eq!(DeviceAccess::parse("mwr").unwrap().to_string(), "rwm");
        assert_eq!(DeviceAccess::parse("mr").unwrap().to_string(), "rm");
        assert_eq!(DeviceAccess::default().to_string(), "rwm");
    }

    #[test]
    fn canonical_form_parses_back_to_same_set() {
        for access in ["r", "w", "m", "rw", "wr", "rm", "wm", "mwr", "rwm"] {
            let parsed: DeviceAccess = access.parse().unwrap();
            let reparsed = DeviceAccess::parse(&parsed.to_string()).unwrap();
            assert_eq!(parsed, reparsed);
        }
    }

    #[test]
    fn rejects_invalid_access() {
        for access in ["", "rr", "rwx", "rwmr", "R", " r"] {
            let err = DeviceAccess::parse(access).unwrap_err();
            assert!(
                matches!(err.kind(), HookError::InvalidAccessSpec { .. }),
                "{:?} accepted",
                access
            );
        }
    }
}
