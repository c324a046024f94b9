//! `<host path>[:<container path>][:<access>]` device requests.

use super::access::DeviceAccess;
use super::mount::DeviceMountRequest;
use crate::config::types::{Context, HookError, PathSide, Result};
use crate::kernel::credentials::Identity;
use crate::kernel::mount::request::validate_absolute;
use crate::kernel::mount::MountRequest;
use nix::mount::MsFlags;
use std::path::{Path, PathBuf};

/// Syntactic content of a device request, before the host node is inspected
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceRequest {
    pub host_path: PathBuf,
    pub container_path: PathBuf,
    pub access: DeviceAccess,
}

/// Split and validate a request string.
///
/// With two tokens the second one is an access string when it is a relative
/// path and the container path otherwise.
pub fn parse_request(request: &str) -> Result<DeviceRequest> {
    parse_tokens(request).with_context(|| format!("Invalid device request '{}'", request))
}

fn parse_tokens(request: &str) -> Result<DeviceRequest> {
    let tokens: Vec<&str> = request.split(':').collect();

    let (host, container, access) = match tokens.as_slice() {
        [host] => (*host, *host, None),
        [host, second] if Path::new(second).is_relative() => (*host, *host, Some(*second)),
        [host, container] => (*host, *container, None),
        [host, container, access] => (*host, *container, Some(*access)),
        _ => {
            return Err(HookError::TooManyTokens {
                request: request.to_string(),
            }
            .into())
        }
    };

    let host_path = PathBuf::from(host);
    validate_absolute(PathSide::Host, &host_path)?;
    let container_path = PathBuf::from(container);
    validate_absolute(PathSide::Container, &container_path)?;

    let access = match access {
        Some(access) => DeviceAccess::parse(access).context(
            "Device access must be a combination of 'rwm' characters, with no repetitions",
        )?,
        None => DeviceAccess::ALL,
    };

    Ok(DeviceRequest {
        host_path,
        container_path,
        access,
    })
}

/// Builds device mount requests for one container
#[derive(Clone, Debug)]
pub struct DeviceParser {
    rootfs_dir: PathBuf,
    identity: Identity,
}

impl DeviceParser {
    pub fn new(rootfs_dir: impl Into<PathBuf>, identity: Identity) -> Self {
        Self {
            rootfs_dir: rootfs_dir.into(),
            identity,
        }
    }

    pub fn parse_device_request(&self, request: &str) -> Result<DeviceMountRequest> {
        log::debug!("Parsing device request '{}'", request);

        let parsed = parse_request(request)?;
        let mount = MountRequest::new(
            parsed.host_path,
            parsed.container_path,
            MsFlags::MS_REC | MsFlags::MS_PRIVATE,
            self.rootfs_dir.clone(),
            self.identity.clone(),
        )
        .with_context(|| format!("Invalid device request '{}'", request))?;

        let device = DeviceMountRequest::new(mount, parsed.access)
            .with_context(|| format!("Invalid device request '{}'", request))?;

        log::debug!(
            "Device request '{}': {} {}:{} -> {} ({})",
            request,
            device.device_type(),
            device.major(),
            device.minor(),
            device.destination().display(),
            device.access()
        );
        Ok(device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(request: &DeviceRequest) -> (&str, &str, String) {
        (
            request.host_path.to_str().unwrap(),
            request.container_path.to_str().unwrap(),
            request.access.to_string(),
        )
    }

    #[test]
    fn host_path_only() {
        let request = parse_request("/dev/foo").unwrap();
        assert_eq!(paths(&request), ("/dev/foo", "/dev/foo", "rwm".to_string()));
    }

    #[test]
    fn relative_second_token_is_access() {
        let request = parse_request("/dev/foo:rw").unwrap();
        assert_eq!(paths(&request), ("/dev/foo", "/dev/foo", "rw".to_string()));
    }

    #[test]
    fn absolute_second_token_is_destination() {
        let request = parse_request("/dev/foo:/dev/bar").unwrap();
        assert_eq!(paths(&request), ("/dev/foo", "/dev/bar", "rwm".to_string()));
    }

    #[test]
    fn three_tokens() {
        let request = parse_request("/dev/foo:/dev/bar:rw").unwrap();
        assert_eq!(paths(&request), ("/dev/foo", "/dev/bar", "rw".to_string()));
    }

    #[test]
    fn four_tokens_are_too_many() {
        let err = parse_request("/dev/foo:/dev/bar:/dev/baz:rw").unwrap_err();
        assert!(matches!(err.kind(), HookError::TooManyTokens { .. }));
        assert_eq!(
            err.trace().last().unwrap(),
            "Invalid device request '/dev/foo:/dev/bar:/dev/baz:rw'"
        );
    }

    #[test]
    fn relative_paths_name_their_side() {
        let err = parse_request("dev/foo").unwrap_err();
        assert!(matches!(
            err.kind(),
            HookError::InvalidMountPath { side: PathSide::Host, .. }
        ));

        let err = parse_request("/dev/foo:dev/bar:rw").unwrap_err();
        assert!(matches!(
            err.kind(),
            HookError::InvalidMountPath { side: PathSide::Container, .. }
        ));

        let err = parse_request("").unwrap_err();
        assert!(matches!(
            err.kind(),
            HookError::InvalidMountPath { side: PathSide::Host, .. }
        ));
    }

    #[test]
    fn bad_access_keeps_hint_in_trace() {
        let err = parse_request("/dev/foo:/dev/bar:rwx").unwrap_err();
        assert!(matches!(err.kind(), HookError::InvalidAccessSpec { .. }));
        assert!(err.trace().iter().any(|entry| entry.contains("'rwm' characters")));

        // A relative second token that is not valid access is still read as access
        let err = parse_request("/dev/foo:bar").unwrap_err();
        assert!(matches!(err.kind(), HookError::InvalidAccessSpec { .. }));
    }

    #[test]
    fn builds_device_request_for_dev_null() {
        let parser = DeviceParser::new("/rootfs", Identity::new(1000, 1000, vec![]));
        let device = parser.parse_device_request("/dev/null:/dev/card0:rw").unwrap();
        assert_eq!(device.source(), Path::new("/dev/null"));
        assert_eq!(device.destination(), Path::new("/dev/card0"));
        assert_eq!(device.flags(), MsFlags::MS_REC | MsFlags::MS_PRIVATE);
        assert_eq!(device.rootfs_dir(), Path::new("/rootfs"));
        assert_eq!(device.identity().uid(), 1000);
        assert_eq!(device.cgroup_rule().to_string(), "c 1:3 rw");
    }

    #[test]
    fn non_device_source_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain");
        std::fs::write(&file, b"").unwrap();

        let parser = DeviceParser::new("/rootfs", Identity::new(1000, 1000, vec![]));
        let err = parser
            .parse_device_request(file.to_str().unwrap())
            .unwrap_err();
        assert!(matches!(err.kind(), HookError::NotADeviceFile { .. }));
    }
}
