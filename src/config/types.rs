/// Core error types for the device hooks
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Which side of a device request a path belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PathSide {
    Host,
    Container,
}

impl fmt::Display for PathSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSide::Host => write!(f, "host"),
            PathSide::Container => write!(f, "container"),
        }
    }
}

/// Reason a privileged bind mount was refused or failed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BindMountCause {
    /// Destination resolution left the container rootfs
    RootfsEscape,
    /// Source not accessible to the container identity, or destination on a forbidden device
    Permission,
    /// The mount syscall (or mount point creation) failed
    Syscall,
}

impl fmt::Display for BindMountCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindMountCause::RootfsEscape => write!(f, "rootfs escape"),
            BindMountCause::Permission => write!(f, "permission"),
            BindMountCause::Syscall => write!(f, "syscall failure"),
        }
    }
}

/// Closed set of failure kinds surfaced by the hooks
#[derive(Error, Debug)]
pub enum HookError {
    #[error("Invalid device access '{access}': {reason}")]
    InvalidAccessSpec { access: String, reason: String },

    #[error("Too many tokens in device request '{request}' (at most '<host device>:<container device>:<access>')")]
    TooManyTokens { request: String },

    #[error("Invalid {side} device path '{path}': {reason}")]
    InvalidMountPath {
        side: PathSide,
        path: String,
        reason: String,
    },

    #[error("Source path {path} is not a device file")]
    NotADeviceFile { path: PathBuf },

    #[error("Failed to enter namespace {ns_file}: {reason}")]
    NamespaceEntryFailed { ns_file: PathBuf, reason: String },

    #[error("Failed to bind mount {from} on container's {to} (flags {flags:#x}, {cause}): {reason}")]
    BindMountFailed {
        from: PathBuf,
        to: PathBuf,
        flags: u64,
        cause: BindMountCause,
        reason: String,
    },

    #[error("Cgroup not found: {0}")]
    CgroupNotFound(String),

    #[error("Failed to write {path}: {reason}")]
    CgroupWriteFailed { path: PathBuf, reason: String },

    #[error("Failed to acquire lock on file {lockfile} (expired timeout of {} milliseconds, waited {waited:?})", .timeout.as_millis())]
    LockTimeout {
        lockfile: PathBuf,
        timeout: Duration,
        waited: Duration,
    },

    #[error("Identity switch failed: {0}")]
    IdentitySwitchFailed(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A failure kind plus the ordered trace of context entries added while it
/// propagated. The trace is stored innermost first: entry 0 is the failure
/// site, every caller that re-signals pushes its own entry at the end.
#[derive(Debug)]
pub struct Error {
    kind: HookError,
    trace: Vec<String>,
}

impl Error {
    pub fn new(kind: HookError) -> Self {
        let trace = vec![kind.to_string()];
        Self { kind, trace }
    }

    pub fn kind(&self) -> &HookError {
        &self.kind
    }

    /// Context entries, most nested first.
    pub fn trace(&self) -> &[String] {
        &self.trace
    }

    pub fn push_context(mut self, entry: impl Into<String>) -> Self {
        self.trace.push(entry.into());
        self
    }

    /// Re-signal under a new kind, keeping the accumulated trace.
    pub fn wrap(mut self, kind: HookError) -> Self {
        self.trace.push(kind.to_string());
        self.kind = kind;
        self
    }

    /// Multi-line report with the most nested error last.
    pub fn report(&self) -> String {
        let mut out = String::from("Error trace (most nested error last):\n");
        for (idx, entry) in self.trace.iter().rev().enumerate() {
            out.push_str(&format!("#{:<3} {}\n", idx, entry));
        }
        out
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.trace.last() {
            Some(outermost) => write!(f, "{}", outermost),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}

impl From<HookError> for Error {
    fn from(kind: HookError) -> Self {
        Error::new(kind)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::new(HookError::Io(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::new(HookError::Config(err.to_string()))
    }
}

/// Attach a context entry to a failing result before handing it upward.
pub trait Context<T> {
    fn context(self, entry: impl Into<String>) -> Result<T>;

    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: Into<String>,
        F: FnOnce() -> C;
}

impl<T, E> Context<T> for std::result::Result<T, E>
where
    E: Into<Error>,
{
    fn context(self, entry: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().push_context(entry))
    }

    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: Into<String>,
        F: FnOnce() -> C,
    {
        self.map_err(|e| e.into().push_context(f()))
    }
}

/// Result type alias for hook operations
pub type Result<T> = std::result::Result<T, Error>;
