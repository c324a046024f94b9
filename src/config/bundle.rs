//! Container state (from stdin) and OCI bundle `config.json` access.

use crate::config::types::{Context, HookError, Result};
use crate::kernel::credentials::Identity;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};

/// State of the container as handed to a hook by the runtime.
#[derive(Clone, Debug, Deserialize)]
pub struct ContainerState {
    pub bundle: PathBuf,
    #[serde(default)]
    pub pid: Option<i32>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

impl ContainerState {
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let state: ContainerState = serde_json::from_reader(reader)
            .context("Failed to parse container's state JSON")?;
        if !state.bundle.is_absolute() {
            return Err(HookError::Config(format!(
                "bundle path {} in container state is not absolute",
                state.bundle.display()
            ))
            .into());
        }
        Ok(state)
    }

    pub fn from_stdin() -> Result<Self> {
        Self::from_reader(std::io::stdin().lock())
            .context("Failed to parse container's state JSON from stdin")
    }

    /// Pid of the container's init process; hooks that join namespaces need it.
    pub fn require_pid(&self) -> Result<i32> {
        match self.pid {
            Some(pid) if pid > 0 => Ok(pid),
            Some(pid) => Err(HookError::Config(format!("invalid container pid {}", pid)).into()),
            None => Err(HookError::Config("container state has no pid".to_string()).into()),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
struct RawRoot {
    path: PathBuf,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawUser {
    uid: u32,
    gid: u32,
    #[serde(default)]
    additional_gids: Vec<u32>,
}

#[derive(Clone, Debug, Deserialize)]
struct RawProcess {
    user: RawUser,
    #[serde(default)]
    env: Vec<String>,
}

#[derive(Clone, Debug, Deserialize)]
struct RawConfig {
    root: RawRoot,
    process: RawProcess,
    #[serde(default)]
    annotations: BTreeMap<String, String>,
}

/// The subset of an OCI bundle's `config.json` consumed by the hooks.
#[derive(Clone, Debug)]
pub struct BundleConfig {
    bundle_dir: PathBuf,
    raw: RawConfig,
}

impl BundleConfig {
    pub fn load(bundle_dir: &Path) -> Result<Self> {
        let config_path = bundle_dir.join("config.json");
        log::debug!("Parsing bundle's config {}", config_path.display());

        let content = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;
        Self::from_json(bundle_dir, &content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))
    }

    pub fn from_json(bundle_dir: &Path, content: &str) -> Result<Self> {
        let raw: RawConfig = serde_json::from_str(content)?;
        Ok(Self {
            bundle_dir: bundle_dir.to_path_buf(),
            raw,
        })
    }

    pub fn bundle_dir(&self) -> &Path {
        &self.bundle_dir
    }

    /// `root.path`, resolved against the bundle directory when relative.
    pub fn rootfs_dir(&self) -> PathBuf {
        if self.raw.root.path.is_absolute() {
            self.raw.root.path.clone()
        } else {
            self.bundle_dir.join(&self.raw.root.path)
        }
    }

    pub fn identity(&self) -> Identity {
        let user = &self.raw.process.user;
        Identity::new(user.uid, user.gid, user.additional_gids.clone())
    }

    /// `process.env` as a map. Assembled for explicit hand-off; the hook's own
    /// environment is never modified.
    pub fn environment(&self) -> Result<BTreeMap<String, String>> {
        let mut env = BTreeMap::new();
        for variable in &self.raw.process.env {
            let (key, value) = parse_variable(variable)?;
            env.insert(key.to_string(), value.to_string());
        }
        Ok(env)
    }

    pub fn env_var(&self, key: &str) -> Result<Option<String>> {
        for variable in &self.raw.process.env {
            let (k, v) = parse_variable(variable)?;
            if k == key {
                return Ok(Some(v.to_string()));
            }
        }
        Ok(None)
    }

    pub fn annotations(&self) -> &BTreeMap<String, String> {
        &self.raw.annotations
    }
}

fn parse_variable(variable: &str) -> Result<(&str, &str)> {
    match variable.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key, value)),
        _ => Err(HookError::Config(format!(
            "Failed to parse environment variable '{}': expected KEY=VALUE",
            variable
        ))
        .into()),
    }
}
