//! Logging setup owned by the hook entry point.
//!
//! Level precedence: `--log-level`, then the bundle annotation
//! `com.hooks.logging.level`, then `RUST_LOG`, then `warn`.

use crate::config::types::{Context, HookError, Result};
use log::LevelFilter;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

pub const LEVEL_ANNOTATION: &str = "com.hooks.logging.level";
pub const STDOUT_ANNOTATION: &str = "com.hooks.logging.stdoutfd";
pub const STDERR_ANNOTATION: &str = "com.hooks.logging.stderrfd";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct LoggingConfig {
    /// `None` defers to `RUST_LOG`, then to `warn`
    pub level: Option<LevelFilter>,
    /// Files that replace the hook's stdout / stderr
    pub stdout_file: Option<PathBuf>,
    pub stderr_file: Option<PathBuf>,
}

impl LoggingConfig {
    pub fn from_annotations(annotations: &BTreeMap<String, String>) -> Result<Self> {
        let level = match annotations.get(LEVEL_ANNOTATION) {
            Some(value) => Some(
                level_from_annotation(value)
                    .with_context(|| format!("Invalid annotation {}", LEVEL_ANNOTATION))?,
            ),
            None => None,
        };
        Ok(Self {
            level,
            stdout_file: annotations.get(STDOUT_ANNOTATION).map(PathBuf::from),
            stderr_file: annotations.get(STDERR_ANNOTATION).map(PathBuf::from),
        })
    }

    /// A level given on the command line wins over everything else.
    pub fn with_cli_level(mut self, level: Option<LevelFilter>) -> Self {
        if level.is_some() {
            self.level = level;
        }
        self
    }

    /// Redirect stdout/stderr if requested, then install the logger.
    pub fn init(&self, subsystem: &'static str) -> Result<()> {
        if let Some(path) = &self.stdout_file {
            redirect(path, libc::STDOUT_FILENO)?;
        }
        if let Some(path) = &self.stderr_file {
            redirect(path, libc::STDERR_FILENO)?;
        }

        let mut builder = env_logger::Builder::new();
        builder.filter_level(LevelFilter::Warn);
        match self.level {
            Some(level) => {
                builder.filter_level(level);
            }
            None => {
                builder.parse_env(env_logger::Env::default());
            }
        }
        builder.format(move |buf, record| {
            writeln!(
                buf,
                "[{}] [{}] [{}] [{}] {}",
                chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                subsystem,
                record.target(),
                record.level(),
                record.args()
            )
        });
        builder
            .try_init()
            .map_err(|e| HookError::Config(format!("Failed to install logger: {}", e)))?;
        Ok(())
    }
}

/// 0=debug, 1=info, 2=warn, 3=error, 4=general (errors only)
pub fn level_from_annotation(value: &str) -> Result<LevelFilter> {
    let level = match value.trim() {
        "0" => LevelFilter::Debug,
        "1" => LevelFilter::Info,
        "2" => LevelFilter::Warn,
        "3" | "4" => LevelFilter::Error,
        other => {
            return Err(HookError::Config(format!(
                "unknown log level '{}' (expected 0-4)",
                other
            ))
            .into())
        }
    };
    Ok(level)
}

fn redirect(path: &Path, fd: i32) -> Result<()> {
    let file = OpenOptions::new()
        .write(true)
        .open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    nix::unistd::dup2(file.as_raw_fd(), fd).map_err(|e| {
        HookError::Config(format!(
            "Failed to replace fd {} with {}: {}",
            fd,
            path.display(),
            e
        ))
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn annotations(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn annotation_levels() {
        assert_eq!(level_from_annotation("0").unwrap(), LevelFilter::Debug);
        assert_eq!(level_from_annotation("1").unwrap(), LevelFilter::Info);
        assert_eq!(level_from_annotation("2").unwrap(), LevelFilter::Warn);
        assert_eq!(level_from_annotation("4").unwrap(), LevelFilter::Error);
        assert!(level_from_annotation("debug").is_err());
    }

    #[test]
    fn cli_level_wins_over_annotation() {
        let config = LoggingConfig::from_annotations(&annotations(&[(LEVEL_ANNOTATION, "3")]))
            .unwrap();
        assert_eq!(config.level, Some(LevelFilter::Error));

        let config = config.with_cli_level(Some(LevelFilter::Debug));
        assert_eq!(config.level, Some(LevelFilter::Debug));

        let config = config.with_cli_level(None);
        assert_eq!(config.level, Some(LevelFilter::Debug));
    }

    #[test]
    fn output_files_from_annotations() {
        let config = LoggingConfig::from_annotations(&annotations(&[
            (STDOUT_ANNOTATION, "/run/hook/out"),
            (STDERR_ANNOTATION, "/run/hook/err"),
        ]))
        .unwrap();
        assert_eq!(config.level, None);
        assert_eq!(config.stdout_file, Some(PathBuf::from("/run/hook/out")));
        assert_eq!(config.stderr_file, Some(PathBuf::from("/run/hook/err")));
    }
}
