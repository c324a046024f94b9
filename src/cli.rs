use anyhow::Result;
use clap::{Args, Parser};
use log::LevelFilter;
use std::path::PathBuf;

use crate::config::types::Error;
use crate::config::{BundleConfig, ContainerState, HookConfig, LockConfig, LoggingConfig};
use crate::device::amdgpu;
use crate::hook::DeviceHook;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CliMode {
    Device,
    AmdGpu,
}

impl CliMode {
    fn subsystem(self) -> &'static str {
        match self {
            Self::Device => "Device hook",
            Self::AmdGpu => "AMD GPU hook",
        }
    }
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Log level, overriding the bundle annotation and RUST_LOG
    #[arg(long)]
    log_level: Option<LevelFilter>,
    /// Serialize injections of the same device through lock files in this directory
    #[arg(long)]
    lock_dir: Option<PathBuf>,
    /// Give up waiting for a device lock after this many milliseconds
    #[arg(long, requires = "lock_dir")]
    lock_timeout_ms: Option<u64>,
    /// Interval between "still waiting" warnings while waiting for a lock
    #[arg(long, default_value_t = 1000)]
    lock_warning_ms: u64,
    /// Prefix of the /proc tree and cgroup mount points
    #[arg(long, default_value = "/")]
    proc_prefix: PathBuf,
    /// Join only the container's mount namespace
    #[arg(long)]
    no_pid_namespace: bool,
}

/// OCI hook that injects host devices into a created container
#[derive(Parser, Debug)]
#[command(name = "device-hook", author, version, about, long_about = None)]
struct DeviceCli {
    /// Device to inject, as <host path>[:<container path>][:<access>]
    #[arg(long = "device", value_name = "DEVICE")]
    devices: Vec<String>,
    #[command(flatten)]
    common: CommonArgs,
}

/// OCI hook that injects /dev/kfd and the visible AMD GPUs into a created container
#[derive(Parser, Debug)]
#[command(name = "amdgpu-hook", author, version, about, long_about = None)]
struct AmdGpuCli {
    #[arg(long, default_value = amdgpu::DEFAULT_DRI_DIR)]
    dri_dir: PathBuf,
    #[arg(long, default_value = amdgpu::DEFAULT_KFD_DEVICE)]
    kfd_device: PathBuf,
    #[command(flatten)]
    common: CommonArgs,
}

enum DeviceSource {
    Requests(Vec<String>),
    AmdGpu { dri_dir: PathBuf, kfd_device: PathBuf },
}

pub fn run(mode: CliMode) -> Result<()> {
    let (source, common) = match mode {
        CliMode::Device => {
            let cli = DeviceCli::parse();
            (DeviceSource::Requests(cli.devices), cli.common)
        }
        CliMode::AmdGpu => {
            let cli = AmdGpuCli::parse();
            (
                DeviceSource::AmdGpu {
                    dri_dir: cli.dri_dir,
                    kfd_device: cli.kfd_device,
                },
                cli.common,
            )
        }
    };

    if let Err(err) = execute(mode, source, common) {
        match err.downcast_ref::<Error>() {
            Some(hook_error) => {
                log::error!("{}", hook_error);
                eprint!("{}", hook_error.report());
            }
            None => eprintln!("{}: {:#}", mode.subsystem(), err),
        }
        std::process::exit(1);
    }
    Ok(())
}

fn execute(mode: CliMode, source: DeviceSource, common: CommonArgs) -> Result<()> {
    let state = ContainerState::from_stdin()?;
    let bundle = BundleConfig::load(&state.bundle)?;

    let logging =
        LoggingConfig::from_annotations(bundle.annotations())?.with_cli_level(common.log_level);
    logging.init(mode.subsystem())?;
    log::info!("Initializing hook for bundle {}", state.bundle.display());

    let devices = match source {
        DeviceSource::Requests(devices) => devices,
        DeviceSource::AmdGpu {
            dri_dir,
            kfd_device,
        } => {
            let visible = bundle.env_var(amdgpu::ROCR_VISIBLE_DEVICES)?;
            amdgpu::device_requests(&kfd_device, &dri_dir, visible.as_deref())?
        }
    };

    let config = HookConfig {
        devices,
        lock: common.lock_dir.map(|dir| LockConfig {
            dir,
            timeout_ms: common.lock_timeout_ms,
            warning_ms: common.lock_warning_ms,
        }),
        proc_prefix: common.proc_prefix,
        enter_pid_namespace: !common.no_pid_namespace,
        logging,
    };
    log::debug!("Hook configuration: {}", serde_json::to_string(&config)?);

    DeviceHook::new(config, state, bundle).activate()?;
    log::info!("{} completed", mode.subsystem());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definitions_are_consistent() {
        DeviceCli::command().debug_assert();
        AmdGpuCli::command().debug_assert();
    }

    #[test]
    fn device_arguments() {
        let cli = DeviceCli::try_parse_from([
            "device-hook",
            "--device",
            "/dev/null",
            "--device",
            "/dev/fuse:/dev/fuse:rw",
            "--lock-dir",
            "/run/locks",
            "--lock-timeout-ms",
            "500",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert_eq!(cli.devices, vec!["/dev/null", "/dev/fuse:/dev/fuse:rw"]);
        assert_eq!(cli.common.lock_timeout_ms, Some(500));
        assert_eq!(cli.common.lock_warning_ms, 1000);
        assert_eq!(cli.common.log_level, Some(LevelFilter::Debug));
        assert_eq!(cli.common.proc_prefix, PathBuf::from("/"));
        assert!(!cli.common.no_pid_namespace);
    }

    #[test]
    fn lock_timeout_needs_lock_dir() {
        assert!(DeviceCli::try_parse_from(["device-hook", "--lock-timeout-ms", "5"]).is_err());
    }

    #[test]
    fn amdgpu_defaults() {
        let cli = AmdGpuCli::try_parse_from(["amdgpu-hook"]).unwrap();
        assert_eq!(cli.dri_dir, PathBuf::from("/dev/dri"));
        assert_eq!(cli.kfd_device, PathBuf::from("/dev/kfd"));
    }
}
