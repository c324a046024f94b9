//! AMD GPU device discovery.
//!
//! GPUs are numbered from 0 in PCI bus order, as listed by the
//! `pci-<bus>-card*` / `pci-<bus>-render*` links under `<dri>/by-path`. The
//! numbers are the ids used by `ROCR_VISIBLE_DEVICES`.

use crate::config::types::{Context, Error, HookError, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const ROCR_VISIBLE_DEVICES: &str = "ROCR_VISIBLE_DEVICES";
pub const DEFAULT_DRI_DIR: &str = "/dev/dri";
pub const DEFAULT_KFD_DEVICE: &str = "/dev/kfd";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AmdGpu {
    pub index: usize,
    pub bus_id: String,
    pub card: Option<PathBuf>,
    pub render: Option<PathBuf>,
}

/// GPUs found under `<dri_dir>/by-path`, ordered by bus id
pub fn discover_gpus(dri_dir: &Path) -> Result<Vec<AmdGpu>> {
    let by_path = dri_dir.join("by-path");
    let entries = fs::read_dir(&by_path)
        .with_context(|| format!("Failed to list {}", by_path.display()))?;

    let mut by_bus: BTreeMap<String, (Option<PathBuf>, Option<PathBuf>)> = BTreeMap::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("Failed to list {}", by_path.display()))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let Some(rest) = name.strip_prefix("pci-") else {
            continue;
        };

        let target = fs::read_link(entry.path())
            .with_context(|| format!("Failed to read link {}", entry.path().display()))?;
        let Some(node) = target.file_name() else {
            continue;
        };
        let node = dri_dir.join(node);

        if let Some(idx) = rest.rfind("-card") {
            by_bus.entry(rest[..idx].to_string()).or_default().0 = Some(node);
        } else if let Some(idx) = rest.rfind("-render") {
            by_bus.entry(rest[..idx].to_string()).or_default().1 = Some(node);
        }
    }

    Ok(by_bus
        .into_iter()
        .enumerate()
        .map(|(index, (bus_id, (card, render)))| AmdGpu {
            index,
            bus_id,
            card,
            render,
        })
        .collect())
}

/// Ids listed in a `ROCR_VISIBLE_DEVICES` value
pub fn parse_visible_devices(value: &str) -> Result<Vec<usize>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(|id| {
            id.parse::<usize>().map_err(|e| {
                Error::from(HookError::Config(format!(
                    "Invalid id '{}' in {}={}: {}",
                    id, ROCR_VISIBLE_DEVICES, value, e
                )))
            })
        })
        .collect()
}

/// DRI nodes to inject: those of the visible GPUs, or every `card*` and
/// `renderD*` node when no selection is given.
pub fn dri_nodes(dri_dir: &Path, visible_devices: Option<&str>) -> Result<Vec<PathBuf>> {
    let mut nodes = Vec::new();

    match visible_devices {
        Some(value) => {
            let gpus = discover_gpus(dri_dir)?;
            for id in parse_visible_devices(value)? {
                let Some(gpu) = gpus.iter().find(|gpu| gpu.index == id) else {
                    log::warn!("{} lists GPU {} but no such GPU was found", ROCR_VISIBLE_DEVICES, id);
                    continue;
                };
                nodes.extend(gpu.card.iter().cloned());
                nodes.extend(gpu.render.iter().cloned());
            }
        }
        None => {
            let entries = fs::read_dir(dri_dir)
                .with_context(|| format!("Failed to list {}", dri_dir.display()))?;
            for entry in entries {
                let entry = entry.with_context(|| format!("Failed to list {}", dri_dir.display()))?;
                let name = entry.file_name().to_string_lossy().into_owned();
                if name.starts_with("card") || name.starts_with("renderD") {
                    nodes.push(entry.path());
                }
            }
            nodes.sort();
        }
    }
    Ok(nodes)
}

/// Device requests for `/dev/kfd` and the DRI nodes of the visible GPUs
pub fn device_requests(
    kfd_device: &Path,
    dri_dir: &Path,
    visible_devices: Option<&str>,
) -> Result<Vec<String>> {
    let mut requests = vec![format!("{}:rw", kfd_device.display())];
    for node in dri_nodes(dri_dir, visible_devices)? {
        requests.push(format!("{}:rw", node.display()));
    }
    log::debug!("AMD GPU device requests: {:?}", requests);
    Ok(requests)
}
