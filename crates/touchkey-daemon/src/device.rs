//! Touch device discovery

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use evdev::{AbsoluteAxisType, Device};

use crate::touch::AxisRange;

/// A multitouch (protocol B) input device
#[derive(Debug, Clone)]
pub struct TouchDeviceInfo {
    pub path: PathBuf,
    pub name: String,
    pub vendor: u16,
    pub product: u16,
    pub slots: usize,
    pub x: AxisRange,
    pub y: AxisRange,
}

impl TouchDeviceInfo {
    /// Get vendor:product string (e.g., "04f3:2b7c")
    pub fn vendor_product(&self) -> String {
        format!("{:04x}:{:04x}", self.vendor, self.product)
    }

    fn inspect(path: &Path, device: &Device) -> Result<Option<Self>> {
        if !is_multitouch(device) {
            return Ok(None);
        }

        let abs = device
            .get_abs_state()
            .with_context(|| format!("Failed to read axis ranges of {}", path.display()))?;
        let axis = |axis: AbsoluteAxisType| {
            let info = abs[axis.0 as usize];
            AxisRange::new(info.minimum, info.maximum)
        };
        let slots = abs[AbsoluteAxisType::ABS_MT_SLOT.0 as usize].maximum.max(0) as usize + 1;
        let id = device.input_id();

        Ok(Some(Self {
            path: path.to_path_buf(),
            name: device.name().unwrap_or("Unknown").to_string(),
            vendor: id.vendor(),
            product: id.product(),
            slots,
            x: axis(AbsoluteAxisType::ABS_MT_POSITION_X),
            y: axis(AbsoluteAxisType::ABS_MT_POSITION_Y),
        }))
    }
}

/// Check if a device reports slotted multitouch contacts
pub fn is_multitouch(device: &Device) -> bool {
    device
        .supported_absolute_axes()
        .map(|axes| touchkey_core::is_multitouch(|code| axes.contains(AbsoluteAxisType(code))))
        .unwrap_or(false)
}

fn event_paths() -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir("/dev/input").context("Failed to list /dev/input")? {
        let path = entry?.path();

        // Only look at event* devices
        if path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with("event"))
            .unwrap_or(false)
        {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

/// Open the touch device called `name`, or the first one found.
pub fn open_touch_device(name: Option<&str>) -> Result<(Device, TouchDeviceInfo)> {
    for path in event_paths()? {
        let device = match Device::open(&path) {
            Ok(device) => device,
            Err(e) => {
                tracing::debug!("Could not open {}: {}", path.display(), e);
                continue;
            }
        };
        if let Some(wanted) = name {
            if device.name() != Some(wanted) {
                continue;
            }
        }
        if let Some(info) = TouchDeviceInfo::inspect(&path, &device)? {
            return Ok((device, info));
        }
        if name.is_some() {
            bail!(
                "Device '{}' at {} is not a multitouch device",
                device.name().unwrap_or("Unknown"),
                path.display()
            );
        }
    }

    match name {
        Some(name) => bail!("Touch device '{}' not found", name),
        None => bail!("No multitouch device found"),
    }
}
