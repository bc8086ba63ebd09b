//! VHCI driver lookup
//!
//! The driver instance is found by subsystem and device type, the same pair
//! udev uses (`platform` / `vhci_hcd`). Its directory in sysfs is the control
//! root holding the `status` and `attach` entries.
//!
//! ## Sysfs layout
//!
//! - `/sys/bus/platform/devices/vhci_hcd` - symlink to the device directory
//! - `/sys/devices/platform/vhci_hcd.0` - device directory on newer kernels

use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Result, VhciError};

/// Number of numbered driver instances probed (`vhci_hcd.0` .. `vhci_hcd.3`)
const MAX_INSTANCES: usize = 4;

/// Resolves a driver instance to its control-root path
pub trait DeviceLocator: Send + Sync {
    fn find_driver(&self, subsystem: &str, device_type: &str) -> Result<PathBuf>;
}

/// Locates drivers by walking a sysfs tree
#[derive(Debug, Clone)]
pub struct SysfsDeviceLocator {
    sysfs_root: PathBuf,
}

impl SysfsDeviceLocator {
    pub fn new(sysfs_root: impl Into<PathBuf>) -> Self {
        Self {
            sysfs_root: sysfs_root.into(),
        }
    }

    pub fn sysfs_root(&self) -> &Path {
        &self.sysfs_root
    }

    fn candidates(&self, subsystem: &str, device_type: &str) -> Vec<PathBuf> {
        let bus_devices = self.sysfs_root.join("bus").join(subsystem).join("devices");
        let devices = self.sysfs_root.join("devices").join(subsystem);

        let mut paths = vec![bus_devices.join(device_type)];
        paths.extend((0..MAX_INSTANCES).map(|i| bus_devices.join(format!("{device_type}.{i}"))));
        paths.push(devices.join(device_type));
        paths.extend((0..MAX_INSTANCES).map(|i| devices.join(format!("{device_type}.{i}"))));
        paths
    }
}

impl Default for SysfsDeviceLocator {
    fn default() -> Self {
        Self::new("/sys")
    }
}

impl DeviceLocator for SysfsDeviceLocator {
    fn find_driver(&self, subsystem: &str, device_type: &str) -> Result<PathBuf> {
        if !self.sysfs_root.is_dir() {
            return Err(VhciError::EnumerationUnavailable {
                root: self.sysfs_root.clone(),
            });
        }

        for path in self.candidates(subsystem, device_type) {
            if !path.is_dir() {
                continue;
            }
            // bus entries are symlinks into /sys/devices
            let resolved = path.canonicalize().unwrap_or(path);
            debug!("Found {}/{} at {}", subsystem, device_type, resolved.display());
            return Ok(resolved);
        }

        Err(VhciError::DriverNotFound {
            subsystem: subsystem.to_string(),
            device_type: device_type.to_string(),
        })
    }
}
