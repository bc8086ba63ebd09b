//! State fixed during initialization and shared read-only with the attach task

use std::path::{Path, PathBuf};

use crate::config::{DeviceId, DeviceSpeed};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VhciSession {
    control_root: PathBuf,
    port: u32,
    device_id: DeviceId,
    speed: DeviceSpeed,
}

impl VhciSession {
    pub fn new(control_root: PathBuf, port: u32, device_id: DeviceId, speed: DeviceSpeed) -> Self {
        Self {
            control_root,
            port,
            device_id,
            speed,
        }
    }

    /// Driver directory holding the `status` and `attach` entries
    pub fn control_root(&self) -> &Path {
        &self.control_root
    }

    pub fn port(&self) -> u32 {
        self.port
    }

    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    pub fn speed(&self) -> DeviceSpeed {
        self.speed
    }
}
