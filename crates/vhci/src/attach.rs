//! Kernel attach command
//!
//! Writing `<port> <sockfd> <devid> <speed>` to `<control root>/attach` binds
//! the connected socket to a VHCI port. The driver has no read-back; a write
//! that completes is treated as an accepted attach.

use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::os::fd::RawFd;
use std::path::Path;
use tracing::{debug, info};

use crate::config::{DeviceId, DeviceSpeed};
use crate::error::{Result, VhciError};

/// One attach request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachCommand {
    pub port: u32,
    pub connection_id: RawFd,
    pub device_id: DeviceId,
    pub speed: DeviceSpeed,
}

impl fmt::Display for AttachCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.port,
            self.connection_id,
            self.device_id.value(),
            self.speed.code()
        )
    }
}

/// Submits attach commands to a driver
pub trait AttachWriter: Send + Sync {
    fn write_attach(&self, control_root: &Path, command: &AttachCommand) -> Result<()>;
}

/// Writes to the driver's sysfs `attach` entry
#[derive(Debug, Clone, Copy, Default)]
pub struct SysfsAttachWriter;

impl AttachWriter for SysfsAttachWriter {
    fn write_attach(&self, control_root: &Path, command: &AttachCommand) -> Result<()> {
        let path = control_root.join("attach");
        let line = command.to_string();

        // Writing requires root or appropriate udev rules
        let mut file = OpenOptions::new().write(true).open(&path).map_err(|e| {
            VhciError::AttachFileUnavailable {
                path: path.clone(),
                source: e,
            }
        })?;

        info!("Attaching USB/IP device using: {}", line);
        file.write_all(line.as_bytes())
            .and_then(|()| file.flush())
            .map_err(|e| VhciError::Write {
                path: path.clone(),
                source: e,
            })?;

        debug!("Wrote {:?} to {}", line, path.display());
        Ok(())
    }
}
