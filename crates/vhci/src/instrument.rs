//! VHCI instrument: locate the driver, reserve a port, attach in the background
//!
//! Initialization runs synchronously. Only when both the driver and a free
//! port are found is the attach loop started; after that no error reaches
//! the caller, the loop either attaches or keeps retrying.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

use crate::attach::{AttachWriter, SysfsAttachWriter};
use crate::config::VhciConfig;
use crate::device::{DeviceLocator, SysfsDeviceLocator};
use crate::error::{Result, VhciError};
use crate::port::find_free_port;
use crate::retry::{AttachLoop, AttachOutcome, AttachState, AttachTask};
use crate::session::VhciSession;
use crate::transport::{Connector, TcpConnector};

pub struct VhciInstrument {
    session: Arc<VhciSession>,
    task: AttachTask,
}

impl VhciInstrument {
    /// Initialize against the host's sysfs and the configured USB/IP endpoint
    ///
    /// Must be called from within a tokio runtime.
    pub fn init(config: &VhciConfig) -> Result<Self> {
        let locator = SysfsDeviceLocator::new(&config.sysfs_root);
        let connector = Arc::new(TcpConnector::new(&config.host, config.service_port));
        Self::init_with(config, &locator, connector, Arc::new(SysfsAttachWriter))
    }

    /// Initialize with explicit collaborators
    pub fn init_with(
        config: &VhciConfig,
        locator: &dyn DeviceLocator,
        connector: Arc<dyn Connector>,
        writer: Arc<dyn AttachWriter>,
    ) -> Result<Self> {
        config.validate()?;

        let control_root = locator
            .find_driver(&config.subsystem, &config.device_type)
            .inspect_err(|e| match e {
                VhciError::DriverNotFound { .. } => {
                    error!("VHCI not available. Is the driver loaded?");
                    error!("Try: sudo modprobe vhci-hcd");
                    error!("The driver is part of the linux-modules-extra package for your kernel");
                }
                e if e.is_fatal() => error!("Could not enumerate devices: {}", e),
                e => error!("VHCI lookup failed: {}", e),
            })?;
        info!("Found {} at: {}", config.device_type, control_root.display());

        let port = find_free_port(&control_root, config.free_status, config.device_speed)
            .inspect_err(|e| match e {
                VhciError::NoFreePort => {
                    error!("It appears all your VHCI ports are currently occupied.");
                    error!("New VHCI device cannot be registered unless one of the ports is freed.");
                }
                e => error!("Could not read VHCI port status: {}", e),
            })?;

        let session = Arc::new(VhciSession::new(
            control_root,
            port,
            config.device_id(),
            config.device_speed,
        ));

        let task = AttachLoop::new(session.clone(), connector, writer, config.retry_interval())
            .spawn()?;

        Ok(Self { session, task })
    }

    pub fn session(&self) -> &VhciSession {
        &self.session
    }

    pub fn state(&self) -> AttachState {
        self.task.state()
    }

    pub fn subscribe(&self) -> watch::Receiver<AttachState> {
        self.task.subscribe()
    }

    /// Wait until the device is attached
    pub async fn wait(self) -> Result<AttachOutcome> {
        self.task.wait().await
    }

    /// Stop retrying; an attach that already happened is left in place
    pub async fn shutdown(self) -> Result<AttachOutcome> {
        self.task.shutdown().await
    }
}
