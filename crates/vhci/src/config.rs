//! Attach configuration
//!
//! Every value the kernel handshake depends on is configurable; the defaults
//! match a single full-speed device on bus 1 served by a USB/IP endpoint on
//! the IPv6 loopback.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, VhciError};

/// Conventional USB/IP service port
pub const USBIP_PORT: u16 = 3240;

/// Status code the VHCI driver reports for an unused port
pub const VHCI_STATUS_PORT_FREE: u32 = 4;

/// Default delay between attach attempts
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(3);

/// USB device speed as understood by the kernel attach entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeviceSpeed {
    /// Low speed - 1.5 Mbps (USB 1.0)
    Low,
    /// Full speed - 12 Mbps (USB 1.1)
    #[default]
    Full,
    /// High speed - 480 Mbps (USB 2.0)
    High,
    /// SuperSpeed - 5 Gbps (USB 3.0)
    Super,
    /// SuperSpeed+ - 10 Gbps (USB 3.1)
    SuperPlus,
}

impl DeviceSpeed {
    /// Kernel `enum usb_device_speed` code
    pub fn code(self) -> u32 {
        match self {
            DeviceSpeed::Low => 1,
            DeviceSpeed::Full => 2,
            DeviceSpeed::High => 3,
            DeviceSpeed::Super => 5, // 4 is USB_SPEED_WIRELESS
            DeviceSpeed::SuperPlus => 6,
        }
    }

    /// Root hub kind the kernel uses for this speed in its status listing
    pub fn hub(self) -> HubKind {
        match self {
            DeviceSpeed::Low | DeviceSpeed::Full | DeviceSpeed::High => HubKind::HighSpeed,
            DeviceSpeed::Super | DeviceSpeed::SuperPlus => HubKind::SuperSpeed,
        }
    }
}

/// VHCI root hub a port belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HubKind {
    /// USB 2.0 and below (`hs`)
    HighSpeed,
    /// USB 3.0+ (`ss`)
    SuperSpeed,
}

impl HubKind {
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "hs" => Some(HubKind::HighSpeed),
            "ss" => Some(HubKind::SuperSpeed),
            _ => None,
        }
    }
}

/// Bus/device pair identifying the virtual device within its bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId {
    pub bus: u16,
    pub device: u16,
}

impl DeviceId {
    pub fn new(bus: u16, device: u16) -> Self {
        Self { bus, device }
    }

    /// Value written to the attach entry (`busnum << 16 | devnum`)
    pub fn value(self) -> u32 {
        (u32::from(self.bus) << 16) | u32::from(self.device)
    }
}

impl Default for DeviceId {
    fn default() -> Self {
        Self::new(1, 1)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VhciConfig {
    /// Root of the device tree used to locate the driver
    pub sysfs_root: PathBuf,
    /// Subsystem the VHCI driver registers under
    pub subsystem: String,
    /// Device type (sysname) of the VHCI driver
    pub device_type: String,
    /// Host serving the USB/IP device (must resolve to IPv6)
    pub host: String,
    pub service_port: u16,
    pub bus_number: u16,
    pub device_number: u16,
    pub device_speed: DeviceSpeed,
    /// Status code meaning "port free"
    pub free_status: u32,
    pub retry_interval_ms: u64,
}

impl Default for VhciConfig {
    fn default() -> Self {
        Self {
            sysfs_root: PathBuf::from("/sys"),
            subsystem: "platform".to_string(),
            device_type: "vhci_hcd".to_string(),
            host: "::1".to_string(),
            service_port: USBIP_PORT,
            bus_number: 1,
            device_number: 1,
            device_speed: DeviceSpeed::Full,
            free_status: VHCI_STATUS_PORT_FREE,
            retry_interval_ms: DEFAULT_RETRY_INTERVAL.as_millis() as u64,
        }
    }
}

impl VhciConfig {
    pub fn device_id(&self) -> DeviceId {
        DeviceId::new(self.bus_number, self.device_number)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.subsystem.is_empty() || self.device_type.is_empty() {
            return Err(VhciError::Config(
                "subsystem and device_type must not be empty".to_string(),
            ));
        }
        if self.host.is_empty() {
            return Err(VhciError::Config("host must not be empty".to_string()));
        }
        if self.service_port == 0 {
            return Err(VhciError::Config("service_port must not be 0".to_string()));
        }
        if self.bus_number == 0 {
            return Err(VhciError::Config("bus_number must be at least 1".to_string()));
        }
        // USB device addresses are 7 bits
        if !(1..=127).contains(&self.device_number) {
            return Err(VhciError::Config(format!(
                "device_number {} out of range 1..=127",
                self.device_number
            )));
        }
        if self.retry_interval_ms == 0 {
            return Err(VhciError::Config(
                "retry_interval_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
