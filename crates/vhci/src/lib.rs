//! Attach a USB/IP device to the Linux virtual host controller
//!
//! The instrument finds the `vhci_hcd` driver in sysfs, picks a free port from
//! its status listing, then keeps trying to connect to the local USB/IP
//! endpoint and hand the socket to the kernel until one attach succeeds.
//!
//! ```no_run
//! # async fn example() -> vhci::Result<()> {
//! let config = vhci::VhciConfig::default();
//! let instrument = vhci::VhciInstrument::init(&config)?;
//! let outcome = instrument.wait().await?;
//! assert!(outcome.is_attached());
//! # Ok(())
//! # }
//! ```

pub mod attach;
pub mod config;
pub mod device;
pub mod error;
pub mod instrument;
pub mod port;
pub mod retry;
pub mod session;
pub mod transport;

pub use attach::{AttachCommand, AttachWriter, SysfsAttachWriter};
pub use config::{DeviceId, DeviceSpeed, VhciConfig};
pub use device::{DeviceLocator, SysfsDeviceLocator};
pub use error::{Result, VhciError};
pub use instrument::VhciInstrument;
pub use port::{PortRecord, find_free_port};
pub use retry::{AttachLoop, AttachOutcome, AttachReport, AttachState, AttachTask};
pub use session::VhciSession;
pub use transport::{Connection, Connector, TcpConnector};
