//! Connection to the local USB/IP endpoint
//!
//! The kernel takes over the socket once the attach command is accepted, so a
//! raw socket is used and its file descriptor number is passed to the driver.
//! [`Connection`] owns the descriptor until [`Connection::hand_off`] gives it
//! away; dropping it earlier closes the socket.

use nix::sys::socket::{AddressFamily, SockFlag, SockType, SockaddrIn6, connect, socket};
use std::net::{SocketAddr, SocketAddrV6, ToSocketAddrs};
use std::os::fd::{AsRawFd, IntoRawFd, OwnedFd, RawFd};
use tracing::debug;

use crate::error::{Result, VhciError};

/// An open transport connection
#[derive(Debug)]
pub struct Connection {
    fd: OwnedFd,
}

impl Connection {
    /// Numeric identity passed to the attach command
    pub fn id(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    /// Give the descriptor to the kernel; it is never closed by this process
    pub fn hand_off(self) -> RawFd {
        self.fd.into_raw_fd()
    }
}

impl From<OwnedFd> for Connection {
    fn from(fd: OwnedFd) -> Self {
        Self { fd }
    }
}

/// Opens connections to the device-serving endpoint
pub trait Connector: Send + Sync {
    fn connect(&self) -> Result<Connection>;
}

/// Stream connector for an IPv6 endpoint
#[derive(Debug, Clone)]
pub struct TcpConnector {
    host: String,
    port: u16,
}

impl TcpConnector {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Resolve the endpoint to its first IPv6 address
    pub fn resolve(&self) -> Result<SocketAddrV6> {
        let resolution_error = |reason: String| VhciError::Resolution {
            host: self.host.clone(),
            port: self.port,
            reason,
        };

        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| resolution_error(e.to_string()))?
            .find_map(|addr| match addr {
                SocketAddr::V6(v6) => Some(v6),
                SocketAddr::V4(_) => None,
            })
            .ok_or_else(|| resolution_error("no IPv6 address".to_string()))
    }
}

impl Connector for TcpConnector {
    fn connect(&self) -> Result<Connection> {
        let addr = self.resolve()?;

        let fd = socket(AddressFamily::Inet6, SockType::Stream, SockFlag::empty(), None)
            .map_err(VhciError::Socket)?;

        // fd is closed on drop if connect fails
        connect(fd.as_raw_fd(), &SockaddrIn6::from(addr))
            .map_err(|source| VhciError::Connect { addr, source })?;

        debug!("Connected to {} (fd={})", addr, fd.as_raw_fd());
        Ok(Connection::from(fd))
    }
}
