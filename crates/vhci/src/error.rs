//! Error types for VHCI attach
//!
//! Every failure carries a classification so callers can tell a broken host
//! (fatal), a host that is not ready for this subsystem (recoverable
//! initialization failure) and a single failed attach attempt (transient)
//! apart.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VhciError {
    /// The device tree cannot be enumerated at all
    #[error("device enumeration unavailable: {} is not a directory", root.display())]
    EnumerationUnavailable { root: PathBuf },

    /// No tokio runtime is available to host the attach task
    #[error("no async runtime available to run the attach task")]
    NoRuntime,

    #[error("VHCI driver not found (subsystem={subsystem}, device type={device_type})")]
    DriverNotFound {
        subsystem: String,
        device_type: String,
    },

    #[error("could not open VHCI status listing {}: {source}", path.display())]
    StatusUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no free VHCI port")]
    NoFreePort,

    #[error("failed to resolve {host}:{port}: {reason}")]
    Resolution {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("failed to allocate socket: {0}")]
    Socket(#[source] nix::Error),

    #[error("could not connect to {addr}: {source}")]
    Connect {
        addr: std::net::SocketAddrV6,
        #[source]
        source: nix::Error,
    },

    #[error("could not open VHCI attach entry {}: {source}", path.display())]
    AttachFileUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write attach command to {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A blocking attempt panicked or was cancelled by the runtime
    #[error("blocking attach step failed: {0}")]
    Blocking(String),

    /// The attach loop task itself panicked or was aborted
    #[error("attach task failed: {0}")]
    TaskFailed(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl VhciError {
    /// Unrecoverable: the subsystem cannot run on this host at all.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::EnumerationUnavailable { .. } | Self::NoRuntime)
    }

    /// Failure of a single attach attempt; the retry loop absorbs these.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Resolution { .. }
                | Self::Socket(_)
                | Self::Connect { .. }
                | Self::AttachFileUnavailable { .. }
                | Self::Write { .. }
                | Self::Blocking(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, VhciError>;
