//! Common utilities for vhci-attach
//!
//! Shared logging setup and error types for the workspace binaries.

pub mod error;
pub mod logging;

pub use error::{Error, Result};
pub use logging::{LOG_LEVELS, is_valid_log_level, setup_logging};
