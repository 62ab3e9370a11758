//! Port abstraction used by the session controller
//!
//! The controller never touches a device directly. It asks a [`PortProvider`]
//! for the list of candidates and for a [`SerialLink`] to the chosen one.
//! Lifecycle callbacks of the link (opened, data, removed, error) arrive as
//! [`PortEvent`]s on the session event queue.

mod serial;

pub use serial::{
    list_ports, SerialConfig, SerialFlowControl, SerialParity, SerialPortLink, SerialPortProvider,
};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Transport error types
#[derive(Error, Debug)]
pub enum TransportError {
    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Port not found
    #[error("Port not found: {0}")]
    PortNotFound(String),

    /// Permission denied
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Port enumeration failed
    #[error("Port enumeration failed: {0}")]
    Enumeration(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Not connected
    #[error("Not connected")]
    NotConnected,
}

/// One entry of a port enumeration snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortDescriptor {
    /// System identifier (e.g., COM3, /dev/ttyUSB0)
    pub id: String,
    /// Human-readable name
    pub name: String,
}

impl PortDescriptor {
    /// Create a new descriptor
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for PortDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name == self.id {
            write!(f, "{}", self.id)
        } else {
            write!(f, "{} ({})", self.name, self.id)
        }
    }
}

/// Notifications raised by an open link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortEvent {
    /// The port finished opening
    Opened,
    /// Bytes arrived from the device
    BytesReceived(Bytes),
    /// The device went away
    Removed,
    /// The port reported an error
    Error(String),
}

/// Handle to a single serial endpoint
///
/// `open` only requests opening; completion is signalled with
/// [`PortEvent::Opened`].
#[cfg_attr(test, mockall::automock)]
pub trait SerialLink: Send {
    /// Request the port to open
    fn open(&mut self) -> Result<(), TransportError>;

    /// Close the port
    fn close(&mut self) -> Result<(), TransportError>;

    /// Change the baud rate of the open port
    fn set_baud_rate(&mut self, rate: u32) -> Result<(), TransportError>;

    /// Write raw bytes to the device
    fn send(&mut self, data: &[u8]) -> Result<usize, TransportError>;
}

/// Enumerates ports and builds links to them
pub trait PortProvider: Send {
    /// List the ports currently available
    fn list_ports(&self) -> Result<Vec<PortDescriptor>, TransportError>;

    /// Build a link to the given port. The link is not opened yet.
    fn connect(&mut self, port: &PortDescriptor) -> Result<Box<dyn SerialLink>, TransportError>;
}
