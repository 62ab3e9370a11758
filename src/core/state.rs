//! Session state

use super::transport::PortDescriptor;
use std::fmt;

/// Where the operator handshake currently stands
///
/// Only [`SessionController`](super::controller::SessionController) moves
/// between these.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ApplicationState {
    /// Nothing has happened yet
    #[default]
    Initialization,
    /// Waiting for the operator to pick one of `candidates`
    AwaitingPortSelection {
        /// Ports listed to the operator, in display order
        candidates: Vec<PortDescriptor>,
    },
    /// A port was requested, waiting for a baud rate
    AwaitingBaudRate,
    /// Streaming: operator lines go to the device, device lines become samples
    AwaitingUserInput,
    /// Session finished, every event is ignored
    Inactive,
}

impl ApplicationState {
    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::Initialization => "initialization",
            Self::AwaitingPortSelection { .. } => "awaiting-port-selection",
            Self::AwaitingBaudRate => "awaiting-baud-rate",
            Self::AwaitingUserInput => "awaiting-user-input",
            Self::Inactive => "inactive",
        }
    }

    /// Whether device lines are turned into samples in this state
    pub fn accepts_device_data(&self) -> bool {
        matches!(self, Self::AwaitingUserInput)
    }

    /// Check if state is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Inactive)
    }
}

impl fmt::Display for ApplicationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
