//! Events marshaled onto the session task

use super::transport::PortEvent;
use bytes::Bytes;
use tokio::sync::mpsc;

/// Everything the session reacts to, in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Raw bytes typed by the operator (one line, newline included)
    OperatorInput(Bytes),
    /// The operator input stream reached end of file
    OperatorClosed,
    /// A callback from the serial port
    Port(PortEvent),
}

/// Producer side of the session queue
pub type EventSender = mpsc::UnboundedSender<SessionEvent>;

/// Consumer side of the session queue
pub type EventReceiver = mpsc::UnboundedReceiver<SessionEvent>;

/// Create the session queue
pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}
