//! # Tiltlink Core Library
//!
//! Bridges an operator console and a serial-attached IMU:
//! - Interactive port and baud rate selection
//! - Line reassembly of the device stream
//! - Decoding of device lines into three-axis samples
//! - Weakly held observer notified of every sample
//!
//! ## Example
//!
//! ```rust,no_run
//! use tiltlink_core::core::{console::StdoutConsole, event, runtime};
//! use tiltlink_core::{SerialConfig, SerialPortProvider, SessionController};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let (tx, rx) = event::channel();
//!     let provider = SerialPortProvider::new(SerialConfig::default(), tx.clone());
//!     let controller = SessionController::new(Box::new(provider), Box::new(StdoutConsole));
//!
//!     runtime::spawn_stdin_reader(tx)?;
//!     let code = runtime::run(controller, rx).await?;
//!     std::process::exit(i32::from(code));
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod core;

// Re-exports for convenience
pub use crate::cli::{CliResult, ExitCodes};
pub use crate::config::{AppConfig, LoggingConfig, SampleFormat, SessionSettings};
pub use crate::core::console::{Console, MemoryConsole, StdoutConsole};
pub use crate::core::controller::{Flow, SessionController, SessionStats};
pub use crate::core::event::SessionEvent;
pub use crate::core::line::{LineAssembler, SplitPolicy};
pub use crate::core::sample::{parse_reading, parse_sample, Reading, Sample, SampleObserver};
pub use crate::core::state::ApplicationState;
pub use crate::core::transport::{
    PortDescriptor, PortEvent, PortProvider, SerialConfig, SerialFlowControl, SerialLink,
    SerialParity, SerialPortProvider, TransportError,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
