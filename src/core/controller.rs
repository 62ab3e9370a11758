//! Session controller
//!
//! Drives the operator handshake (port selection, baud rate) and then
//! streams: operator lines go to the device verbatim, device lines are
//! decoded into [`Sample`]s for the registered observer.
//!
//! The controller is not reentrant. Every call must come from the single
//! session task, see [`crate::core::runtime`].

use super::console::Console;
use super::event::SessionEvent;
use super::line::{LineAssembler, SplitPolicy};
use super::sample::{parse_reading, parse_sample, Sample, SampleObserver};
use super::state::ApplicationState;
use super::transport::{PortDescriptor, PortEvent, PortProvider, SerialLink, TransportError};
use crate::cli::ExitCodes;
use serde::Serialize;
use std::sync::{Arc, Weak};
use uuid::Uuid;

const PROMPT_PORT: &str = "Select a port by number:";
const PROMPT_BAUD: &str = "Enter baud rate:";
const INVALID_SELECTION: &str = "Invalid selection, enter a port number:";
const INVALID_BAUD: &str = "Invalid baud rate, enter a number:";
const NO_PORTS: &str = "No serial ports found.";
const NO_PORT_OPEN: &str = "No port open.";
const PORT_REMOVED: &str = "Port removed.";

/// What the caller should do after an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Keep feeding events
    Continue,
    /// Stop the session and exit with the given code
    Exit(u8),
}

/// Session counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    /// Device lines assembled while streaming
    pub lines: u64,
    /// Lines decoded into samples
    pub samples: u64,
    /// Lines that did not decode
    pub dropped_samples: u64,
    /// Device chunks received outside the streaming state
    pub ignored_chunks: u64,
    /// Device chunks dropped because they were not valid UTF-8
    pub undecodable_chunks: u64,
    /// Bytes forwarded from the operator to the device
    pub bytes_sent: u64,
}

/// Returns true when `text` asks to leave the session
///
/// Matches a case-insensitive `exit` or `quit` prefix after leading
/// whitespace.
pub fn is_exit_command(text: &str) -> bool {
    text.trim_start()
        .get(..4)
        .is_some_and(|head| head.eq_ignore_ascii_case("exit") || head.eq_ignore_ascii_case("quit"))
}

/// Map a requested index onto `0..len`
fn clamp_index(requested: i64, len: usize) -> usize {
    usize::try_from(requested)
        .unwrap_or(0)
        .min(len.saturating_sub(1))
}

/// Owns the session state and reacts to operator and port events
pub struct SessionController {
    id: Uuid,
    state: ApplicationState,
    provider: Box<dyn PortProvider>,
    port: Option<Box<dyn SerialLink>>,
    console: Box<dyn Console>,
    observer: Option<Weak<dyn SampleObserver>>,
    assembler: LineAssembler,
    last_sample: Option<Sample>,
    stats: SessionStats,
}

impl SessionController {
    /// Create a controller in [`ApplicationState::Initialization`]
    pub fn new(provider: Box<dyn PortProvider>, console: Box<dyn Console>) -> Self {
        Self {
            id: Uuid::new_v4(),
            state: ApplicationState::Initialization,
            provider,
            port: None,
            console,
            observer: None,
            assembler: LineAssembler::new(),
            last_sample: None,
            stats: SessionStats::default(),
        }
    }

    /// Use a different line split policy
    #[must_use]
    pub fn with_split_policy(mut self, policy: SplitPolicy) -> Self {
        self.assembler = LineAssembler::with_policy(policy);
        self
    }

    /// Register the sample observer without taking ownership of it
    pub fn register_observer<O: SampleObserver + 'static>(&mut self, observer: &Arc<O>) {
        let weak: Weak<O> = Arc::downgrade(observer);
        let weak: Weak<dyn SampleObserver> = weak;
        self.observer = Some(weak);
    }

    /// Register an already downgraded observer
    pub fn set_observer(&mut self, observer: Weak<dyn SampleObserver>) {
        self.observer = Some(observer);
    }

    /// Remove the observer
    pub fn clear_observer(&mut self) {
        self.observer = None;
    }

    /// Session ID
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Current state
    pub fn state(&self) -> &ApplicationState {
        &self.state
    }

    /// Most recent decoded sample
    pub fn last_sample(&self) -> Option<Sample> {
        self.last_sample
    }

    /// Session counters
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            undecodable_chunks: self.assembler.rejected_chunks(),
            ..self.stats
        }
    }

    /// Whether a port handle is currently held
    pub fn has_port(&self) -> bool {
        self.port.is_some()
    }

    /// Enumerate ports and ask the operator to pick one.
    ///
    /// Exits when no port is available. Only acts in
    /// [`ApplicationState::Initialization`].
    pub fn start(&mut self) -> Result<Flow, TransportError> {
        if self.state != ApplicationState::Initialization {
            return Ok(Flow::Continue);
        }

        let candidates = self.provider.list_ports()?;
        tracing::info!(session = %self.id, count = candidates.len(), "Enumerated serial ports");

        if candidates.is_empty() {
            self.console.line(NO_PORTS);
            self.transition(ApplicationState::Inactive);
            return Ok(Flow::Exit(ExitCodes::SUCCESS));
        }

        self.console.line("Available ports:");
        for (index, port) in candidates.iter().enumerate() {
            self.console.line(&format!("  [{index}] {port}"));
        }
        self.console.line(PROMPT_PORT);
        self.transition(ApplicationState::AwaitingPortSelection { candidates });
        Ok(Flow::Continue)
    }

    /// Dispatch one queued event
    pub fn handle_event(&mut self, event: SessionEvent) -> Flow {
        match event {
            SessionEvent::OperatorInput(data) => self.handle_operator_input(&data),
            SessionEvent::OperatorClosed => {
                tracing::debug!(session = %self.id, "Operator input closed");
                Flow::Continue
            }
            SessionEvent::Port(event) => {
                self.handle_port_event(event);
                Flow::Continue
            }
        }
    }

    /// Handle one chunk of operator input
    pub fn handle_operator_input(&mut self, data: &[u8]) -> Flow {
        if self.state.is_terminal() {
            return Flow::Continue;
        }

        let text = String::from_utf8_lossy(data);
        if is_exit_command(&text) {
            return self.terminate();
        }

        match self.state {
            ApplicationState::AwaitingPortSelection { .. } => self.select_port(&text),
            ApplicationState::AwaitingBaudRate => self.set_baud_rate(&text),
            ApplicationState::AwaitingUserInput => self.forward(data),
            ApplicationState::Initialization | ApplicationState::Inactive => {
                tracing::trace!(state = %self.state, "Ignoring operator input");
            }
        }
        Flow::Continue
    }

    /// Handle a callback from the port
    pub fn handle_port_event(&mut self, event: PortEvent) {
        if self.state.is_terminal() {
            return;
        }

        match event {
            PortEvent::Opened => {
                tracing::debug!(session = %self.id, "Port opened");
                self.console.line(PROMPT_BAUD);
                self.transition(ApplicationState::AwaitingBaudRate);
            }
            PortEvent::BytesReceived(data) => self.handle_device_data(&data),
            PortEvent::Removed => {
                tracing::warn!(session = %self.id, "Port removed");
                self.port = None;
                self.console.line(PORT_REMOVED);
            }
            PortEvent::Error(description) => {
                tracing::warn!(session = %self.id, error = %description, "Port error");
                self.console.line(&format!("Port error: {description}"));
            }
        }
    }

    fn handle_device_data(&mut self, data: &[u8]) {
        if !self.state.accepts_device_data() {
            self.stats.ignored_chunks += 1;
            tracing::trace!(state = %self.state, len = data.len(), "Ignoring device data");
            return;
        }

        for line in self.assembler.ingest(data) {
            self.stats.lines += 1;
            match parse_sample(&line) {
                Some(sample) => {
                    self.stats.samples += 1;
                    self.last_sample = Some(sample);
                    if let Some(observer) = self.observer.as_ref().and_then(Weak::upgrade) {
                        observer.on_sample(&sample);
                        if let Some(reading) = parse_reading(&line) {
                            observer.on_reading(&reading);
                        }
                    }
                }
                None => {
                    self.stats.dropped_samples += 1;
                    tracing::debug!(line = %line.trim_end(), "Dropping unparseable device line");
                }
            }
        }
    }

    fn select_port(&mut self, text: &str) {
        let ApplicationState::AwaitingPortSelection { candidates } = &self.state else {
            return;
        };

        let Ok(requested) = text.trim().parse::<i64>() else {
            self.console.line(INVALID_SELECTION);
            return;
        };

        let port = candidates[clamp_index(requested, candidates.len())].clone();
        self.console.line(&format!("Opening {}...", port.id));

        // The baud prompt waits for the port's own `Opened` callback.
        match self.open_port(&port) {
            Ok(()) => tracing::debug!(port = %port.id, "Open requested"),
            Err(e) => {
                tracing::warn!(port = %port.id, error = %e, "Failed to open port");
                self.console.line(&format!("Port error: {e}"));
                self.console.line(PROMPT_PORT);
            }
        }
    }

    fn open_port(&mut self, port: &PortDescriptor) -> Result<(), TransportError> {
        self.close_port();

        let mut link = self.provider.connect(port)?;
        link.open()?;
        self.port = Some(link);
        Ok(())
    }

    fn set_baud_rate(&mut self, text: &str) {
        let Ok(rate) = text.trim().parse::<u32>() else {
            self.console.line(INVALID_BAUD);
            return;
        };

        let Some(port) = self.port.as_mut() else {
            self.console.line(NO_PORT_OPEN);
            return;
        };

        match port.set_baud_rate(rate) {
            Ok(()) => {
                tracing::info!(session = %self.id, baud = rate, "Baud rate set");
                self.console.line(&format!(
                    "Baud rate set to {rate}. Type to send, 'exit' or 'quit' to leave."
                ));
                self.assembler.clear();
                self.transition(ApplicationState::AwaitingUserInput);
            }
            Err(e) => self.console.line(&format!("Port error: {e}")),
        }
    }

    fn forward(&mut self, data: &[u8]) {
        let Some(port) = self.port.as_mut() else {
            self.console.line(NO_PORT_OPEN);
            return;
        };

        match port.send(data) {
            Ok(written) => self.stats.bytes_sent += written as u64,
            Err(e) => {
                tracing::warn!(session = %self.id, error = %e, "Send failed");
                self.console.line(&format!("Port error: {e}"));
            }
        }
    }

    fn close_port(&mut self) {
        if let Some(mut port) = self.port.take() {
            if let Err(e) = port.close() {
                tracing::warn!(session = %self.id, error = %e, "Failed to close port");
            }
        }
    }

    /// Close the port and end the session
    pub fn terminate(&mut self) -> Flow {
        if self.state.is_terminal() {
            return Flow::Exit(ExitCodes::SUCCESS);
        }
        self.close_port();
        self.transition(ApplicationState::Inactive);
        tracing::info!(session = %self.id, stats = ?self.stats(), "Session finished");
        Flow::Exit(ExitCodes::SUCCESS)
    }

    fn transition(&mut self, next: ApplicationState) {
        tracing::debug!(session = %self.id, from = %self.state, to = %next, "State transition");
        self.state = next;
    }
}
