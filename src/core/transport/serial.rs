//! Serial port backend built on the `serialport` crate

use super::{PortDescriptor, PortEvent, PortProvider, SerialLink, TransportError};
use crate::core::event::{EventSender, SessionEvent};
use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serialport::{DataBits, FlowControl, Parity, SerialPort, SerialPortType, StopBits};
use std::io::{self, ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Pause before polling again after a failed read
const ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Serial port flow control type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SerialFlowControl {
    /// No flow control
    #[default]
    None,
    /// Hardware flow control (RTS/CTS)
    Hardware,
    /// Software flow control (XON/XOFF)
    Software,
}

/// Serial port parity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SerialParity {
    /// No parity
    #[default]
    None,
    /// Odd parity
    Odd,
    /// Even parity
    Even,
}

/// Line settings applied when a port is opened
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Baud rate used to open the port, before the operator picks one
    pub baud_rate: u32,
    /// Data bits (5, 6, 7, 8)
    pub data_bits: u8,
    /// Stop bits (1, 2)
    pub stop_bits: u8,
    /// Parity
    pub parity: SerialParity,
    /// Flow control
    pub flow_control: SerialFlowControl,
    /// Read timeout of the reader thread in milliseconds
    pub timeout_ms: u64,
}

impl SerialConfig {
    /// Create a configuration with 8N1 framing and no flow control
    pub fn new(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            data_bits: 8,
            stop_bits: 1,
            parity: SerialParity::None,
            flow_control: SerialFlowControl::None,
            timeout_ms: 100,
        }
    }

    /// Short framing summary, e.g. `8N1`
    pub fn framing(&self) -> String {
        format!(
            "{}{}{}",
            self.data_bits,
            match self.parity {
                SerialParity::None => "N",
                SerialParity::Odd => "O",
                SerialParity::Even => "E",
            },
            self.stop_bits
        )
    }

    fn builder(&self, path: &str) -> serialport::SerialPortBuilder {
        let data_bits = match self.data_bits {
            5 => DataBits::Five,
            6 => DataBits::Six,
            7 => DataBits::Seven,
            _ => DataBits::Eight,
        };

        let stop_bits = match self.stop_bits {
            2 => StopBits::Two,
            _ => StopBits::One,
        };

        let parity = match self.parity {
            SerialParity::Odd => Parity::Odd,
            SerialParity::Even => Parity::Even,
            SerialParity::None => Parity::None,
        };

        let flow_control = match self.flow_control {
            SerialFlowControl::Hardware => FlowControl::Hardware,
            SerialFlowControl::Software => FlowControl::Software,
            SerialFlowControl::None => FlowControl::None,
        };

        serialport::new(path, self.baud_rate)
            .data_bits(data_bits)
            .stop_bits(stop_bits)
            .parity(parity)
            .flow_control(flow_control)
            .timeout(Duration::from_millis(self.timeout_ms))
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self::new(115_200)
    }
}

fn map_serial_error(path: &str, e: serialport::Error) -> TransportError {
    match e.kind() {
        serialport::ErrorKind::NoDevice => TransportError::PortNotFound(path.to_string()),
        serialport::ErrorKind::InvalidInput => TransportError::InvalidConfiguration(e.to_string()),
        serialport::ErrorKind::Io(ErrorKind::PermissionDenied) => {
            TransportError::PermissionDenied(path.to_string())
        }
        _ => TransportError::ConnectionFailed(e.to_string()),
    }
}

/// Enumerates system serial ports and hands out [`SerialPortLink`]s
pub struct SerialPortProvider {
    config: SerialConfig,
    events: EventSender,
}

impl SerialPortProvider {
    /// Create a provider whose links report on `events`
    pub fn new(config: SerialConfig, events: EventSender) -> Self {
        Self { config, events }
    }
}

impl PortProvider for SerialPortProvider {
    fn list_ports(&self) -> Result<Vec<PortDescriptor>, TransportError> {
        list_ports()
    }

    fn connect(&mut self, port: &PortDescriptor) -> Result<Box<dyn SerialLink>, TransportError> {
        Ok(Box::new(SerialPortLink::new(
            port.id.clone(),
            self.config.clone(),
            self.events.clone(),
        )))
    }
}

/// List available serial ports
pub fn list_ports() -> Result<Vec<PortDescriptor>, TransportError> {
    let ports = serialport::available_ports()
        .map_err(|e| TransportError::Enumeration(e.to_string()))?;

    Ok(ports
        .into_iter()
        .map(|info| {
            let name = match info.port_type {
                SerialPortType::UsbPort(usb) => usb
                    .product
                    .or(usb.manufacturer)
                    .unwrap_or_else(|| info.port_name.clone()),
                _ => info.port_name.clone(),
            };
            PortDescriptor::new(info.port_name, name)
        })
        .collect())
}

/// A serial port with a background reader thread
///
/// The reader pushes everything it sees onto the session queue as
/// [`PortEvent`]s, so the controller only ever observes the port from the
/// session task.
pub struct SerialPortLink {
    path: String,
    config: SerialConfig,
    events: EventSender,
    port: Arc<Mutex<Option<Box<dyn SerialPort>>>>,
    running: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

impl SerialPortLink {
    /// Create a link; nothing is opened until [`SerialLink::open`]
    pub fn new(path: String, config: SerialConfig, events: EventSender) -> Self {
        Self {
            path,
            config,
            events,
            port: Arc::new(Mutex::new(None)),
            running: Arc::new(AtomicBool::new(false)),
            reader: None,
        }
    }

    fn stop_reader(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.reader.take() {
            if handle.join().is_err() {
                tracing::warn!(port = %self.path, "Reader thread panicked");
            }
        }
    }

    fn reader_loop<R: Read>(
        path: String,
        mut reader: R,
        running: Arc<AtomicBool>,
        events: EventSender,
    ) {
        let mut buffer = vec![0u8; 4096];
        let mut last_error: Option<String> = None;

        while running.load(Ordering::Acquire) {
            let event = match reader.read(&mut buffer) {
                Ok(0) => PortEvent::Removed,
                Ok(n) => {
                    last_error = None;
                    PortEvent::BytesReceived(Bytes::copy_from_slice(&buffer[..n]))
                }
                Err(e) => match classify_read_error(&e) {
                    ReadFailure::Retry => continue,
                    ReadFailure::Disconnected => PortEvent::Removed,
                    ReadFailure::Fault => {
                        let description = e.to_string();
                        std::thread::sleep(ERROR_BACKOFF);
                        // A port stuck in the same fault reports it once.
                        if last_error.as_deref() == Some(description.as_str()) {
                            continue;
                        }
                        tracing::warn!(port = %path, error = %description, "Serial read failed");
                        last_error = Some(description.clone());
                        PortEvent::Error(description)
                    }
                },
            };

            let removed = matches!(event, PortEvent::Removed);
            if events.send(SessionEvent::Port(event)).is_err() {
                tracing::debug!(port = %path, "Session queue closed, stopping reader");
                break;
            }
            if removed {
                break;
            }
        }

        running.store(false, Ordering::Release);
        tracing::debug!(port = %path, "Reader thread finished");
    }
}

enum ReadFailure {
    Retry,
    Disconnected,
    Fault,
}

fn classify_read_error(e: &io::Error) -> ReadFailure {
    match e.kind() {
        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted => ReadFailure::Retry,
        ErrorKind::BrokenPipe | ErrorKind::NotFound | ErrorKind::NotConnected => {
            ReadFailure::Disconnected
        }
        _ => ReadFailure::Fault,
    }
}

impl SerialLink for SerialPortLink {
    fn open(&mut self) -> Result<(), TransportError> {
        if self.port.lock().is_some() {
            return Ok(());
        }

        let port = self
            .config
            .builder(&self.path)
            .open()
            .map_err(|e| map_serial_error(&self.path, e))?;
        let reader = port
            .try_clone()
            .map_err(|e| map_serial_error(&self.path, e))?;

        *self.port.lock() = Some(port);
        self.running.store(true, Ordering::Release);

        let path = self.path.clone();
        let running = self.running.clone();
        let events = self.events.clone();
        let handle = std::thread::Builder::new()
            .name("serial-reader".into())
            .spawn(move || Self::reader_loop(path, reader, running, events))?;
        self.reader = Some(handle);

        tracing::info!(
            port = %self.path,
            baud = self.config.baud_rate,
            framing = %self.config.framing(),
            "Serial port opened"
        );

        // Completion is reported through the queue like every other callback.
        if self.events.send(SessionEvent::Port(PortEvent::Opened)).is_err() {
            tracing::debug!(port = %self.path, "Session queue closed before the port opened");
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.stop_reader();
        if self.port.lock().take().is_some() {
            tracing::info!(port = %self.path, "Serial port closed");
        }
        Ok(())
    }

    fn set_baud_rate(&mut self, rate: u32) -> Result<(), TransportError> {
        let mut guard = self.port.lock();
        let port = guard.as_mut().ok_or(TransportError::NotConnected)?;
        port.set_baud_rate(rate)
            .map_err(|e| map_serial_error(&self.path, e))?;
        self.config.baud_rate = rate;
        Ok(())
    }

    fn send(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let mut guard = self.port.lock();
        let port = guard.as_mut().ok_or(TransportError::NotConnected)?;

        port.write_all(data)?;
        port.flush()?;
        Ok(data.len())
    }
}

impl Drop for SerialPortLink {
    fn drop(&mut self) {
        self.stop_reader();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use tokio::sync::mpsc;

    /// Replays scripted reads, then times out forever
    struct ScriptedPort(VecDeque<io::Result<Vec<u8>>>);

    impl ScriptedPort {
        fn new(script: Vec<io::Result<Vec<u8>>>) -> Self {
            Self(script.into())
        }
    }

    impl Read for ScriptedPort {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.0.pop_front() {
                Some(Ok(data)) => {
                    buf[..data.len()].copy_from_slice(&data);
                    Ok(data.len())
                }
                Some(Err(e)) => Err(e),
                None => {
                    std::thread::sleep(Duration::from_millis(1));
                    Err(ErrorKind::TimedOut.into())
                }
            }
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Vec<PortEvent> {
        let mut events = Vec::new();
        while let Ok(SessionEvent::Port(event)) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn run_script(script: Vec<io::Result<Vec<u8>>>) -> Vec<PortEvent> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let running = Arc::new(AtomicBool::new(true));
        let port = ScriptedPort::new(script);
        SerialPortLink::reader_loop("/dev/ttyTEST".into(), port, running.clone(), tx);
        assert!(!running.load(Ordering::Acquire));
        drain(&mut rx)
    }

    fn bytes(data: &'static [u8]) -> PortEvent {
        PortEvent::BytesReceived(Bytes::from_static(data))
    }

    #[test]
    fn test_default_config() {
        let config = SerialConfig::default();
        assert_eq!(config.baud_rate, 115_200);
        assert_eq!(config.framing(), "8N1");
        assert_eq!(config.timeout_ms, 100);
    }

    #[test]
    fn test_framing() {
        let config = SerialConfig {
            data_bits: 7,
            parity: SerialParity::Even,
            stop_bits: 2,
            ..SerialConfig::new(9600)
        };
        assert_eq!(config.framing(), "7E2");
    }

    #[test]
    fn test_unopened_link_rejects_io() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut link = SerialPortLink::new("/dev/null-port".into(), SerialConfig::default(), tx);
        assert!(matches!(link.send(b"hi"), Err(TransportError::NotConnected)));
        assert!(matches!(link.set_baud_rate(9600), Err(TransportError::NotConnected)));
        assert!(link.close().is_ok());
    }

    #[test]
    fn test_provider_connect_does_not_open() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut provider = SerialPortProvider::new(SerialConfig::default(), tx);
        let link = provider.connect(&PortDescriptor::new("/dev/ttyFAKE", "fake"));
        assert!(link.is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_reader_retries_interrupted_and_timeouts() {
        let events = run_script(vec![
            Err(ErrorKind::Interrupted.into()),
            Err(ErrorKind::TimedOut.into()),
            Ok(b"0 0 0 1 2 3\n".to_vec()),
            Ok(Vec::new()),
        ]);
        assert_eq!(events, vec![bytes(b"0 0 0 1 2 3\n"), PortEvent::Removed]);
    }

    #[test]
    fn test_reader_keeps_reading_after_error() {
        let events = run_script(vec![
            Err(io::Error::other("framing")),
            Ok(b"abc".to_vec()),
            Err(io::Error::other("parity")),
            Ok(b"def\n".to_vec()),
            Ok(Vec::new()),
        ]);
        assert_eq!(
            events,
            vec![
                PortEvent::Error("framing".into()),
                bytes(b"abc"),
                PortEvent::Error("parity".into()),
                bytes(b"def\n"),
                PortEvent::Removed,
            ]
        );
    }

    #[test]
    fn test_reader_reports_repeated_error_once() {
        let events = run_script(vec![
            Err(io::Error::other("overrun")),
            Err(io::Error::other("overrun")),
            Err(io::Error::other("overrun")),
            Ok(b"x".to_vec()),
            Err(io::Error::other("overrun")),
            Ok(Vec::new()),
        ]);
        assert_eq!(
            events,
            vec![
                PortEvent::Error("overrun".into()),
                bytes(b"x"),
                PortEvent::Error("overrun".into()),
                PortEvent::Removed,
            ]
        );
    }

    #[test]
    fn test_reader_stops_on_disconnect() {
        for kind in [ErrorKind::BrokenPipe, ErrorKind::NotFound, ErrorKind::NotConnected] {
            let events = run_script(vec![Err(kind.into()), Ok(b"late\n".to_vec())]);
            assert_eq!(events, vec![PortEvent::Removed], "{kind:?}");
        }
    }

    #[test]
    fn test_reader_stops_when_queue_closed() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let running = Arc::new(AtomicBool::new(true));
        let port = ScriptedPort::new(vec![Ok(b"1".to_vec()), Ok(b"2".to_vec())]);

        SerialPortLink::reader_loop("/dev/ttyTEST".into(), port, running.clone(), tx);
        assert!(!running.load(Ordering::Acquire));
    }

    #[test]
    fn test_stop_reader_joins_idle_thread() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut link =
            SerialPortLink::new("/dev/ttyTEST".into(), SerialConfig::default(), tx.clone());
        link.running.store(true, Ordering::Release);

        let running = link.running.clone();
        let port = ScriptedPort::new(Vec::new());
        let handle = std::thread::spawn(move || {
            SerialPortLink::reader_loop("/dev/ttyTEST".into(), port, running, tx);
        });
        link.reader = Some(handle);

        link.stop_reader();
        assert!(link.reader.is_none());
        assert!(!link.running.load(Ordering::Acquire));
        assert!(drain(&mut rx).is_empty());
    }
}
