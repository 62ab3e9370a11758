//! End-to-end tests of the session loop against a mocked serial link

use bytes::Bytes;
use mockall::mock;
use parking_lot::Mutex;
use std::sync::Arc;
use tiltlink_core::core::{event, runtime};
use tiltlink_core::{
    ApplicationState, MemoryConsole, PortDescriptor, PortEvent, PortProvider, Sample,
    SampleObserver, SerialLink, SessionController, SessionEvent, TransportError,
};

mock! {
    pub Link {}
    impl SerialLink for Link {
        fn open(&mut self) -> Result<(), TransportError>;
        fn close(&mut self) -> Result<(), TransportError>;
        fn set_baud_rate(&mut self, rate: u32) -> Result<(), TransportError>;
        fn send(&mut self, data: &[u8]) -> Result<usize, TransportError>;
    }
}

struct OneShotProvider {
    ports: Result<Vec<PortDescriptor>, String>,
    link: Option<MockLink>,
    requested: Arc<Mutex<Vec<String>>>,
}

impl PortProvider for OneShotProvider {
    fn list_ports(&self) -> Result<Vec<PortDescriptor>, TransportError> {
        self.ports.clone().map_err(TransportError::Enumeration)
    }

    fn connect(&mut self, port: &PortDescriptor) -> Result<Box<dyn SerialLink>, TransportError> {
        self.requested.lock().push(port.id.clone());
        let link = self
            .link
            .take()
            .ok_or_else(|| TransportError::PortNotFound(port.id.clone()))?;
        Ok(Box::new(link))
    }
}

#[derive(Default)]
struct Recorder(Mutex<Vec<Sample>>);

impl SampleObserver for Recorder {
    fn on_sample(&self, sample: &Sample) {
        self.0.lock().push(*sample);
    }
}

fn ports() -> Vec<PortDescriptor> {
    vec![
        PortDescriptor::new("/dev/ttyS0", "/dev/ttyS0"),
        PortDescriptor::new("/dev/ttyUSB0", "M5StickC"),
    ]
}

fn input(text: &'static str) -> SessionEvent {
    SessionEvent::OperatorInput(Bytes::from_static(text.as_bytes()))
}

fn device(text: &'static str) -> SessionEvent {
    SessionEvent::Port(PortEvent::BytesReceived(Bytes::from_static(text.as_bytes())))
}

#[tokio::test]
async fn full_session_streams_samples_until_quit() {
    let mut link = MockLink::new();
    link.expect_open().times(1).returning(|| Ok(()));
    link.expect_set_baud_rate()
        .withf(|rate| *rate == 9600)
        .times(1)
        .returning(|_| Ok(()));
    link.expect_send()
        .withf(|data: &[u8]| data == b"led on\r\n".as_slice())
        .times(1)
        .returning(|data| Ok(data.len()));
    link.expect_close().times(1).returning(|| Ok(()));

    let requested = Arc::new(Mutex::new(Vec::new()));
    let provider = OneShotProvider {
        ports: Ok(ports()),
        link: Some(link),
        requested: requested.clone(),
    };
    let console = MemoryConsole::new();
    let recorder = Arc::new(Recorder::default());

    let mut controller = SessionController::new(Box::new(provider), Box::new(console.clone()));
    controller.register_observer(&recorder);

    let (tx, rx) = event::channel();
    for event in [
        device("0 0 0 5 5 5\n"),
        input("1\n"),
        SessionEvent::Port(PortEvent::Opened),
        input("9600\n"),
        input("led on\r\n"),
        device("-1.22 3.05 0.61 0.5 -0.25 "),
        device("1.0\n"),
        input("Quit\n"),
        device("0 0 0 9 9 9\n"),
    ] {
        tx.send(event).unwrap();
    }

    let code = runtime::run_until(controller, rx, std::future::pending())
        .await
        .unwrap();

    assert_eq!(code, 0);
    assert_eq!(*requested.lock(), vec!["/dev/ttyUSB0"]);
    assert_eq!(*recorder.0.lock(), vec![Sample::new(0.5, -0.25, 1.0)]);

    let lines = console.lines();
    assert_eq!(lines[0], "Available ports:");
    assert_eq!(lines[1], "  [0] /dev/ttyS0");
    assert_eq!(lines[2], "  [1] M5StickC (/dev/ttyUSB0)");
    assert!(lines.contains(&"Enter baud rate:".to_string()));
    assert!(lines.iter().any(|l| l.starts_with("Baud rate set to 9600")));
}

#[tokio::test]
async fn no_ports_exits_successfully() {
    let provider = OneShotProvider {
        ports: Ok(Vec::new()),
        link: None,
        requested: Arc::default(),
    };
    let console = MemoryConsole::new();
    let controller = SessionController::new(Box::new(provider), Box::new(console.clone()));
    let (_tx, rx) = event::channel();

    let code = runtime::run_until(controller, rx, std::future::pending())
        .await
        .unwrap();

    assert_eq!(code, 0);
    assert_eq!(console.lines(), vec!["No serial ports found."]);
}

#[tokio::test]
async fn enumeration_failure_is_returned() {
    let provider = OneShotProvider {
        ports: Err("permission denied on /dev".into()),
        link: None,
        requested: Arc::default(),
    };
    let controller = SessionController::new(Box::new(provider), Box::new(MemoryConsole::new()));
    let (_tx, rx) = event::channel();

    let err = runtime::run_until(controller, rx, std::future::pending())
        .await
        .unwrap_err();

    assert!(matches!(err, TransportError::Enumeration(_)));
}

#[tokio::test]
async fn shutdown_signal_closes_port() {
    let (opened_tx, opened_rx) = tokio::sync::oneshot::channel::<()>();
    let opened_tx = Mutex::new(Some(opened_tx));

    let mut link = MockLink::new();
    link.expect_open().times(1).returning(move || {
        if let Some(tx) = opened_tx.lock().take() {
            let _ = tx.send(());
        }
        Ok(())
    });
    link.expect_close().times(1).returning(|| Ok(()));

    let provider = OneShotProvider {
        ports: Ok(ports()),
        link: Some(link),
        requested: Arc::default(),
    };
    let controller = SessionController::new(Box::new(provider), Box::new(MemoryConsole::new()));

    let (tx, rx) = event::channel();
    tx.send(input("0\n")).unwrap();

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let session = tokio::spawn(runtime::run_until(controller, rx, async move {
        let _ = stop_rx.await;
    }));

    opened_rx.await.unwrap();
    stop_tx.send(()).unwrap();

    let code = session.await.unwrap().unwrap();
    assert_eq!(code, 0);
}

#[tokio::test]
async fn closed_queue_ends_session() {
    let provider = OneShotProvider {
        ports: Ok(ports()),
        link: None,
        requested: Arc::default(),
    };
    let console = MemoryConsole::new();
    let controller = SessionController::new(Box::new(provider), Box::new(console.clone()));

    let (tx, rx) = event::channel();
    tx.send(input("abc\n")).unwrap();
    tx.send(SessionEvent::OperatorClosed).unwrap();
    drop(tx);

    let code = runtime::run_until(controller, rx, std::future::pending())
        .await
        .unwrap();

    assert_eq!(code, 0);
    assert!(console
        .lines()
        .contains(&"Invalid selection, enter a port number:".to_string()));
}

#[test]
fn state_is_exposed_for_inspection() {
    let provider = OneShotProvider {
        ports: Ok(ports()),
        link: None,
        requested: Arc::default(),
    };
    let mut controller = SessionController::new(Box::new(provider), Box::new(MemoryConsole::new()));
    assert_eq!(controller.state(), &ApplicationState::Initialization);

    controller.start().unwrap();
    let ApplicationState::AwaitingPortSelection { candidates } = controller.state() else {
        panic!("expected port selection");
    };
    assert_eq!(candidates, &ports());
}
