//! Session event loop
//!
//! Two producers feed one queue: a blocking reader on the operator's input
//! stream and the serial reader thread. A single task drains the queue into
//! the [`SessionController`], so the controller never sees two events at
//! once.

use super::controller::{Flow, SessionController};
use super::event::{EventReceiver, EventSender, SessionEvent};
use super::transport::TransportError;
use crate::cli::ExitCodes;
use bytes::Bytes;
use std::future::Future;
use std::io::BufRead;
use std::thread::JoinHandle;
use tracing::Instrument;

/// Read operator lines on a dedicated thread and queue them.
///
/// Each line is queued with its terminator so it can be forwarded to the
/// device unchanged. End of input queues [`SessionEvent::OperatorClosed`].
pub fn spawn_operator_reader<R>(mut reader: R, events: EventSender) -> std::io::Result<JoinHandle<()>>
where
    R: BufRead + Send + 'static,
{
    std::thread::Builder::new()
        .name("operator-input".into())
        .spawn(move || {
            let mut line = Vec::with_capacity(256);
            loop {
                line.clear();
                let event = match reader.read_until(b'\n', &mut line) {
                    Ok(0) => SessionEvent::OperatorClosed,
                    Ok(_) => SessionEvent::OperatorInput(Bytes::copy_from_slice(&line)),
                    Err(e) => {
                        tracing::warn!(error = %e, "Operator input failed");
                        SessionEvent::OperatorClosed
                    }
                };

                let closed = event == SessionEvent::OperatorClosed;
                if events.send(event).is_err() || closed {
                    break;
                }
            }
        })
}

/// Queue standard input
pub fn spawn_stdin_reader(events: EventSender) -> std::io::Result<JoinHandle<()>> {
    spawn_operator_reader(std::io::BufReader::new(std::io::stdin()), events)
}

/// Run the session until the operator quits or Ctrl-C is pressed
pub async fn run(controller: SessionController, events: EventReceiver) -> Result<u8, TransportError> {
    run_until(controller, events, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    })
    .await
}

/// Run the session until it exits on its own or `shutdown` completes.
///
/// Returns the process exit code.
pub async fn run_until<F>(
    mut controller: SessionController,
    mut events: EventReceiver,
    shutdown: F,
) -> Result<u8, TransportError>
where
    F: Future<Output = ()>,
{
    let span = tracing::info_span!("session", id = %controller.id());

    async move {
        tracing::info!("Session started");
        match controller.start() {
            Ok(Flow::Continue) => {}
            Ok(Flow::Exit(code)) => return Ok(code),
            Err(e) => return Err(e),
        }

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else {
                        tracing::info!("Event queue closed");
                        controller.terminate();
                        return Ok(ExitCodes::SUCCESS);
                    };
                    if let Flow::Exit(code) = controller.handle_event(event) {
                        return Ok(code);
                    }
                }
                () = &mut shutdown => {
                    tracing::info!("Interrupted");
                    controller.terminate();
                    return Ok(ExitCodes::SUCCESS);
                }
            }
        }
    }
    .instrument(span)
    .await
}
