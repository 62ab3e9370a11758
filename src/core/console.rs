//! Operator-facing text output

use parking_lot::Mutex;
use std::io::Write;
use std::sync::Arc;

/// Sink for prompts, confirmations and errors shown to the operator
pub trait Console: Send {
    /// Write one line
    fn line(&mut self, text: &str);
}

/// Console writing to standard output
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutConsole;

impl Console for StdoutConsole {
    fn line(&mut self, text: &str) {
        let mut stdout = std::io::stdout().lock();
        if writeln!(stdout, "{text}").and_then(|()| stdout.flush()).is_err() {
            tracing::debug!("stdout closed, dropping console line");
        }
    }
}

/// Console that keeps every line in memory
///
/// Clones share the same buffer, so one copy can be handed to the
/// controller while another is inspected.
#[derive(Debug, Default, Clone)]
pub struct MemoryConsole {
    lines: Arc<Mutex<Vec<String>>>,
}

impl MemoryConsole {
    /// Create an empty console
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all lines written so far
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    /// Last line written
    pub fn last(&self) -> Option<String> {
        self.lines.lock().last().cloned()
    }

    /// Forget everything written so far
    pub fn clear(&self) {
        self.lines.lock().clear();
    }
}

impl Console for MemoryConsole {
    fn line(&mut self, text: &str) {
        self.lines.lock().push(text.to_string());
    }
}
