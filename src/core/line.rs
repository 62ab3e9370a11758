//! Reassembly of newline-delimited device lines
//!
//! The device writes text lines at its own cadence and the port hands them
//! over in arbitrary chunks. [`LineAssembler`] keeps the unfinished tail
//! between calls and returns whatever lines the latest chunk completed.

use serde::{Deserialize, Serialize};

/// Which completed lines an ingest call returns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SplitPolicy {
    /// Every completed line, oldest first
    #[default]
    Fifo,
    /// Only the newest completed line; earlier lines of the same chunk are
    /// discarded. Matches older firmware viewers that only tracked the
    /// latest reading.
    LatestOnly,
}

/// Line reassembly buffer
#[derive(Debug, Default)]
pub struct LineAssembler {
    buffer: String,
    policy: SplitPolicy,
    rejected: u64,
}

impl LineAssembler {
    /// Create an assembler using FIFO splitting
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an assembler with an explicit policy
    pub fn with_policy(policy: SplitPolicy) -> Self {
        Self {
            buffer: String::new(),
            policy,
            rejected: 0,
        }
    }

    /// Active split policy
    pub fn policy(&self) -> SplitPolicy {
        self.policy
    }

    /// Text received after the last newline
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    /// Chunks dropped because they were not valid UTF-8
    pub fn rejected_chunks(&self) -> u64 {
        self.rejected
    }

    /// Drop any buffered partial line
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Feed a chunk of raw bytes and collect the lines it completes.
    ///
    /// A chunk that is not valid UTF-8 is dropped as a whole and yields
    /// nothing; bytes of a code point split across chunks are not rejoined.
    pub fn ingest(&mut self, data: &[u8]) -> Vec<String> {
        let Ok(text) = std::str::from_utf8(data) else {
            self.rejected += 1;
            tracing::debug!(len = data.len(), "Dropping chunk that is not valid UTF-8");
            return Vec::new();
        };
        self.push_str(text)
    }

    /// Feed already decoded text
    pub fn push_str(&mut self, text: &str) -> Vec<String> {
        self.buffer.push_str(text);

        match self.policy {
            SplitPolicy::Fifo => self.split_fifo(),
            SplitPolicy::LatestOnly => self.split_latest().into_iter().collect(),
        }
    }

    fn split_fifo(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        let mut start = 0;

        while let Some(pos) = self.buffer[start..].find('\n') {
            lines.push(self.buffer[start..start + pos].to_string());
            start += pos + 1;
        }

        self.buffer.drain(..start);
        lines
    }

    fn split_latest(&mut self) -> Option<String> {
        let last = self.buffer.rfind('\n')?;
        let line_start = self.buffer[..last].rfind('\n').map_or(0, |p| p + 1);
        let line = self.buffer[line_start..last].to_string();

        self.buffer.drain(..=last);
        Some(line)
    }
}
