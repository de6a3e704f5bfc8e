//! User-facing output sink
//!
//! Console messages (new connections, received messages, listings) are kept
//! apart from diagnostic logging, which goes through `tracing` to stderr.

use std::io::Write;
use std::sync::Mutex;

/// Destination for messages shown to the user
pub trait Output: Send + Sync {
    /// Regular output
    fn out(&self, message: &str);

    /// Error output
    fn out_err(&self, message: &str);
}

/// Writes to the process stdout / stderr
#[derive(Debug, Default)]
pub struct StdOutput;

impl Output for StdOutput {
    fn out(&self, message: &str) {
        let mut stdout = std::io::stdout().lock();
        let _ = stdout.write_all(message.as_bytes());
        let _ = stdout.flush();
    }

    fn out_err(&self, message: &str) {
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(message.as_bytes());
        let _ = stderr.flush();
    }
}

/// Which stream a buffered message was written to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Out,
    Err,
}

/// Records every message in memory; used by tests and embedders
#[derive(Debug, Default)]
pub struct BufferedOutput {
    entries: Mutex<Vec<(Stream, String)>>,
}

impl BufferedOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded messages in write order
    pub fn entries(&self) -> Vec<(Stream, String)> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    /// Concatenated text written to the given stream
    pub fn text(&self, stream: Stream) -> String {
        self.entries()
            .into_iter()
            .filter(|(s, _)| *s == stream)
            .map(|(_, message)| message)
            .collect()
    }

    /// Whether any message on either stream contains `needle`
    pub fn contains(&self, needle: &str) -> bool {
        self.entries()
            .iter()
            .any(|(_, message)| message.contains(needle))
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }

    fn push(&self, stream: Stream, message: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push((stream, message.to_string()));
        }
    }
}

impl Output for BufferedOutput {
    fn out(&self, message: &str) {
        self.push(Stream::Out, message);
    }

    fn out_err(&self, message: &str) {
        self.push(Stream::Err, message);
    }
}
