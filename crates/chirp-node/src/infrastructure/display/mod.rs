//! Display implementations of [`DisplaySink`].
//!
//! - [`ConsoleDisplay`] writes chat lines and status updates to stdout.
//! - [`MockDisplay`] records them for tests.

use std::io::Write;
use std::sync::Mutex;

use crate::application::chat::DisplaySink;

/// Writes to stdout.  Status lines are prefixed so they stand apart from chat.
#[derive(Debug, Default)]
pub struct ConsoleDisplay {
    prefix: Option<String>,
}

impl ConsoleDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tags every line, used when several simulated nodes share a terminal.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
        }
    }

    fn write(&self, text: &str) {
        let mut out = std::io::stdout().lock();
        let result = match &self.prefix {
            Some(p) => writeln!(out, "[{p}] {text}"),
            None => writeln!(out, "{text}"),
        };
        if let Err(e) = result {
            tracing::debug!("stdout write failed: {e}");
        }
    }
}

impl DisplaySink for ConsoleDisplay {
    fn show_line(&self, line: &str) {
        self.write(line);
    }

    fn show_status(&self, status: &str) {
        self.write(&format!("-- {status}"));
    }
}

/// Records every line and status in order.
#[derive(Debug, Default)]
pub struct MockDisplay {
    pub lines: Mutex<Vec<String>>,
    pub statuses: Mutex<Vec<String>>,
}

impl MockDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }

    pub fn statuses(&self) -> Vec<String> {
        self.statuses.lock().unwrap().clone()
    }
}

impl DisplaySink for MockDisplay {
    fn show_line(&self, line: &str) {
        self.lines.lock().unwrap().push(line.to_string());
    }

    fn show_status(&self, status: &str) {
        self.statuses.lock().unwrap().push(status.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_display_keeps_lines_and_statuses_apart() {
        let display = MockDisplay::new();

        display.show_line("bob: hi");
        display.show_status("node-b joined");

        assert_eq!(display.lines(), vec!["bob: hi".to_string()]);
        assert_eq!(display.statuses(), vec!["node-b joined".to_string()]);
    }
}
