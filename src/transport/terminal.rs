//! Plain-text transport for terminals

use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;

use super::Transport;
use crate::domain::{ChatContext, ProgressEvent, ProgressKind};
use crate::error::{BridgeError, Result};

/// Writes one line per event. Ticks are skipped unless `show_ticks` is set.
pub struct TerminalTransport<W: Write + Send = std::io::Stdout> {
    out: Mutex<W>,
    show_ticks: bool,
}

impl TerminalTransport {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> TerminalTransport<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
            show_ticks: false,
        }
    }

    pub fn with_ticks(mut self, show: bool) -> Self {
        self.show_ticks = show;
        self
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(|e| e.into_inner())
    }

    fn write_line(&self, line: &str) -> Result<()> {
        let mut out = self.out.lock().unwrap_or_else(|e| e.into_inner());
        writeln!(out, "{}", line)
            .and_then(|_| out.flush())
            .map_err(|e| BridgeError::io("<terminal>", e))
    }
}

/// Terminal rendering of an event
pub fn render(event: &ProgressEvent) -> String {
    match &event.kind {
        ProgressKind::Result(result) => {
            let mut text = format!("[#{}] {}", event.run_id, result.state);
            if let Some(answer) = &result.answer {
                text.push('\n');
                text.push_str(answer);
            }
            if let Some(token) = &result.resume_token {
                text.push_str(&format!("\nresume: {}", token));
            }
            text
        }
        kind => format!("[#{} {}] {}", event.run_id, event.seq, kind.summary()),
    }
}

#[async_trait]
impl<W: Write + Send> Transport for TerminalTransport<W> {
    async fn deliver(&self, _context: &ChatContext, event: &ProgressEvent) -> Result<()> {
        if matches!(event.kind, ProgressKind::Tick { .. }) && !self.show_ticks {
            return Ok(());
        }
        self.write_line(&render(event))
    }

    async fn send_file(&self, _context: &ChatContext, path: &Path) -> Result<()> {
        self.write_line(&format!("file: {}", path.display()))
    }
}
