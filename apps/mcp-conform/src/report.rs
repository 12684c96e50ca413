//! Human-readable narration of a run, written to stderr by default.

use std::fmt;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use crate::scenario::ScenarioReport;
use crate::variant::Variant;

const MAX_NARRATED_LINE: usize = 400;

pub struct Narrator {
    sink: Box<dyn Write + Send>,
}

impl Narrator {
    pub fn new(sink: impl Write + Send + 'static) -> Self {
        Self {
            sink: Box::new(sink),
        }
    }

    pub fn stderr() -> Self {
        Self::new(io::stderr())
    }

    /// A narrator whose output can be inspected afterwards.
    pub fn buffered() -> (Self, NarrationBuffer) {
        let buffer = NarrationBuffer::default();
        (Self::new(buffer.clone()), buffer)
    }

    pub fn banner(&mut self, target: &Path, variant: Variant) {
        self.emit(format_args!("=== mcp-conform: {} ===", target.display()));
        self.emit(format_args!("variant: {variant}"));
    }

    pub fn step(&mut self, number: u8, title: &str) {
        self.emit(format_args!("[STEP {number}] {title}"));
    }

    pub fn pass(&mut self, text: impl fmt::Display) {
        self.emit(format_args!("  ✓ {text}"));
    }

    pub fn note(&mut self, text: impl fmt::Display) {
        self.emit(format_args!("  {text}"));
    }

    pub fn warn(&mut self, text: impl fmt::Display) {
        self.emit(format_args!("  ⚠ {text}"));
    }

    pub fn fail(&mut self, text: impl fmt::Display) {
        self.emit(format_args!("  ✗ {text}"));
    }

    pub fn sent(&mut self, line: &str) {
        self.emit(format_args!("  → Sending: {}", clip(line)));
    }

    pub fn received(&mut self, line: &str) {
        self.emit(format_args!("  ← Received: {}", clip(line)));
    }

    pub fn exchange(&mut self, sent: Option<&str>, received: Option<&str>) {
        if let Some(line) = sent {
            self.sent(line);
        }
        if let Some(line) = received {
            self.received(line);
        }
    }

    /// Indented block of captured lines, skipped when there is nothing to show.
    pub fn context<'a>(&mut self, label: &str, lines: impl IntoIterator<Item = &'a str>) {
        let mut lines = lines.into_iter().peekable();
        if lines.peek().is_none() {
            return;
        }
        self.emit(format_args!("  {label}:"));
        for line in lines {
            self.emit(format_args!("    | {}", clip(line)));
        }
    }

    pub fn summary(&mut self, report: &ScenarioReport) {
        self.emit(format_args!(
            "=== PASS: {} candidate `{}` ({} steps) ===",
            report.variant,
            report.server.describe(),
            report.steps.len()
        ));
    }

    fn emit(&mut self, line: fmt::Arguments<'_>) {
        let result = writeln!(self.sink, "{line}").and_then(|()| self.sink.flush());
        if let Err(err) = result {
            warn!(error = %err, "failed to write narration");
        }
    }
}

fn clip(line: &str) -> String {
    if line.chars().count() <= MAX_NARRATED_LINE {
        return line.to_string();
    }
    let mut clipped: String = line.chars().take(MAX_NARRATED_LINE).collect();
    clipped.push_str(" …");
    clipped
}

/// In-memory narration sink shared with the [`Narrator`] that writes to it.
#[derive(Debug, Clone, Default)]
pub struct NarrationBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl NarrationBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.bytes.lock()).into_owned()
    }
}

impl Write for NarrationBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bytes.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
