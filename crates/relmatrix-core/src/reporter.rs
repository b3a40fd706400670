//! Reporter trait for dependency injection
//!
//! Build jobs and the uploader report recoverable failures through this
//! side-channel instead of returning them. Every implementation must accept
//! calls from many jobs at once.

use std::io::Write;
use std::sync::{Arc, Mutex};

/// Sink for progress and recoverable-failure messages.
pub trait Reporter: Send + Sync {
    /// Log an informational message.
    fn info(&self, msg: &str);

    /// Log a success message.
    fn success(&self, msg: &str);

    /// Report a degraded but non-fatal condition (e.g. a missing compressor).
    fn warning(&self, msg: &str);

    /// Report a recoverable failure of one job or upload.
    fn error(&self, msg: &str);
}

impl<T: Reporter + ?Sized> Reporter for Arc<T> {
    fn info(&self, msg: &str) {
        (**self).info(msg);
    }
    fn success(&self, msg: &str) {
        (**self).success(msg);
    }
    fn warning(&self, msg: &str) {
        (**self).warning(msg);
    }
    fn error(&self, msg: &str) {
        (**self).error(msg);
    }
}

/// A no-op reporter for silent operations (e.g., verification, testing).
#[derive(Debug, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn info(&self, _: &str) {}
    fn success(&self, _: &str) {}
    fn warning(&self, _: &str) {}
    fn error(&self, _: &str) {}
}

/// Writes warnings and errors to `W`, one whole message per lock.
///
/// Informational messages go to `tracing` instead, so the writer only ever
/// carries diagnostics.
#[derive(Debug)]
pub struct WriterReporter<W: Write + Send> {
    out: Mutex<W>,
}

/// Diagnostics on the process's standard error.
pub type StderrReporter = WriterReporter<std::io::Stderr>;

impl<W: Write + Send> WriterReporter<W> {
    /// Wrap a writer.
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    /// Recover the underlying writer.
    pub fn into_inner(self) -> W {
        match self.out.into_inner() {
            Ok(w) => w,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_line(&self, msg: &str) {
        let mut out = match self.out.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        // Diagnostics are best-effort; a closed stderr must not take a job down.
        let _ = writeln!(out, "{msg}");
        let _ = out.flush();
    }
}

impl StderrReporter {
    /// Reporter writing to standard error.
    pub fn stderr() -> Self {
        Self::new(std::io::stderr())
    }
}

impl<W: Write + Send> Reporter for WriterReporter<W> {
    fn info(&self, msg: &str) {
        tracing::info!("{msg}");
    }
    fn success(&self, msg: &str) {
        tracing::info!("{msg}");
    }
    fn warning(&self, msg: &str) {
        self.write_line(msg);
    }
    fn error(&self, msg: &str) {
        self.write_line(msg);
    }
}

#[cfg(any(test, feature = "test-util"))]
/// Severity of a captured [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    /// [`Reporter::info`]
    Info,
    /// [`Reporter::success`]
    Success,
    /// [`Reporter::warning`]
    Warning,
    /// [`Reporter::error`]
    Error,
}

#[cfg(any(test, feature = "test-util"))]
/// One message captured by [`MemoryReporter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Severity.
    pub level: Level,
    /// Message text, without a trailing newline.
    pub message: String,
}

#[cfg(any(test, feature = "test-util"))]
/// Captures every reported message in memory. Used by tests.
#[derive(Debug, Default)]
pub struct MemoryReporter {
    events: Mutex<Vec<Event>>,
}

#[cfg(any(test, feature = "test-util"))]
impl MemoryReporter {
    /// An empty reporter.
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, level: Level, msg: &str) {
        let mut events = match self.events.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        events.push(Event {
            level,
            message: msg.to_string(),
        });
    }

    /// All captured events in the order they were reported.
    pub fn events(&self) -> Vec<Event> {
        match self.events.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Warnings and errors rendered the way [`WriterReporter`] would write them.
    pub fn diagnostics(&self) -> String {
        self.events()
            .into_iter()
            .filter(|e| matches!(e.level, Level::Warning | Level::Error))
            .fold(String::new(), |mut acc, e| {
                acc.push_str(&e.message);
                acc.push('\n');
                acc
            })
    }
}

#[cfg(any(test, feature = "test-util"))]
impl Reporter for MemoryReporter {
    fn info(&self, msg: &str) {
        self.push(Level::Info, msg);
    }
    fn success(&self, msg: &str) {
        self.push(Level::Success, msg);
    }
    fn warning(&self, msg: &str) {
        self.push(Level::Warning, msg);
    }
    fn error(&self, msg: &str) {
        self.push(Level::Error, msg);
    }
}
