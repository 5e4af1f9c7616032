//! Diagnostic sinks receive the rendered report of every faulted routine.
//!
//! Several actions may fault at once, so a sink must serialize its own
//! writers. Every sink shipped here does so with a mutex.

use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Destination for fault reports
pub trait DiagnosticSink: Send + Sync {
    /// Write one complete report
    fn write_report(&self, report: &[u8]) -> io::Result<()>;
}

/// Standard error, the default sink
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrSink;

impl DiagnosticSink for StderrSink {
    fn write_report(&self, report: &[u8]) -> io::Result<()> {
        // StderrLock keeps one report from interleaving with another.
        let mut stderr = io::stderr().lock();
        stderr.write_all(report)?;
        stderr.flush()
    }
}

/// Any `Write` behind a mutex
#[derive(Debug)]
pub struct WriterSink<W> {
    writer: Mutex<W>,
}

impl<W: Write + Send> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Recover the wrapped writer
    pub fn into_inner(self) -> W {
        self.writer.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<W: Write + Send> DiagnosticSink for WriterSink<W> {
    fn write_report(&self, report: &[u8]) -> io::Result<()> {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writer.write_all(report)?;
        writer.flush()
    }
}

/// Shared in-memory buffer; clones see the same contents
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn contents(&self) -> Vec<u8> {
        self.lock().clone()
    }

    /// Contents decoded lossily as UTF-8
    pub fn contents_string(&self) -> String {
        String::from_utf8_lossy(&self.lock()).into_owned()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

impl DiagnosticSink for MemorySink {
    fn write_report(&self, report: &[u8]) -> io::Result<()> {
        self.lock().extend_from_slice(report);
        Ok(())
    }
}

impl<S: DiagnosticSink + ?Sized> DiagnosticSink for Arc<S> {
    fn write_report(&self, report: &[u8]) -> io::Result<()> {
        (**self).write_report(report)
    }
}
