//! Byte counting and percentage logging for artifact transfers.

use std::io::{self, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::info;

/// Minimum gap, in percentage points, between two progress lines.
pub const PROGRESS_STEP: u64 = 5;

/// Shared total of bytes written through a [`CountingWriter`].
#[derive(Clone, Debug, Default)]
pub struct ByteCounter(Arc<Mutex<u64>>);

impl ByteCounter {
    /// Creates a counter at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes counted so far.
    #[must_use]
    pub fn total(&self) -> u64 {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn add(&self, bytes: u64) {
        let mut total = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        *total = total.saturating_add(bytes);
    }
}

/// Writer that records how many bytes pass through it.
#[derive(Debug)]
pub struct CountingWriter<W> {
    inner: W,
    counter: ByteCounter,
}

impl<W: Write> CountingWriter<W> {
    /// Wraps `inner`, adding to `counter`.
    pub const fn new(inner: W, counter: ByteCounter) -> Self {
        Self { inner, counter }
    }

    /// Unwraps the inner writer.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.counter.add(written as u64);
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Decides which completion percentages are worth logging.
///
/// Emitted values strictly increase, are at least [`PROGRESS_STEP`] apart
/// (except a final 100) and never exceed 100.
#[derive(Debug)]
pub struct ProgressTracker {
    expected: u64,
    seen: AtomicU64,
    last: Option<u64>,
}

impl ProgressTracker {
    /// Tracks progress towards `expected` bytes.
    #[must_use]
    pub const fn new(expected: u64) -> Self {
        Self {
            expected,
            seen: AtomicU64::new(0),
            last: None,
        }
    }

    /// Records `bytes` more and returns the percentage to log, if any.
    pub fn advance(&mut self, bytes: u64) -> Option<u64> {
        let seen = self.seen.fetch_add(bytes, Ordering::Relaxed).saturating_add(bytes);
        let percent = self.percent(seen);
        let due = match self.last {
            Some(100) => false,
            Some(last) => percent >= last + PROGRESS_STEP || percent == 100,
            None => percent >= PROGRESS_STEP,
        };
        if due {
            self.last = Some(percent);
            Some(percent)
        } else {
            None
        }
    }

    /// Returns 100 unless it has already been emitted.
    pub fn complete(&mut self) -> Option<u64> {
        if self.last == Some(100) {
            return None;
        }
        self.last = Some(100);
        Some(100)
    }

    fn percent(&self, seen: u64) -> u64 {
        let ratio = (u128::from(seen) * 100)
            .checked_div(u128::from(self.expected))
            .unwrap_or(100);
        u64::try_from(ratio.min(100)).unwrap_or(100)
    }
}

/// Writer that logs transfer progress for one artifact.
#[derive(Debug)]
pub struct ProgressWriter<W> {
    inner: W,
    tracker: ProgressTracker,
    label: String,
}

impl<W: Write> ProgressWriter<W> {
    /// Wraps `inner`, expecting `expected` bytes for `label`.
    pub fn new(inner: W, expected: u64, label: impl Into<String>) -> Self {
        Self {
            inner,
            tracker: ProgressTracker::new(expected),
            label: label.into(),
        }
    }

    /// Flushes and logs 100% if the stream ended short of the estimate.
    ///
    /// # Errors
    ///
    /// Returns the flush error.
    pub fn finish(mut self) -> io::Result<W> {
        self.inner.flush()?;
        if let Some(percent) = self.tracker.complete() {
            self.log(percent);
        }
        Ok(self.inner)
    }

    fn log(&self, percent: u64) {
        info!(artifact = %self.label, "Copying backup -- {percent}% complete");
    }
}

impl<W: Write> Write for ProgressWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        if let Some(percent) = self.tracker.advance(written as u64) {
            self.log(percent);
        }
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
