//! Process-wide stdout/stderr sinks that can be paused while the interrupt
//! prompt owns the terminal, and the tracing subscriber writing through
//! them.

use std::io::{self, Write};
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

use thiserror::Error;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::MakeWriter;

/// Errors raised while installing the log subscriber.
#[derive(Debug, Error)]
pub enum OutputError {
    /// A global subscriber was already installed, or the filter was invalid.
    #[error("failed to initialise logging: {0}")]
    Subscriber(String),
}

struct PauseState {
    inner: Box<dyn Write + Send>,
    paused: bool,
    buffer: Vec<u8>,
}

/// Writer that buffers while paused and flushes the backlog on resume.
pub struct PausableWriter {
    state: Mutex<PauseState>,
}

impl PausableWriter {
    /// Wraps `inner`, initially unpaused.
    #[must_use]
    pub fn new(inner: Box<dyn Write + Send>) -> Self {
        Self {
            state: Mutex::new(PauseState {
                inner,
                paused: false,
                buffer: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PauseState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Holds further output in memory.
    pub fn pause(&self) {
        self.lock().paused = true;
    }

    /// Writes everything held since [`Self::pause`] and passes output
    /// straight through again.
    ///
    /// # Errors
    ///
    /// Returns the underlying write error; the backlog is dropped.
    pub fn resume(&self) -> io::Result<()> {
        let mut state = self.lock();
        state.paused = false;
        let backlog = std::mem::take(&mut state.buffer);
        state.inner.write_all(&backlog)?;
        state.inner.flush()
    }

    /// Whether output is currently held back.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.lock().paused
    }
}

impl Write for &PausableWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.lock();
        if state.paused {
            state.buffer.extend_from_slice(buf);
            Ok(buf.len())
        } else {
            state.inner.write(buf)
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut state = self.lock();
        if state.paused {
            Ok(())
        } else {
            state.inner.flush()
        }
    }
}

/// The pair of sinks every user-facing line goes through.
pub struct OutputSinks {
    stdout: PausableWriter,
    stderr: PausableWriter,
}

impl OutputSinks {
    /// Builds sinks over arbitrary writers.
    #[must_use]
    pub fn new(stdout: Box<dyn Write + Send>, stderr: Box<dyn Write + Send>) -> Self {
        Self {
            stdout: PausableWriter::new(stdout),
            stderr: PausableWriter::new(stderr),
        }
    }

    /// Sink for log output.
    #[must_use]
    pub const fn stdout(&self) -> &PausableWriter {
        &self.stdout
    }

    /// Sink for error reports.
    #[must_use]
    pub const fn stderr(&self) -> &PausableWriter {
        &self.stderr
    }

    /// Pauses both sinks.
    pub fn pause(&self) {
        self.stdout.pause();
        self.stderr.pause();
    }

    /// Resumes both sinks, flushing their backlogs.
    ///
    /// # Errors
    ///
    /// Returns the first write error.
    pub fn resume(&self) -> io::Result<()> {
        let stdout = self.stdout.resume();
        self.stderr.resume()?;
        stdout
    }
}

static SINKS: OnceLock<OutputSinks> = OnceLock::new();

/// The process-wide sinks over the real stdout and stderr.
pub fn sinks() -> &'static OutputSinks {
    SINKS.get_or_init(|| OutputSinks::new(Box::new(io::stdout()), Box::new(io::stderr())))
}

/// [`MakeWriter`] handing out one of the process-wide sinks.
#[derive(Clone, Copy)]
pub struct LogSink {
    writer: &'static PausableWriter,
}

impl LogSink {
    /// Log sink over the process-wide stdout sink.
    #[must_use]
    pub fn stdout() -> Self {
        Self {
            writer: sinks().stdout(),
        }
    }
}

impl<'a> MakeWriter<'a> for LogSink {
    type Writer = &'a PausableWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.writer
    }
}

/// Default filter directive: `debug` when asked for, `info` otherwise.
#[must_use]
pub const fn default_directive(debug: bool) -> &'static str {
    if debug { "debug" } else { "info" }
}

/// Builds the filter: `RUST_LOG` when set, else [`default_directive`].
#[must_use]
pub fn env_filter(debug: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive(debug)))
}

/// Installs the global subscriber writing through the stdout sink.
///
/// # Errors
///
/// Returns [`OutputError::Subscriber`] if a subscriber is already installed.
pub fn init_logging(debug: bool) -> Result<(), OutputError> {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(debug))
        .with_target(false)
        .with_writer(LogSink::stdout())
        .try_init()
        .map_err(|err| OutputError::Subscriber(err.to_string()))?;
    tracing::debug!("initialised logging");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rstest::rstest;

    use super::*;

    #[derive(Clone, Default)]
    struct Shared(Arc<Mutex<Vec<u8>>>);

    impl Shared {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().expect("buffer").clone()).expect("utf8")
        }
    }

    impl Write for Shared {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().expect("buffer").extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn passes_output_through_when_running() {
        let target = Shared::default();
        let writer = PausableWriter::new(Box::new(target.clone()));
        (&writer).write_all(b"hello\n").expect("write");
        assert_eq!(target.contents(), "hello\n");
    }

    #[test]
    fn holds_output_while_paused_and_flushes_in_order() {
        let target = Shared::default();
        let writer = PausableWriter::new(Box::new(target.clone()));
        (&writer).write_all(b"one\n").expect("write");
        writer.pause();
        (&writer).write_all(b"two\n").expect("write");
        (&writer).write_all(b"three\n").expect("write");
        assert!(writer.is_paused());
        assert_eq!(target.contents(), "one\n");

        writer.resume().expect("resume");
        assert!(!writer.is_paused());
        assert_eq!(target.contents(), "one\ntwo\nthree\n");
    }

    #[test]
    fn sinks_pause_together() {
        let out = Shared::default();
        let err = Shared::default();
        let sinks = OutputSinks::new(Box::new(out.clone()), Box::new(err.clone()));
        sinks.pause();
        (&*sinks.stdout()).write_all(b"log").expect("write");
        (&*sinks.stderr()).write_all(b"error").expect("write");
        assert!(out.contents().is_empty());
        assert!(err.contents().is_empty());

        sinks.resume().expect("resume");
        assert_eq!(out.contents(), "log");
        assert_eq!(err.contents(), "error");
    }

    #[rstest]
    #[case(false, "info")]
    #[case(true, "debug")]
    fn picks_level_from_debug_flag(#[case] debug: bool, #[case] expected: &str) {
        assert_eq!(default_directive(debug), expected);
    }
}
