//! Ctrl-C handling: ask before abandoning a running workflow.
//!
//! The workflow runs on the blocking pool while the async side waits for
//! either its result or an interrupt. Log output is paused while the prompt
//! owns the terminal.

use std::future::Future;
use std::io::{self, BufRead, Write};

use thiserror::Error;
use tokio::task::JoinError;

use crate::output::sinks;

/// Question asked on Ctrl-C.
pub const PROMPT: &str =
    "Stopping a backup can leave the system in bad state. Are you sure you want to cancel? [yes/no]";

/// Errors raised while supervising a workflow.
#[derive(Debug, Error)]
pub enum InterruptError {
    /// The workflow thread panicked or was cancelled.
    #[error("workflow task failed: {0}")]
    Join(#[from] JoinError),
    /// Waiting for the signal or talking to the terminal failed.
    #[error("interrupt handling failed: {0}")]
    Io(#[from] io::Error),
}

/// How a supervised workflow ended.
#[derive(Debug, Eq, PartialEq)]
pub enum Supervised<T> {
    /// The workflow ran to completion.
    Completed(T),
    /// The user confirmed cancellation; the workflow was abandoned.
    Aborted,
}

/// Writes `prompt` and reads one answer. Only `yes` confirms.
///
/// # Errors
///
/// Returns any I/O error from the terminal.
pub fn confirm_abort<R, W>(input: &mut R, output: &mut W, prompt: &str) -> io::Result<bool>
where
    R: BufRead + ?Sized,
    W: Write + ?Sized,
{
    writeln!(output, "{prompt}")?;
    output.flush()?;
    let mut answer = String::new();
    input.read_line(&mut answer)?;
    Ok(answer.trim() == "yes")
}

/// Asks on the real terminal, bypassing the paused sinks.
///
/// # Errors
///
/// Returns any I/O error from the terminal.
pub fn confirm_on_terminal() -> io::Result<bool> {
    let stdin = io::stdin();
    let mut stderr = io::stderr();
    confirm_abort(&mut stdin.lock(), &mut stderr, PROMPT)
}

/// Runs `work` on the blocking pool until it finishes or an interrupt is
/// confirmed.
///
/// `signals` yields one future per interrupt to wait for. On each interrupt
/// the output sinks are paused and `confirm` is asked; a refusal resumes
/// output and keeps waiting.
///
/// # Errors
///
/// Returns [`InterruptError`] when the workflow task fails or the terminal
/// cannot be used.
pub async fn supervise<T, W, S, Fut, C>(
    work: W,
    mut signals: S,
    mut confirm: C,
) -> Result<Supervised<T>, InterruptError>
where
    T: Send + 'static,
    W: FnOnce() -> T + Send + 'static,
    S: FnMut() -> Fut,
    Fut: Future<Output = io::Result<()>>,
    C: FnMut() -> io::Result<bool>,
{
    let mut handle = tokio::task::spawn_blocking(work);
    loop {
        tokio::select! {
            biased;
            joined = &mut handle => return Ok(Supervised::Completed(joined?)),
            signal = signals() => {
                signal?;
                let output = sinks();
                output.pause();
                let confirmed = confirm();
                output.resume()?;
                if confirmed? {
                    return Ok(Supervised::Aborted);
                }
            }
        }
    }
}
