//! Errors raised by remote operations.

use thiserror::Error;

/// Errors surfaced while running commands on a remote host.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RemoteError {
    /// Raised when a local command cannot be spawned.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Command that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when the SSH client could not reach the host (exit status 255).
    #[error("ssh connection to {host} failed: {stderr}")]
    Transport {
        /// Host label the connection targeted.
        host: String,
        /// Stderr emitted by the SSH client.
        stderr: String,
    },
    /// Raised when a remote helper command exits unsuccessfully.
    #[error("{operation} on {host} exited with status {status_text}: {stderr}")]
    CommandFailure {
        /// Host label the command ran on.
        host: String,
        /// Short description of the attempted operation.
        operation: String,
        /// Exit status as reported by the remote shell.
        status: Option<i32>,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Trimmed stderr captured from the remote command.
        stderr: String,
    },
    /// Raised when an operator script exits unsuccessfully.
    #[error("{label} script on {host} exited with status {status_text}: {stderr}")]
    ScriptFailed {
        /// Host label the script ran on.
        host: String,
        /// Script label, for example `redis-server/backup`.
        label: String,
        /// Exit code reported by the script.
        exit_code: Option<i32>,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Trimmed stderr captured from the script.
        stderr: String,
    },
    /// Raised when copying a byte stream to or from the remote fails.
    #[error("stream error during {operation} on {host}: {message}")]
    Stream {
        /// Host label the stream belonged to.
        host: String,
        /// Operation that was streaming.
        operation: String,
        /// Underlying I/O error text.
        message: String,
    },
    /// Raised when remote output cannot be interpreted.
    #[error("unexpected output from {operation} on {host}: {message}")]
    Parse {
        /// Host label the command ran on.
        host: String,
        /// Operation whose output was malformed.
        operation: String,
        /// Description of the problem.
        message: String,
    },
}

impl RemoteError {
    /// Returns `true` when the failure happened while connecting.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}

pub(crate) fn status_text(code: Option<i32>) -> String {
    code.map_or_else(|| String::from("unknown"), |code| code.to_string())
}
