//! Process execution seam shared by every remote operation.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::io::{self, Read, Write};
use std::process::{Command, Stdio};
use std::thread;

use tracing::debug;

use super::RemoteError;

/// Mapping of relative file path to lowercase hex SHA-256 digest.
pub type ChecksumMap = BTreeMap<String, String>;

/// Result of running an external command with captured output.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code reported by the process, if available.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns `true` when the exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }
}

/// Result of a command whose stdout was streamed to a writer.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StreamedOutput {
    /// Exit code reported by the process, if available.
    pub code: Option<i32>,
    /// Captured standard error.
    pub stderr: String,
}

impl StreamedOutput {
    /// Returns `true` when the exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }
}

/// Byte streams attached to a streamed command.
pub struct StreamIo<'a> {
    /// Optional source piped into the process's stdin.
    pub stdin: Option<&'a mut (dyn Read + Send)>,
    /// Destination receiving everything the process writes to stdout.
    pub stdout: &'a mut (dyn Write + Send),
}

/// Abstraction over command execution to support fakes in tests.
pub trait CommandRunner: Send + Sync {
    /// Runs `program` with the given arguments, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Spawn`] if the command cannot be started.
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, RemoteError> {
        self.run_with_env(program, args, &[])
    }

    /// Runs `program` with extra environment variables set on the child.
    ///
    /// Secrets travel this way so they never appear in the process table.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Spawn`] if the command cannot be started.
    fn run_with_env(
        &self,
        program: &str,
        args: &[OsString],
        env: &[(String, String)],
    ) -> Result<CommandOutput, RemoteError>;

    /// Runs `program` while streaming stdin from and stdout to the given
    /// endpoints. Stderr is captured.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Spawn`] if the command cannot be started, or
    /// [`RemoteError::Stream`] when copying either stream fails.
    fn run_streaming(
        &self,
        program: &str,
        args: &[OsString],
        io: StreamIo<'_>,
    ) -> Result<StreamedOutput, RemoteError>;
}

/// Real command runner that shells out to the host operating system.
#[derive(Clone, Debug, Default)]
pub struct ProcessCommandRunner;

impl CommandRunner for ProcessCommandRunner {
    fn run_with_env(
        &self,
        program: &str,
        args: &[OsString],
        env: &[(String, String)],
    ) -> Result<CommandOutput, RemoteError> {
        let output = Command::new(program)
            .args(args)
            .envs(env.iter().map(|(key, value)| (key, value)))
            .output()
            .map_err(|err| spawn_error(program, &err))?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn run_streaming(
        &self,
        program: &str,
        args: &[OsString],
        io: StreamIo<'_>,
    ) -> Result<StreamedOutput, RemoteError> {
        let stdin_mode = if io.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        };
        let mut child = Command::new(program)
            .args(args)
            .stdin(stdin_mode)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| spawn_error(program, &err))?;

        let child_stdin = child.stdin.take();
        let mut child_stdout = child
            .stdout
            .take()
            .ok_or_else(|| stream_error(program, "stdout pipe unavailable"))?;
        let mut child_stderr = child
            .stderr
            .take()
            .ok_or_else(|| stream_error(program, "stderr pipe unavailable"))?;
        let StreamIo { stdin, stdout } = io;

        let (copied, fed, captured) = thread::scope(|scope| {
            let stderr_task = scope.spawn(move || {
                let mut buffer = String::new();
                child_stderr.read_to_string(&mut buffer).map(|_| buffer)
            });
            let stdin_task = match (stdin, child_stdin) {
                (Some(reader), Some(mut pipe)) => Some(scope.spawn(move || {
                    let result = io::copy(reader, &mut pipe);
                    drop(pipe);
                    result
                })),
                _ => None,
            };
            let copied = io::copy(&mut child_stdout, stdout).and_then(|n| stdout.flush().map(|()| n));
            drop(child_stdout);
            if copied.is_err() {
                // nothing drains stdout any more; the child would block on a full pipe
                if let Err(err) = child.kill() {
                    debug!(%program, %err, "failed to stop process after local write error");
                }
            }
            let fed = stdin_task.map(|task| task.join());
            let captured = stderr_task.join();
            (copied, fed, captured)
        });

        let status = child.wait().map_err(|err| stream_error(program, &err.to_string()))?;
        let stderr = match captured {
            Ok(Ok(text)) => text,
            Ok(Err(err)) => return Err(stream_error(program, &err.to_string())),
            Err(_) => return Err(stream_error(program, "stderr reader panicked")),
        };
        let output = StreamedOutput {
            code: status.code(),
            stderr,
        };

        // A process that exits early closes its stdin; the resulting broken
        // pipe is reported through the exit status instead.
        if output.is_success() {
            match fed {
                Some(Ok(Err(err))) => return Err(stream_error(program, &err.to_string())),
                Some(Err(_)) => return Err(stream_error(program, "stdin writer panicked")),
                _ => {}
            }
        }
        copied.map_err(|err| stream_error(program, &err.to_string()))?;

        Ok(output)
    }
}

fn spawn_error(program: &str, err: &io::Error) -> RemoteError {
    RemoteError::Spawn {
        program: program.to_owned(),
        message: err.to_string(),
    }
}

fn stream_error(program: &str, message: &str) -> RemoteError {
    RemoteError::Stream {
        host: String::from("localhost"),
        operation: program.to_owned(),
        message: message.to_owned(),
    }
}

/// Size of a remote directory tree.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DirectorySize {
    /// Size in bytes as reported by `du`.
    pub bytes: u64,
    /// Human readable rendering such as `1.5M`.
    pub human: String,
}

impl DirectorySize {
    /// Builds a size record, rendering the human readable form.
    #[must_use]
    pub fn from_bytes(bytes: u64) -> Self {
        Self {
            bytes,
            human: human_size(bytes),
        }
    }
}

/// Renders a byte count the way `du -h` does: one decimal, binary units.
#[must_use]
pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "K", "M", "G", "T"];
    if bytes < 1024 {
        return format!("{bytes}B");
    }
    let mut unit = 0;
    let mut tenths = u128::from(bytes).saturating_mul(10);
    while tenths >= 10 * 1024 && unit + 1 < UNITS.len() {
        tenths >>= 10;
        unit += 1;
    }
    let suffix = UNITS.get(unit).copied().unwrap_or("T");
    format!("{}.{}{suffix}", tenths.div_euclid(10), tenths.rem_euclid(10))
}
