//! Shell-level operations on a single VM.
//!
//! Every remote operation is expressed as a command line executed through the
//! system `ssh` client. The [`RemoteRunner`] trait is the contract the rest of
//! the crate depends on; [`SshRemote`] is the production implementation and
//! tests substitute an in-memory fake.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::thread;

use camino::Utf8Path;
use shell_escape::unix::escape;
use tracing::{debug, warn};

mod error;
mod target;
mod types;

pub use error::RemoteError;
pub use target::{JumpboxProxy, ProxyError, SshOptions, SshTarget, expand_tilde};
pub use types::{
    ChecksumMap, CommandOutput, CommandRunner, DirectorySize, ProcessCommandRunner, StreamIo,
    StreamedOutput, human_size,
};

use error::status_text;

/// Exit status the OpenSSH client reserves for its own failures.
const SSH_TRANSPORT_EXIT: i32 = 255;

/// Receives each line a script writes to stdout.
pub type LineSink<'a> = &'a mut (dyn FnMut(&str) + Send);

/// Operations the orchestrator needs from one host.
///
/// Every method blocks the calling thread until the remote process exits.
pub trait RemoteRunner: Send + Sync {
    /// Label used in logs and error messages, for example `redis/0`.
    fn host(&self) -> &str;

    /// Returns whether `path` is an existing directory.
    ///
    /// # Errors
    ///
    /// Fails only on transport errors or an unexpected exit status.
    fn directory_exists(&self, path: &Utf8Path) -> Result<bool, RemoteError>;

    /// Creates `path` and any missing parents.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError`] when the directory cannot be created.
    fn create_directory(&self, path: &Utf8Path) -> Result<(), RemoteError>;

    /// Recursively removes `path`; succeeds if it is already absent.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError`] when removal fails.
    fn remove_directory(&self, path: &Utf8Path) -> Result<(), RemoteError>;

    /// Streams a tar of the contents of `dir` into `writer`.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError`] carrying the remote stderr on a non-zero exit.
    fn archive_and_download(
        &self,
        dir: &Utf8Path,
        writer: &mut (dyn Write + Send),
    ) -> Result<(), RemoteError>;

    /// Extracts the tar yielded by `reader` into `dir`, creating it first.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError`] carrying the remote stderr on a non-zero exit.
    fn extract_and_upload(
        &self,
        reader: &mut (dyn Read + Send),
        dir: &Utf8Path,
    ) -> Result<(), RemoteError>;

    /// Reports the size of `path`.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError`] when `du` fails or prints something unexpected.
    fn size_of(&self, path: &Utf8Path) -> Result<DirectorySize, RemoteError>;

    /// Computes SHA-256 digests of every regular file under `path`.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError`] when hashing fails.
    fn checksum_directory(&self, path: &Utf8Path) -> Result<ChecksumMap, RemoteError>;

    /// Runs one operator script with `env`, forwarding stdout lines to `sink`.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::ScriptFailed`] with the exit code and trimmed
    /// stderr when the script fails.
    fn run_script(
        &self,
        path: &Utf8Path,
        env: &BTreeMap<String, String>,
        label: &str,
        sink: LineSink<'_>,
    ) -> Result<(), RemoteError>;

    /// Lists regular files matching `glob`. No matches is an empty list.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError`] on transport failure.
    fn find_files(&self, glob: &str) -> Result<Vec<String>, RemoteError>;
}

/// [`RemoteRunner`] backed by the system `ssh` client.
#[derive(Clone, Debug)]
pub struct SshRemote<R: CommandRunner> {
    label: String,
    target: SshTarget,
    options: SshOptions,
    runner: R,
}

impl SshRemote<ProcessCommandRunner> {
    /// Convenience constructor that wires the real process runner.
    #[must_use]
    pub fn with_process_runner(
        label: impl Into<String>,
        target: SshTarget,
        options: SshOptions,
    ) -> Self {
        Self::new(label, target, options, ProcessCommandRunner)
    }
}

impl<R: CommandRunner> SshRemote<R> {
    /// Creates a remote bound to `target`.
    #[must_use]
    pub fn new(label: impl Into<String>, target: SshTarget, options: SshOptions, runner: R) -> Self {
        Self {
            label: label.into(),
            target,
            options,
            runner,
        }
    }

    /// Returns the SSH target this remote connects to.
    #[must_use]
    pub const fn target(&self) -> &SshTarget {
        &self.target
    }

    /// Runs an idempotent command, retrying connect-phase failures.
    fn run_idempotent(&self, operation: &str, command: &str) -> Result<CommandOutput, RemoteError> {
        let args = self.options.command_args(&self.target, command);
        let attempts = self.options.connect_attempts.max(1);
        let mut attempt = 1;
        loop {
            debug!(host = %self.label, %operation, %command, attempt, "running remote command");
            let output = self.runner.run(&self.options.ssh_bin, &args)?;
            if output.code != Some(SSH_TRANSPORT_EXIT) {
                return Ok(output);
            }
            if attempt >= attempts {
                return Err(RemoteError::Transport {
                    host: self.label.clone(),
                    stderr: output.stderr.trim().to_owned(),
                });
            }
            warn!(
                host = %self.label,
                %operation,
                attempt,
                stderr = %output.stderr.trim(),
                "ssh connection failed, retrying"
            );
            thread::sleep(self.options.retry_backoff * attempt);
            attempt += 1;
        }
    }

    fn run_checked(&self, operation: &str, command: &str) -> Result<CommandOutput, RemoteError> {
        let output = self.run_idempotent(operation, command)?;
        if output.is_success() {
            return Ok(output);
        }
        Err(self.failure(operation, output.code, &output.stderr))
    }

    fn run_streamed(
        &self,
        operation: &str,
        command: &str,
        io: StreamIo<'_>,
    ) -> Result<StreamedOutput, RemoteError> {
        debug!(host = %self.label, %operation, %command, "running streamed remote command");
        let args = self.options.command_args(&self.target, command);
        let output = self
            .runner
            .run_streaming(&self.options.ssh_bin, &args, io)
            .map_err(|err| self.relabel(err))?;
        if output.code == Some(SSH_TRANSPORT_EXIT) {
            return Err(RemoteError::Transport {
                host: self.label.clone(),
                stderr: output.stderr.trim().to_owned(),
            });
        }
        Ok(output)
    }

    fn failure(&self, operation: &str, code: Option<i32>, stderr: &str) -> RemoteError {
        RemoteError::CommandFailure {
            host: self.label.clone(),
            operation: operation.to_owned(),
            status: code,
            status_text: status_text(code),
            stderr: stderr.trim().to_owned(),
        }
    }

    fn relabel(&self, err: RemoteError) -> RemoteError {
        match err {
            RemoteError::Stream {
                operation, message, ..
            } => RemoteError::Stream {
                host: self.label.clone(),
                operation,
                message,
            },
            other => other,
        }
    }

    fn parse_error(&self, operation: &str, message: impl Into<String>) -> RemoteError {
        RemoteError::Parse {
            host: self.label.clone(),
            operation: operation.to_owned(),
            message: message.into(),
        }
    }
}

impl<R: CommandRunner> RemoteRunner for SshRemote<R> {
    fn host(&self) -> &str {
        &self.label
    }

    fn directory_exists(&self, path: &Utf8Path) -> Result<bool, RemoteError> {
        let operation = "directory check";
        let output = self.run_idempotent(operation, &format!("sudo test -d {}", quote(path)))?;
        match output.code {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            code => Err(self.failure(operation, code, &output.stderr)),
        }
    }

    fn create_directory(&self, path: &Utf8Path) -> Result<(), RemoteError> {
        self.run_checked("create directory", &format!("sudo mkdir -p {}", quote(path)))
            .map(|_| ())
    }

    fn remove_directory(&self, path: &Utf8Path) -> Result<(), RemoteError> {
        self.run_checked("remove directory", &format!("sudo rm -rf {}", quote(path)))
            .map(|_| ())
    }

    fn archive_and_download(
        &self,
        dir: &Utf8Path,
        writer: &mut (dyn Write + Send),
    ) -> Result<(), RemoteError> {
        let operation = "archive";
        let command = format!("sudo tar -C {} -cf - .", quote(dir));
        let output = self.run_streamed(
            operation,
            &command,
            StreamIo {
                stdin: None,
                stdout: writer,
            },
        )?;
        if output.is_success() {
            return Ok(());
        }
        Err(self.failure(operation, output.code, &output.stderr))
    }

    fn extract_and_upload(
        &self,
        reader: &mut (dyn Read + Send),
        dir: &Utf8Path,
    ) -> Result<(), RemoteError> {
        let operation = "extract";
        let escaped = quote(dir);
        let script = format!("mkdir -p {escaped} && tar -C {escaped} -xf -");
        let command = format!("sudo sh -c {}", escape(script.into()));
        let mut discard = std::io::sink();
        let output = self.run_streamed(
            operation,
            &command,
            StreamIo {
                stdin: Some(reader),
                stdout: &mut discard,
            },
        )?;
        if output.is_success() {
            return Ok(());
        }
        Err(self.failure(operation, output.code, &output.stderr))
    }

    fn size_of(&self, path: &Utf8Path) -> Result<DirectorySize, RemoteError> {
        let operation = "size";
        let output = self.run_checked(operation, &format!("sudo du -sb {}", quote(path)))?;
        let bytes = output
            .stdout
            .split_whitespace()
            .next()
            .and_then(|token| token.parse::<u64>().ok())
            .ok_or_else(|| self.parse_error(operation, format!("'{}'", output.stdout.trim())))?;
        Ok(DirectorySize::from_bytes(bytes))
    }

    fn checksum_directory(&self, path: &Utf8Path) -> Result<ChecksumMap, RemoteError> {
        let operation = "checksum";
        let script = format!("cd {} && find . -type f -exec sha256sum {{}} +", quote(path));
        let command = format!("sudo sh -c {}", escape(script.into()));
        let output = self.run_checked(operation, &command)?;
        parse_checksums(&output.stdout).map_err(|line| self.parse_error(operation, line))
    }

    fn run_script(
        &self,
        path: &Utf8Path,
        env: &BTreeMap<String, String>,
        label: &str,
        sink: LineSink<'_>,
    ) -> Result<(), RemoteError> {
        let mut command = String::from("sudo");
        for (key, value) in env {
            command.push(' ');
            command.push_str(key);
            command.push('=');
            command.push_str(escape(value.as_str().into()).as_ref());
        }
        command.push(' ');
        command.push_str(&quote(path));

        let mut lines = LineWriter::new(sink);
        let output = self.run_streamed(
            label,
            &command,
            StreamIo {
                stdin: None,
                stdout: &mut lines,
            },
        )?;
        lines.finish();
        if output.is_success() {
            return Ok(());
        }
        Err(RemoteError::ScriptFailed {
            host: self.label.clone(),
            label: label.to_owned(),
            exit_code: output.code,
            status_text: status_text(output.code),
            stderr: output.stderr.trim().to_owned(),
        })
    }

    fn find_files(&self, glob: &str) -> Result<Vec<String>, RemoteError> {
        let script = format!("for f in {glob}; do [ -f \"$f\" ] && echo \"$f\"; done; true");
        let command = format!("sudo sh -c {}", escape(script.into()));
        let output = self.run_checked("find files", &command)?;
        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_owned)
            .collect())
    }
}

fn quote(path: &Utf8Path) -> String {
    escape(path.as_str().into()).into_owned()
}

/// Parses `sha256sum` output into a checksum map keyed by relative path.
///
/// Returns the first malformed line as the error value.
pub(crate) fn parse_checksums(stdout: &str) -> Result<ChecksumMap, String> {
    let mut checksums = ChecksumMap::new();
    for line in stdout.lines().filter(|line| !line.trim().is_empty()) {
        let (digest, path) = line
            .split_once("  ")
            .or_else(|| line.split_once(" *"))
            .ok_or_else(|| line.to_owned())?;
        checksums.insert(normalise_relative(path), digest.trim().to_lowercase());
    }
    Ok(checksums)
}

/// Strips a leading `./` so remote and local listings share keys.
#[must_use]
pub fn normalise_relative(path: &str) -> String {
    path.trim().trim_start_matches("./").to_owned()
}

/// Adapts a line callback into a byte writer.
struct LineWriter<'a> {
    sink: LineSink<'a>,
    pending: Vec<u8>,
}

impl<'a> LineWriter<'a> {
    fn new(sink: LineSink<'a>) -> Self {
        Self {
            sink,
            pending: Vec::new(),
        }
    }

    fn emit(&mut self, line: &[u8]) {
        let text = String::from_utf8_lossy(line);
        (self.sink)(text.trim_end_matches('\r'));
    }

    fn finish(mut self) {
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            self.emit(&rest);
        }
    }
}

impl Write for LineWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.pending.extend_from_slice(buf);
        while let Some(position) = self.pending.iter().position(|byte| *byte == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=position).collect();
            let without_newline = line.get(..position).unwrap_or_default();
            self.emit(without_newline);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
