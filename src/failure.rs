//! Aggregated failures of a workflow run.
//!
//! Workflows collect rather than unwind: every failing item adds a tagged
//! [`Failure`] to a [`Failures`] list, and the tags decide which recovery
//! branches run and whether the user is advised to run a cleanup.

use std::error::Error;
use std::fmt;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};

/// Boxed cause attached to a failure.
pub type Cause = Box<dyn Error + Send + Sync + 'static>;

/// Tag describing what went wrong.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum FailureKind {
    /// Anything without a more specific tag.
    Generic,
    /// The SSH connection itself failed.
    SshTransport,
    /// A backup or restore script exited non-zero.
    ScriptExit,
    /// A pre-backup-lock or pre-restore-lock script failed.
    Lock,
    /// A post-restore-unlock script failed.
    Unlock,
    /// A post-backup-unlock script failed.
    PostBackupUnlock,
    /// An artifact directory was already present on an instance.
    ArtifactDirExists,
    /// No job can back up.
    NoBackupScripts,
    /// No job can restore.
    NoRestoreScripts,
    /// Transferred bytes do not hash to the recorded digests.
    ChecksumMismatch,
    /// The local backup does not match its manifest or the deployment.
    ManifestMismatch,
    /// Removing an artifact directory failed.
    Cleanup,
}

impl FailureKind {
    /// Stable tag used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Generic => "generic",
            Self::SshTransport => "ssh-transport",
            Self::ScriptExit => "script-exit",
            Self::Lock => "lock",
            Self::Unlock => "unlock",
            Self::PostBackupUnlock => "post-backup-unlock",
            Self::ArtifactDirExists => "artifact-dir-exists",
            Self::NoBackupScripts => "no-backup-scripts",
            Self::NoRestoreScripts => "no-restore-scripts",
            Self::ChecksumMismatch => "checksum-mismatch",
            Self::ManifestMismatch => "manifest-mismatch",
            Self::Cleanup => "cleanup",
        }
    }

    const fn leaves_residue(self) -> bool {
        matches!(
            self,
            Self::Lock | Self::Unlock | Self::PostBackupUnlock | Self::Cleanup
        )
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One tagged failure.
#[derive(Debug)]
pub struct Failure {
    kind: FailureKind,
    subject: Option<String>,
    message: String,
    cause: Option<Cause>,
}

impl Failure {
    /// Creates a failure with a headline message.
    #[must_use]
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            subject: None,
            message: message.into(),
            cause: None,
        }
    }

    /// Names the job or instance the failure concerns.
    #[must_use]
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Attaches the underlying error.
    #[must_use]
    pub fn with_cause(mut self, cause: impl Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Tag.
    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        self.kind
    }

    /// Job or instance label, when known.
    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    /// Headline without the cause.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.cause {
            Some(ref cause) => write!(f, "{}: {cause}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl Error for Failure {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.cause
            .as_ref()
            .map(|cause| cause.as_ref() as &(dyn Error + 'static))
    }
}

/// Ordered list of failures from one run.
#[derive(Debug, Default)]
pub struct Failures(Vec<Failure>);

impl Failures {
    /// Creates an empty list.
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Appends one failure.
    pub fn push(&mut self, failure: Failure) {
        self.0.push(failure);
    }

    /// Number of failures.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether nothing failed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates failures in the order they were recorded.
    pub fn iter(&self) -> std::slice::Iter<'_, Failure> {
        self.0.iter()
    }

    /// Whether any failure carries `kind`.
    #[must_use]
    pub fn contains(&self, kind: FailureKind) -> bool {
        self.0.iter().any(|failure| failure.kind == kind)
    }

    /// Whether a lock, unlock or cleanup step failed, so jobs may still be
    /// locked or artifact directories may remain.
    #[must_use]
    pub fn contains_lock_or_cleanup(&self) -> bool {
        self.0.iter().any(|failure| failure.kind.leaves_residue())
    }

    /// Whether a run was refused because artifact directories already exist.
    #[must_use]
    pub fn contains_artifact_dir_exists(&self) -> bool {
        self.contains(FailureKind::ArtifactDirExists)
    }

    /// Whether the user should run a cleanup workflow.
    #[must_use]
    pub fn cleanup_advised(&self) -> bool {
        self.contains_lock_or_cleanup() || self.contains_artifact_dir_exists()
    }

    /// Process exit code for this outcome.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        i32::from(!self.is_empty())
    }

    /// `Ok` when empty, otherwise `Err(self)`.
    ///
    /// # Errors
    ///
    /// Returns `self` when any failure was recorded.
    pub fn into_result(self) -> Result<(), Self> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }

    /// User-facing rendering, one line per failure.
    #[must_use]
    pub fn pretty(&self) -> String {
        let mut rendered = match self.0.len() {
            1 => String::from("1 error occurred:\n"),
            count => format!("{count} errors occurred:\n"),
        };
        for (index, failure) in self.0.iter().enumerate() {
            rendered.push_str(&format!("error {}:\n{failure}\n", index + 1));
        }
        rendered
    }

    /// Full rendering with kind tags and the `caused by:` chain.
    #[must_use]
    pub fn stack(&self) -> String {
        let mut rendered = String::new();
        for (index, failure) in self.0.iter().enumerate() {
            rendered.push_str(&format!("error {} [{}]", index + 1, failure.kind));
            if let Some(subject) = failure.subject() {
                rendered.push_str(&format!(" {subject}"));
            }
            rendered.push_str(&format!(": {}\n", failure.message));
            let mut source = failure.source();
            while let Some(cause) = source {
                rendered.push_str(&format!("  caused by: {cause}\n"));
                source = cause.source();
            }
        }
        rendered
    }

    /// Pretty rendering followed, when needed, by advice to run
    /// `cleanup_command`.
    #[must_use]
    pub fn report(&self, cleanup_command: &str) -> String {
        let mut rendered = self.pretty();
        if self.cleanup_advised() {
            rendered.push_str(&cleanup_footer(cleanup_command));
            rendered.push('\n');
        }
        rendered
    }
}

impl fmt::Display for Failures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pretty())
    }
}

impl Error for Failures {}

impl From<Failure> for Failures {
    fn from(failure: Failure) -> Self {
        Self(vec![failure])
    }
}

impl Extend<Failure> for Failures {
    fn extend<I: IntoIterator<Item = Failure>>(&mut self, iter: I) {
        self.0.extend(iter);
    }
}

impl FromIterator<Failure> for Failures {
    fn from_iter<I: IntoIterator<Item = Failure>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for Failures {
    type Item = Failure;
    type IntoIter = std::vec::IntoIter<Failure>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Failures {
    type Item = &'a Failure;
    type IntoIter = std::slice::Iter<'a, Failure>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Advice appended when a run may have left jobs locked or directories behind.
#[must_use]
pub fn cleanup_footer(cleanup_command: &str) -> String {
    format!(
        "It is recommended that you run `{cleanup_command}` to ensure that any temp files are cleaned up and all jobs are unlocked."
    )
}

/// File name of the error log for a run started at `timestamp`.
#[must_use]
pub fn error_log_name(timestamp: &str) -> String {
    format!("bbr-{timestamp}.err.log")
}

/// Writes the stack rendering to `bbr-<timestamp>.err.log` inside `dir`.
///
/// # Errors
///
/// Returns the I/O error when the directory cannot be opened or written.
pub fn write_error_log(
    dir: &Utf8Path,
    timestamp: &str,
    failures: &Failures,
) -> io::Result<Utf8PathBuf> {
    let name = error_log_name(timestamp);
    let handle = Dir::open_ambient_dir(dir, ambient_authority())?;
    handle.write(&name, failures.stack())?;
    Ok(dir.join(name))
}
