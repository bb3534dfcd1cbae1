//! Local backup layout and artifact transfer.
//!
//! A backup lives in `<workspace>/<deployment>_<timestamp>/` as one
//! `<artifact>.tar` per artifact plus a `metadata` manifest. Transfers stream
//! through a counting writer and a percentage logger into the tar file, and
//! every transfer is verified against SHA-256 digests taken on the remote.

use std::io;

use camino::Utf8PathBuf;
use thiserror::Error;

use crate::failure::FailureKind;
use crate::remote::RemoteError;

mod checksum;
mod copier;
mod directory;
mod manifest;
mod progress;

pub use checksum::{checksum_tar, mismatched_files};
pub use copier::{download, upload, verify_local};
pub use directory::{BackupDirectory, MANIFEST_FILE};
pub use manifest::{ArtifactRecord, BackupActivity, Manifest};
pub use progress::{ByteCounter, CountingWriter, PROGRESS_STEP, ProgressTracker, ProgressWriter};

/// Errors raised by the artifact store.
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// Raised when a local file operation fails.
    #[error("failed to access {path}")]
    Io {
        /// Path being accessed.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// Raised when the backup directory is already present.
    #[error("backup directory {path} already exists")]
    AlreadyExists {
        /// Existing directory.
        path: Utf8PathBuf,
    },
    /// Raised when a listed artifact is absent from the backup.
    #[error("artifact {artifact} is listed in the manifest but {path} is missing")]
    Missing {
        /// Artifact name.
        artifact: String,
        /// Expected tar path.
        path: Utf8PathBuf,
    },
    /// Raised when the manifest cannot be read or written.
    #[error("invalid backup manifest {path}: {message}")]
    Manifest {
        /// Manifest path.
        path: Utf8PathBuf,
        /// Parser message.
        message: String,
    },
    /// Raised when a remote transfer step fails.
    #[error("failed to transfer artifact {artifact}")]
    Remote {
        /// Artifact name.
        artifact: String,
        /// Underlying remote error.
        #[source]
        source: RemoteError,
    },
    /// Raised when transferred files do not hash to the remote digests.
    #[error(
        "Backup artifact {artifact} on {instance} is corrupted: checksum mismatch for {}",
        .files.join(", ")
    )]
    ChecksumMismatch {
        /// Artifact name.
        artifact: String,
        /// Instance label.
        instance: String,
        /// Files whose digests differ.
        files: Vec<String>,
    },
    /// Raised when a local tar no longer matches the manifest.
    #[error("Backup artifact {artifact} does not match the manifest: {}", .files.join(", "))]
    ManifestMismatch {
        /// Artifact name.
        artifact: String,
        /// Files whose digests differ or are missing.
        files: Vec<String>,
    },
}

impl ArtifactError {
    /// Failure tag for this error.
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::ChecksumMismatch { .. } => FailureKind::ChecksumMismatch,
            Self::Missing { .. } | Self::Manifest { .. } | Self::ManifestMismatch { .. } => {
                FailureKind::ManifestMismatch
            }
            Self::Remote { source, .. } if source.is_transport() => FailureKind::SshTransport,
            Self::Io { .. } | Self::AlreadyExists { .. } | Self::Remote { .. } => {
                FailureKind::Generic
            }
        }
    }
}
