//! Streams artifacts between instances and the backup directory.

use std::io::BufWriter;

use tracing::{debug, info};

use super::{
    ArtifactError, ArtifactRecord, BackupDirectory, ByteCounter, CountingWriter, ProgressWriter,
    checksum_tar, mismatched_files,
};
use crate::instance::JobHandle;

/// Downloads the artifact `handle` produced into `directory`.
///
/// The remote directory is sized and checksummed first, then streamed as a
/// tar through a byte counter and progress logger, and finally the local
/// tar is hashed and compared with the remote digests.
///
/// # Errors
///
/// Returns [`ArtifactError::ChecksumMismatch`] when the digests differ, or
/// the transfer error.
pub fn download(
    handle: JobHandle<'_>,
    directory: &BackupDirectory,
) -> Result<ArtifactRecord, ArtifactError> {
    let job = handle.job();
    let remote = handle.remote();
    let artifact = job.backup_artifact_name();
    let remote_dir = job.backup_artifact_directory();
    let remote_error = |source| ArtifactError::Remote {
        artifact: artifact.clone(),
        source,
    };

    let size = remote.size_of(&remote_dir).map_err(remote_error)?;
    let remote_checksums = remote.checksum_directory(&remote_dir).map_err(remote_error)?;
    info!(
        %artifact,
        instance = %handle.instance().label(),
        size = %size.human,
        "Copying backup"
    );

    let file = directory.create_artifact(&artifact)?;
    let counter = ByteCounter::new();
    let mut writer = ProgressWriter::new(
        CountingWriter::new(BufWriter::new(file), counter.clone()),
        size.bytes,
        artifact.clone(),
    );
    remote
        .archive_and_download(&remote_dir, &mut writer)
        .map_err(remote_error)?;
    writer.finish().map_err(|source| ArtifactError::Io {
        path: directory.artifact_path(&artifact),
        source,
    })?;
    debug!(%artifact, bytes = counter.total(), "artifact downloaded");

    let local_checksums = checksum_tar(directory.open_artifact(&artifact)?).map_err(|source| {
        ArtifactError::Io {
            path: directory.artifact_path(&artifact),
            source,
        }
    })?;
    let files = mismatched_files(&remote_checksums, &local_checksums);
    if !files.is_empty() {
        return Err(ArtifactError::ChecksumMismatch {
            artifact,
            instance: handle.instance().label(),
            files,
        });
    }

    let shared = job.produces_shared_artifact();
    Ok(ArtifactRecord {
        artifact_name: artifact,
        custom_artifact: job.has_custom_backup_name(),
        instance_group: handle.instance().group().to_owned(),
        instance_id: (!shared).then(|| handle.instance().id().to_owned()),
        job_name: job.name().to_owned(),
        size: size.bytes,
        checksums: remote_checksums,
    })
}

/// Confirms the local tar for `record` still hashes to its recorded digests.
///
/// # Errors
///
/// Returns [`ArtifactError::Missing`] or [`ArtifactError::ManifestMismatch`].
pub fn verify_local(
    directory: &BackupDirectory,
    record: &ArtifactRecord,
) -> Result<(), ArtifactError> {
    let artifact = &record.artifact_name;
    let actual = checksum_tar(directory.open_artifact(artifact)?).map_err(|source| {
        ArtifactError::Io {
            path: directory.artifact_path(artifact),
            source,
        }
    })?;
    let files = mismatched_files(&record.checksums, &actual);
    if files.is_empty() {
        Ok(())
    } else {
        Err(ArtifactError::ManifestMismatch {
            artifact: artifact.clone(),
            files,
        })
    }
}

/// Uploads the tar for `record` into the restore directory of `handle` and
/// verifies the extracted files against the recorded digests.
///
/// # Errors
///
/// Returns [`ArtifactError::ChecksumMismatch`] when the extracted files
/// differ, or the transfer error.
pub fn upload(
    directory: &BackupDirectory,
    record: &ArtifactRecord,
    handle: JobHandle<'_>,
) -> Result<(), ArtifactError> {
    let artifact = &record.artifact_name;
    let remote = handle.remote();
    let remote_dir = handle.job().restore_artifact_directory();
    let remote_error = |source| ArtifactError::Remote {
        artifact: artifact.clone(),
        source,
    };
    info!(%artifact, instance = %handle.instance().label(), "Copying backup to instance");

    let mut file = directory.open_artifact(artifact)?;
    remote
        .extract_and_upload(&mut file, &remote_dir)
        .map_err(remote_error)?;

    let remote_checksums = remote.checksum_directory(&remote_dir).map_err(remote_error)?;
    let files = mismatched_files(&record.checksums, &remote_checksums);
    if files.is_empty() {
        Ok(())
    } else {
        Err(ArtifactError::ChecksumMismatch {
            artifact: artifact.clone(),
            instance: handle.instance().label(),
            files,
        })
    }
}
