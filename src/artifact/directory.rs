//! The local backup directory.

use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir, fs_utf8::File};

use super::{ArtifactError, Manifest};

/// Manifest file name inside a backup directory.
pub const MANIFEST_FILE: &str = "metadata";

/// `<workspace>/<deployment>_<timestamp>/` holding tars and the manifest.
#[derive(Debug)]
pub struct BackupDirectory {
    path: Utf8PathBuf,
    dir: Dir,
}

impl BackupDirectory {
    /// Directory name for a backup of `deployment` taken at `timestamp`.
    #[must_use]
    pub fn directory_name(deployment: &str, timestamp: &str) -> String {
        format!("{deployment}_{timestamp}")
    }

    /// Creates a fresh backup directory, creating `workspace` if needed.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError::AlreadyExists`] rather than reuse an existing
    /// directory, or [`ArtifactError::Io`] when the workspace is unusable.
    pub fn create(
        workspace: &Utf8Path,
        deployment: &str,
        timestamp: &str,
    ) -> Result<Self, ArtifactError> {
        let io_error = |source| ArtifactError::Io {
            path: workspace.to_path_buf(),
            source,
        };
        Dir::create_ambient_dir_all(workspace, ambient_authority()).map_err(io_error)?;
        let parent = Dir::open_ambient_dir(workspace, ambient_authority()).map_err(io_error)?;

        let name = Self::directory_name(deployment, timestamp);
        let path = workspace.join(&name);
        if parent.try_exists(&name).map_err(io_error)? {
            return Err(ArtifactError::AlreadyExists { path });
        }
        parent.create_dir(&name).map_err(|source| ArtifactError::Io {
            path: path.clone(),
            source,
        })?;
        let dir = parent.open_dir(&name).map_err(|source| ArtifactError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(Self { path, dir })
    }

    /// Opens an existing backup directory.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError::Io`] when the directory cannot be opened.
    pub fn open(path: &Utf8Path) -> Result<Self, ArtifactError> {
        let dir = Dir::open_ambient_dir(path, ambient_authority()).map_err(|source| {
            ArtifactError::Io {
                path: path.to_path_buf(),
                source,
            }
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            dir,
        })
    }

    /// Location on disk.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Path of the tar holding `artifact`.
    #[must_use]
    pub fn artifact_path(&self, artifact: &str) -> Utf8PathBuf {
        self.path.join(tar_name(artifact))
    }

    /// Whether the tar for `artifact` exists.
    #[must_use]
    pub fn has_artifact(&self, artifact: &str) -> bool {
        self.dir.is_file(tar_name(artifact))
    }

    /// Creates (truncating) the tar for `artifact`.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError::Io`] when the file cannot be created.
    pub fn create_artifact(&self, artifact: &str) -> Result<File, ArtifactError> {
        self.dir
            .create(tar_name(artifact))
            .map_err(|source| self.io_error(artifact, source))
    }

    /// Opens the tar for `artifact` for reading.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError::Missing`] when absent, otherwise
    /// [`ArtifactError::Io`].
    pub fn open_artifact(&self, artifact: &str) -> Result<File, ArtifactError> {
        self.dir.open(tar_name(artifact)).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                ArtifactError::Missing {
                    artifact: artifact.to_owned(),
                    path: self.artifact_path(artifact),
                }
            } else {
                self.io_error(artifact, source)
            }
        })
    }

    /// Writes the manifest.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError`] when rendering or writing fails.
    pub fn write_manifest(&self, manifest: &Manifest) -> Result<(), ArtifactError> {
        let path = self.path.join(MANIFEST_FILE);
        let yaml = manifest.to_yaml().map_err(|err| ArtifactError::Manifest {
            path: path.clone(),
            message: err.to_string(),
        })?;
        self.dir
            .write(MANIFEST_FILE, yaml)
            .map_err(|source| ArtifactError::Io { path, source })
    }

    /// Reads the manifest.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError::Manifest`] when the manifest is absent or
    /// malformed.
    pub fn read_manifest(&self) -> Result<Manifest, ArtifactError> {
        let path = self.path.join(MANIFEST_FILE);
        let yaml = self
            .dir
            .read_to_string(MANIFEST_FILE)
            .map_err(|err| ArtifactError::Manifest {
                path: path.clone(),
                message: err.to_string(),
            })?;
        Manifest::from_yaml(&yaml).map_err(|err| ArtifactError::Manifest {
            path,
            message: err.to_string(),
        })
    }

    fn io_error(&self, artifact: &str, source: io::Error) -> ArtifactError {
        ArtifactError::Io {
            path: self.artifact_path(artifact),
            source,
        }
    }
}

fn tar_name(artifact: &str) -> String {
    format!("{artifact}.tar")
}
