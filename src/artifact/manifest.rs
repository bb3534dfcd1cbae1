//! The `metadata` YAML written next to the artifacts.

use serde::{Deserialize, Serialize};

use crate::remote::ChecksumMap;

/// Start and finish of the backup, formatted `%Y/%m/%d %H:%M:%S UTC`.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct BackupActivity {
    /// When discovery began.
    pub start_time: String,
    /// When the last artifact was written.
    pub finish_time: String,
}

/// One artifact in a backup.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ArtifactRecord {
    /// Artifact name; the tar is `<artifact_name>.tar`.
    pub artifact_name: String,
    /// Set when a job chose the name through `backup_name`.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub custom_artifact: bool,
    /// Instance group of the producing job.
    pub instance_group: String,
    /// Index of the producing instance; absent for shared artifacts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    /// Producing job.
    pub job_name: String,
    /// Size of the remote artifact directory in bytes.
    #[serde(default)]
    pub size: u64,
    /// SHA-256 of every file, keyed by path relative to the artifact root.
    pub checksums: ChecksumMap,
}

/// Description of every artifact in a backup directory.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Manifest {
    /// Deployment the backup was taken from.
    pub deployment: String,
    /// Timestamp shared by the whole backup.
    pub timestamp: String,
    /// Wall-clock bounds of the backup.
    #[serde(default)]
    pub backup_activity: BackupActivity,
    /// Artifacts in production order.
    #[serde(default)]
    pub artifacts: Vec<ArtifactRecord>,
}

impl Manifest {
    /// Looks up an artifact by name.
    #[must_use]
    pub fn find(&self, artifact_name: &str) -> Option<&ArtifactRecord> {
        self.artifacts
            .iter()
            .find(|record| record.artifact_name == artifact_name)
    }

    /// Renders the manifest as YAML.
    ///
    /// # Errors
    ///
    /// Returns the serialiser error.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    /// Parses a manifest.
    ///
    /// # Errors
    ///
    /// Returns the parser error.
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }
}
