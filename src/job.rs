//! One installed script bundle on one instance.
//!
//! A job's capabilities come from the files found under
//! `/var/vcap/jobs/<job>/bin/bbr/`; behaviour is conditional on membership in
//! its [`ScriptSet`] rather than on a type hierarchy.

use std::collections::BTreeSet;
use std::fmt;

use camino::Utf8PathBuf;
use serde::Deserialize;

/// Root under which BOSH installs job bundles.
pub const JOBS_ROOT: &str = "/var/vcap/jobs";

/// Glob matching every candidate script on an instance.
pub const SCRIPT_GLOB: &str = "/var/vcap/jobs/*/bin/bbr/*";

/// Instance-level directory holding every job's artifact directory.
pub const ARTIFACT_ROOT: &str = "/var/vcap/store/bbr-backup";

/// Environment variable telling backup and restore scripts where to work.
pub const ARTIFACT_DIRECTORY_ENV: &str = "BBR_ARTIFACT_DIRECTORY";

/// Scripts a job may advertise.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum ScriptKind {
    /// Quiesces the service before a backup.
    PreBackupLock,
    /// Writes dump files into the artifact directory.
    Backup,
    /// Resumes the service after a backup.
    PostBackupUnlock,
    /// Quiesces the service before a restore.
    PreRestoreLock,
    /// Reads dump files from the artifact directory and applies them.
    Restore,
    /// Resumes the service after a restore.
    PostRestoreUnlock,
    /// Prints YAML metadata advertising overrides.
    Metadata,
}

impl ScriptKind {
    /// Every recognised script, in lifecycle order.
    pub const ALL: [Self; 7] = [
        Self::PreBackupLock,
        Self::Backup,
        Self::PostBackupUnlock,
        Self::PreRestoreLock,
        Self::Restore,
        Self::PostRestoreUnlock,
        Self::Metadata,
    ];

    /// File name of the script inside `bin/bbr/`.
    #[must_use]
    pub const fn file_name(self) -> &'static str {
        match self {
            Self::PreBackupLock => "pre-backup-lock",
            Self::Backup => "backup",
            Self::PostBackupUnlock => "post-backup-unlock",
            Self::PreRestoreLock => "pre-restore-lock",
            Self::Restore => "restore",
            Self::PostRestoreUnlock => "post-restore-unlock",
            Self::Metadata => "metadata",
        }
    }

    /// Recognises a script file name; unknown names yield `None`.
    #[must_use]
    pub fn from_file_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.file_name() == name)
    }
}

impl fmt::Display for ScriptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_name())
    }
}

/// Set of scripts a job advertises.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ScriptSet(BTreeSet<ScriptKind>);

impl ScriptSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a script.
    pub fn insert(&mut self, kind: ScriptKind) {
        self.0.insert(kind);
    }

    /// Returns whether the set contains `kind`.
    #[must_use]
    pub fn contains(&self, kind: ScriptKind) -> bool {
        self.0.contains(&kind)
    }

    /// Returns `true` when no lifecycle script is present.
    ///
    /// A lone `metadata` script contributes nothing to a backup or restore.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|kind| *kind == ScriptKind::Metadata)
    }

    /// Iterates the scripts in lifecycle order.
    pub fn iter(&self) -> impl Iterator<Item = ScriptKind> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<ScriptKind> for ScriptSet {
    fn from_iter<I: IntoIterator<Item = ScriptKind>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A `(job, release)` pair that must be locked after the declaring job.
#[derive(Clone, Debug, Deserialize, Eq, Ord, PartialEq, PartialOrd)]
pub struct LockDependency {
    /// Name of the job that is locked later.
    pub job_name: String,
    /// Release providing that job.
    #[serde(default)]
    pub release: Option<String>,
}

/// Overrides a job advertises through its `metadata` script.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct JobMetadata {
    /// Artifact name used when backing up.
    pub backup_name: Option<String>,
    /// Artifact name consumed when restoring.
    pub restore_name: Option<String>,
    /// Back up on the first instance only, restore on every instance.
    pub backup_one_restore_all: bool,
    /// Treat the job as if it shipped no scripts.
    pub skip_bbr_scripts: bool,
    /// Jobs locked after this one during backup.
    pub backup_should_be_locked_before: Vec<LockDependency>,
    /// Jobs locked after this one during restore.
    pub restore_should_be_locked_before: Vec<LockDependency>,
}

impl JobMetadata {
    /// Parses the YAML printed by a `metadata` script.
    ///
    /// Blank output yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns the YAML error when the document is malformed.
    pub fn parse(yaml: &str) -> Result<Self, serde_yaml::Error> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(yaml)
    }
}

/// Identifies one job on one instance: a relation, not ownership.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct JobRef {
    /// Instance group, for example `redis`.
    pub instance_group: String,
    /// Instance index or UUID.
    pub instance_id: String,
    /// Job name.
    pub job_name: String,
}

impl JobRef {
    /// Label of the owning instance, for example `redis/0`.
    #[must_use]
    pub fn instance_label(&self) -> String {
        format!("{}/{}", self.instance_group, self.instance_id)
    }
}

impl fmt::Display for JobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} {}",
            self.instance_group, self.instance_id, self.job_name
        )
    }
}

/// A discovered script bundle.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Job {
    reference: JobRef,
    release: Option<String>,
    scripts: ScriptSet,
    metadata: JobMetadata,
}

impl Job {
    /// Builds a job from discovery results. `skip_bbr_scripts` empties the
    /// script set.
    #[must_use]
    pub fn new(
        reference: JobRef,
        release: Option<String>,
        scripts: ScriptSet,
        metadata: JobMetadata,
    ) -> Self {
        let scripts = if metadata.skip_bbr_scripts {
            ScriptSet::new()
        } else {
            scripts
        };
        Self {
            reference,
            release,
            scripts,
            metadata,
        }
    }

    /// Job name, unique per instance only.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.reference.job_name
    }

    /// Reference to this job and its instance.
    #[must_use]
    pub const fn reference(&self) -> &JobRef {
        &self.reference
    }

    /// Release providing the job, when the director reported one.
    #[must_use]
    pub fn release(&self) -> Option<&str> {
        self.release.as_deref()
    }

    /// Advertised scripts.
    #[must_use]
    pub const fn scripts(&self) -> &ScriptSet {
        &self.scripts
    }

    /// Parsed metadata.
    #[must_use]
    pub const fn metadata(&self) -> &JobMetadata {
        &self.metadata
    }

    /// Returns whether the job advertises `kind`.
    #[must_use]
    pub fn has(&self, kind: ScriptKind) -> bool {
        self.scripts.contains(kind)
    }

    /// Absolute path of the `kind` script on the instance.
    #[must_use]
    pub fn script_path(&self, kind: ScriptKind) -> Utf8PathBuf {
        script_path(self.name(), kind)
    }

    /// Whether the backup runs once but the restore runs everywhere.
    #[must_use]
    pub const fn backup_one_restore_all(&self) -> bool {
        self.metadata.backup_one_restore_all
    }

    /// Whether `backup_name` overrides the artifact name.
    #[must_use]
    pub const fn has_custom_backup_name(&self) -> bool {
        self.metadata.backup_name.is_some()
    }

    /// Whether `restore_name` overrides the artifact name.
    #[must_use]
    pub fn has_custom_restore_name(&self) -> bool {
        self.restore_name().is_some()
    }

    /// Custom name the restore reads from.
    ///
    /// A backup-one-restore-all job without `restore_name` reads back its own
    /// `backup_name`.
    fn restore_name(&self) -> Option<&str> {
        match self.metadata.restore_name {
            Some(ref name) => Some(name),
            None if self.metadata.backup_one_restore_all => self.metadata.backup_name.as_deref(),
            None => None,
        }
    }

    /// Name of the artifact this job produces.
    #[must_use]
    pub fn backup_artifact_name(&self) -> String {
        self.metadata
            .backup_name
            .clone()
            .unwrap_or_else(|| self.default_artifact_name())
    }

    /// Name of the artifact this job consumes.
    #[must_use]
    pub fn restore_artifact_name(&self) -> String {
        self.restore_name()
            .map_or_else(|| self.default_artifact_name(), str::to_owned)
    }

    /// Whether the produced artifact is shared rather than per-instance.
    #[must_use]
    pub const fn produces_shared_artifact(&self) -> bool {
        self.has_custom_backup_name() || self.backup_one_restore_all()
    }

    /// Remote directory the backup script writes into.
    #[must_use]
    pub fn backup_artifact_directory(&self) -> Utf8PathBuf {
        artifact_directory(self.metadata.backup_name.as_deref().unwrap_or(self.name()))
    }

    /// Remote directory the restore script reads from.
    #[must_use]
    pub fn restore_artifact_directory(&self) -> Utf8PathBuf {
        artifact_directory(self.restore_name().unwrap_or(self.name()))
    }

    /// Jobs to lock after this one during backup.
    #[must_use]
    pub fn backup_lock_dependencies(&self) -> &[LockDependency] {
        &self.metadata.backup_should_be_locked_before
    }

    /// Jobs to lock after this one during restore.
    #[must_use]
    pub fn restore_lock_dependencies(&self) -> &[LockDependency] {
        &self.metadata.restore_should_be_locked_before
    }

    fn default_artifact_name(&self) -> String {
        let JobRef {
            instance_group,
            instance_id,
            job_name,
        } = &self.reference;
        if self.metadata.backup_one_restore_all {
            format!("{instance_group}-{job_name}")
        } else {
            format!("{instance_group}-{instance_id}-{job_name}")
        }
    }
}

/// Absolute path of a script for the named job.
#[must_use]
pub fn script_path(job_name: &str, kind: ScriptKind) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("{JOBS_ROOT}/{job_name}/bin/bbr/{}", kind.file_name()))
}

/// Splits `/var/vcap/jobs/<job>/bin/bbr/<script>` into job name and script.
#[must_use]
pub fn parse_script_path(path: &str) -> Option<(String, ScriptKind)> {
    let rest = path.strip_prefix(JOBS_ROOT)?.strip_prefix('/')?;
    let (job_name, script) = rest.split_once("/bin/bbr/")?;
    if job_name.is_empty() || job_name.contains('/') {
        return None;
    }
    let kind = ScriptKind::from_file_name(script)?;
    Some((job_name.to_owned(), kind))
}

fn artifact_directory(name: &str) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("{ARTIFACT_ROOT}/{name}/"))
}
