//! Instances, deployments and the borrowed job handles workflows act on.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use thiserror::Error;
use tracing::debug;

use crate::job::{ARTIFACT_DIRECTORY_ENV, Job, ScriptKind};
use crate::remote::{RemoteError, RemoteRunner};

/// One VM of a deployment: identity, remote access and discovered jobs.
pub struct Instance {
    group: String,
    id: String,
    remote: Box<dyn RemoteRunner>,
    jobs: Vec<Job>,
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("group", &self.group)
            .field("id", &self.id)
            .field("host", &self.remote.host())
            .field("jobs", &self.jobs)
            .finish()
    }
}

impl Instance {
    /// Creates an instance owning `jobs`.
    #[must_use]
    pub fn new(
        group: impl Into<String>,
        id: impl Into<String>,
        remote: Box<dyn RemoteRunner>,
        jobs: Vec<Job>,
    ) -> Self {
        Self {
            group: group.into(),
            id: id.into(),
            remote,
            jobs,
        }
    }

    /// Instance group name.
    #[must_use]
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Index or UUID.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Display label, for example `redis/0`.
    #[must_use]
    pub fn label(&self) -> String {
        format!("{}/{}", self.group, self.id)
    }

    /// Remote runner for this VM.
    #[must_use]
    pub fn remote(&self) -> &dyn RemoteRunner {
        self.remote.as_ref()
    }

    /// Discovered jobs, including those without scripts.
    #[must_use]
    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    /// Whether no job on this VM contributes a script.
    ///
    /// Such instances only ever receive cleanup.
    #[must_use]
    pub fn is_artifact_only(&self) -> bool {
        self.jobs.iter().all(|job| job.scripts().is_empty())
    }
}

/// A job together with the instance it runs on.
///
/// The instance is borrowed: handles never outlive the [`Deployment`].
#[derive(Clone, Copy)]
pub struct JobHandle<'a> {
    instance: &'a Instance,
    job: &'a Job,
}

impl fmt::Debug for JobHandle<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JobHandle({self})")
    }
}

impl fmt::Display for JobHandle<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.instance.label(), self.job.name())
    }
}

impl<'a> JobHandle<'a> {
    /// Owning instance.
    #[must_use]
    pub const fn instance(&self) -> &'a Instance {
        self.instance
    }

    /// The job itself.
    #[must_use]
    pub const fn job(&self) -> &'a Job {
        self.job
    }

    /// Remote runner of the owning instance.
    #[must_use]
    pub fn remote(&self) -> &'a dyn RemoteRunner {
        self.instance.remote()
    }

    /// Runs the `kind` script, logging each stdout line at debug level.
    ///
    /// Backup and restore scripts receive `BBR_ARTIFACT_DIRECTORY`.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError`] when the script cannot be run or exits
    /// non-zero.
    pub fn run_script(&self, kind: ScriptKind) -> Result<(), RemoteError> {
        let mut env = BTreeMap::new();
        match kind {
            ScriptKind::Backup => {
                env.insert(
                    ARTIFACT_DIRECTORY_ENV.to_owned(),
                    self.job.backup_artifact_directory().into_string(),
                );
            }
            ScriptKind::Restore => {
                env.insert(
                    ARTIFACT_DIRECTORY_ENV.to_owned(),
                    self.job.restore_artifact_directory().into_string(),
                );
            }
            _ => {}
        }
        let label = format!("{} {}", self.job.name(), kind);
        let instance = self.instance.label();
        let mut sink = |line: &str| debug!(%instance, script = %label, "{line}");
        self.remote()
            .run_script(&self.job.script_path(kind), &env, &label, &mut sink)
    }
}

/// Errors raised by whole-deployment validation.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum DeploymentError {
    /// Two producers declared the same artifact name.
    #[error("Multiple jobs in deployment '{deployment}' specified the same backup name '{name}'")]
    DuplicateBackupName {
        /// Deployment name.
        deployment: String,
        /// Conflicting artifact name.
        name: String,
    },
    /// A `restore_name` has no matching `backup_name`.
    #[error(
        "The restore name '{name}' of job {job} in deployment '{deployment}' does not match any backup name"
    )]
    UnmatchedRestoreName {
        /// Deployment name.
        deployment: String,
        /// Job declaring the restore name.
        job: String,
        /// Unmatched name.
        name: String,
    },
}

/// Named collection of instances; owns everything beneath it.
#[derive(Debug)]
pub struct Deployment {
    name: String,
    instances: Vec<Instance>,
}

impl Deployment {
    /// Creates a deployment from discovered instances.
    #[must_use]
    pub fn new(name: impl Into<String>, instances: Vec<Instance>) -> Self {
        Self {
            name: name.into(),
            instances,
        }
    }

    /// Deployment name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Instances in director order.
    #[must_use]
    pub fn instances(&self) -> &[Instance] {
        &self.instances
    }

    /// Every job that contributes at least one script.
    #[must_use]
    pub fn jobs(&self) -> Vec<JobHandle<'_>> {
        self.instances
            .iter()
            .flat_map(|instance| {
                instance
                    .jobs
                    .iter()
                    .filter(|job| !job.scripts().is_empty())
                    .map(move |job| JobHandle { instance, job })
            })
            .collect()
    }

    /// Jobs advertising `kind`.
    #[must_use]
    pub fn jobs_with(&self, kind: ScriptKind) -> Vec<JobHandle<'_>> {
        self.jobs()
            .into_iter()
            .filter(|handle| handle.job.has(kind))
            .collect()
    }

    /// Whether any job can back up.
    #[must_use]
    pub fn has_backup_scripts(&self) -> bool {
        !self.jobs_with(ScriptKind::Backup).is_empty()
    }

    /// Whether any job can restore.
    #[must_use]
    pub fn has_restore_scripts(&self) -> bool {
        !self.jobs_with(ScriptKind::Restore).is_empty()
    }

    /// Jobs whose backup output becomes an artifact.
    ///
    /// A backup-one-restore-all job backs up on the first instance carrying
    /// it only.
    #[must_use]
    pub fn backup_producers(&self) -> Vec<JobHandle<'_>> {
        let mut seen_shared = BTreeSet::new();
        self.jobs_with(ScriptKind::Backup)
            .into_iter()
            .filter(|handle| {
                !handle.job.backup_one_restore_all()
                    || seen_shared.insert(handle.job.backup_artifact_name())
            })
            .collect()
    }

    /// Jobs that consume an artifact on restore.
    #[must_use]
    pub fn restore_targets(&self) -> Vec<JobHandle<'_>> {
        self.jobs_with(ScriptKind::Restore)
    }

    /// Checks custom artifact names across the deployment.
    ///
    /// # Errors
    ///
    /// Returns one [`DeploymentError`] per duplicated backup name and per
    /// unmatched restore name.
    pub fn validate_artifact_names(&self) -> Result<(), Vec<DeploymentError>> {
        let mut errors = Vec::new();
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for handle in self.backup_producers() {
            *counts.entry(handle.job.backup_artifact_name()).or_default() += 1;
        }
        errors.extend(
            counts
                .into_iter()
                .filter(|(_, count)| *count > 1)
                .map(|(name, _)| DeploymentError::DuplicateBackupName {
                    deployment: self.name.clone(),
                    name,
                }),
        );

        let custom_backup_names: BTreeSet<String> = self
            .jobs()
            .into_iter()
            .filter_map(|handle| handle.job.metadata().backup_name.clone())
            .collect();
        for handle in self.jobs() {
            if let Some(ref name) = handle.job.metadata().restore_name {
                if !custom_backup_names.contains(name) {
                    errors.push(DeploymentError::UnmatchedRestoreName {
                        deployment: self.name.clone(),
                        job: handle.to_string(),
                        name: name.clone(),
                    });
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
