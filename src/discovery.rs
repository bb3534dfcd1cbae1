//! Builds a [`Deployment`] by asking each VM which scripts it carries.

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::{debug, info};

use crate::director::{Director, DirectorError, InstanceSpec};
use crate::executor::map_bounded;
use crate::failure::{Failure, FailureKind, Failures};
use crate::instance::{Deployment, Instance};
use crate::job::{
    Job, JobMetadata, JobRef, SCRIPT_GLOB, ScriptKind, ScriptSet, parse_script_path, script_path,
};
use crate::remote::{RemoteError, RemoteRunner};

/// Errors raised while discovering one deployment.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Raised when the director cannot list or reach the VMs.
    #[error("failed to find instances for deployment '{deployment}'")]
    Director {
        /// Deployment being discovered.
        deployment: String,
        /// Underlying director error.
        #[source]
        source: DirectorError,
    },
    /// Raised when a VM cannot be inspected.
    #[error("failed to discover scripts on instance {instance}")]
    Remote {
        /// Instance label.
        instance: String,
        /// Underlying remote error.
        #[source]
        source: RemoteError,
    },
    /// Raised when a `metadata` script prints malformed YAML.
    #[error("failed to parse metadata of job {job}")]
    Metadata {
        /// Job label.
        job: String,
        /// Parser error.
        #[source]
        source: serde_yaml::Error,
    },
}

impl DiscoveryError {
    /// Converts into a tagged failure.
    #[must_use]
    pub fn into_failure(self) -> Failure {
        let kind = match self {
            Self::Remote { ref source, .. } if source.is_transport() => FailureKind::SshTransport,
            _ => FailureKind::Generic,
        };
        let subject = match self {
            Self::Director { ref deployment, .. } => deployment.clone(),
            Self::Remote { ref instance, .. } => instance.clone(),
            Self::Metadata { ref job, .. } => job.clone(),
        };
        Failure::new(kind, self.to_string())
            .with_subject(subject)
            .with_cause(self)
    }
}

/// Discovers every VM of `deployment` with at most `parallelism` VMs
/// inspected at once.
///
/// # Errors
///
/// Returns every instance that failed; a deployment is only usable when all
/// of its VMs were inspected.
pub fn discover_deployment(
    director: &dyn Director,
    deployment: &str,
    parallelism: usize,
) -> Result<Deployment, Failures> {
    info!(%deployment, "Looking for scripts");
    let specs = director
        .find_instances(deployment)
        .map_err(|source| {
            Failures::from(
                DiscoveryError::Director {
                    deployment: deployment.to_owned(),
                    source,
                }
                .into_failure(),
            )
        })?;

    let results = map_bounded(&specs, parallelism, |spec| {
        let remote = director
            .connect(deployment, spec)
            .map_err(|source| DiscoveryError::Director {
                deployment: deployment.to_owned(),
                source,
            })?;
        discover_instance(spec, remote)
    });

    let mut instances = Vec::with_capacity(results.len());
    let mut failures = Failures::new();
    for result in results {
        match result {
            Ok(instance) => instances.push(instance),
            Err(err) => failures.push(err.into_failure()),
        }
    }
    if !failures.is_empty() {
        return Err(failures);
    }

    let deployment = Deployment::new(deployment, instances);
    for handle in deployment.jobs() {
        let scripts: Vec<String> = handle
            .job()
            .scripts()
            .iter()
            .map(|kind| kind.to_string())
            .collect();
        info!("{handle}: found scripts {}", scripts.join(", "));
    }
    Ok(deployment)
}

/// Inspects one VM: finds its scripts and runs any `metadata` script.
///
/// # Errors
///
/// Returns [`DiscoveryError`] when the VM cannot be listed or a metadata
/// script fails or prints malformed YAML.
pub fn discover_instance(
    spec: &InstanceSpec,
    remote: Box<dyn RemoteRunner>,
) -> Result<Instance, DiscoveryError> {
    let label = spec.label();
    let remote_error = |source| DiscoveryError::Remote {
        instance: label.clone(),
        source,
    };
    let files = remote.find_files(SCRIPT_GLOB).map_err(remote_error)?;

    let mut by_job: BTreeMap<String, ScriptSet> = BTreeMap::new();
    for file in &files {
        if let Some((job, kind)) = parse_script_path(file) {
            by_job.entry(job).or_default().insert(kind);
        } else {
            debug!(instance = %label, %file, "ignoring unrecognised file");
        }
    }

    let mut jobs = Vec::with_capacity(by_job.len());
    for (name, scripts) in by_job {
        let reference = JobRef {
            instance_group: spec.group.clone(),
            instance_id: spec.id.clone(),
            job_name: name.clone(),
        };
        let metadata = if scripts.contains(ScriptKind::Metadata) {
            let yaml = run_metadata(remote.as_ref(), &name).map_err(remote_error)?;
            JobMetadata::parse(&yaml).map_err(|source| DiscoveryError::Metadata {
                job: reference.to_string(),
                source,
            })?
        } else {
            JobMetadata::default()
        };
        let release = spec.job_releases.get(&name).cloned();
        jobs.push(Job::new(reference, release, scripts, metadata));
    }

    Ok(Instance::new(spec.group.clone(), spec.id.clone(), remote, jobs))
}

fn run_metadata(remote: &dyn RemoteRunner, job: &str) -> Result<String, RemoteError> {
    let mut yaml = String::new();
    let mut sink = |line: &str| {
        yaml.push_str(line);
        yaml.push('\n');
    };
    remote.run_script(
        &script_path(job, ScriptKind::Metadata),
        &BTreeMap::new(),
        &format!("{job} metadata"),
        &mut sink,
    )?;
    Ok(yaml)
}
