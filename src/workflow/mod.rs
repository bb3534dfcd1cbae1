//! The user-visible workflows: backup, restore, pre-backup-check and
//! cleanup.
//!
//! Each workflow is a small state machine over one deployment. Failures are
//! collected into a [`Failures`] aggregate; the recovery branches (unlock,
//! cleanup) always run once anything has been locked or written.

use camino::Utf8PathBuf;
use tracing::{debug, info};

use crate::config::MAX_PARALLELISM;
use crate::director::Director;
use crate::executor::{Executable, map_bounded};
use crate::failure::{Failure, FailureKind, Failures};
use crate::instance::{Deployment, JobHandle};
use crate::job::{ARTIFACT_ROOT, ScriptKind};
use crate::ordering::{LockOrder, LockPurpose, resolve};

mod backup;
mod maintenance;
mod restore;

pub use backup::BackupState;
pub use maintenance::{CheckState, CleanupState};
pub use restore::RestoreState;

/// Format of the timestamps recorded in the manifest.
pub const ACTIVITY_TIME_FORMAT: &str = "%Y/%m/%d %H:%M:%S UTC";

/// Format of the timestamp naming backup directories and error logs.
pub const DIRECTORY_TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// Result of one workflow run.
#[derive(Debug)]
pub struct Outcome<S> {
    /// States entered, in order.
    pub states: Vec<S>,
    /// Everything that failed.
    pub failures: Failures,
    /// Local backup directory, when one was created.
    pub backup_directory: Option<Utf8PathBuf>,
}

impl<S: std::fmt::Debug> Outcome<S> {
    fn new() -> Self {
        Self {
            states: Vec::new(),
            failures: Failures::new(),
            backup_directory: None,
        }
    }

    fn enter(&mut self, state: S) {
        debug!(?state, "entering workflow state");
        self.states.push(state);
    }

    /// Whether the workflow finished without failures.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Runs workflows against deployments served by a [`Director`].
#[derive(Clone, Copy)]
pub struct Orchestrator<'d> {
    director: &'d dyn Director,
    parallelism: usize,
}

impl<'d> Orchestrator<'d> {
    /// Creates an orchestrator opening at most `parallelism` remote
    /// operations at once per deployment.
    #[must_use]
    pub fn new(director: &'d dyn Director, parallelism: usize) -> Self {
        Self {
            director,
            parallelism: parallelism.clamp(1, MAX_PARALLELISM),
        }
    }

    /// The director workflows talk to.
    #[must_use]
    pub fn director(&self) -> &'d dyn Director {
        self.director
    }

    /// Checks that no instance already has an artifact directory and that
    /// lock dependencies resolve.
    fn check_instances(&self, deployment: &Deployment, purpose: LockPurpose) -> Result<LockOrder, Failures> {
        let mut failures = Failures::new();
        if let Err(errors) = deployment.validate_artifact_names() {
            failures.extend(
                errors
                    .into_iter()
                    .map(|err| Failure::new(FailureKind::Generic, err.to_string())),
            );
        }

        let root = camino::Utf8Path::new(ARTIFACT_ROOT);
        let checks = map_bounded(deployment.instances(), self.parallelism, |instance| {
            instance
                .remote()
                .directory_exists(root)
                .map(|exists| (instance.label(), exists))
                .map_err(|err| (instance.label(), err))
        });
        for check in checks {
            match check {
                Ok((label, true)) => failures.push(
                    Failure::new(
                        FailureKind::ArtifactDirExists,
                        format!("Directory {ARTIFACT_ROOT} already exists on instance {label}"),
                    )
                    .with_subject(label),
                ),
                Ok((_, false)) => {}
                Err((label, err)) => failures.push(remote_failure(
                    FailureKind::Generic,
                    format!("Unable to check for {ARTIFACT_ROOT} on instance {label}"),
                    &label,
                    err,
                )),
            }
        }

        let order = resolve(&deployment.jobs(), purpose);
        match order {
            Ok(order) if failures.is_empty() => Ok(order),
            Ok(_) => Err(failures),
            Err(err) => {
                failures.push(Failure::new(FailureKind::Generic, err.to_string()).with_cause(err));
                Err(failures)
            }
        }
    }

    /// Removes the artifact root on every instance.
    fn remove_artifact_directories(&self, deployment: &Deployment) -> Failures {
        info!("Cleaning up...");
        let root = camino::Utf8Path::new(ARTIFACT_ROOT);
        map_bounded(deployment.instances(), self.parallelism, |instance| {
            instance.remote().remove_directory(root).map_err(|err| {
                let label = instance.label();
                remote_failure(
                    FailureKind::Cleanup,
                    format!("Unable to clean up backup artifact directory on instance {label}"),
                    &label,
                    err,
                )
            })
        })
        .into_iter()
        .filter_map(Result::err)
        .collect()
    }
}

/// Runs one script of one job as an executor item.
struct ScriptStep<'a> {
    handle: JobHandle<'a>,
    script: ScriptKind,
    failure: FailureKind,
}

impl Executable for ScriptStep<'_> {
    fn execute(&self) -> Result<(), Failure> {
        debug!(job = %self.handle, script = %self.script, "running script");
        self.handle.run_script(self.script).map_err(|err| {
            let subject = self.handle.to_string();
            remote_failure(
                self.failure,
                format!(
                    "Error attempting to run {} for job {} on {}",
                    self.script,
                    self.handle.job().name(),
                    self.handle.instance().label()
                ),
                &subject,
                err,
            )
        })
    }
}

fn script_phases<'a>(
    phases: Vec<Vec<JobHandle<'a>>>,
    script: ScriptKind,
    failure: FailureKind,
) -> Vec<Vec<ScriptStep<'a>>> {
    phases
        .into_iter()
        .map(|phase| {
            phase
                .into_iter()
                .map(|handle| ScriptStep {
                    handle,
                    script,
                    failure,
                })
                .collect()
        })
        .collect()
}

fn remote_failure(
    kind: FailureKind,
    message: String,
    subject: &str,
    err: crate::remote::RemoteError,
) -> Failure {
    let kind = if err.is_transport() && kind == FailureKind::Generic {
        FailureKind::SshTransport
    } else {
        kind
    };
    Failure::new(kind, message).with_subject(subject).with_cause(err)
}

fn now(format: &str) -> String {
    chrono::Utc::now().format(format).to_string()
}

/// Timestamp for naming a backup directory or error log started now.
#[must_use]
pub fn directory_timestamp() -> String {
    now(DIRECTORY_TIMESTAMP_FORMAT)
}

#[cfg(test)]
mod tests;
