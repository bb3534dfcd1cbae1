//! Restore: verify the backup, discovery, pre-check, lock, transfer,
//! restore, unlock, cleanup.

use camino::Utf8Path;
use tracing::info;

use super::{Orchestrator, Outcome, script_phases};
use crate::artifact::{ArtifactRecord, BackupDirectory, Manifest, upload, verify_local};
use crate::discovery::discover_deployment;
use crate::executor::{OnFailure, PhasedExecutor, Strategy, map_bounded};
use crate::failure::{Failure, FailureKind, Failures};
use crate::instance::{Deployment, JobHandle};
use crate::job::ScriptKind;
use crate::ordering::{LockOrder, LockPurpose};

/// States of the restore workflow.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RestoreState {
    /// Nothing has happened yet.
    Init,
    /// Checking local tars against the manifest.
    VerifyBackup,
    /// Finding instances and scripts.
    Discovery,
    /// Matching the backup to the deployment.
    PreCheck,
    /// Running pre-restore-lock scripts in lock order.
    PreRestoreLock,
    /// Copying artifacts to every restoring instance.
    Transfer,
    /// Running restore scripts.
    Restore,
    /// Running post-restore-unlock scripts in reverse lock order.
    PostRestoreUnlock,
    /// Removing artifact directories from every instance.
    Cleanup,
    /// Done.
    Finished,
}

struct RestorePlan<'a> {
    order: LockOrder,
    transfers: Vec<(JobHandle<'a>, &'a ArtifactRecord)>,
}

impl Orchestrator<'_> {
    /// Restores `deployment` from the backup directory at `backup_path`.
    ///
    /// Nothing runs on any instance until every listed tar matches the
    /// manifest. Artifacts reach every restoring instance before any restore
    /// script runs; scripts run one at a time within a lock group.
    #[must_use]
    pub fn restore(&self, deployment: &str, backup_path: &Utf8Path) -> Outcome<RestoreState> {
        let mut outcome = Outcome::new();
        outcome.enter(RestoreState::Init);
        info!("Starting restore of {deployment}...");

        outcome.enter(RestoreState::VerifyBackup);
        let (directory, manifest) = match verify_backup(backup_path) {
            Ok(verified) => verified,
            Err(failures) => {
                outcome.failures.extend(failures);
                return outcome;
            }
        };

        outcome.enter(RestoreState::Discovery);
        let discovered = match discover_deployment(self.director, deployment, self.parallelism) {
            Ok(discovered) => discovered,
            Err(failures) => {
                outcome.failures.extend(failures);
                return outcome;
            }
        };

        outcome.enter(RestoreState::PreCheck);
        let plan = match self.check_restorable(&discovered, &manifest) {
            Ok(plan) => plan,
            Err(failures) => {
                outcome.failures.extend(failures);
                return outcome;
            }
        };

        let executor = PhasedExecutor::new(Strategy::Serial);
        let jobs = discovered.jobs();

        outcome.enter(RestoreState::PreRestoreLock);
        info!("Running pre-restore-lock scripts...");
        let lock = executor.run(
            &script_phases(
                plan.order.phases(&jobs, ScriptKind::PreRestoreLock),
                ScriptKind::PreRestoreLock,
                FailureKind::Lock,
            ),
            OnFailure::Halt,
        );
        let locked = lock.failures.is_empty();
        outcome.failures.extend(lock.failures);

        if locked {
            outcome.enter(RestoreState::Transfer);
            let failures = self.transfer(&directory, &plan.transfers);
            let transferred = failures.is_empty();
            outcome.failures.extend(failures);

            if transferred {
                outcome.enter(RestoreState::Restore);
                info!("Running restore scripts...");
                let restore = executor.run(
                    &script_phases(
                        plan.order.phases(&jobs, ScriptKind::Restore),
                        ScriptKind::Restore,
                        FailureKind::ScriptExit,
                    ),
                    OnFailure::Halt,
                );
                outcome.failures.extend(restore.failures);
                info!("Finished running restore scripts.");
            }
        }

        outcome.enter(RestoreState::PostRestoreUnlock);
        info!("Running post-restore-unlock scripts...");
        let unlock = executor.run(
            &script_phases(
                plan.order
                    .unlock_phases(&jobs, ScriptKind::PostRestoreUnlock, lock.phases_run),
                ScriptKind::PostRestoreUnlock,
                FailureKind::Unlock,
            ),
            OnFailure::Continue,
        );
        outcome.failures.extend(unlock.failures);

        outcome.enter(RestoreState::Cleanup);
        let failures = self.remove_artifact_directories(&discovered);
        outcome.failures.extend(failures);

        if outcome.failures.is_empty() {
            info!("Completed restore of {deployment}");
        }
        outcome.enter(RestoreState::Finished);
        outcome
    }

    fn check_restorable<'a>(
        &self,
        deployment: &'a Deployment,
        manifest: &'a Manifest,
    ) -> Result<RestorePlan<'a>, Failures> {
        info!("Running pre-checks for restore of {}...", deployment.name());
        if !deployment.has_restore_scripts() {
            return Err(Failures::from(Failure::new(
                FailureKind::NoRestoreScripts,
                format!("Deployment '{}' has no restore scripts", deployment.name()),
            )));
        }

        let mut failures = Failures::new();
        let mut transfers = Vec::new();
        for handle in deployment.restore_targets() {
            let artifact = handle.job().restore_artifact_name();
            match manifest.find(&artifact) {
                Some(record) => transfers.push((handle, record)),
                None => failures.push(
                    Failure::new(
                        FailureKind::ManifestMismatch,
                        format!(
                            "Deployment '{}' does not match the backup: no artifact {artifact} for job {handle}",
                            deployment.name()
                        ),
                    )
                    .with_subject(handle.to_string()),
                ),
            }
        }
        for record in &manifest.artifacts {
            let targeted = transfers
                .iter()
                .any(|(_, target)| target.artifact_name == record.artifact_name);
            if !targeted {
                failures.push(Failure::new(
                    FailureKind::ManifestMismatch,
                    format!(
                        "Deployment '{}' does not match the backup: artifact {} has no restore target",
                        deployment.name(),
                        record.artifact_name
                    ),
                ));
            }
        }

        match self.check_instances(deployment, LockPurpose::Restore) {
            Ok(order) if failures.is_empty() => Ok(RestorePlan { order, transfers }),
            Ok(_) => Err(failures),
            Err(more) => {
                failures.extend(more);
                Err(failures)
            }
        }
    }

    fn transfer(
        &self,
        directory: &BackupDirectory,
        transfers: &[(JobHandle<'_>, &ArtifactRecord)],
    ) -> Failures {
        map_bounded(transfers, self.parallelism, |(handle, record)| {
            upload(directory, record, *handle).map_err(|err| {
                Failure::new(err.kind(), err.to_string())
                    .with_subject(handle.to_string())
                    .with_cause(err)
            })
        })
        .into_iter()
        .filter_map(Result::err)
        .collect()
    }
}

/// Opens the backup and checks every listed tar against its digests.
fn verify_backup(path: &Utf8Path) -> Result<(BackupDirectory, Manifest), Failures> {
    let mismatch = |err: crate::artifact::ArtifactError| {
        Failure::new(FailureKind::ManifestMismatch, err.to_string()).with_cause(err)
    };
    let directory = BackupDirectory::open(path).map_err(|err| Failures::from(mismatch(err)))?;
    let manifest = directory
        .read_manifest()
        .map_err(|err| Failures::from(mismatch(err)))?;
    let failures: Failures = manifest
        .artifacts
        .iter()
        .filter_map(|record| verify_local(&directory, record).err())
        .map(mismatch)
        .collect();
    if failures.is_empty() {
        Ok((directory, manifest))
    } else {
        Err(failures)
    }
}
