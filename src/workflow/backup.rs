//! Backup: discovery, pre-check, lock, backup, unlock, drain, cleanup.

use camino::Utf8Path;
use tracing::info;

use super::{
    ACTIVITY_TIME_FORMAT, Orchestrator, Outcome, ScriptStep, now, remote_failure, script_phases,
};
use crate::artifact::{ArtifactRecord, BackupActivity, BackupDirectory, Manifest, download};
use crate::discovery::discover_deployment;
use crate::executor::{Executable, OnFailure, PhasedExecutor, Strategy, map_bounded};
use crate::failure::{Failure, FailureKind, Failures};
use crate::instance::Deployment;
use crate::job::ScriptKind;
use crate::ordering::{LockOrder, LockPurpose};
use crate::remote::human_size;

/// States of the backup workflow.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BackupState {
    /// Nothing has happened yet.
    Init,
    /// Finding instances and scripts.
    Discovery,
    /// Checking the deployment can be backed up.
    PreCheck,
    /// Running pre-backup-lock scripts in lock order.
    PreBackupLock,
    /// Running backup scripts.
    Backup,
    /// Running post-backup-unlock scripts in reverse lock order.
    PostBackupUnlock,
    /// Copying artifacts to the backup directory.
    Drain,
    /// Removing artifact directories from every instance.
    Cleanup,
    /// Done.
    Finished,
}

impl Orchestrator<'_> {
    /// Backs up `deployment` into `<workspace>/<deployment>_<timestamp>/`.
    ///
    /// Once anything may have been locked, unlock runs for every attempted
    /// lock group and cleanup runs on every instance, whatever failed.
    #[must_use]
    pub fn backup(
        &self,
        deployment: &str,
        workspace: &Utf8Path,
        timestamp: &str,
    ) -> Outcome<BackupState> {
        let mut outcome = Outcome::new();
        outcome.enter(BackupState::Init);
        let start_time = now(ACTIVITY_TIME_FORMAT);
        info!("Starting backup of {deployment}...");

        outcome.enter(BackupState::Discovery);
        let discovered = match discover_deployment(self.director, deployment, self.parallelism) {
            Ok(discovered) => discovered,
            Err(failures) => {
                outcome.failures.extend(failures);
                return outcome;
            }
        };

        outcome.enter(BackupState::PreCheck);
        let order = match self.check_backupable(&discovered) {
            Ok(order) => order,
            Err(failures) => {
                outcome.failures.extend(failures);
                return outcome;
            }
        };
        let directory = match BackupDirectory::create(workspace, deployment, timestamp) {
            Ok(directory) => directory,
            Err(err) => {
                outcome
                    .failures
                    .push(Failure::new(err.kind(), err.to_string()).with_cause(err));
                return outcome;
            }
        };
        outcome.backup_directory = Some(directory.path().to_path_buf());

        let executor = PhasedExecutor::new(Strategy::Parallel(self.parallelism));
        let jobs = discovered.jobs();

        outcome.enter(BackupState::PreBackupLock);
        info!("Running pre-backup-lock scripts...");
        let lock = executor.run(
            &script_phases(
                order.phases(&jobs, ScriptKind::PreBackupLock),
                ScriptKind::PreBackupLock,
                FailureKind::Lock,
            ),
            OnFailure::Halt,
        );
        let locked = lock.failures.is_empty();
        outcome.failures.extend(lock.failures);
        info!("Finished running pre-backup-lock scripts.");

        let mut backed_up = false;
        if locked {
            outcome.enter(BackupState::Backup);
            info!("Running backup scripts...");
            let failures = self.run_backup_scripts(&discovered);
            backed_up = failures.is_empty();
            outcome.failures.extend(failures);
            info!("Finished running backup scripts.");
        }

        outcome.enter(BackupState::PostBackupUnlock);
        info!("Running post-backup-unlock scripts...");
        let unlock = executor.run(
            &script_phases(
                order.unlock_phases(&jobs, ScriptKind::PostBackupUnlock, lock.phases_run),
                ScriptKind::PostBackupUnlock,
                FailureKind::PostBackupUnlock,
            ),
            OnFailure::Continue,
        );
        outcome.failures.extend(unlock.failures);
        info!("Finished running post-backup-unlock scripts.");

        if backed_up {
            outcome.enter(BackupState::Drain);
            let failures = self.drain(&discovered, &directory, timestamp, start_time);
            outcome.failures.extend(failures);
        }

        outcome.enter(BackupState::Cleanup);
        let failures = self.remove_artifact_directories(&discovered);
        outcome.failures.extend(failures);

        outcome.enter(BackupState::Finished);
        outcome
    }

    /// Pre-check shared with the pre-backup-check workflow.
    pub(super) fn check_backupable(&self, deployment: &Deployment) -> Result<LockOrder, Failures> {
        info!("Running pre-checks for backup of {}...", deployment.name());
        if !deployment.has_backup_scripts() {
            return Err(Failures::from(Failure::new(
                FailureKind::NoBackupScripts,
                format!("Deployment '{}' has no backup scripts", deployment.name()),
            )));
        }
        self.check_instances(deployment, LockPurpose::Backup)
    }

    fn run_backup_scripts(&self, deployment: &Deployment) -> Failures {
        let producers = deployment.backup_producers();
        map_bounded(&producers, self.parallelism, |handle| {
            let directory = handle.job().backup_artifact_directory();
            handle.remote().create_directory(&directory).map_err(|err| {
                let subject = handle.to_string();
                remote_failure(
                    FailureKind::Generic,
                    format!("Unable to create {directory} on instance {}", handle.instance().label()),
                    &subject,
                    err,
                )
            })?;
            ScriptStep {
                handle: *handle,
                script: ScriptKind::Backup,
                failure: FailureKind::ScriptExit,
            }
            .execute()
        })
        .into_iter()
        .filter_map(Result::err)
        .collect()
    }

    fn drain(
        &self,
        deployment: &Deployment,
        directory: &BackupDirectory,
        timestamp: &str,
        start_time: String,
    ) -> Failures {
        let producers = deployment.backup_producers();
        let results = map_bounded(&producers, self.parallelism, |handle| {
            download(*handle, directory).map_err(|err| {
                Failure::new(err.kind(), err.to_string())
                    .with_subject(handle.to_string())
                    .with_cause(err)
            })
        });

        let mut failures = Failures::new();
        let mut artifacts: Vec<ArtifactRecord> = Vec::with_capacity(results.len());
        for result in results {
            match result {
                Ok(record) => artifacts.push(record),
                Err(failure) => failures.push(failure),
            }
        }
        if !failures.is_empty() {
            return failures;
        }

        let manifest = Manifest {
            deployment: deployment.name().to_owned(),
            timestamp: timestamp.to_owned(),
            backup_activity: BackupActivity {
                start_time,
                finish_time: now(ACTIVITY_TIME_FORMAT),
            },
            artifacts,
        };
        if let Err(err) = directory.write_manifest(&manifest) {
            failures.push(Failure::new(err.kind(), err.to_string()).with_cause(err));
            return failures;
        }

        info!("Backup created of {} on {}", deployment.name(), directory.path());
        for record in &manifest.artifacts {
            info!("  {}.tar: {}", record.artifact_name, human_size(record.size));
        }
        failures
    }
}
