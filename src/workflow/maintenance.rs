//! Pre-backup-check and the post-failure cleanup workflows.

use tracing::info;

use super::{Orchestrator, Outcome};
use crate::discovery::discover_deployment;

/// States of the pre-backup-check workflow.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CheckState {
    /// Finding instances and scripts.
    Discovery,
    /// Checking the deployment can be backed up.
    PreCheck,
    /// Done.
    Finished,
}

/// States of the cleanup workflows.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CleanupState {
    /// Finding instances.
    Discovery,
    /// Removing artifact directories from every instance.
    Cleanup,
    /// Done.
    Finished,
}

impl Orchestrator<'_> {
    /// Reports whether `deployment` can be backed up without touching it.
    #[must_use]
    pub fn pre_backup_check(&self, deployment: &str) -> Outcome<CheckState> {
        let mut outcome = Outcome::new();
        outcome.enter(CheckState::Discovery);
        let discovered = match discover_deployment(self.director, deployment, self.parallelism) {
            Ok(discovered) => discovered,
            Err(failures) => {
                outcome.failures.extend(failures);
                return outcome;
            }
        };

        outcome.enter(CheckState::PreCheck);
        if let Err(failures) = self.check_backupable(&discovered) {
            outcome.failures.extend(failures);
            return outcome;
        }
        info!("Deployment '{deployment}' can be backed up.");
        outcome.enter(CheckState::Finished);
        outcome
    }

    /// Removes leftover artifact directories from every instance of
    /// `deployment`. Succeeds when they are already gone.
    #[must_use]
    pub fn cleanup(&self, deployment: &str) -> Outcome<CleanupState> {
        let mut outcome = Outcome::new();
        outcome.enter(CleanupState::Discovery);
        let discovered = match discover_deployment(self.director, deployment, self.parallelism) {
            Ok(discovered) => discovered,
            Err(failures) => {
                outcome.failures.extend(failures);
                return outcome;
            }
        };

        outcome.enter(CleanupState::Cleanup);
        let failures = self.remove_artifact_directories(&discovered);
        outcome.failures.extend(failures);
        if outcome.failures.is_empty() {
            info!("'{deployment}' cleaned up");
        }
        outcome.enter(CleanupState::Finished);
        outcome
    }
}
