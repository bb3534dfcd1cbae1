//! Runs one single-deployment workflow across every deployment a director
//! knows about.

use camino::Utf8PathBuf;
use tracing::info;

use crate::executor::{Strategy, map_bounded};
use crate::failure::{Failure, FailureKind, Failures};
use crate::workflow::Orchestrator;

/// Workflow applied to each deployment. Restore has no fleet form.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FleetAction {
    /// Back up into `<workspace>/<deployment>_<timestamp>/`.
    Backup {
        /// Local directory receiving every backup.
        workspace: Utf8PathBuf,
        /// Shared timestamp naming each backup directory.
        timestamp: String,
    },
    /// Check every deployment can be backed up.
    PreBackupCheck,
    /// Remove leftover artifact directories.
    Cleanup,
}

impl FleetAction {
    fn run(&self, orchestrator: &Orchestrator<'_>, deployment: &str) -> Failures {
        match self {
            Self::Backup {
                workspace,
                timestamp,
            } => orchestrator.backup(deployment, workspace, timestamp).failures,
            Self::PreBackupCheck => orchestrator.pre_backup_check(deployment).failures,
            Self::Cleanup => orchestrator.cleanup(deployment).failures,
        }
    }
}

/// Failures of one deployment within a fleet run.
#[derive(Debug)]
pub struct DeploymentResult {
    /// Deployment name.
    pub deployment: String,
    /// What went wrong; empty on success.
    pub failures: Failures,
}

/// Outcome of a fleet run, in director order.
#[derive(Debug, Default)]
pub struct FleetReport {
    /// One entry per deployment.
    pub results: Vec<DeploymentResult>,
}

impl FleetReport {
    /// Results that carry failures.
    pub fn failed(&self) -> impl Iterator<Item = &DeploymentResult> {
        self.results.iter().filter(|result| !result.failures.is_empty())
    }

    /// Whether every deployment succeeded.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.failed().next().is_none()
    }

    /// Whether any deployment may have been left locked or dirty.
    #[must_use]
    pub fn cleanup_advised(&self) -> bool {
        self.failed().any(|result| result.failures.cleanup_advised())
    }

    /// Process exit code for the whole run.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        i32::from(!self.succeeded())
    }

    /// "N out of M deployments failed:" followed by one paragraph per failed
    /// deployment. Empty when everything succeeded.
    #[must_use]
    pub fn summary(&self) -> String {
        let failed: Vec<&DeploymentResult> = self.failed().collect();
        if failed.is_empty() {
            return String::new();
        }
        let mut out = format!(
            "{} out of {} deployments failed:\n",
            failed.len(),
            self.results.len()
        );
        for result in failed {
            out.push_str(&format!(
                "\nDeployment '{}':\n{}\n",
                result.deployment,
                result.failures.pretty()
            ));
        }
        out
    }

    /// Every failure across the fleet, each tagged with its deployment.
    #[must_use]
    pub fn merged(&self) -> Failures {
        self.failed()
            .flat_map(|result| {
                result.failures.iter().map(|failure| {
                    let subject = match failure.subject() {
                        Some(subject) => format!("{} {subject}", result.deployment),
                        None => result.deployment.clone(),
                    };
                    Failure::new(failure.kind(), failure.message()).with_subject(subject)
                })
            })
            .collect()
    }
}

/// Applies `action` to every deployment listed by the orchestrator's
/// director.
///
/// # Errors
///
/// Returns the listing failure when the director cannot enumerate its
/// deployments; nothing runs in that case.
pub fn run_all(
    orchestrator: &Orchestrator<'_>,
    action: &FleetAction,
    strategy: Strategy,
) -> Result<FleetReport, Failures> {
    let deployments = orchestrator.director().list_deployments().map_err(|err| {
        Failures::from(
            Failure::new(FailureKind::Generic, "Failed to list deployments").with_cause(err),
        )
    })?;
    info!("Pending: {}", deployments.join(", "));

    let results = map_bounded(&deployments, strategy.width(), |deployment| {
        info!("Starting {deployment}");
        let failures = action.run(orchestrator, deployment);
        if failures.is_empty() {
            info!("Finished {deployment}");
        } else {
            info!("Failed {deployment}");
        }
        DeploymentResult {
            deployment: deployment.clone(),
            failures,
        }
    });

    let report = FleetReport { results };
    info!(
        "Successfully processed {} out of {} deployments",
        report.results.len() - report.failed().count(),
        report.results.len()
    );
    Ok(report)
}
