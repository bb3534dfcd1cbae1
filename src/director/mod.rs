//! The service that enumerates a deployment's instances and brokers SSH to
//! them.
//!
//! [`BoshCliDirector`] shells out to the `bosh` CLI; [`DirectDirector`] treats
//! a single SSH-reachable VM (the BOSH director itself) as a one-instance
//! deployment.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::remote::{ProxyError, RemoteError, RemoteRunner};

mod bosh;
mod direct;

pub use bosh::{BoshCliDirector, BoshEnvironment, InstanceAccess};
pub use direct::{DIRECTOR_GROUP, DirectDirector};

/// One VM as reported by the director.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceSpec {
    /// Instance group name, for example `redis`.
    pub group: String,
    /// Instance index, or UUID when the director reports no index.
    pub id: String,
    /// Address SSH connects to.
    pub address: String,
    /// Release providing each job, keyed by job name.
    pub job_releases: BTreeMap<String, String>,
}

impl InstanceSpec {
    /// Creates a spec without release information.
    #[must_use]
    pub fn new(group: impl Into<String>, id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            id: id.into(),
            address: address.into(),
            job_releases: BTreeMap::new(),
        }
    }

    /// Records the release a job comes from.
    #[must_use]
    pub fn with_release(mut self, job: impl Into<String>, release: impl Into<String>) -> Self {
        self.job_releases.insert(job.into(), release.into());
        self
    }

    /// Display label, for example `redis/0`.
    #[must_use]
    pub fn label(&self) -> String {
        format!("{}/{}", self.group, self.id)
    }
}

/// Errors raised while talking to the director.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum DirectorError {
    /// Raised when the director CLI exits non-zero.
    #[error("{program} exited with status {status_text}: {stderr}")]
    Command {
        /// Program that failed (typically `bosh`).
        program: String,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Stderr captured from the command.
        stderr: String,
    },
    /// Raised when director output cannot be understood.
    #[error("failed to parse {what}: {message}")]
    Parse {
        /// What was being parsed, for example `instances`.
        what: String,
        /// Parser error message.
        message: String,
    },
    /// Raised when `BOSH_ALL_PROXY` is malformed.
    #[error(transparent)]
    Proxy(#[from] ProxyError),
    /// Raised when the director CLI cannot be executed.
    #[error(transparent)]
    Runner(#[from] RemoteError),
}

/// Contract the workflows need from a director.
pub trait Director: Send + Sync {
    /// Names of every deployment the director manages.
    ///
    /// # Errors
    ///
    /// Returns [`DirectorError`] when the director cannot be queried.
    fn list_deployments(&self) -> Result<Vec<String>, DirectorError>;

    /// VMs of `deployment`, in director order.
    ///
    /// # Errors
    ///
    /// Returns [`DirectorError`] when the deployment is unknown or the
    /// director cannot be queried.
    fn find_instances(&self, deployment: &str) -> Result<Vec<InstanceSpec>, DirectorError>;

    /// Opens a remote runner for one VM.
    ///
    /// # Errors
    ///
    /// Returns [`DirectorError`] when no session can be prepared.
    fn connect(
        &self,
        deployment: &str,
        spec: &InstanceSpec,
    ) -> Result<Box<dyn RemoteRunner>, DirectorError>;
}
