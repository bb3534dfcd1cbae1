//! Director mode: the BOSH director VM reached directly over SSH.

use super::{Director, DirectorError, InstanceSpec};
use crate::remote::{CommandRunner, ProcessCommandRunner, RemoteRunner, SshOptions, SshRemote, SshTarget};

/// Instance group the director VM is reported under.
pub const DIRECTOR_GROUP: &str = "bosh";

/// Presents a single host as a deployment named after it.
#[derive(Clone, Debug)]
pub struct DirectDirector<R: CommandRunner + Clone + 'static> {
    target: SshTarget,
    ssh: SshOptions,
    runner: R,
}

impl DirectDirector<ProcessCommandRunner> {
    /// Creates a director wired to the real process runner.
    #[must_use]
    pub const fn with_process_runner(target: SshTarget, ssh: SshOptions) -> Self {
        Self::new(target, ssh, ProcessCommandRunner)
    }
}

impl<R: CommandRunner + Clone + 'static> DirectDirector<R> {
    /// Creates a director for `target`.
    #[must_use]
    pub const fn new(target: SshTarget, ssh: SshOptions, runner: R) -> Self {
        Self { target, ssh, runner }
    }

    /// Deployment name used for the director VM.
    #[must_use]
    pub fn deployment_name(&self) -> &str {
        &self.target.host
    }
}

impl<R: CommandRunner + Clone + 'static> Director for DirectDirector<R> {
    fn list_deployments(&self) -> Result<Vec<String>, DirectorError> {
        Ok(vec![self.target.host.clone()])
    }

    fn find_instances(&self, _deployment: &str) -> Result<Vec<InstanceSpec>, DirectorError> {
        Ok(vec![InstanceSpec::new(
            DIRECTOR_GROUP,
            "0",
            self.target.host.clone(),
        )])
    }

    fn connect(
        &self,
        _deployment: &str,
        spec: &InstanceSpec,
    ) -> Result<Box<dyn RemoteRunner>, DirectorError> {
        Ok(Box::new(SshRemote::new(
            spec.label(),
            self.target.clone(),
            self.ssh.clone(),
            self.runner.clone(),
        )))
    }
}
