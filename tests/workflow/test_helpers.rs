//! Shared fixtures for backup and restore BDD scenarios.

use std::fmt::Debug;
use std::sync::Arc;

use bbr::director::InstanceSpec;
use bbr::job::ScriptKind;
use bbr::test_support::{FakeDirector, FakeRemote, Journal};
use bbr::workflow::Outcome;
use camino::Utf8PathBuf;
use rstest::fixture;
use tempfile::TempDir;
use thiserror::Error;

pub const TIMESTAMP: &str = "20261018T101500Z";

/// Contents every job writes into its artifact.
pub const DUMP: &str = "dump";

#[derive(Clone, Debug)]
pub struct ScriptedInstance {
    pub host: String,
    pub job: String,
    pub remote: FakeRemote,
}

#[derive(Clone, Debug)]
pub struct WorkflowContext {
    pub journal: Journal,
    pub deployment: String,
    pub instances: Vec<ScriptedInstance>,
    pub workspace: Utf8PathBuf,
    pub backup: Option<WorkflowResult>,
    pub restore: Option<WorkflowResult>,
    pub(crate) workspace_tmp: Arc<TempDir>,
}

/// What the steps check once a workflow has run.
#[derive(Clone, Debug)]
pub struct WorkflowResult {
    pub succeeded: bool,
    pub exit_code: i32,
    pub report: String,
    pub backup_directory: Option<Utf8PathBuf>,
}

impl WorkflowResult {
    pub fn from_outcome<S: Debug>(outcome: &Outcome<S>, cleanup_command: &str) -> Self {
        Self {
            succeeded: outcome.succeeded(),
            exit_code: outcome.failures.exit_code(),
            report: outcome.failures.report(cleanup_command),
            backup_directory: outcome.backup_directory.clone(),
        }
    }
}

#[derive(Clone, Debug, Error)]
pub enum WorkflowTestError {
    #[error("failed to create workspace: {0}")]
    Workspace(String),
    #[error("instance {0} is not part of the deployment")]
    UnknownInstance(String),
    #[error("host {0} should read <group>/<index>")]
    MalformedHost(String),
}

#[fixture]
pub fn workflow_context_result() -> Result<WorkflowContext, WorkflowTestError> {
    build_workflow_context()
}

#[fixture]
pub fn workflow_context(
    workflow_context_result: Result<WorkflowContext, WorkflowTestError>,
) -> WorkflowContext {
    workflow_context_result
        .unwrap_or_else(|err| panic!("workflow context fixture should initialise: {err}"))
}

pub fn build_workflow_context() -> Result<WorkflowContext, WorkflowTestError> {
    let tmp_dir =
        TempDir::new().map_err(|err| WorkflowTestError::Workspace(format!("tempdir: {err}")))?;
    let workspace = Utf8PathBuf::from_path_buf(tmp_dir.path().to_path_buf()).map_err(|path| {
        WorkflowTestError::Workspace(format!("non-utf8 tempdir path: {}", path.display()))
    })?;

    Ok(WorkflowContext {
        journal: Journal::new(),
        deployment: String::from("redis-dev"),
        instances: Vec::new(),
        workspace,
        backup: None,
        restore: None,
        workspace_tmp: Arc::new(tmp_dir),
    })
}

impl WorkflowContext {
    pub fn add_instance(&mut self, host: &str, job: &str, remote: FakeRemote) {
        self.instances.push(ScriptedInstance {
            host: host.to_owned(),
            job: job.to_owned(),
            remote,
        });
    }

    pub fn instance_mut(&mut self, host: &str) -> Result<&mut ScriptedInstance, WorkflowTestError> {
        self.instances
            .iter_mut()
            .find(|instance| instance.host == host)
            .ok_or_else(|| WorkflowTestError::UnknownInstance(host.to_owned()))
    }

    pub fn director(&self) -> Result<FakeDirector, WorkflowTestError> {
        self.instances
            .iter()
            .enumerate()
            .try_fold(FakeDirector::new(), |director, (position, instance)| {
                let (group, index) = instance
                    .host
                    .split_once('/')
                    .ok_or_else(|| WorkflowTestError::MalformedHost(instance.host.clone()))?;
                let spec = InstanceSpec::new(group, index, format!("10.0.0.{}", position + 1));
                Ok(director.with_instance(&self.deployment, spec, instance.remote.clone()))
            })
    }

    pub fn cleanup_command(&self) -> String {
        format!("bbr deployment --deployment {} backup-cleanup", self.deployment)
    }

    /// Jobs whose `script` started, in start order.
    pub fn jobs_started(&self, script: ScriptKind) -> Vec<String> {
        let suffix = format!(" {script}");
        self.journal
            .started()
            .into_iter()
            .filter(|label| label.ends_with(&suffix))
            .filter_map(|label| label.split(' ').nth(1).map(str::to_owned))
            .collect()
    }

    /// The restore result when one ran, otherwise the backup result.
    pub fn latest(&self) -> Option<&WorkflowResult> {
        self.restore.as_ref().or(self.backup.as_ref())
    }
}

pub fn locked_before(job: &str) -> String {
    format!("backup_should_be_locked_before:\n- job_name: {job}\n")
}
