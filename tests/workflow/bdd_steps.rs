//! BDD step definitions for the backup and restore workflows.

use bbr::artifact::BackupDirectory;
use bbr::job::{ARTIFACT_ROOT, ScriptKind};
use bbr::test_support::{FakeRemote, ScriptBehaviour};
use bbr::workflow::Orchestrator;
use rstest_bdd_macros::{given, then, when};

use super::test_helpers::{
    DUMP, TIMESTAMP, WorkflowContext, WorkflowResult, WorkflowTestError, locked_before,
};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error(transparent)]
    Setup(#[from] WorkflowTestError),
    #[error("assertion failed: {0}")]
    Assertion(String),
}

fn dump() -> ScriptBehaviour {
    ScriptBehaviour::WriteArtifact(vec![(String::from("dump"), DUMP.as_bytes().to_vec())])
}

fn lockable(workflow_context: &WorkflowContext, host: &str, job: &str) -> FakeRemote {
    FakeRemote::new(host, &workflow_context.journal)
        .with_script(job, ScriptKind::PreBackupLock, ScriptBehaviour::Succeed)
        .with_script(job, ScriptKind::Backup, dump())
}

fn backup_directory(workflow_context: &WorkflowContext) -> Result<BackupDirectory, StepError> {
    let path = workflow_context
        .backup
        .as_ref()
        .and_then(|result| result.backup_directory.clone())
        .ok_or_else(|| StepError::Assertion(String::from("no backup directory recorded")))?;
    BackupDirectory::open(&path)
        .map_err(|err| StepError::Assertion(format!("open backup {path}: {err}")))
}

fn latest(workflow_context: &WorkflowContext) -> Result<&WorkflowResult, StepError> {
    workflow_context
        .latest()
        .ok_or_else(|| StepError::Assertion(String::from("no workflow has run")))
}

#[given("a deployment named \"{name}\"")]
fn deployment_named(mut workflow_context: WorkflowContext, name: String) -> WorkflowContext {
    workflow_context.deployment = name;
    workflow_context
}

#[given("instance \"{host}\" runs job \"{job}\" with a backup script")]
fn instance_with_backup(
    mut workflow_context: WorkflowContext,
    host: String,
    job: String,
) -> WorkflowContext {
    let remote = FakeRemote::new(host.as_str(), &workflow_context.journal)
        .with_script(&job, ScriptKind::Backup, dump());
    workflow_context.add_instance(&host, &job, remote);
    workflow_context
}

#[given("instance \"{host}\" runs job \"{job}\" with only a restore script")]
fn instance_with_restore_only(
    mut workflow_context: WorkflowContext,
    host: String,
    job: String,
) -> WorkflowContext {
    let remote = FakeRemote::new(host.as_str(), &workflow_context.journal)
        .with_script(&job, ScriptKind::Restore, ScriptBehaviour::Succeed);
    workflow_context.add_instance(&host, &job, remote);
    workflow_context
}

#[given("instance \"{host}\" still has an artifact directory")]
fn leftover_directory(
    mut workflow_context: WorkflowContext,
    host: String,
) -> Result<WorkflowContext, StepError> {
    let instance = workflow_context.instance_mut(&host)?;
    instance.remote = instance.remote.clone().with_directory(ARTIFACT_ROOT);
    Ok(workflow_context)
}

#[given("instance \"{host}\" runs lockable job \"{job}\" locked before \"{dependency}\"")]
fn lockable_with_dependency(
    mut workflow_context: WorkflowContext,
    host: String,
    job: String,
    dependency: String,
) -> WorkflowContext {
    let remote = lockable(&workflow_context, &host, &job)
        .with_script(&job, ScriptKind::PostBackupUnlock, ScriptBehaviour::Succeed)
        .with_metadata(&job, &locked_before(&dependency));
    workflow_context.add_instance(&host, &job, remote);
    workflow_context
}

#[given("instance \"{host}\" runs lockable job \"{job}\" with no dependencies")]
fn lockable_job(mut workflow_context: WorkflowContext, host: String, job: String) -> WorkflowContext {
    let remote = lockable(&workflow_context, &host, &job).with_script(
        &job,
        ScriptKind::PostBackupUnlock,
        ScriptBehaviour::Succeed,
    );
    workflow_context.add_instance(&host, &job, remote);
    workflow_context
}

#[given("instance \"{host}\" runs lockable job \"{job}\" whose unlock fails")]
fn lockable_job_failing_unlock(
    mut workflow_context: WorkflowContext,
    host: String,
    job: String,
) -> WorkflowContext {
    let remote = lockable(&workflow_context, &host, &job).with_script(
        &job,
        ScriptKind::PostBackupUnlock,
        ScriptBehaviour::Fail {
            exit_code: 1,
            stderr: String::from("still locked"),
        },
    );
    workflow_context.add_instance(&host, &job, remote);
    workflow_context
}

#[given("instance \"{host}\" runs job \"{job}\" sharing artifact \"{artifact}\"")]
fn shared_job(
    mut workflow_context: WorkflowContext,
    host: String,
    job: String,
    artifact: String,
) -> WorkflowContext {
    let remote = FakeRemote::new(host.as_str(), &workflow_context.journal)
        .with_script(&job, ScriptKind::Backup, dump())
        .with_script(&job, ScriptKind::Restore, ScriptBehaviour::CaptureArtifact)
        .with_metadata(
            &job,
            &format!("backup_name: {artifact}\nbackup_one_restore_all: true\n"),
        );
    workflow_context.add_instance(&host, &job, remote);
    workflow_context
}

#[when("I back up the deployment")]
fn back_up(mut workflow_context: WorkflowContext) -> Result<WorkflowContext, StepError> {
    let director = workflow_context.director()?;
    let outcome = Orchestrator::new(&director, 10).backup(
        &workflow_context.deployment,
        &workflow_context.workspace,
        TIMESTAMP,
    );
    workflow_context.backup = Some(WorkflowResult::from_outcome(
        &outcome,
        &workflow_context.cleanup_command(),
    ));
    Ok(workflow_context)
}

#[when("I restore the backup into the deployment")]
fn restore(mut workflow_context: WorkflowContext) -> Result<WorkflowContext, StepError> {
    let backup = workflow_context
        .backup
        .as_ref()
        .and_then(|result| result.backup_directory.clone())
        .ok_or_else(|| StepError::Assertion(String::from("restore needs a finished backup")))?;
    let director = workflow_context.director()?;
    let outcome = Orchestrator::new(&director, 10).restore(&workflow_context.deployment, &backup);
    let cleanup = format!(
        "bbr deployment --deployment {} restore-cleanup",
        workflow_context.deployment
    );
    workflow_context.restore = Some(WorkflowResult::from_outcome(&outcome, &cleanup));
    Ok(workflow_context)
}

#[then("the workflow succeeds")]
fn workflow_succeeds(workflow_context: &WorkflowContext) -> Result<(), StepError> {
    for result in [&workflow_context.backup, &workflow_context.restore]
        .into_iter()
        .flatten()
    {
        if !result.succeeded {
            return Err(StepError::Assertion(format!(
                "workflow failed:\n{}",
                result.report
            )));
        }
    }
    latest(workflow_context).map(|_| ())
}

#[then("the workflow exits with code \"{code}\"")]
fn workflow_exit_code(workflow_context: &WorkflowContext, code: i32) -> Result<(), StepError> {
    let result = latest(workflow_context)?;
    if result.exit_code == code {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected exit code {code}, got {}",
            result.exit_code
        )))
    }
}

#[then("the failure report mentions \"{text}\"")]
fn report_mentions(workflow_context: &WorkflowContext, text: String) -> Result<(), StepError> {
    let result = latest(workflow_context)?;
    if result.report.contains(&text) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "report should mention {text:?}:\n{}",
            result.report
        )))
    }
}

#[then("the failure report advises cleanup")]
fn report_advises_cleanup(workflow_context: &WorkflowContext) -> Result<(), StepError> {
    let result = latest(workflow_context)?;
    let command = workflow_context.cleanup_command();
    if result.report.contains(&command) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "report should advise {command}:\n{}",
            result.report
        )))
    }
}

#[then("the backup holds artifact \"{artifact}\"")]
fn backup_holds(workflow_context: &WorkflowContext, artifact: String) -> Result<(), StepError> {
    if backup_directory(workflow_context)?.has_artifact(&artifact) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!("missing artifact {artifact}")))
    }
}

#[then("the backup holds only artifact \"{artifact}\"")]
fn backup_holds_only(
    workflow_context: &WorkflowContext,
    artifact: String,
) -> Result<(), StepError> {
    let manifest = backup_directory(workflow_context)?
        .read_manifest()
        .map_err(|err| StepError::Assertion(format!("read manifest: {err}")))?;
    let names: Vec<&str> = manifest
        .artifacts
        .iter()
        .map(|record| record.artifact_name.as_str())
        .collect();
    if names == [artifact.as_str()] {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected only {artifact}, found {names:?}"
        )))
    }
}

#[then("no backup directory was created")]
fn no_backup_directory(workflow_context: &WorkflowContext) -> Result<(), StepError> {
    let expected = workflow_context
        .workspace
        .join(format!("{}_{TIMESTAMP}", workflow_context.deployment));
    if expected.exists() {
        Err(StepError::Assertion(format!("{expected} should not exist")))
    } else {
        Ok(())
    }
}

#[then("no instance keeps an artifact directory")]
fn no_artifact_directories(workflow_context: &WorkflowContext) -> Result<(), StepError> {
    match workflow_context
        .instances
        .iter()
        .find(|instance| instance.remote.has_directory(ARTIFACT_ROOT))
    {
        Some(instance) => Err(StepError::Assertion(format!(
            "{} still has {ARTIFACT_ROOT}",
            instance.host
        ))),
        None => Ok(()),
    }
}

#[then("no backup script ran")]
fn no_backup_script_ran(workflow_context: &WorkflowContext) -> Result<(), StepError> {
    let ran = workflow_context.jobs_started(ScriptKind::Backup);
    if ran.is_empty() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!("backup scripts ran for {ran:?}")))
    }
}

#[then("jobs were locked in the order \"{order}\"")]
fn locked_in_order(workflow_context: &WorkflowContext, order: String) -> Result<(), StepError> {
    assert_order(workflow_context, ScriptKind::PreBackupLock, &order)
}

#[then("jobs were unlocked in the order \"{order}\"")]
fn unlocked_in_order(workflow_context: &WorkflowContext, order: String) -> Result<(), StepError> {
    assert_order(workflow_context, ScriptKind::PostBackupUnlock, &order)
}

fn assert_order(
    workflow_context: &WorkflowContext,
    script: ScriptKind,
    order: &str,
) -> Result<(), StepError> {
    let expected: Vec<&str> = order.split(',').map(str::trim).collect();
    let actual = workflow_context.jobs_started(script);
    if actual == expected {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "{script} order: expected {expected:?}, got {actual:?}"
        )))
    }
}

#[then("every instance restored the shared artifact")]
fn every_instance_restored(workflow_context: &WorkflowContext) -> Result<(), StepError> {
    for instance in &workflow_context.instances {
        let captured = instance
            .remote
            .captured(&instance.job, ScriptKind::Restore)
            .ok_or_else(|| {
                StepError::Assertion(format!("restore did not run on {}", instance.host))
            })?;
        if captured.get("dump").map(Vec::as_slice) != Some(DUMP.as_bytes()) {
            return Err(StepError::Assertion(format!(
                "{} restored {captured:?}",
                instance.host
            )));
        }
    }
    Ok(())
}
