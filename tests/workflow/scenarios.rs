//! BDD scenarios for the backup and restore workflows.

use rstest_bdd_macros::scenario;

use super::test_helpers::{WorkflowContext, workflow_context};

#[scenario(
    path = "tests/features/workflow.feature",
    name = "Back up every instance of a deployment"
)]
fn scenario_basic_backup(workflow_context: WorkflowContext) {
    let _ = workflow_context;
}

#[scenario(
    path = "tests/features/workflow.feature",
    name = "Refuse a deployment without backup scripts"
)]
fn scenario_no_backup_scripts(workflow_context: WorkflowContext) {
    let _ = workflow_context;
}

#[scenario(
    path = "tests/features/workflow.feature",
    name = "Refuse to overwrite a leftover artifact directory"
)]
fn scenario_artifact_directory_exists(workflow_context: WorkflowContext) {
    let _ = workflow_context;
}

#[scenario(
    path = "tests/features/workflow.feature",
    name = "Lock jobs in dependency order and unlock in reverse"
)]
fn scenario_lock_order(workflow_context: WorkflowContext) {
    let _ = workflow_context;
}

#[scenario(
    path = "tests/features/workflow.feature",
    name = "Restore a backup-one-restore-all job on every instance"
)]
fn scenario_shared_restore(workflow_context: WorkflowContext) {
    let _ = workflow_context;
}

#[scenario(
    path = "tests/features/workflow.feature",
    name = "Drain artifacts even when unlocking fails"
)]
fn scenario_failed_unlock_still_drains(workflow_context: WorkflowContext) {
    let _ = workflow_context;
}
