//! Workflow tests driven through the in-memory director.

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use rstest::rstest;

use super::*;
use crate::artifact::BackupDirectory;
use crate::director::InstanceSpec;
use crate::test_support::{FakeDirector, FakeRemote, Journal, JournalEvent, ScriptBehaviour};

const ROOT: &str = "/var/vcap/store/bbr-backup";
const TIMESTAMP: &str = "20261018T101500Z";

fn workspace() -> (tempfile::TempDir, Utf8PathBuf) {
    let tmp = tempfile::tempdir().expect("tempdir");
    let path = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).expect("utf8 tempdir");
    (tmp, path)
}

fn dump(contents: &str) -> ScriptBehaviour {
    ScriptBehaviour::WriteArtifact(vec![(String::from("dump"), contents.as_bytes().to_vec())])
}

fn redis(journal: &Journal, host: &str) -> FakeRemote {
    FakeRemote::new(host, journal).with_script("redis-server", ScriptKind::Backup, dump(host))
}

fn redis_director(journal: &Journal) -> (FakeDirector, Vec<FakeRemote>) {
    let remotes = vec![
        redis(journal, "redis/0"),
        redis(journal, "redis/1"),
        redis(journal, "other-redis/0"),
    ];
    let director = FakeDirector::new()
        .with_instance("redis-dev", InstanceSpec::new("redis", "0", "10.0.0.1"), remotes[0].clone())
        .with_instance("redis-dev", InstanceSpec::new("redis", "1", "10.0.0.2"), remotes[1].clone())
        .with_instance(
            "redis-dev",
            InstanceSpec::new("other-redis", "0", "10.0.0.3"),
            remotes[2].clone(),
        );
    (director, remotes)
}

/// One job per instance, each lockable, backing up and restoring.
fn lockable(journal: &Journal, job: &str, metadata: &str) -> FakeRemote {
    FakeRemote::new(format!("{job}/0"), journal)
        .with_script(job, ScriptKind::PreBackupLock, ScriptBehaviour::Succeed)
        .with_script(job, ScriptKind::Backup, dump(job))
        .with_script(job, ScriptKind::PostBackupUnlock, ScriptBehaviour::Succeed)
        .with_metadata(job, metadata)
}

fn cf_director(remotes: &[(&str, FakeRemote)]) -> FakeDirector {
    remotes.iter().fold(FakeDirector::new(), |director, (job, remote)| {
        director.with_instance("cf", InstanceSpec::new(*job, "0", "10.0.0.9"), remote.clone())
    })
}

fn locked_before(job: &str) -> String {
    format!("backup_should_be_locked_before:\n- job_name: {job}\n")
}

fn started(journal: &Journal, script: ScriptKind) -> Vec<String> {
    let suffix = format!(" {script}");
    journal
        .started()
        .into_iter()
        .filter(|label| label.ends_with(&suffix))
        .collect()
}

#[test]
fn basic_backup_writes_one_tar_per_instance_and_cleans_up() {
    let (_tmp, ws) = workspace();
    let journal = Journal::new();
    let (director, remotes) = redis_director(&journal);

    let outcome = Orchestrator::new(&director, 10).backup("redis-dev", &ws, TIMESTAMP);

    assert!(outcome.succeeded(), "{}", outcome.failures.stack());
    assert_eq!(
        outcome.states,
        vec![
            BackupState::Init,
            BackupState::Discovery,
            BackupState::PreCheck,
            BackupState::PreBackupLock,
            BackupState::Backup,
            BackupState::PostBackupUnlock,
            BackupState::Drain,
            BackupState::Cleanup,
            BackupState::Finished,
        ]
    );
    let backup_dir = ws.join("redis-dev_20261018T101500Z");
    assert_eq!(outcome.backup_directory.as_deref(), Some(backup_dir.as_path()));
    let directory = BackupDirectory::open(&backup_dir).expect("backup dir");
    for artifact in ["redis-0-redis-server", "redis-1-redis-server", "other-redis-0-redis-server"] {
        assert!(directory.has_artifact(artifact), "missing {artifact}");
    }
    let manifest = directory.read_manifest().expect("manifest");
    assert_eq!(manifest.artifacts.len(), 3);
    assert_eq!(manifest.timestamp, TIMESTAMP);
    assert!(remotes.iter().all(|remote| !remote.has_directory(ROOT)));
}

#[test]
fn missing_backup_scripts_fail_before_anything_is_created() {
    let (_tmp, ws) = workspace();
    let journal = Journal::new();
    let remote = FakeRemote::new("redis/0", &journal).with_script(
        "redis-server",
        ScriptKind::Restore,
        ScriptBehaviour::Succeed,
    );
    let director =
        FakeDirector::new().with_instance("redis-dev", InstanceSpec::new("redis", "0", "10.0.0.1"), remote);

    let outcome = Orchestrator::new(&director, 10).backup("redis-dev", &ws, TIMESTAMP);

    assert_eq!(outcome.failures.exit_code(), 1);
    assert!(outcome.failures.contains(FailureKind::NoBackupScripts));
    assert!(outcome.failures.pretty().contains("Deployment 'redis-dev' has no backup scripts"));
    assert_eq!(outcome.states.last(), Some(&BackupState::PreCheck));
    assert!(!ws.join("redis-dev_20261018T101500Z").exists());
}

#[test]
fn existing_artifact_directory_blocks_backup_and_advises_cleanup() {
    let (_tmp, ws) = workspace();
    let journal = Journal::new();
    let blocked = redis(&journal, "redis/1").with_directory(ROOT);
    let director = FakeDirector::new()
        .with_instance("redis-dev", InstanceSpec::new("redis", "0", "10.0.0.1"), redis(&journal, "redis/0"))
        .with_instance("redis-dev", InstanceSpec::new("redis", "1", "10.0.0.2"), blocked.clone());

    let outcome = Orchestrator::new(&director, 10).backup("redis-dev", &ws, TIMESTAMP);

    assert!(outcome.failures.contains_artifact_dir_exists());
    let report = outcome.failures.report("bbr deployment --deployment redis-dev backup-cleanup");
    assert!(report.contains("Directory /var/vcap/store/bbr-backup already exists on instance redis/1"));
    assert!(report.contains("backup-cleanup"));
    assert!(blocked.has_directory(ROOT), "pre-existing directory must be left alone");
    assert!(started(&journal, ScriptKind::Backup).is_empty());
}

#[test]
fn lock_order_follows_dependencies_and_unlock_reverses_it() {
    let (_tmp, ws) = workspace();
    let journal = Journal::new();
    let director = cf_director(&[
        ("capi-consumer-1", lockable(&journal, "capi-consumer-1", &locked_before("capi"))),
        ("capi-consumer-2", lockable(&journal, "capi-consumer-2", &locked_before("capi"))),
        ("capi", lockable(&journal, "capi", &locked_before("redis"))),
        ("redis", lockable(&journal, "redis", "")),
    ]);

    let outcome = Orchestrator::new(&director, 10).backup("cf", &ws, TIMESTAMP);

    assert!(outcome.succeeded(), "{}", outcome.failures.stack());
    let locks = started(&journal, ScriptKind::PreBackupLock);
    assert_eq!(locks.len(), 4);
    let mut consumers = locks[..2].to_vec();
    consumers.sort();
    assert_eq!(
        consumers,
        vec![
            "capi-consumer-1/0 capi-consumer-1 pre-backup-lock",
            "capi-consumer-2/0 capi-consumer-2 pre-backup-lock",
        ]
    );
    assert_eq!(locks[2], "capi/0 capi pre-backup-lock");
    assert_eq!(locks[3], "redis/0 redis pre-backup-lock");

    let finished_capi = journal.position(&JournalEvent::Finished(locks[2].clone()));
    let started_redis = journal.position(&JournalEvent::Started(locks[3].clone()));
    assert!(finished_capi < started_redis);

    let unlocks = started(&journal, ScriptKind::PostBackupUnlock);
    assert_eq!(unlocks[0], "redis/0 redis post-backup-unlock");
    assert_eq!(unlocks[1], "capi/0 capi post-backup-unlock");
    assert_eq!(unlocks.len(), 4);
}

#[test]
fn lock_failure_unlocks_attempted_groups_and_skips_backup() {
    let (_tmp, ws) = workspace();
    let journal = Journal::new();
    let failing_capi = FakeRemote::new("capi/0", &journal)
        .with_script(
            "capi",
            ScriptKind::PreBackupLock,
            ScriptBehaviour::Fail {
                exit_code: 1,
                stderr: String::from("cannot quiesce"),
            },
        )
        .with_script("capi", ScriptKind::Backup, dump("capi"))
        .with_script("capi", ScriptKind::PostBackupUnlock, ScriptBehaviour::Succeed)
        .with_metadata("capi", &locked_before("redis"));
    let redis = lockable(&journal, "redis", "");
    let director = cf_director(&[
        ("consumer", lockable(&journal, "consumer", &locked_before("capi"))),
        ("capi", failing_capi),
        ("redis", redis.clone()),
    ]);

    let outcome = Orchestrator::new(&director, 10).backup("cf", &ws, TIMESTAMP);

    assert!(outcome.failures.contains(FailureKind::Lock));
    assert!(outcome.failures.contains_lock_or_cleanup());
    assert!(!outcome.states.contains(&BackupState::Backup));
    assert!(!outcome.states.contains(&BackupState::Drain));
    assert_eq!(outcome.states.last(), Some(&BackupState::Finished));
    assert!(
        started(&journal, ScriptKind::PreBackupLock)
            .iter()
            .all(|label| !label.starts_with("redis/0")),
        "the group after the failure must not be locked"
    );
    assert_eq!(
        started(&journal, ScriptKind::PostBackupUnlock),
        vec!["capi/0 capi post-backup-unlock", "consumer/0 consumer post-backup-unlock"]
    );
    assert!(started(&journal, ScriptKind::Backup).is_empty());
    assert!(!redis.has_directory(ROOT));
}

#[test]
fn backup_script_failure_still_unlocks_everything_and_cleans_up() {
    let (_tmp, ws) = workspace();
    let journal = Journal::new();
    let broken = FakeRemote::new("redis/0", &journal)
        .with_script("redis", ScriptKind::PreBackupLock, ScriptBehaviour::Succeed)
        .with_script(
            "redis",
            ScriptKind::Backup,
            ScriptBehaviour::Fail {
                exit_code: 2,
                stderr: String::from("disk full"),
            },
        )
        .with_script("redis", ScriptKind::PostBackupUnlock, ScriptBehaviour::Succeed);
    let director = cf_director(&[("redis", broken.clone()), ("capi", lockable(&journal, "capi", ""))]);

    let outcome = Orchestrator::new(&director, 10).backup("cf", &ws, TIMESTAMP);

    assert!(outcome.failures.contains(FailureKind::ScriptExit));
    assert!(!outcome.failures.cleanup_advised());
    assert!(outcome.failures.pretty().contains("disk full"));
    assert_eq!(started(&journal, ScriptKind::PostBackupUnlock).len(), 2);
    assert!(!outcome.states.contains(&BackupState::Drain));
    assert!(!broken.has_directory(ROOT));
}

#[test]
fn unlock_failure_is_flagged_but_artifacts_are_still_drained() {
    let (_tmp, ws) = workspace();
    let journal = Journal::new();
    let remote = FakeRemote::new("redis/0", &journal)
        .with_script("redis", ScriptKind::PreBackupLock, ScriptBehaviour::Succeed)
        .with_script("redis", ScriptKind::Backup, dump("redis"))
        .with_script(
            "redis",
            ScriptKind::PostBackupUnlock,
            ScriptBehaviour::Fail {
                exit_code: 1,
                stderr: String::from("still locked"),
            },
        );
    let director = cf_director(&[("redis", remote)]);

    let outcome = Orchestrator::new(&director, 10).backup("cf", &ws, TIMESTAMP);

    assert!(outcome.failures.contains(FailureKind::PostBackupUnlock));
    assert!(outcome.failures.cleanup_advised());
    assert!(outcome.states.contains(&BackupState::Drain));
    let directory = BackupDirectory::open(&ws.join("cf_20261018T101500Z")).expect("backup dir");
    assert!(directory.has_artifact("redis-0-redis"));
}

#[test]
fn corrupted_transfer_fails_with_checksum_mismatch_and_cleans_up() {
    let (_tmp, ws) = workspace();
    let journal = Journal::new();
    let remote = redis(&journal, "redis/0").with_corrupt_downloads();
    let director = FakeDirector::new().with_instance(
        "redis-dev",
        InstanceSpec::new("redis", "0", "10.0.0.1"),
        remote.clone(),
    );

    let outcome = Orchestrator::new(&director, 10).backup("redis-dev", &ws, TIMESTAMP);

    assert!(outcome.failures.contains(FailureKind::ChecksumMismatch));
    assert!(outcome.states.contains(&BackupState::Cleanup));
    assert!(!remote.has_directory(ROOT));
}

#[test]
fn failed_cleanup_is_tagged_for_recovery_advice() {
    let (_tmp, ws) = workspace();
    let journal = Journal::new();
    let remote = redis(&journal, "redis/0").with_failing_removal("rm: cannot remove: Device busy");
    let director = FakeDirector::new().with_instance(
        "redis-dev",
        InstanceSpec::new("redis", "0", "10.0.0.1"),
        remote,
    );

    let outcome = Orchestrator::new(&director, 10).backup("redis-dev", &ws, TIMESTAMP);

    assert!(outcome.failures.contains(FailureKind::Cleanup));
    assert!(outcome.failures.contains_lock_or_cleanup());
}

#[rstest]
#[case(1)]
#[case(4)]
#[case(10)]
fn remote_fan_out_stays_within_the_limit(#[case] parallelism: usize) {
    let (_tmp, ws) = workspace();
    let journal = Journal::new();
    let director = (0..25).fold(FakeDirector::new(), |director, index| {
        let host = format!("redis/{index}");
        let remote = redis(&journal, &host).with_latency(Duration::from_millis(2));
        director.with_instance(
            "redis-dev",
            InstanceSpec::new("redis", index.to_string(), "10.0.0.1"),
            remote,
        )
    });

    let outcome = Orchestrator::new(&director, parallelism).backup("redis-dev", &ws, TIMESTAMP);

    assert!(outcome.succeeded(), "{}", outcome.failures.stack());
    assert!(journal.peak_concurrency() <= parallelism);
}

fn shared_remote(journal: &Journal, host: &str, restore: ScriptBehaviour) -> FakeRemote {
    FakeRemote::new(host, journal)
        .with_script("redis-server", ScriptKind::Backup, dump("shared"))
        .with_script("redis-server", ScriptKind::Restore, restore)
        .with_metadata(
            "redis-server",
            "backup_name: redis-shared\nbackup_one_restore_all: true\n",
        )
}

fn shared_director(journal: &Journal, restore: ScriptBehaviour) -> (FakeDirector, Vec<FakeRemote>) {
    let remotes = vec![
        shared_remote(journal, "redis/0", restore.clone()),
        shared_remote(journal, "redis/1", restore),
    ];
    let director = FakeDirector::new()
        .with_instance("redis-dev", InstanceSpec::new("redis", "0", "10.0.0.1"), remotes[0].clone())
        .with_instance("redis-dev", InstanceSpec::new("redis", "1", "10.0.0.2"), remotes[1].clone());
    (director, remotes)
}

fn backed_up_shared(ws: &Utf8Path) -> Utf8PathBuf {
    let journal = Journal::new();
    let (director, _) = shared_director(&journal, ScriptBehaviour::Succeed);
    let outcome = Orchestrator::new(&director, 10).backup("redis-dev", ws, TIMESTAMP);
    assert!(outcome.succeeded(), "{}", outcome.failures.stack());
    outcome.backup_directory.expect("backup directory")
}

#[test]
fn backup_one_restore_all_backs_up_once_and_restores_everywhere() {
    let (_tmp, ws) = workspace();
    let backup = backed_up_shared(&ws);
    let directory = BackupDirectory::open(&backup).expect("backup dir");
    let manifest = directory.read_manifest().expect("manifest");
    assert_eq!(manifest.artifacts.len(), 1);
    assert!(directory.has_artifact("redis-shared"));
    assert!(manifest.artifacts.iter().all(|record| record.custom_artifact));

    let journal = Journal::new();
    let (director, remotes) = shared_director(&journal, ScriptBehaviour::CaptureArtifact);
    let outcome = Orchestrator::new(&director, 10).restore("redis-dev", &backup);

    assert!(outcome.succeeded(), "{}", outcome.failures.stack());
    for remote in &remotes {
        let captured = remote
            .captured("redis-server", ScriptKind::Restore)
            .expect("restore script ran");
        assert_eq!(captured.get("dump").cloned(), Some(b"shared".to_vec()));
        assert!(!remote.has_directory(ROOT));
    }
    let events = journal.started();
    let last_upload = events.iter().rposition(|label| label.contains(" upload "));
    let first_restore = events.iter().position(|label| label.ends_with(" restore"));
    assert!(last_upload < first_restore, "{events:?}");
}

#[test]
fn tampered_backup_fails_before_any_script_runs() {
    let (_tmp, ws) = workspace();
    let backup = backed_up_shared(&ws);
    std::fs::write(backup.join("redis-shared.tar"), b"not the original").expect("tamper");

    let journal = Journal::new();
    let (director, _) = shared_director(&journal, ScriptBehaviour::CaptureArtifact);
    let outcome = Orchestrator::new(&director, 10).restore("redis-dev", &backup);

    assert!(outcome.failures.contains(FailureKind::ManifestMismatch));
    assert_eq!(outcome.states.last(), Some(&RestoreState::VerifyBackup));
    assert!(journal.started().is_empty(), "{:?}", journal.started());
}

#[test]
fn missing_tar_fails_with_manifest_mismatch() {
    let (_tmp, ws) = workspace();
    let backup = backed_up_shared(&ws);
    std::fs::remove_file(backup.join("redis-shared.tar")).expect("remove tar");

    let journal = Journal::new();
    let (director, _) = shared_director(&journal, ScriptBehaviour::Succeed);
    let outcome = Orchestrator::new(&director, 10).restore("redis-dev", &backup);

    assert!(outcome.failures.contains(FailureKind::ManifestMismatch));
    assert!(journal.started().is_empty());
}

/// One job per instance with restore-side lock scripts.
fn restorable(journal: &Journal, job: &str, metadata: &str) -> FakeRemote {
    FakeRemote::new(format!("{job}/0"), journal)
        .with_script(job, ScriptKind::PreRestoreLock, ScriptBehaviour::Succeed)
        .with_script(job, ScriptKind::Restore, ScriptBehaviour::CaptureArtifact)
        .with_script(job, ScriptKind::PostRestoreUnlock, ScriptBehaviour::Succeed)
        .with_metadata(job, metadata)
}

fn restore_locked_before(job: &str) -> String {
    format!("restore_should_be_locked_before:\n- job_name: {job}\n")
}

fn backed_up_cf(ws: &Utf8Path, jobs: &[&str]) -> Utf8PathBuf {
    let journal = Journal::new();
    let remotes: Vec<(&str, FakeRemote)> = jobs
        .iter()
        .map(|job| (*job, lockable(&journal, job, "")))
        .collect();
    let outcome = Orchestrator::new(&cf_director(&remotes), 10).backup("cf", ws, TIMESTAMP);
    assert!(outcome.succeeded(), "{}", outcome.failures.stack());
    outcome.backup_directory.expect("backup directory")
}

#[test]
fn restore_lock_order_follows_dependencies_and_unlock_reverses_it() {
    let (_tmp, ws) = workspace();
    let backup = backed_up_cf(&ws, &["consumer-1", "consumer-2", "capi", "redis"]);

    let journal = Journal::new();
    let director = cf_director(&[
        ("consumer-1", restorable(&journal, "consumer-1", &restore_locked_before("capi"))),
        ("consumer-2", restorable(&journal, "consumer-2", &restore_locked_before("capi"))),
        ("capi", restorable(&journal, "capi", &restore_locked_before("redis"))),
        ("redis", restorable(&journal, "redis", "")),
    ]);

    let outcome = Orchestrator::new(&director, 10).restore("cf", &backup);

    assert!(outcome.succeeded(), "{}", outcome.failures.stack());
    let locks = started(&journal, ScriptKind::PreRestoreLock);
    assert_eq!(locks.len(), 4);
    let mut consumers = locks[..2].to_vec();
    consumers.sort();
    assert_eq!(
        consumers,
        vec![
            "consumer-1/0 consumer-1 pre-restore-lock",
            "consumer-2/0 consumer-2 pre-restore-lock",
        ]
    );
    assert_eq!(locks[2], "capi/0 capi pre-restore-lock");
    assert_eq!(locks[3], "redis/0 redis pre-restore-lock");

    let unlocks = started(&journal, ScriptKind::PostRestoreUnlock);
    assert_eq!(unlocks.len(), 4);
    assert_eq!(unlocks[0], "redis/0 redis post-restore-unlock");
    assert_eq!(unlocks[1], "capi/0 capi post-restore-unlock");
    let mut consumers = unlocks[2..].to_vec();
    consumers.sort();
    assert_eq!(
        consumers,
        vec![
            "consumer-1/0 consumer-1 post-restore-unlock",
            "consumer-2/0 consumer-2 post-restore-unlock",
        ]
    );

    let last_lock = journal.position(&JournalEvent::Finished(locks[3].clone()));
    let first_restore = journal
        .events()
        .iter()
        .position(|event| matches!(event, JournalEvent::Started(label) if label.ends_with(" restore")));
    assert!(last_lock < first_restore);
}

#[test]
fn restore_lock_failure_unlocks_attempted_groups_and_skips_restore() {
    let (_tmp, ws) = workspace();
    let backup = backed_up_cf(&ws, &["consumer", "capi", "redis"]);

    let journal = Journal::new();
    let failing_capi = FakeRemote::new("capi/0", &journal)
        .with_script(
            "capi",
            ScriptKind::PreRestoreLock,
            ScriptBehaviour::Fail {
                exit_code: 1,
                stderr: String::from("cannot stop workers"),
            },
        )
        .with_script("capi", ScriptKind::Restore, ScriptBehaviour::CaptureArtifact)
        .with_script("capi", ScriptKind::PostRestoreUnlock, ScriptBehaviour::Succeed)
        .with_metadata("capi", &restore_locked_before("redis"));
    let redis = restorable(&journal, "redis", "");
    let director = cf_director(&[
        ("consumer", restorable(&journal, "consumer", &restore_locked_before("capi"))),
        ("capi", failing_capi),
        ("redis", redis.clone()),
    ]);

    let outcome = Orchestrator::new(&director, 10).restore("cf", &backup);

    assert!(outcome.failures.contains(FailureKind::Lock));
    assert!(outcome.failures.contains_lock_or_cleanup());
    assert!(outcome.failures.pretty().contains("cannot stop workers"));
    assert!(!outcome.states.contains(&RestoreState::Transfer));
    assert!(!outcome.states.contains(&RestoreState::Restore));
    assert_eq!(outcome.states.last(), Some(&RestoreState::Finished));
    assert!(
        started(&journal, ScriptKind::PreRestoreLock)
            .iter()
            .all(|label| !label.starts_with("redis/0")),
        "the group after the failure must not be locked"
    );
    assert_eq!(
        started(&journal, ScriptKind::PostRestoreUnlock),
        vec!["capi/0 capi post-restore-unlock", "consumer/0 consumer post-restore-unlock"]
    );
    assert!(started(&journal, ScriptKind::Restore).is_empty());
    assert!(redis.captured("redis", ScriptKind::Restore).is_none());
    assert!(!redis.has_directory(ROOT));
}

#[test]
fn restore_requires_an_artifact_for_every_target() {
    let (_tmp, ws) = workspace();
    let backup = backed_up_shared(&ws);

    let journal = Journal::new();
    let stranger = FakeRemote::new("mysql/0", &journal)
        .with_script("mysql", ScriptKind::Restore, ScriptBehaviour::Succeed);
    let (director, _) = shared_director(&journal, ScriptBehaviour::Succeed);
    let director = director.with_instance("redis-dev", InstanceSpec::new("mysql", "0", "10.0.0.5"), stranger);

    let outcome = Orchestrator::new(&director, 10).restore("redis-dev", &backup);

    assert!(outcome.failures.contains(FailureKind::ManifestMismatch));
    assert!(outcome.failures.pretty().contains("no artifact mysql-0-mysql for job mysql/0 mysql"));
    assert!(started(&journal, ScriptKind::Restore).is_empty());
}

#[test]
fn restore_without_restore_scripts_is_refused() {
    let (_tmp, ws) = workspace();
    let backup = backed_up_shared(&ws);
    let journal = Journal::new();
    let (director, _) = redis_director(&journal);

    let outcome = Orchestrator::new(&director, 10).restore("redis-dev", &backup);

    assert!(outcome.failures.contains(FailureKind::NoRestoreScripts));
}

#[test]
fn cleanup_is_idempotent() {
    let journal = Journal::new();
    let remote = redis(&journal, "redis/0").with_directory("/var/vcap/store/bbr-backup/redis-server");
    let director = FakeDirector::new().with_instance(
        "redis-dev",
        InstanceSpec::new("redis", "0", "10.0.0.1"),
        remote.clone(),
    );
    let orchestrator = Orchestrator::new(&director, 10);

    let first = orchestrator.cleanup("redis-dev");
    let second = orchestrator.cleanup("redis-dev");

    assert!(first.succeeded());
    assert!(second.succeeded());
    assert_eq!(second.states.last(), Some(&CleanupState::Finished));
    assert!(!remote.has_directory(ROOT));
}

#[test]
fn pre_backup_check_touches_nothing() {
    let journal = Journal::new();
    let (director, remotes) = redis_director(&journal);

    let outcome = Orchestrator::new(&director, 10).pre_backup_check("redis-dev");

    assert!(outcome.succeeded());
    assert_eq!(
        outcome.states,
        vec![CheckState::Discovery, CheckState::PreCheck, CheckState::Finished]
    );
    assert!(started(&journal, ScriptKind::Backup).is_empty());
    assert!(remotes.iter().all(|remote| !remote.has_directory(ROOT)));
}

#[test]
fn pre_backup_check_reports_cyclic_lock_order() {
    let journal = Journal::new();
    let director = cf_director(&[
        ("a", lockable(&journal, "a", &locked_before("b"))),
        ("b", lockable(&journal, "b", &locked_before("a"))),
    ]);

    let outcome = Orchestrator::new(&director, 10).pre_backup_check("cf");

    assert!(!outcome.succeeded());
    assert!(outcome.failures.pretty().contains("cyclic"));
}
