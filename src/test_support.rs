//! Test support utilities shared across unit and integration tests.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard as StdMutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use camino::Utf8Path;
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, MutexGuard};

use crate::director::{Director, DirectorError, InstanceSpec};
use crate::job::{ARTIFACT_DIRECTORY_ENV, ScriptKind, parse_script_path, script_path};
use crate::remote::{
    ChecksumMap, CommandOutput, CommandRunner, DirectorySize, LineSink, RemoteError,
    RemoteRunner, StreamIo, StreamedOutput,
};

fn lock<T>(mutex: &StdMutex<T>) -> StdMutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
/// Clones share the same queue, so a test can keep a handle after moving a
/// clone into the code under test.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Arc<StdMutex<VecDeque<CommandOutput>>>,
    invocations: Arc<StdMutex<Vec<CommandInvocation>>>,
    stdin_payloads: Arc<StdMutex<Vec<Vec<u8>>>>,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
    /// Extra environment variables set on the child.
    pub env: Vec<(String, String)>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        lock(&self.invocations).clone()
    }

    /// Returns everything streamed into stdin, one entry per invocation.
    #[must_use]
    pub fn stdin_payloads(&self) -> Vec<Vec<u8>> {
        lock(&self.stdin_payloads).clone()
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a specific exit code.
    pub fn push_exit_code(&self, code: i32) {
        self.push_output(Some(code), "", "");
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        lock(&self.responses).push_back(CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        });
    }

    fn next(
        &self,
        program: &str,
        args: &[OsString],
        env: &[(String, String)],
    ) -> Result<CommandOutput, RemoteError> {
        lock(&self.invocations).push(CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
            env: env.to_vec(),
        });
        lock(&self.responses)
            .pop_front()
            .ok_or_else(|| RemoteError::Spawn {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            })
    }
}

impl CommandRunner for ScriptedRunner {
    fn run_with_env(
        &self,
        program: &str,
        args: &[OsString],
        env: &[(String, String)],
    ) -> Result<CommandOutput, RemoteError> {
        self.next(program, args, env)
    }

    fn run_streaming(
        &self,
        program: &str,
        args: &[OsString],
        io: StreamIo<'_>,
    ) -> Result<StreamedOutput, RemoteError> {
        let output = self.next(program, args, &[])?;
        if let Some(stdin) = io.stdin {
            let mut payload = Vec::new();
            stdin
                .read_to_end(&mut payload)
                .map_err(|err| stream_error(program, &err))?;
            lock(&self.stdin_payloads).push(payload);
        }
        io.stdout
            .write_all(output.stdout.as_bytes())
            .map_err(|err| stream_error(program, &err))?;
        Ok(StreamedOutput {
            code: output.code,
            stderr: output.stderr,
        })
    }
}

fn stream_error(program: &str, err: &io::Error) -> RemoteError {
    RemoteError::Stream {
        host: program.to_owned(),
        operation: String::from("scripted"),
        message: err.to_string(),
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: Mutex<()> = Mutex::const_new(());

/// Guard that holds the env mutex and cleans up variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push((key.to_string(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}

/// One entry in a [`Journal`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum JournalEvent {
    /// An operation began.
    Started(String),
    /// An operation ended, successfully or not.
    Finished(String),
}

#[derive(Debug, Default)]
struct JournalState {
    events: Vec<JournalEvent>,
    in_flight: usize,
    peak: usize,
}

/// Ordered record of remote operations shared by every [`FakeRemote`].
///
/// Labels read `<host> <job> <script>` for scripts, `<host> download <dir>`
/// and `<host> upload <dir>` for transfers, and `<host> remove <dir>` for
/// cleanup.
#[derive(Clone, Debug, Default)]
pub struct Journal {
    state: Arc<StdMutex<JournalState>>,
}

impl Journal {
    /// Creates an empty journal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn start(&self, label: &str) {
        let mut state = lock(&self.state);
        state.events.push(JournalEvent::Started(label.to_owned()));
        state.in_flight += 1;
        state.peak = state.peak.max(state.in_flight);
    }

    fn finish(&self, label: &str) {
        let mut state = lock(&self.state);
        state.events.push(JournalEvent::Finished(label.to_owned()));
        state.in_flight = state.in_flight.saturating_sub(1);
    }

    /// All events in the order they happened.
    #[must_use]
    pub fn events(&self) -> Vec<JournalEvent> {
        lock(&self.state).events.clone()
    }

    /// Labels of started operations, in start order.
    #[must_use]
    pub fn started(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                JournalEvent::Started(label) => Some(label),
                JournalEvent::Finished(_) => None,
            })
            .collect()
    }

    /// Labels of started operations containing `needle`.
    #[must_use]
    pub fn started_matching(&self, needle: &str) -> Vec<String> {
        self.started()
            .into_iter()
            .filter(|label| label.contains(needle))
            .collect()
    }

    /// Index of the first event equal to `event`.
    #[must_use]
    pub fn position(&self, event: &JournalEvent) -> Option<usize> {
        self.events().iter().position(|candidate| candidate == event)
    }

    /// Largest number of operations that were ever in flight at once.
    #[must_use]
    pub fn peak_concurrency(&self) -> usize {
        lock(&self.state).peak
    }
}

/// What a scripted job does when the orchestrator runs it.
#[derive(Clone, Debug)]
pub enum ScriptBehaviour {
    /// Exits zero.
    Succeed,
    /// Exits with `exit_code` after printing `stderr`.
    Fail {
        /// Exit status.
        exit_code: i32,
        /// Text written to stderr.
        stderr: String,
    },
    /// Writes the given files into `$BBR_ARTIFACT_DIRECTORY`.
    WriteArtifact(Vec<(String, Vec<u8>)>),
    /// Prints `stdout` and exits zero.
    Print(String),
    /// Records the contents of `$BBR_ARTIFACT_DIRECTORY` and exits zero.
    CaptureArtifact,
}

#[derive(Debug, Default)]
struct FakeState {
    files: BTreeMap<String, Vec<u8>>,
    directories: BTreeSet<String>,
    scripts: BTreeMap<String, ScriptBehaviour>,
    environments: BTreeMap<String, BTreeMap<String, String>>,
    captured: BTreeMap<String, BTreeMap<String, Vec<u8>>>,
    corrupt_downloads: bool,
    removal_failure: Option<String>,
    unreachable: bool,
}

/// In-memory [`RemoteRunner`] with a file tree and scripted jobs.
#[derive(Clone, Debug)]
pub struct FakeRemote {
    host: String,
    journal: Journal,
    latency: Duration,
    state: Arc<StdMutex<FakeState>>,
}

impl FakeRemote {
    /// Creates a host that records into `journal`.
    #[must_use]
    pub fn new(host: impl Into<String>, journal: &Journal) -> Self {
        Self {
            host: host.into(),
            journal: journal.clone(),
            latency: Duration::ZERO,
            state: Arc::default(),
        }
    }

    /// Makes every operation sleep, so overlapping calls become observable.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Installs a script for `job`.
    #[must_use]
    pub fn with_script(self, job: &str, kind: ScriptKind, behaviour: ScriptBehaviour) -> Self {
        lock(&self.state)
            .scripts
            .insert(script_path(job, kind).into_string(), behaviour);
        self
    }

    /// Installs a `metadata` script printing `yaml`.
    #[must_use]
    pub fn with_metadata(self, job: &str, yaml: &str) -> Self {
        self.with_script(job, ScriptKind::Metadata, ScriptBehaviour::Print(yaml.to_owned()))
    }

    /// Creates a directory before the workflow runs.
    #[must_use]
    pub fn with_directory(self, path: &str) -> Self {
        lock(&self.state).directories.insert(key(Utf8Path::new(path)));
        self
    }

    /// Flips bytes in every archive streamed off this host.
    #[must_use]
    pub fn with_corrupt_downloads(self) -> Self {
        lock(&self.state).corrupt_downloads = true;
        self
    }

    /// Makes every directory removal fail with `stderr`.
    #[must_use]
    pub fn with_failing_removal(self, stderr: &str) -> Self {
        lock(&self.state).removal_failure = Some(stderr.to_owned());
        self
    }

    /// Makes every operation fail as an SSH transport error.
    #[must_use]
    pub fn unreachable(self) -> Self {
        lock(&self.state).unreachable = true;
        self
    }

    /// Files currently stored under `dir`, keyed by relative path.
    #[must_use]
    pub fn files_under(&self, dir: &str) -> BTreeMap<String, Vec<u8>> {
        files_under(&lock(&self.state), &key(Utf8Path::new(dir)))
    }

    /// Whether `path` currently exists as a directory.
    #[must_use]
    pub fn has_directory(&self, path: &str) -> bool {
        has_directory(&lock(&self.state), &key(Utf8Path::new(path)))
    }

    /// Environment the `kind` script of `job` last ran with.
    #[must_use]
    pub fn script_environment(&self, job: &str, kind: ScriptKind) -> Option<BTreeMap<String, String>> {
        lock(&self.state)
            .environments
            .get(script_path(job, kind).as_str())
            .cloned()
    }

    /// Artifact contents a [`ScriptBehaviour::CaptureArtifact`] script saw.
    #[must_use]
    pub fn captured(&self, job: &str, kind: ScriptKind) -> Option<BTreeMap<String, Vec<u8>>> {
        lock(&self.state)
            .captured
            .get(script_path(job, kind).as_str())
            .cloned()
    }

    fn begin(&self, label: &str) -> Result<(), RemoteError> {
        self.journal.start(label);
        if !self.latency.is_zero() {
            thread::sleep(self.latency);
        }
        if lock(&self.state).unreachable {
            self.journal.finish(label);
            return Err(RemoteError::Transport {
                host: self.host.clone(),
                stderr: String::from("ssh: connect to host: Connection refused"),
            });
        }
        Ok(())
    }

    fn command_failure(&self, operation: &str, stderr: &str) -> RemoteError {
        RemoteError::CommandFailure {
            host: self.host.clone(),
            operation: operation.to_owned(),
            status: Some(1),
            status_text: String::from("exit code 1"),
            stderr: stderr.to_owned(),
        }
    }

    fn stream_failure(&self, operation: &str, err: &io::Error) -> RemoteError {
        RemoteError::Stream {
            host: self.host.clone(),
            operation: operation.to_owned(),
            message: err.to_string(),
        }
    }

    fn archive(&self, dir: &str, writer: &mut (dyn Write + Send)) -> Result<(), RemoteError> {
        let (files, corrupt) = {
            let state = lock(&self.state);
            if !has_directory(&state, dir) {
                return Err(self.command_failure(
                    "archive",
                    &format!("tar: {dir}: Cannot open: No such file or directory"),
                ));
            }
            (files_under(&state, dir), state.corrupt_downloads)
        };
        let entries = files.into_iter().map(|(path, mut bytes)| {
            if corrupt {
                if let Some(first) = bytes.first_mut() {
                    *first ^= 0xff;
                } else {
                    bytes.push(0);
                }
            }
            (path, bytes)
        });
        write_tar(writer, entries).map_err(|err| self.stream_failure("archive", &err))
    }

    fn extract(&self, reader: &mut (dyn Read + Send), dir: &str) -> Result<(), RemoteError> {
        let entries = read_tar(reader).map_err(|err| self.stream_failure("extract", &err))?;
        let mut state = lock(&self.state);
        state.directories.insert(dir.to_owned());
        for (path, bytes) in entries {
            state.files.insert(format!("{dir}/{path}"), bytes);
        }
        Ok(())
    }

    fn script(
        &self,
        path: &str,
        env: &BTreeMap<String, String>,
        label: &str,
        sink: LineSink<'_>,
    ) -> Result<(), RemoteError> {
        let behaviour = {
            let mut state = lock(&self.state);
            state.environments.insert(path.to_owned(), env.clone());
            state.scripts.get(path).cloned()
        };
        let artifact_dir = env
            .get(ARTIFACT_DIRECTORY_ENV)
            .map(|dir| key(Utf8Path::new(dir)))
            .unwrap_or_default();
        match behaviour {
            None => Err(RemoteError::ScriptFailed {
                host: self.host.clone(),
                label: label.to_owned(),
                exit_code: Some(127),
                status_text: String::from("exit code 127"),
                stderr: format!("sudo: {path}: command not found"),
            }),
            Some(ScriptBehaviour::Succeed) => Ok(()),
            Some(ScriptBehaviour::Fail { exit_code, stderr }) => Err(RemoteError::ScriptFailed {
                host: self.host.clone(),
                label: label.to_owned(),
                exit_code: Some(exit_code),
                status_text: format!("exit code {exit_code}"),
                stderr,
            }),
            Some(ScriptBehaviour::WriteArtifact(files)) => {
                let mut state = lock(&self.state);
                if !has_directory(&state, &artifact_dir) {
                    return Err(self.command_failure(
                        label,
                        &format!("{artifact_dir}: No such file or directory"),
                    ));
                }
                for (relative, bytes) in files {
                    state.files.insert(format!("{artifact_dir}/{relative}"), bytes);
                }
                Ok(())
            }
            Some(ScriptBehaviour::Print(stdout)) => {
                for line in stdout.lines() {
                    sink(line);
                }
                Ok(())
            }
            Some(ScriptBehaviour::CaptureArtifact) => {
                let mut state = lock(&self.state);
                let contents = files_under(&state, &artifact_dir);
                state.captured.insert(path.to_owned(), contents);
                Ok(())
            }
        }
    }
}

impl RemoteRunner for FakeRemote {
    fn host(&self) -> &str {
        &self.host
    }

    fn directory_exists(&self, path: &Utf8Path) -> Result<bool, RemoteError> {
        let label = format!("{} test {}", self.host, key(path));
        self.begin(&label)?;
        let exists = has_directory(&lock(&self.state), &key(path));
        self.journal.finish(&label);
        Ok(exists)
    }

    fn create_directory(&self, path: &Utf8Path) -> Result<(), RemoteError> {
        let label = format!("{} mkdir {}", self.host, key(path));
        self.begin(&label)?;
        lock(&self.state).directories.insert(key(path));
        self.journal.finish(&label);
        Ok(())
    }

    fn remove_directory(&self, path: &Utf8Path) -> Result<(), RemoteError> {
        let dir = key(path);
        let label = format!("{} remove {dir}", self.host);
        self.begin(&label)?;
        let result = {
            let mut state = lock(&self.state);
            if let Some(stderr) = state.removal_failure.clone() {
                Err(self.command_failure("remove directory", &stderr))
            } else {
                let prefix = format!("{dir}/");
                state
                    .directories
                    .retain(|candidate| candidate != &dir && !candidate.starts_with(&prefix));
                state.files.retain(|candidate, _| !candidate.starts_with(&prefix));
                Ok(())
            }
        };
        self.journal.finish(&label);
        result
    }

    fn archive_and_download(
        &self,
        dir: &Utf8Path,
        writer: &mut (dyn Write + Send),
    ) -> Result<(), RemoteError> {
        let label = format!("{} download {}", self.host, key(dir));
        self.begin(&label)?;
        let result = self.archive(&key(dir), writer);
        self.journal.finish(&label);
        result
    }

    fn extract_and_upload(
        &self,
        reader: &mut (dyn Read + Send),
        dir: &Utf8Path,
    ) -> Result<(), RemoteError> {
        let label = format!("{} upload {}", self.host, key(dir));
        self.begin(&label)?;
        let result = self.extract(reader, &key(dir));
        self.journal.finish(&label);
        result
    }

    fn size_of(&self, path: &Utf8Path) -> Result<DirectorySize, RemoteError> {
        let label = format!("{} du {}", self.host, key(path));
        self.begin(&label)?;
        let bytes = files_under(&lock(&self.state), &key(path))
            .values()
            .map(|bytes| bytes.len() as u64)
            .sum();
        self.journal.finish(&label);
        Ok(DirectorySize::from_bytes(bytes))
    }

    fn checksum_directory(&self, path: &Utf8Path) -> Result<ChecksumMap, RemoteError> {
        let label = format!("{} sha256sum {}", self.host, key(path));
        self.begin(&label)?;
        let checksums = files_under(&lock(&self.state), &key(path))
            .into_iter()
            .map(|(relative, bytes)| (relative, sha256_hex(&bytes)))
            .collect();
        self.journal.finish(&label);
        Ok(checksums)
    }

    fn run_script(
        &self,
        path: &Utf8Path,
        env: &BTreeMap<String, String>,
        label: &str,
        sink: LineSink<'_>,
    ) -> Result<(), RemoteError> {
        let journal_label = parse_script_path(path.as_str()).map_or_else(
            || format!("{} {path}", self.host),
            |(job, kind)| format!("{} {job} {kind}", self.host),
        );
        self.begin(&journal_label)?;
        let result = self.script(path.as_str(), env, label, sink);
        self.journal.finish(&journal_label);
        result
    }

    fn find_files(&self, _glob: &str) -> Result<Vec<String>, RemoteError> {
        let label = format!("{} find scripts", self.host);
        self.begin(&label)?;
        let scripts = lock(&self.state).scripts.keys().cloned().collect();
        self.journal.finish(&label);
        Ok(scripts)
    }
}

fn key(path: &Utf8Path) -> String {
    let trimmed = path.as_str().trim_end_matches('/');
    if trimmed.is_empty() {
        String::from("/")
    } else {
        trimmed.to_owned()
    }
}

fn has_directory(state: &FakeState, dir: &str) -> bool {
    let prefix = format!("{dir}/");
    state.directories.contains(dir)
        || state
            .directories
            .iter()
            .any(|candidate| candidate.starts_with(&prefix))
        || state.files.keys().any(|path| path.starts_with(&prefix))
}

fn files_under(state: &FakeState, dir: &str) -> BTreeMap<String, Vec<u8>> {
    let prefix = format!("{dir}/");
    state
        .files
        .iter()
        .filter_map(|(path, bytes)| {
            path.strip_prefix(&prefix)
                .map(|relative| (relative.to_owned(), bytes.clone()))
        })
        .collect()
}

/// Hex-encoded SHA-256 digest of `bytes`.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Writes a tar archive holding `files` into `writer`.
///
/// # Errors
///
/// Propagates I/O errors from the writer.
pub fn write_tar(
    writer: &mut dyn Write,
    files: impl IntoIterator<Item = (String, Vec<u8>)>,
) -> io::Result<()> {
    let mut builder = tar::Builder::new(writer);
    for (path, bytes) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(bytes.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, format!("./{path}"), bytes.as_slice())?;
    }
    builder.finish()
}

/// Builds an in-memory tar archive holding `files`.
///
/// # Errors
///
/// Propagates archive construction errors.
pub fn tar_bytes(files: &[(&str, &[u8])]) -> io::Result<Vec<u8>> {
    let mut buffer = Vec::new();
    write_tar(
        &mut buffer,
        files
            .iter()
            .map(|(path, bytes)| ((*path).to_owned(), bytes.to_vec())),
    )?;
    Ok(buffer)
}

fn read_tar(reader: &mut dyn Read) -> io::Result<Vec<(String, Vec<u8>)>> {
    let mut archive = tar::Archive::new(reader);
    let mut files = Vec::new();
    for entry in archive.entries()? {
        let mut entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let path = entry.path()?.to_string_lossy().into_owned();
        let mut bytes = Vec::new();
        entry.read_to_end(&mut bytes)?;
        files.push((crate::remote::normalise_relative(&path), bytes));
    }
    Ok(files)
}

/// In-memory [`Director`] serving [`FakeRemote`] hosts.
#[derive(Clone, Debug, Default)]
pub struct FakeDirector {
    deployments: BTreeMap<String, Vec<(InstanceSpec, FakeRemote)>>,
    unknown: BTreeSet<String>,
}

impl FakeDirector {
    /// Creates a director with no deployments.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an instance to `deployment`, creating the deployment if needed.
    #[must_use]
    pub fn with_instance(mut self, deployment: &str, spec: InstanceSpec, remote: FakeRemote) -> Self {
        self.deployments
            .entry(deployment.to_owned())
            .or_default()
            .push((spec, remote));
        self
    }

    /// Lists `deployment` but fails every instance lookup for it.
    #[must_use]
    pub fn with_broken_deployment(mut self, deployment: &str) -> Self {
        self.deployments.entry(deployment.to_owned()).or_default();
        self.unknown.insert(deployment.to_owned());
        self
    }
}

impl Director for FakeDirector {
    fn list_deployments(&self) -> Result<Vec<String>, DirectorError> {
        Ok(self.deployments.keys().cloned().collect())
    }

    fn find_instances(&self, deployment: &str) -> Result<Vec<InstanceSpec>, DirectorError> {
        if self.unknown.contains(deployment) {
            return Err(DirectorError::Command {
                program: String::from("bosh"),
                status_text: String::from("exit code 1"),
                stderr: format!("Deployment '{deployment}' doesn't exist"),
            });
        }
        let instances = self
            .deployments
            .get(deployment)
            .ok_or_else(|| DirectorError::Command {
                program: String::from("bosh"),
                status_text: String::from("exit code 1"),
                stderr: format!("Deployment '{deployment}' doesn't exist"),
            })?;
        Ok(instances.iter().map(|(spec, _)| spec.clone()).collect())
    }

    fn connect(
        &self,
        deployment: &str,
        spec: &InstanceSpec,
    ) -> Result<Box<dyn RemoteRunner>, DirectorError> {
        self.deployments
            .get(deployment)
            .and_then(|instances| {
                instances
                    .iter()
                    .find(|(candidate, _)| candidate.label() == spec.label())
            })
            .map(|(_, remote)| Box::new(remote.clone()) as Box<dyn RemoteRunner>)
            .ok_or_else(|| DirectorError::Parse {
                what: String::from("instance"),
                message: format!("no instance {} in {deployment}", spec.label()),
            })
    }
}
