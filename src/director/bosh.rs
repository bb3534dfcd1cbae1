//! Director backed by the `bosh` CLI.

use std::collections::BTreeMap;
use std::ffi::OsString;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::{Director, DirectorError, InstanceSpec};
use crate::remote::{
    CommandOutput, CommandRunner, JumpboxProxy, ProcessCommandRunner, RemoteRunner, SshOptions,
    SshRemote, SshTarget,
};

/// Variable the `bosh` CLI reads the client secret from.
const CLIENT_SECRET_ENV: &str = "BOSH_CLIENT_SECRET";

/// Credentials and endpoint passed to every `bosh` invocation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BoshEnvironment {
    /// Director URL or alias (`BOSH_ENVIRONMENT`).
    pub target: String,
    /// Director client (`BOSH_CLIENT`).
    pub client: String,
    /// Director client secret (`BOSH_CLIENT_SECRET`).
    pub client_secret: String,
    /// Path to, or contents of, the director CA certificate.
    pub ca_cert: Option<String>,
}

/// SSH settings applied to every instance of every deployment.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceAccess {
    /// Remote user.
    pub user: String,
    /// SSH port.
    pub port: u16,
    /// Private key passed with `-i`.
    pub identity_file: Option<String>,
    /// Jumpbox parsed from `BOSH_ALL_PROXY`.
    pub proxy: Option<JumpboxProxy>,
}

/// Queries the director through `bosh --json` and reaches VMs over `ssh`.
#[derive(Clone, Debug)]
pub struct BoshCliDirector<R: CommandRunner + Clone + 'static> {
    bosh_bin: String,
    environment: BoshEnvironment,
    access: InstanceAccess,
    ssh: SshOptions,
    runner: R,
}

impl BoshCliDirector<ProcessCommandRunner> {
    /// Creates a director wired to the real process runner.
    #[must_use]
    pub fn with_process_runner(
        bosh_bin: impl Into<String>,
        environment: BoshEnvironment,
        access: InstanceAccess,
        ssh: SshOptions,
    ) -> Self {
        Self::new(bosh_bin, environment, access, ssh, ProcessCommandRunner)
    }
}

impl<R: CommandRunner + Clone + 'static> BoshCliDirector<R> {
    /// Creates a director using `runner` for both `bosh` and `ssh`.
    #[must_use]
    pub fn new(
        bosh_bin: impl Into<String>,
        environment: BoshEnvironment,
        access: InstanceAccess,
        ssh: SshOptions,
        runner: R,
    ) -> Self {
        Self {
            bosh_bin: bosh_bin.into(),
            environment,
            access,
            ssh,
            runner,
        }
    }

    fn global_args(&self) -> Vec<OsString> {
        let mut args = vec![
            OsString::from("--environment"),
            OsString::from(&self.environment.target),
            OsString::from("--client"),
            OsString::from(&self.environment.client),
        ];
        if let Some(ref ca_cert) = self.environment.ca_cert {
            args.push(OsString::from("--ca-cert"));
            args.push(OsString::from(ca_cert));
        }
        args.push(OsString::from("--non-interactive"));
        args
    }

    fn run_bosh(&self, args: &[&str], what: &str) -> Result<String, DirectorError> {
        let mut full = self.global_args();
        full.extend(args.iter().map(OsString::from));
        let env = [(
            String::from(CLIENT_SECRET_ENV),
            self.environment.client_secret.clone(),
        )];
        debug!(program = %self.bosh_bin, %what, "querying director");
        let output = self.runner.run_with_env(&self.bosh_bin, &full, &env)?;
        self.check_output(output, what)
    }

    fn check_output(&self, output: CommandOutput, what: &str) -> Result<String, DirectorError> {
        if output.is_success() {
            return Ok(output.stdout);
        }
        let status_text = output
            .code
            .map_or_else(|| String::from("unknown"), |code| code.to_string());
        // bosh reports most failures on stdout in --json mode
        let detail = if output.stderr.trim().is_empty() {
            output.stdout
        } else {
            output.stderr
        };
        Err(DirectorError::Command {
            program: self.bosh_bin.clone(),
            status_text,
            stderr: format!("{what}: {}", detail.trim()),
        })
    }

    fn job_releases(
        &self,
        deployment: &str,
    ) -> Result<BTreeMap<String, BTreeMap<String, String>>, DirectorError> {
        let stdout = self.run_bosh(&["--deployment", deployment, "manifest"], "manifest")?;
        parse_manifest_releases(&stdout)
    }
}

impl<R: CommandRunner + Clone + 'static> Director for BoshCliDirector<R> {
    fn list_deployments(&self) -> Result<Vec<String>, DirectorError> {
        let stdout = self.run_bosh(&["--json", "deployments"], "deployments")?;
        let rows: Vec<DeploymentRow> = parse_table(&stdout, "deployments")?;
        Ok(rows.into_iter().map(|row| row.name).collect())
    }

    fn find_instances(&self, deployment: &str) -> Result<Vec<InstanceSpec>, DirectorError> {
        let stdout = self.run_bosh(
            &["--json", "--deployment", deployment, "instances", "--details"],
            "instances",
        )?;
        let rows: Vec<InstanceRow> = parse_table(&stdout, "instances")?;
        let releases = self.job_releases(deployment)?;
        rows.into_iter()
            .map(|row| row.into_spec(&releases))
            .collect()
    }

    fn connect(
        &self,
        _deployment: &str,
        spec: &InstanceSpec,
    ) -> Result<Box<dyn RemoteRunner>, DirectorError> {
        let target = SshTarget {
            host: spec.address.clone(),
            port: self.access.port,
            user: self.access.user.clone(),
            identity_file: self.access.identity_file.clone(),
            proxy: self.access.proxy.clone(),
        };
        Ok(Box::new(SshRemote::new(
            spec.label(),
            target,
            self.ssh.clone(),
            self.runner.clone(),
        )))
    }
}

#[derive(Debug, Deserialize)]
#[serde(bound = "T: DeserializeOwned")]
struct BoshOutput<T> {
    #[serde(rename = "Tables", default)]
    tables: Vec<BoshTable<T>>,
}

#[derive(Debug, Deserialize)]
#[serde(bound = "T: DeserializeOwned")]
struct BoshTable<T> {
    #[serde(rename = "Rows", default)]
    rows: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct DeploymentRow {
    name: String,
}

#[derive(Debug, Deserialize)]
struct InstanceRow {
    instance: String,
    #[serde(default)]
    index: String,
    #[serde(default)]
    ips: String,
}

impl InstanceRow {
    fn into_spec(
        self,
        releases: &BTreeMap<String, BTreeMap<String, String>>,
    ) -> Result<InstanceSpec, DirectorError> {
        let (group, uuid) = self
            .instance
            .split_once('/')
            .ok_or_else(|| DirectorError::Parse {
                what: String::from("instances"),
                message: format!("unexpected instance name '{}'", self.instance),
            })?;
        let address = self
            .ips
            .split_whitespace()
            .next()
            .ok_or_else(|| DirectorError::Parse {
                what: String::from("instances"),
                message: format!("instance '{}' has no IP address", self.instance),
            })?;
        let id = if self.index.trim().is_empty() {
            uuid
        } else {
            self.index.trim()
        };
        let mut spec = InstanceSpec::new(group, id, address);
        if let Some(jobs) = releases.get(group) {
            spec.job_releases.clone_from(jobs);
        }
        Ok(spec)
    }
}

fn parse_table<T: DeserializeOwned>(stdout: &str, what: &str) -> Result<Vec<T>, DirectorError> {
    let output: BoshOutput<T> = serde_json::from_str(stdout).map_err(|err| DirectorError::Parse {
        what: what.to_owned(),
        message: err.to_string(),
    })?;
    Ok(output
        .tables
        .into_iter()
        .flat_map(|table| table.rows)
        .collect())
}

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default)]
    instance_groups: Vec<ManifestGroup>,
}

#[derive(Debug, Deserialize)]
struct ManifestGroup {
    name: String,
    #[serde(default)]
    jobs: Vec<ManifestJob>,
}

#[derive(Debug, Deserialize)]
struct ManifestJob {
    name: String,
    release: String,
}

/// Maps instance group → job → release from a deployment manifest.
fn parse_manifest_releases(
    yaml: &str,
) -> Result<BTreeMap<String, BTreeMap<String, String>>, DirectorError> {
    let manifest: Manifest = serde_yaml::from_str(yaml).map_err(|err| DirectorError::Parse {
        what: String::from("manifest"),
        message: err.to_string(),
    })?;
    Ok(manifest
        .instance_groups
        .into_iter()
        .map(|group| {
            let jobs = group
                .jobs
                .into_iter()
                .map(|job| (job.name, job.release))
                .collect();
            (group.name, jobs)
        })
        .collect())
}
