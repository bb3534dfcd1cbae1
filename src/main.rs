//! Binary entry point for the bbr CLI.

use std::io::{self, Write};
use std::process;

use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use thiserror::Error;
use tracing::debug;

use bbr::{
    BbrConfig, BoshCliDirector, BoshEnvironment, ConfigError, Director, DirectDirector, FleetAction,
    Failures, InstanceAccess, InterruptError, JumpboxProxy, Orchestrator, OutputError, ProxyError,
    SshOptions, SshTarget, Strategy, Supervised, cleanup_footer, confirm_on_terminal,
    directory_timestamp, expand_tilde, init_logging, run_all, sinks, supervise, write_error_log,
};

mod cli;

use cli::{Action, Cli};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Logging(#[from] OutputError),
    #[error("invalid BOSH_ALL_PROXY: {0}")]
    Proxy(#[from] ProxyError),
    #[error(transparent)]
    Interrupt(#[from] InterruptError),
    #[error("cannot determine the working directory: {0}")]
    WorkingDirectory(String),
    #[error("restore is not supported with --all-deployments")]
    RestoreAllDeployments,
}

/// Which deployments a run covers.
#[derive(Clone, Debug, Eq, PartialEq)]
enum Scope {
    Single(String),
    All,
}

/// Everything a run needs once the CLI and configuration are resolved.
#[derive(Debug)]
struct Plan {
    scope: Scope,
    action: Action,
    workspace: Utf8PathBuf,
    timestamp: String,
    job_parallelism: usize,
    deployment_parallelism: usize,
    cleanup_command: String,
}

/// What to show the user when a run fails.
#[derive(Debug, Default)]
struct Report {
    failures: Failures,
    rendered: String,
}

impl Plan {
    fn run(&self, director: &dyn Director) -> Report {
        let orchestrator = Orchestrator::new(director, self.job_parallelism);
        match &self.scope {
            Scope::Single(deployment) => {
                let failures = self.run_single(&orchestrator, deployment);
                let rendered = if failures.is_empty() {
                    String::new()
                } else {
                    failures.report(&self.cleanup_command)
                };
                Report { failures, rendered }
            }
            Scope::All => self.run_fleet(&orchestrator),
        }
    }

    fn run_single(&self, orchestrator: &Orchestrator<'_>, deployment: &str) -> Failures {
        match &self.action {
            Action::PreBackupCheck => orchestrator.pre_backup_check(deployment).failures,
            Action::Backup { .. } => {
                orchestrator
                    .backup(deployment, &self.workspace, &self.timestamp)
                    .failures
            }
            Action::Restore { artifact_path } => {
                orchestrator
                    .restore(deployment, Utf8Path::new(artifact_path))
                    .failures
            }
            Action::BackupCleanup | Action::RestoreCleanup => {
                orchestrator.cleanup(deployment).failures
            }
        }
    }

    fn fleet_action(&self) -> Option<FleetAction> {
        match &self.action {
            Action::PreBackupCheck => Some(FleetAction::PreBackupCheck),
            Action::Backup { .. } => Some(FleetAction::Backup {
                workspace: self.workspace.clone(),
                timestamp: self.timestamp.clone(),
            }),
            Action::BackupCleanup | Action::RestoreCleanup => Some(FleetAction::Cleanup),
            Action::Restore { .. } => None,
        }
    }

    fn run_fleet(&self, orchestrator: &Orchestrator<'_>) -> Report {
        let Some(action) = self.fleet_action() else {
            return Report::default();
        };
        let strategy = Strategy::Parallel(self.deployment_parallelism);
        match run_all(orchestrator, &action, strategy) {
            Ok(fleet) => {
                let mut rendered = fleet.summary();
                if fleet.cleanup_advised() {
                    rendered.push_str(&cleanup_footer(&self.cleanup_command));
                    rendered.push('\n');
                }
                Report {
                    failures: fleet.merged(),
                    rendered,
                }
            }
            Err(failures) => Report {
                rendered: failures.pretty(),
                failures,
            },
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

async fn dispatch(cli: Cli) -> Result<i32, CliError> {
    let config = BbrConfig::load_without_cli_args()?;
    config.validate()?;
    init_logging(cli.debug())?;

    let ssh = SshOptions::from_config(&config);
    let workspace = working_directory()?;
    let timestamp = directory_timestamp();

    let (director, plan): (Box<dyn Director>, Plan) = match cli {
        Cli::Deployment(command) => {
            let scope = match command.deployment {
                Some(deployment) if !command.all_deployments => Scope::Single(deployment),
                _ => Scope::All,
            };
            if scope == Scope::All && matches!(command.action, Action::Restore { .. }) {
                return Err(CliError::RestoreAllDeployments);
            }
            let proxy = command
                .all_proxy
                .as_deref()
                .filter(|url| !url.trim().is_empty())
                .map(JumpboxProxy::parse)
                .transpose()?;
            let director = BoshCliDirector::with_process_runner(
                config.bosh_bin.clone(),
                BoshEnvironment {
                    target: command.target,
                    client: command.username,
                    client_secret: command.password,
                    ca_cert: command.ca_cert,
                },
                InstanceAccess {
                    user: config.ssh_user.clone(),
                    port: config.ssh_port,
                    identity_file: config.ssh_identity_file.as_deref().map(expand_tilde),
                    proxy,
                },
                ssh,
            );
            let cleanup_command = deployment_cleanup_command(&scope, &command.action);
            let plan = Plan {
                scope,
                workspace: backup_workspace(&command.action, &workspace),
                action: command.action,
                timestamp: timestamp.clone(),
                job_parallelism: config.job_parallelism(),
                deployment_parallelism: config.deployment_parallelism(),
                cleanup_command,
            };
            (Box::new(director), plan)
        }
        Cli::Director(command) => {
            let director = DirectDirector::with_process_runner(
                SshTarget {
                    host: command.host.clone(),
                    port: config.ssh_port,
                    user: command.username,
                    identity_file: Some(expand_tilde(&command.private_key_path)),
                    proxy: None,
                },
                ssh,
            );
            let plan = Plan {
                scope: Scope::Single(director.deployment_name().to_owned()),
                workspace: backup_workspace(&command.action, &workspace),
                cleanup_command: director_cleanup_command(&command.host, &command.action),
                action: command.action,
                timestamp: timestamp.clone(),
                job_parallelism: config.job_parallelism(),
                deployment_parallelism: config.deployment_parallelism(),
            };
            (Box::new(director), plan)
        }
    };

    debug!(?plan, "resolved run");
    let cleanup_command = plan.cleanup_command.clone();
    let action = plan.action.name();
    let outcome = supervise(
        move || plan.run(director.as_ref()),
        tokio::signal::ctrl_c,
        confirm_on_terminal,
    )
    .await?;

    match outcome {
        Supervised::Completed(report) => Ok(finish(&report, &workspace, &timestamp)),
        Supervised::Aborted => {
            let mut stderr = sinks().stderr();
            writeln!(stderr, "The {action} was cancelled.").ok();
            writeln!(stderr, "{}", cleanup_footer(&cleanup_command)).ok();
            Ok(1)
        }
    }
}

fn working_directory() -> Result<Utf8PathBuf, CliError> {
    let cwd = std::env::current_dir().map_err(|err| CliError::WorkingDirectory(err.to_string()))?;
    Utf8PathBuf::from_path_buf(cwd)
        .map_err(|path| CliError::WorkingDirectory(path.display().to_string()))
}

fn backup_workspace(action: &Action, cwd: &Utf8Path) -> Utf8PathBuf {
    match action {
        Action::Backup {
            artifact_path: Some(path),
        } => cwd.join(path),
        _ => cwd.to_path_buf(),
    }
}

fn deployment_cleanup_command(scope: &Scope, action: &Action) -> String {
    let selector = match scope {
        Scope::Single(deployment) => format!("--deployment {deployment}"),
        Scope::All => String::from("--all-deployments"),
    };
    format!("bbr deployment {selector} {}", action.cleanup_name())
}

fn director_cleanup_command(host: &str, action: &Action) -> String {
    format!("bbr director --host {host} {}", action.cleanup_name())
}

/// Prints the report and writes the error log; returns the exit code.
fn finish(report: &Report, log_dir: &Utf8Path, timestamp: &str) -> i32 {
    if report.failures.is_empty() {
        return 0;
    }
    let mut stderr = sinks().stderr();
    write!(stderr, "{}", report.rendered).ok();
    match write_error_log(log_dir, timestamp, &report.failures) {
        Ok(path) => {
            writeln!(stderr, "Stack traces written to {path}").ok();
        }
        Err(err) => {
            writeln!(stderr, "Failed to write error log ({err}); stack traces follow:").ok();
            write!(stderr, "{}", report.failures.stack()).ok();
        }
    }
    report.failures.exit_code()
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
