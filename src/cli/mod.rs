//! Command-line interface definitions for the `bbr` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Args, Parser, Subcommand};

/// Top-level CLI for the `bbr` binary.
#[derive(Debug, Parser)]
#[command(
    name = "bbr",
    version,
    about = "Back up and restore BOSH deployments and directors",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Back up or restore BOSH deployments through the director.
    #[command(name = "deployment", about = "Back up or restore BOSH deployments")]
    Deployment(DeploymentCommand),
    /// Back up or restore the BOSH director VM itself.
    #[command(name = "director", about = "Back up or restore a BOSH director")]
    Director(DirectorCommand),
}

impl Cli {
    /// Whether debug logging was requested.
    pub(crate) const fn debug(&self) -> bool {
        match self {
            Self::Deployment(command) => command.debug,
            Self::Director(command) => command.debug,
        }
    }
}

/// Arguments for `bbr deployment`.
#[derive(Debug, Args)]
pub(crate) struct DeploymentCommand {
    /// Director URL or alias.
    #[arg(long, short = 't', env = "BOSH_ENVIRONMENT", value_name = "TARGET")]
    pub(crate) target: String,
    /// Director client name.
    #[arg(long, short = 'u', env = "BOSH_CLIENT", value_name = "USERNAME")]
    pub(crate) username: String,
    /// Director client secret.
    #[arg(
        long,
        short = 'p',
        env = "BOSH_CLIENT_SECRET",
        hide_env_values = true,
        value_name = "PASSWORD"
    )]
    pub(crate) password: String,
    /// Path to the director CA certificate, or the certificate itself.
    #[arg(long, env = "BOSH_CA_CERT", value_name = "CA_CERT")]
    pub(crate) ca_cert: Option<String>,
    /// Deployment to act on.
    #[arg(
        long,
        short = 'd',
        env = "BOSH_DEPLOYMENT",
        value_name = "DEPLOYMENT",
        required_unless_present = "all_deployments",
        conflicts_with = "all_deployments"
    )]
    pub(crate) deployment: Option<String>,
    /// Act on every deployment the director knows about (not for restore).
    #[arg(long, short = 'a')]
    pub(crate) all_deployments: bool,
    /// Jumpbox for SSH, as `ssh+socks5://user@host:port?private-key=path`.
    #[arg(long, env = "BOSH_ALL_PROXY", value_name = "URL")]
    pub(crate) all_proxy: Option<String>,
    /// Enable debug logging.
    #[arg(long)]
    pub(crate) debug: bool,
    /// Workflow to run.
    #[command(subcommand)]
    pub(crate) action: Action,
}

/// Arguments for `bbr director`.
#[derive(Debug, Args)]
pub(crate) struct DirectorCommand {
    /// Address of the director VM.
    #[arg(long, value_name = "HOST")]
    pub(crate) host: String,
    /// SSH user on the director VM.
    #[arg(long, value_name = "USERNAME")]
    pub(crate) username: String,
    /// Private key for the SSH user.
    #[arg(long, value_name = "PATH")]
    pub(crate) private_key_path: String,
    /// Enable debug logging.
    #[arg(long)]
    pub(crate) debug: bool,
    /// Workflow to run.
    #[command(subcommand)]
    pub(crate) action: Action,
}

/// Workflow subcommands shared by both command groups.
#[derive(Clone, Debug, Eq, PartialEq, Subcommand)]
pub(crate) enum Action {
    /// Check that backup can run without changing anything.
    #[command(name = "pre-backup-check")]
    PreBackupCheck,
    /// Back up into a new timestamped directory.
    #[command(name = "backup")]
    Backup {
        /// Directory to create the backup in (defaults to the current directory).
        #[arg(long, value_name = "PATH")]
        artifact_path: Option<String>,
    },
    /// Restore from a backup directory.
    #[command(name = "restore")]
    Restore {
        /// Backup directory to restore from.
        #[arg(long, value_name = "PATH")]
        artifact_path: String,
    },
    /// Remove artifact directories left on the VMs by a failed backup.
    #[command(name = "backup-cleanup")]
    BackupCleanup,
    /// Remove artifact directories left on the VMs by a failed restore.
    #[command(name = "restore-cleanup")]
    RestoreCleanup,
}

impl Action {
    /// Name of the subcommand as typed.
    pub(crate) const fn name(&self) -> &'static str {
        match self {
            Self::PreBackupCheck => "pre-backup-check",
            Self::Backup { .. } => "backup",
            Self::Restore { .. } => "restore",
            Self::BackupCleanup => "backup-cleanup",
            Self::RestoreCleanup => "restore-cleanup",
        }
    }

    /// Cleanup subcommand matching this workflow.
    pub(crate) const fn cleanup_name(&self) -> &'static str {
        match self {
            Self::Restore { .. } | Self::RestoreCleanup => "restore-cleanup",
            Self::PreBackupCheck | Self::Backup { .. } | Self::BackupCleanup => "backup-cleanup",
        }
    }
}
