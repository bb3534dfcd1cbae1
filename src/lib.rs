//! Core library for the bbr backup and restore tool.
//!
//! The crate discovers the backup scripts BOSH jobs ship, runs them over SSH
//! in dependency order, and moves their artifacts between the VMs and a local
//! backup directory with checksum verification at every hop.

pub mod artifact;
pub mod config;
pub mod director;
pub mod discovery;
pub mod executor;
pub mod failure;
pub mod fleet;
pub mod instance;
pub mod interrupt;
pub mod job;
pub mod ordering;
pub mod output;
pub mod remote;
pub mod test_support;
pub mod workflow;

pub use artifact::{ArtifactError, ArtifactRecord, BackupDirectory, Manifest};
pub use config::{BbrConfig, ConfigError, MAX_PARALLELISM};
pub use director::{
    BoshCliDirector, BoshEnvironment, DirectDirector, Director, DirectorError, InstanceAccess,
    InstanceSpec,
};
pub use discovery::{DiscoveryError, discover_deployment};
pub use executor::{Executable, OnFailure, PhaseReport, PhasedExecutor, Strategy, map_bounded};
pub use failure::{
    Failure, FailureKind, Failures, cleanup_footer, error_log_name, write_error_log,
};
pub use fleet::{DeploymentResult, FleetAction, FleetReport, run_all};
pub use instance::{Deployment, DeploymentError, Instance, JobHandle};
pub use interrupt::{InterruptError, Supervised, confirm_abort, confirm_on_terminal, supervise};
pub use job::{Job, JobMetadata, JobRef, ScriptKind, ScriptSet};
pub use ordering::{LockOrder, LockPurpose, OrderingError, resolve};
pub use output::{OutputError, OutputSinks, PausableWriter, init_logging, sinks};
pub use remote::{
    CommandRunner, JumpboxProxy, ProcessCommandRunner, ProxyError, RemoteError, RemoteRunner,
    SshOptions, SshRemote, SshTarget, expand_tilde,
};
pub use workflow::{
    BackupState, CheckState, CleanupState, Orchestrator, Outcome, RestoreState,
    directory_timestamp,
};
