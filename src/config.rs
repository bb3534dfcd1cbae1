//! Configuration loading via `ortho-config`.
//!
//! Director credentials arrive through CLI flags and the `BOSH_*` environment
//! variables; everything about how the tool reaches VMs and how much it does
//! at once is layered here from defaults, `bbr.toml`, and `BBR_*` variables.

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

/// Upper bound on concurrent jobs or deployments.
pub const MAX_PARALLELISM: usize = 10;

/// Tool settings derived from configuration files and environment variables.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "BBR",
    discovery(
        app_name = "bbr",
        env_var = "BBR_CONFIG_PATH",
        config_file_name = "bbr.toml",
        dotfile_name = ".bbr.toml",
        project_file_name = "bbr.toml"
    )
)]
pub struct BbrConfig {
    /// Path to the `ssh` executable.
    #[ortho_config(default = "ssh".to_owned())]
    pub ssh_bin: String,
    /// Path to the `bosh` CLI used to query the director.
    #[ortho_config(default = "bosh".to_owned())]
    pub bosh_bin: String,
    /// Remote user for deployment VMs.
    #[ortho_config(default = "vcap".to_owned())]
    pub ssh_user: String,
    /// SSH port on deployment VMs.
    #[ortho_config(default = 22)]
    pub ssh_port: u16,
    /// Private key for deployment VMs. Supports `~/` expansion. When unset,
    /// SSH falls back to its default key locations.
    pub ssh_identity_file: Option<String>,
    /// Whether to force batch mode for SSH to avoid password prompts.
    #[ortho_config(default = true)]
    pub ssh_batch_mode: bool,
    /// Whether to enforce host key checking.
    #[ortho_config(default = false)]
    pub ssh_strict_host_key_checking: bool,
    /// Known hosts file override.
    #[ortho_config(default = "/dev/null".to_owned())]
    pub ssh_known_hosts_file: String,
    /// Attempts made for idempotent commands when the SSH connect fails.
    #[ortho_config(default = 3)]
    pub ssh_connect_attempts: u32,
    /// Jobs run concurrently within one phase.
    #[ortho_config(default = 10)]
    pub max_parallel_jobs: usize,
    /// Deployments processed concurrently by `--all-deployments`.
    #[ortho_config(default = 10)]
    pub max_parallel_deployments: usize,
}

impl Default for BbrConfig {
    fn default() -> Self {
        Self {
            ssh_bin: String::from("ssh"),
            bosh_bin: String::from("bosh"),
            ssh_user: String::from("vcap"),
            ssh_port: 22,
            ssh_identity_file: None,
            ssh_batch_mode: true,
            ssh_strict_host_key_checking: false,
            ssh_known_hosts_file: String::from("/dev/null"),
            ssh_connect_attempts: 3,
            max_parallel_jobs: MAX_PARALLELISM,
            max_parallel_deployments: MAX_PARALLELISM,
        }
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or out of range.
    #[error("invalid {field}: set BBR_{env_suffix} or add {field} to bbr.toml", env_suffix = field.to_uppercase())]
    InvalidField {
        /// Configuration field that failed validation.
        field: String,
    },
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}

impl BbrConfig {
    /// Loads configuration without attempting to parse CLI arguments. Values
    /// merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("bbr")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Ensures string values are present and counts are usable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidField`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_value(&self.ssh_bin, "ssh_bin")?;
        Self::require_value(&self.bosh_bin, "bosh_bin")?;
        Self::require_value(&self.ssh_user, "ssh_user")?;
        if let Some(ref identity) = self.ssh_identity_file {
            Self::require_value(identity, "ssh_identity_file")?;
        }
        Self::require_positive(u64::from(self.ssh_port), "ssh_port")?;
        Self::require_positive(u64::from(self.ssh_connect_attempts), "ssh_connect_attempts")?;
        Self::require_positive(self.max_parallel_jobs as u64, "max_parallel_jobs")?;
        Self::require_positive(self.max_parallel_deployments as u64, "max_parallel_deployments")?;
        Ok(())
    }

    /// Concurrency used within one phase, capped at [`MAX_PARALLELISM`].
    #[must_use]
    pub fn job_parallelism(&self) -> usize {
        self.max_parallel_jobs.clamp(1, MAX_PARALLELISM)
    }

    /// Concurrency used across deployments, capped at [`MAX_PARALLELISM`].
    #[must_use]
    pub fn deployment_parallelism(&self) -> usize {
        self.max_parallel_deployments.clamp(1, MAX_PARALLELISM)
    }

    fn require_value(value: &str, field: &str) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::InvalidField {
                field: field.to_owned(),
            });
        }
        Ok(())
    }

    fn require_positive(value: u64, field: &str) -> Result<(), ConfigError> {
        if value == 0 {
            return Err(ConfigError::InvalidField {
                field: field.to_owned(),
            });
        }
        Ok(())
    }
}
