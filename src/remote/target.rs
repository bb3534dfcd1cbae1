//! SSH connection targets and client option rendering.

use std::ffi::OsString;
use std::time::Duration;

use thiserror::Error;

use crate::config::BbrConfig;

/// Prefix accepted for jumpbox proxies in `BOSH_ALL_PROXY`.
const PROXY_SCHEME: &str = "ssh+socks5://";

/// Address and identity used to reach one VM.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SshTarget {
    /// Hostname or IP address.
    pub host: String,
    /// TCP port of the SSH daemon.
    pub port: u16,
    /// Remote user to authenticate as.
    pub user: String,
    /// Optional private key path passed with `-i`.
    pub identity_file: Option<String>,
    /// Optional jumpbox the connection is tunnelled through.
    pub proxy: Option<JumpboxProxy>,
}

/// Client-side SSH settings shared by every target.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SshOptions {
    /// Path to the `ssh` executable.
    pub ssh_bin: String,
    /// Whether to force batch mode to avoid password prompts.
    pub batch_mode: bool,
    /// Whether to enforce host key checking.
    pub strict_host_key_checking: bool,
    /// Known hosts file override.
    pub known_hosts_file: String,
    /// Number of attempts for idempotent commands that hit connect failures.
    pub connect_attempts: u32,
    /// Delay multiplied by the attempt number between connect retries.
    pub retry_backoff: Duration,
}

impl SshOptions {
    /// Derives SSH options from the layered tool configuration.
    #[must_use]
    pub fn from_config(config: &BbrConfig) -> Self {
        Self {
            ssh_bin: config.ssh_bin.clone(),
            batch_mode: config.ssh_batch_mode,
            strict_host_key_checking: config.ssh_strict_host_key_checking,
            known_hosts_file: config.ssh_known_hosts_file.clone(),
            connect_attempts: config.ssh_connect_attempts.max(1),
            retry_backoff: Duration::from_millis(500),
        }
    }

    /// Builds the argument vector for running `remote_command` on `target`.
    #[must_use]
    pub fn command_args(&self, target: &SshTarget, remote_command: &str) -> Vec<OsString> {
        let mut args = vec![OsString::from("-p"), OsString::from(target.port.to_string())];

        if let Some(ref identity_file) = target.identity_file {
            args.push(OsString::from("-i"));
            args.push(OsString::from(expand_tilde(identity_file)));
        }

        if self.batch_mode {
            args.push(OsString::from("-o"));
            args.push(OsString::from("BatchMode=yes"));
        }

        if !self.strict_host_key_checking {
            args.push(OsString::from("-o"));
            args.push(OsString::from("StrictHostKeyChecking=no"));
        }

        if !self.known_hosts_file.trim().is_empty() {
            args.push(OsString::from("-o"));
            args.push(OsString::from(format!(
                "UserKnownHostsFile={}",
                self.known_hosts_file
            )));
        }

        if let Some(ref proxy) = target.proxy {
            args.push(OsString::from("-o"));
            args.push(OsString::from(format!(
                "ProxyCommand={}",
                proxy.proxy_command(&self.ssh_bin)
            )));
        }

        args.push(OsString::from(format!("{}@{}", target.user, target.host)));
        args.push(OsString::from(remote_command));
        args
    }
}

/// Jumpbox tunnel parsed from `BOSH_ALL_PROXY`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct JumpboxProxy {
    /// Jumpbox user.
    pub user: String,
    /// Jumpbox hostname or address.
    pub host: String,
    /// Jumpbox SSH port.
    pub port: u16,
    /// Private key used to authenticate with the jumpbox.
    pub private_key: String,
}

/// Errors raised while parsing a proxy URL.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ProxyError {
    /// Raised when the URL does not use the `ssh+socks5://` scheme.
    #[error("unsupported proxy scheme in '{0}': expected ssh+socks5://")]
    Scheme(String),
    /// Raised when a component is missing or malformed.
    #[error("invalid proxy url '{url}': {message}")]
    Invalid {
        /// URL as supplied.
        url: String,
        /// Description of the problem.
        message: String,
    },
}

impl JumpboxProxy {
    /// Parses `ssh+socks5://user@host:port?private-key=path`.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError`] when the scheme, user, port or private key is
    /// missing or malformed.
    pub fn parse(url: &str) -> Result<Self, ProxyError> {
        let rest = url
            .trim()
            .strip_prefix(PROXY_SCHEME)
            .ok_or_else(|| ProxyError::Scheme(url.to_owned()))?;
        let invalid = |message: &str| ProxyError::Invalid {
            url: url.to_owned(),
            message: message.to_owned(),
        };

        let (authority, query) = rest.split_once('?').unwrap_or((rest, ""));
        let (user, host_port) = authority
            .split_once('@')
            .ok_or_else(|| invalid("missing user"))?;
        let (host, port) = host_port
            .rsplit_once(':')
            .ok_or_else(|| invalid("missing port"))?;
        let port = port.parse::<u16>().map_err(|_| invalid("port is not a number"))?;
        let private_key = query
            .split('&')
            .find_map(|pair| pair.strip_prefix("private-key="))
            .filter(|key| !key.is_empty())
            .ok_or_else(|| invalid("missing private-key query parameter"))?;

        if user.is_empty() || host.is_empty() {
            return Err(invalid("user and host must not be empty"));
        }

        Ok(Self {
            user: user.to_owned(),
            host: host.to_owned(),
            port,
            private_key: expand_tilde(private_key),
        })
    }

    /// Renders the `ProxyCommand` that forwards stdio through the jumpbox.
    #[must_use]
    pub fn proxy_command(&self, ssh_bin: &str) -> String {
        format!(
            "{ssh_bin} -p {} -i {} -o StrictHostKeyChecking=no -o UserKnownHostsFile=/dev/null -W %h:%p {}@{}",
            self.port, self.private_key, self.user, self.host
        )
    }
}

/// Expands a leading `~/` prefix to the user's home directory.
#[must_use]
pub fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return format!("{}/{rest}", home.to_string_lossy());
        }
    }
    path.to_owned()
}
