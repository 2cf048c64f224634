//! Remote command execution and file transfer on cluster nodes
//!
//! The production channel shells out to `ssh` / `scp` with a private key.
//! Transport failures (the host could not be reached) are reported as
//! [`Error::Transport`]; a command that ran and exited non-zero is returned as
//! an [`ExecOutput`] so callers can classify the status themselves.

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use kubeprof_common::{Error, Result};

/// ssh reserves this status for its own failures (connection, auth)
const SSH_TRANSPORT_STATUS: i32 = 255;

/// Options passed to both ssh and scp so unreachable hosts fail instead of prompting
const NON_INTERACTIVE_OPTS: [&str; 4] = [
    "-o",
    "BatchMode=yes",
    "-o",
    "StrictHostKeyChecking=accept-new",
];

/// Result of a command that ran on a host
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
    /// Exit status of the remote command
    pub status: i32,
}

impl ExecOutput {
    /// Output of a command that exited with `status` and printed nothing
    pub fn with_status(status: i32) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }

    /// Whether the command exited zero
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// One side of a file transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyEndpoint {
    /// A path on the machine running kubeprof
    Local(PathBuf),
    /// A path on a cluster node
    Remote {
        /// Node address
        host: String,
        /// Absolute path on the node
        path: String,
    },
}

impl CopyEndpoint {
    /// Remote endpoint on `host`
    pub fn remote(host: impl Into<String>, path: impl Into<String>) -> Self {
        Self::Remote {
            host: host.into(),
            path: path.into(),
        }
    }
}

impl fmt::Display for CopyEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(path) => write!(f, "{}", path.display()),
            Self::Remote { host, path } => write!(f, "{}:{}", host, path),
        }
    }
}

/// Trait abstracting "run a command on a host" and "copy a file to/from a host"
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RemoteExec: Send + Sync {
    /// Run `argv` on `host`.
    ///
    /// Returns `Err` only when the host could not be reached; a non-zero exit
    /// is reported through [`ExecOutput::status`].
    async fn run(&self, host: &str, argv: &[String]) -> Result<ExecOutput>;

    /// Copy a file; direction is given by which endpoint is remote
    async fn copy(&self, from: &CopyEndpoint, to: &CopyEndpoint) -> Result<()>;
}

/// ssh/scp-backed channel authenticated with a private key
#[derive(Debug, Clone)]
pub struct SshChannel {
    key: PathBuf,
    user: Option<String>,
}

impl SshChannel {
    /// Create a channel using the private key at `key`
    pub fn new(key: impl Into<PathBuf>) -> Self {
        Self {
            key: key.into(),
            user: None,
        }
    }

    /// Log in as `user` instead of the local default
    pub fn with_user(mut self, user: Option<String>) -> Self {
        self.user = user.filter(|u| !u.is_empty());
        self
    }

    fn target(&self, host: &str) -> String {
        match &self.user {
            Some(user) => format!("{}@{}", user, host),
            None => host.to_string(),
        }
    }

    fn endpoint_arg(&self, endpoint: &CopyEndpoint) -> String {
        match endpoint {
            CopyEndpoint::Local(path) => path.to_string_lossy().into_owned(),
            CopyEndpoint::Remote { host, path } => format!("{}:{}", self.target(host), path),
        }
    }

    fn key_args(&self) -> Vec<String> {
        let mut args = vec!["-i".to_string(), self.key.to_string_lossy().into_owned()];
        args.extend(NON_INTERACTIVE_OPTS.iter().map(|s| s.to_string()));
        args
    }

    /// Arguments for `ssh` running `argv` on `host`
    pub fn ssh_args(&self, host: &str, argv: &[String]) -> Vec<String> {
        let mut args = self.key_args();
        args.push(self.target(host));
        args.extend(argv.iter().cloned());
        args
    }

    /// Arguments for `scp` copying `from` to `to`
    pub fn scp_args(&self, from: &CopyEndpoint, to: &CopyEndpoint) -> Vec<String> {
        let mut args = self.key_args();
        args.push(self.endpoint_arg(from));
        args.push(self.endpoint_arg(to));
        args
    }
}

/// Map an ssh process exit into a command result or a transport failure
pub(crate) fn classify_ssh_exit(
    host: &str,
    code: Option<i32>,
    stdout: String,
    stderr: String,
) -> Result<ExecOutput> {
    match code {
        Some(SSH_TRANSPORT_STATUS) => Err(Error::transport(host, stderr.trim())),
        Some(status) => Ok(ExecOutput {
            stdout,
            stderr,
            status,
        }),
        None => Err(Error::transport(host, "ssh terminated by signal")),
    }
}

#[async_trait]
impl RemoteExec for SshChannel {
    async fn run(&self, host: &str, argv: &[String]) -> Result<ExecOutput> {
        debug!(host = %host, command = %argv.join(" "), "running remote command");
        let output = Command::new("ssh")
            .args(self.ssh_args(host, argv))
            .output()
            .await
            .map_err(|e| Error::transport(host, format!("failed to spawn ssh: {}", e)))?;

        classify_ssh_exit(
            host,
            output.status.code(),
            String::from_utf8_lossy(&output.stdout).into_owned(),
            String::from_utf8_lossy(&output.stderr).into_owned(),
        )
    }

    async fn copy(&self, from: &CopyEndpoint, to: &CopyEndpoint) -> Result<()> {
        debug!(from = %from, to = %to, "copying file");
        let copy_error = |message: String| Error::Copy {
            from: from.to_string(),
            to: to.to_string(),
            message,
        };

        let output = Command::new("scp")
            .args(self.scp_args(from, to))
            .output()
            .await
            .map_err(|e| copy_error(format!("failed to spawn scp: {}", e)))?;

        if !output.status.success() {
            return Err(copy_error(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(())
    }
}
