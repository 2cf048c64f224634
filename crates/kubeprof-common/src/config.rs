//! Run configuration
//!
//! A single [`ProfileConfig`] is built once by the entry point and passed by
//! reference to every component. Nothing in the workspace reads flags from
//! process-global state.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::tool::ProfilingTool;
use crate::{Error, Result};

/// Default node directory holding the binary and the artifacts
pub const DEFAULT_STAGE_DIR: &str = "/tmp/";

/// Default namespace jobs are submitted to
pub const DEFAULT_NAMESPACE: &str = "default";

/// Interval between job status polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default bound on concurrent per-node / per-pod operations
pub const DEFAULT_CONCURRENCY: usize = 8;

/// What to do when a node can't be reached during provisioning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectivityPolicy {
    /// Any node failure aborts the run before the job is submitted
    #[default]
    Abort,
    /// Failed nodes are reported and skipped; the job is still submitted
    Skip,
}

impl fmt::Display for ConnectivityPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Abort => f.write_str("abort"),
            Self::Skip => f.write_str("skip"),
        }
    }
}

impl FromStr for ConnectivityPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "abort" => Ok(Self::Abort),
            "skip" => Ok(Self::Skip),
            other => Err(format!(
                "invalid connectivity policy '{}', expected 'abort' or 'skip'",
                other
            )),
        }
    }
}

/// How the stage location is shared into containers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageMountMode {
    /// Mount the whole stage directory (binary and artifacts are shared)
    #[default]
    Directory,
    /// Mount only the staged binary; artifacts stay inside the container
    File,
}

impl StageMountMode {
    /// Kubernetes `hostPath.type` for this mode
    pub fn host_path_type(&self) -> &'static str {
        match self {
            Self::Directory => "Directory",
            Self::File => "File",
        }
    }
}

/// Where the profiling binary and its output live on each node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageConfig {
    /// Absolute directory on the node
    pub dir: String,
    /// Mount mode used when rewriting the job
    pub mount: StageMountMode,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            dir: DEFAULT_STAGE_DIR.to_string(),
            mount: StageMountMode::Directory,
        }
    }
}

/// Complete configuration of one profiling run
#[derive(Debug, Clone)]
pub struct ProfileConfig {
    /// Profiling tool to run the workload under
    pub tool: ProfilingTool,
    /// Stage directory on every node
    pub stage: StageConfig,
    /// Local copy of the profiling binary uploaded to nodes that lack it
    pub binary_path: PathBuf,
    /// Namespace the job is created in
    pub namespace: String,
    /// Local directory the artifacts are written to
    pub output_dir: PathBuf,
    /// Skip the node provisioning phase entirely
    pub skip_provisioning: bool,
    /// Delete the job and its pods after collection
    pub delete_after: bool,
    /// Try to expose kernel symbols on each node (best-effort)
    pub enable_kernel_symbols: bool,
    /// Policy for nodes that fail provisioning
    pub connectivity: ConnectivityPolicy,
    /// Upper bound on concurrent per-node / per-pod operations
    pub concurrency: usize,
    /// Interval between job status polls
    pub poll_interval: Duration,
    /// Optional upper bound on the completion wait
    pub completion_timeout: Option<Duration>,
}

impl ProfileConfig {
    /// Configuration with defaults for everything but the tool
    pub fn new(tool: ProfilingTool) -> Self {
        let binary_path = PathBuf::from("bin").join(tool.name());
        Self {
            tool,
            stage: StageConfig::default(),
            binary_path,
            namespace: DEFAULT_NAMESPACE.to_string(),
            output_dir: PathBuf::from("."),
            skip_provisioning: false,
            delete_after: false,
            enable_kernel_symbols: true,
            connectivity: ConnectivityPolicy::default(),
            concurrency: DEFAULT_CONCURRENCY,
            poll_interval: DEFAULT_POLL_INTERVAL,
            completion_timeout: None,
        }
    }

    /// Reject configurations that can't produce a working run
    pub fn validate(&self) -> Result<()> {
        if !self.stage.dir.starts_with('/') {
            return Err(Error::config(format!(
                "stage directory '{}' must be an absolute path",
                self.stage.dir
            )));
        }
        if let Some(bad) = self.stage.dir.chars().find(|c| !is_path_char(*c)) {
            return Err(Error::config(format!(
                "stage directory '{}' contains {:?}, only letters, digits and -_./+@%:,= are allowed",
                self.stage.dir, bad
            )));
        }
        if self.namespace.is_empty() {
            return Err(Error::config("namespace must not be empty"));
        }
        if self.concurrency == 0 {
            return Err(Error::config("concurrency must be at least 1"));
        }
        if self.poll_interval.is_zero() {
            return Err(Error::config("poll interval must be non-zero"));
        }
        Ok(())
    }
}

/// Characters that need no quoting when a path is embedded in a remote
/// shell command line
pub fn is_path_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || "-_./+@%:,=".contains(c)
}
