//! Error types for kubeprof
//!
//! Every variant carries the context an operator needs to remediate the
//! failure (node, host, paths, exit status). [`Error::severity`] decides
//! whether a failure aborts the run, is gated by the connectivity policy, or
//! is recorded against its unit of work.

use thiserror::Error;

/// How a failure should be treated by the phase that observed it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Halts the run before any further phase starts
    Fatal,
    /// A host could not be reached; gated by [`crate::ConnectivityPolicy`]
    Connectivity,
    /// Scoped to one unit of work (a node, a pod, an artifact); reported, never escalated
    BestEffort,
}

/// Main error type for kubeprof operations
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or invalid input detected before any remote side effect
    #[error("configuration error: {message}")]
    Config {
        /// Description of what's invalid
        message: String,
    },

    /// Kubernetes API error
    #[error("kubernetes error [{context}]: {source}")]
    Kube {
        /// Operation that failed (e.g. "create job", "list pods")
        context: String,
        /// The underlying kube-rs error
        #[source]
        source: kube::Error,
    },

    /// A node has no externally routable address
    #[error("node {node} has no external address")]
    NoExternalAddress {
        /// Name of the node
        node: String,
    },

    /// The remote channel could not reach the host at all
    #[error("transport error reaching {host}: {message}")]
    Transport {
        /// Address that was dialed
        host: String,
        /// Description of what failed
        message: String,
    },

    /// A remote command ran but exited with an unexpected status
    #[error("command `{command}` on {host} exited with status {status}: {stderr}")]
    RemoteCommand {
        /// Address the command ran on
        host: String,
        /// Rendered command line
        command: String,
        /// Exit status reported by the remote shell
        status: i32,
        /// Captured standard error
        stderr: String,
    },

    /// A file transfer between the local machine and a host failed
    #[error("failed to copy {from} to {to}: {message}")]
    Copy {
        /// Copy source (`host:path` for remote endpoints)
        from: String,
        /// Copy destination (`host:path` for remote endpoints)
        to: String,
        /// Description of what failed
        message: String,
    },

    /// A node cannot run the profiled job
    ///
    /// Reachability failures stay policy-gated. Anything else (an upload or
    /// an unexpected `which` status) means the node is broken and is fatal.
    #[error("provisioning failed on node {node}: {source}")]
    Provisioning {
        /// Name of the node
        node: String,
        /// The per-node failure
        #[source]
        source: Box<Error>,
    },

    /// The submitted job reported a `Failed` condition
    #[error("job {job} failed: {message}")]
    JobFailed {
        /// Name of the job
        job: String,
        /// Message from the failure condition
        message: String,
    },

    /// The completion wait exceeded its deadline
    #[error("timed out after {seconds}s waiting for job {job} to complete")]
    Timeout {
        /// Name of the job
        job: String,
        /// Deadline that elapsed
        seconds: u64,
    },

    /// The completion wait was aborted by the caller
    #[error("wait for job {job} was cancelled")]
    Cancelled {
        /// Name of the job
        job: String,
    },

    /// Local filesystem or process spawn error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Wrap a kube-rs error with the operation that produced it
    pub fn kube(context: impl Into<String>, source: kube::Error) -> Self {
        Self::Kube {
            context: context.into(),
            source,
        }
    }

    /// Create a transport error for the given host
    pub fn transport(host: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Transport {
            host: host.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Default classification of this error
    pub fn severity(&self) -> Severity {
        match self {
            Self::NoExternalAddress { .. } | Self::Transport { .. } => Severity::Connectivity,
            Self::RemoteCommand { .. } | Self::Copy { .. } => Severity::BestEffort,
            Self::Provisioning { source, .. } if source.is_connectivity() => Severity::Connectivity,
            Self::Provisioning { .. }
            | Self::Config { .. }
            | Self::Kube { .. }
            | Self::JobFailed { .. }
            | Self::Timeout { .. }
            | Self::Cancelled { .. }
            | Self::Io(_)
            | Self::Serialization(_) => Severity::Fatal,
        }
    }

    /// Returns true when the failure means a host could not be reached
    pub fn is_connectivity(&self) -> bool {
        self.severity() == Severity::Connectivity
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_and_transport_errors_are_connectivity() {
        let err = Error::NoExternalAddress {
            node: "worker-1".to_string(),
        };
        assert_eq!(err.severity(), Severity::Connectivity);
        assert!(Error::transport("10.0.0.1", "connection refused").is_connectivity());
    }

    #[test]
    fn per_unit_failures_are_best_effort() {
        let err = Error::Copy {
            from: "10.0.0.1:/tmp/perf.data".to_string(),
            to: "/out/pod-a.data".to_string(),
            message: "permission denied".to_string(),
        };
        assert_eq!(err.severity(), Severity::BestEffort);
    }

    #[test]
    fn unreachable_node_is_policy_gated() {
        let err = Error::Provisioning {
            node: "worker-1".to_string(),
            source: Box::new(Error::transport("10.0.0.1", "timeout")),
        };
        assert_eq!(err.severity(), Severity::Connectivity);
        assert!(err.to_string().contains("worker-1"));
    }

    #[test]
    fn failed_upload_makes_the_node_fatal() {
        let err = Error::Provisioning {
            node: "worker-1".to_string(),
            source: Box::new(Error::Copy {
                from: "bin/perf".to_string(),
                to: "10.0.0.1:/tmp/perf".to_string(),
                message: "disk full".to_string(),
            }),
        };
        assert_eq!(err.severity(), Severity::Fatal);
        assert!(!err.is_connectivity());
    }

    #[test]
    fn config_errors_are_fatal() {
        assert_eq!(Error::config("no tool").severity(), Severity::Fatal);
        assert_eq!(
            Error::Cancelled {
                job: "j".to_string()
            }
            .severity(),
            Severity::Fatal
        );
    }
}
