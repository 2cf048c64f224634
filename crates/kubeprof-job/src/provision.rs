//! Node provisioning
//!
//! Makes sure the profiling binary is staged on every node before the job is
//! submitted. Nodes are handled concurrently up to the configured bound and
//! the phase only returns once every node has an outcome.
//!
//! The presence probe's exit status is overloaded: `0` means present, `1`
//! means absent (not an error), anything else is a failure for that node.
//!
//! A failed node carries [`Error::Provisioning`]. Unreachable nodes are
//! [`Severity::Connectivity`] and follow the connectivity policy; a node
//! that was reached but could not be staged is [`Severity::Fatal`] and
//! always stops the run.

use futures::stream::{self, StreamExt};
use k8s_openapi::api::core::v1::Node;
use tracing::{debug, info};

use kubeprof_common::kube_utils::{external_address, object_name};
use kubeprof_common::{ConnectivityPolicy, Error, ProfileConfig, Result, Severity};

use crate::remote::{CopyEndpoint, ExecOutput, RemoteExec};

/// Whether the staged binary was found on a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryPresence {
    /// Probe exited 0
    Present,
    /// Probe exited 1
    Absent,
}

/// Command used to check for the staged binary
pub fn probe_command(host_path: &str) -> Vec<String> {
    vec!["which".to_string(), host_path.to_string()]
}

/// Command that exposes kernel symbol addresses to the profiler
pub fn kernel_symbols_command() -> Vec<String> {
    ["sudo", "sysctl", "-w", "kernel.kptr_restrict=0"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Classify the presence probe's exit status
pub fn classify_probe(host: &str, argv: &[String], output: &ExecOutput) -> Result<BinaryPresence> {
    match output.status {
        0 => Ok(BinaryPresence::Present),
        1 => Ok(BinaryPresence::Absent),
        status => Err(Error::RemoteCommand {
            host: host.to_string(),
            command: argv.join(" "),
            status,
            stderr: output.stderr.trim().to_string(),
        }),
    }
}

/// Final state of one node after provisioning
#[derive(Debug)]
pub enum NodeStatus {
    /// The binary was already staged
    AlreadyPresent,
    /// The binary was uploaded during this run
    Uploaded,
    /// The node could not be provisioned, always [`Error::Provisioning`]
    Failed(Error),
}

/// Provisioning result for a single node
#[derive(Debug)]
pub struct NodeOutcome {
    /// Node name
    pub node: String,
    /// External address, when one was resolved
    pub address: Option<String>,
    /// What happened to the binary
    pub status: NodeStatus,
    /// Best-effort failures that did not affect the outcome
    pub warnings: Vec<Error>,
}

impl NodeOutcome {
    fn failed(node: String, address: Option<String>, error: Error) -> Self {
        let error = Error::Provisioning {
            node: node.clone(),
            source: Box::new(error),
        };
        Self {
            node,
            address,
            status: NodeStatus::Failed(error),
            warnings: Vec::new(),
        }
    }

    /// Whether the node is ready to run the profiled job
    pub fn is_ready(&self) -> bool {
        !matches!(self.status, NodeStatus::Failed(_))
    }
}

/// Outcomes for every node, in node listing order
#[derive(Debug, Default)]
pub struct ProvisionReport {
    /// Per-node outcomes
    pub nodes: Vec<NodeOutcome>,
    /// Set when the phase was skipped by configuration
    pub skipped: bool,
}

impl ProvisionReport {
    /// Report for a run that skipped provisioning
    pub fn skipped() -> Self {
        Self {
            nodes: Vec::new(),
            skipped: true,
        }
    }

    /// Number of nodes the binary was uploaded to
    pub fn uploaded(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n.status, NodeStatus::Uploaded))
            .count()
    }

    /// Nodes that could not be provisioned
    pub fn failed(&self) -> impl Iterator<Item = &NodeOutcome> {
        self.nodes.iter().filter(|n| !n.is_ready())
    }
}

/// Stages the profiling binary on cluster nodes
pub struct NodeProvisioner<'a> {
    remote: &'a dyn RemoteExec,
    config: &'a ProfileConfig,
}

impl<'a> NodeProvisioner<'a> {
    /// Create a provisioner using `remote` to reach nodes
    pub fn new(remote: &'a dyn RemoteExec, config: &'a ProfileConfig) -> Self {
        Self { remote, config }
    }

    /// Provision every node, then decide whether the run may continue.
    ///
    /// The first node (in listing order) whose failure is fatal, or any
    /// failed node under [`ConnectivityPolicy::Abort`], is returned as its
    /// [`Error::Provisioning`]. Unreachable nodes under
    /// [`ConnectivityPolicy::Skip`] stay in the report.
    pub async fn provision(&self, nodes: &[Node]) -> Result<ProvisionReport> {
        info!(
            nodes = nodes.len(),
            tool = %self.config.tool,
            policy = %self.config.connectivity,
            "checking profiling binary on nodes"
        );

        let outcomes: Vec<NodeOutcome> = stream::iter(nodes)
            .map(|node| self.provision_node(node))
            .buffered(self.config.concurrency)
            .collect()
            .await;

        let mut report = ProvisionReport {
            nodes: outcomes,
            skipped: false,
        };

        let stop = report.nodes.iter().position(|outcome| match &outcome.status {
            NodeStatus::Failed(error) => self.stops_run(error),
            _ => false,
        });
        if let Some(index) = stop {
            if let NodeStatus::Failed(error) = report.nodes.swap_remove(index).status {
                return Err(error);
            }
        }
        for outcome in report.failed() {
            debug!(node = %outcome.node, "skipping unreachable node");
        }

        info!(
            nodes = report.nodes.len(),
            uploaded = report.uploaded(),
            failed = report.failed().count(),
            "node provisioning finished"
        );
        Ok(report)
    }

    fn stops_run(&self, error: &Error) -> bool {
        match error.severity() {
            Severity::Connectivity => self.config.connectivity == ConnectivityPolicy::Abort,
            Severity::Fatal => true,
            Severity::BestEffort => false,
        }
    }

    async fn provision_node(&self, node: &Node) -> NodeOutcome {
        let name = object_name(&node.metadata).to_string();
        let address = match external_address(node) {
            Ok(address) => address,
            Err(e) => return NodeOutcome::failed(name, None, e),
        };

        let status = match self.ensure_binary(&name, &address).await {
            Ok(status) => status,
            Err(e) => return NodeOutcome::failed(name, Some(address), e),
        };

        let mut warnings = Vec::new();
        if self.config.enable_kernel_symbols {
            if let Err(e) = self.enable_kernel_symbols(&address).await {
                debug!(node = %name, error = %e, "failed to enable kernel symbols");
                warnings.push(e);
            }
        }

        NodeOutcome {
            node: name,
            address: Some(address),
            status,
            warnings,
        }
    }

    async fn ensure_binary(&self, node: &str, address: &str) -> Result<NodeStatus> {
        let binary = self.config.tool.staged_binary(&self.config.stage.dir);
        let probe = probe_command(&binary.host_path);
        let output = self.remote.run(address, &probe).await?;

        match classify_probe(address, &probe, &output)? {
            BinaryPresence::Present => {
                info!(node = %node, path = %binary.host_path, "profiling binary present");
                Ok(NodeStatus::AlreadyPresent)
            }
            BinaryPresence::Absent => {
                info!(node = %node, path = %binary.host_path, "profiling binary missing, uploading");
                self.remote
                    .copy(
                        &CopyEndpoint::Local(self.config.binary_path.clone()),
                        &CopyEndpoint::remote(address, &binary.host_path),
                    )
                    .await?;
                info!(node = %node, "profiling binary uploaded");
                Ok(NodeStatus::Uploaded)
            }
        }
    }

    async fn enable_kernel_symbols(&self, address: &str) -> Result<()> {
        let argv = kernel_symbols_command();
        let output = self.remote.run(address, &argv).await?;
        if !output.success() {
            return Err(Error::RemoteCommand {
                host: address.to_string(),
                command: argv.join(" "),
                status: output.status,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(())
    }
}
