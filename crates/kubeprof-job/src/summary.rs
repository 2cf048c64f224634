//! End-of-run report
//!
//! Gathers the partial outcomes of every phase so best-effort failures are
//! reported together instead of being lost in the log stream.

use tracing::{info, warn};

use kubeprof_common::{Error, Severity};

use crate::collect::PodCollection;
use crate::lifecycle::{CleanupReport, JobState};
use crate::provision::{NodeStatus, ProvisionReport};

/// Outcome of a profiling run that reached collection
#[derive(Debug)]
pub struct RunSummary {
    /// Name of the submitted job
    pub job: String,
    /// Lifecycle state when the run ended
    pub state: JobState,
    /// Per-node provisioning outcomes
    pub provisioning: ProvisionReport,
    /// Per-pod collection outcomes
    pub collections: Vec<PodCollection>,
    /// Cleanup outcome, when cleanup was requested
    pub cleanup: Option<CleanupReport>,
}

impl RunSummary {
    /// Number of artifacts written locally
    pub fn artifacts_collected(&self) -> usize {
        self.collections.iter().map(|c| c.artifacts.len()).sum()
    }

    /// Pods with at least one collection failure
    pub fn incomplete_pods(&self) -> impl Iterator<Item = &PodCollection> {
        self.collections.iter().filter(|c| !c.is_complete())
    }

    /// Count of every best-effort failure recorded during the run
    pub fn failure_count(&self) -> usize {
        let nodes: usize = self
            .provisioning
            .nodes
            .iter()
            .map(|n| n.warnings.len() + usize::from(!n.is_ready()))
            .sum();
        let pods: usize = self.collections.iter().map(|c| c.failures.len()).sum();
        let cleanup = self.cleanup.as_ref().map_or(0, |c| c.failures.len());
        nodes + pods + cleanup
    }

    /// Failures caused by a host that could not be reached
    pub fn unreachable_count(&self) -> usize {
        self.unit_errors()
            .filter(|error| error.severity() == Severity::Connectivity)
            .count()
    }

    fn unit_errors(&self) -> impl Iterator<Item = &Error> {
        let nodes = self.provisioning.nodes.iter().flat_map(|node| {
            let failed = match &node.status {
                NodeStatus::Failed(error) => Some(error),
                _ => None,
            };
            failed.into_iter().chain(node.warnings.iter())
        });
        let pods = self.collections.iter().flat_map(|c| c.failures.iter());
        nodes.chain(pods)
    }

    /// Log the summary, one warning per failed unit
    pub fn log(&self) {
        for node in &self.provisioning.nodes {
            if let NodeStatus::Failed(ref error) = node.status {
                warn!(node = %node.node, severity = ?error.severity(), error = %error, "node skipped");
            }
            for warning in &node.warnings {
                warn!(node = %node.node, severity = ?warning.severity(), error = %warning, "node warning");
            }
        }
        for pod in self.incomplete_pods() {
            for error in &pod.failures {
                warn!(pod = %pod.pod, severity = ?error.severity(), error = %error, "collection failure");
            }
        }
        if let Some(cleanup) = &self.cleanup {
            for failure in &cleanup.failures {
                warn!(resource = %failure.resource, error = %failure.error, "cleanup failure");
            }
        }

        info!(
            job = %self.job,
            state = %self.state,
            nodes = self.provisioning.nodes.len(),
            uploaded = self.provisioning.uploaded(),
            pods = self.collections.len(),
            artifacts = self.artifacts_collected(),
            failures = self.failure_count(),
            unreachable = self.unreachable_count(),
            "profiling run finished"
        );
    }
}
