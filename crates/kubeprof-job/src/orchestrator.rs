//! Phase sequencing for one profiling run
//!
//! Order: validate config, resolve the original command, build the
//! instrumented job, provision every node, submit, wait, enumerate pods,
//! collect, clean up. Everything before provisioning is local, so input
//! errors surface before any remote side effect, and the job is only
//! submitted after the provisioning phase has joined.
//!
//! Once the job exists, any failure before collection still runs the
//! requested cleanup before the error is returned.

use std::path::PathBuf;
use std::sync::Arc;

use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use kubeprof_common::kube_utils::object_name;
use kubeprof_common::{Error, ProfileConfig, Result};

use crate::collect::ResultCollector;
use crate::command::resolve_original_command;
use crate::gateway::ClusterGateway;
use crate::image::ImageCommandResolver;
use crate::lifecycle::JobLifecycle;
use crate::provision::{NodeProvisioner, ProvisionReport};
use crate::remote::RemoteExec;
use crate::summary::RunSummary;
use crate::transform::instrument_job;

/// Runs a job template under the profiler and retrieves its artifacts
pub struct Orchestrator {
    gateway: Arc<dyn ClusterGateway>,
    remote: Arc<dyn RemoteExec>,
    images: Arc<dyn ImageCommandResolver>,
    config: ProfileConfig,
}

impl Orchestrator {
    /// Create an orchestrator over the given collaborators
    pub fn new(
        gateway: Arc<dyn ClusterGateway>,
        remote: Arc<dyn RemoteExec>,
        images: Arc<dyn ImageCommandResolver>,
        config: ProfileConfig,
    ) -> Self {
        Self {
            gateway,
            remote,
            images,
            config,
        }
    }

    /// Build the instrumented job without touching the cluster or any node
    pub async fn build_job(&self, template: &Job) -> Result<Job> {
        self.config.validate()?;
        let original = resolve_original_command(template, self.images.as_ref()).await?;
        info!(
            job = %object_name(&template.metadata),
            command = %original.join(" "),
            "wrapping original command"
        );
        instrument_job(
            template,
            &self.config.tool,
            &self.config.stage,
            &original,
        )
    }

    /// Stage the binary on every node, unless provisioning is skipped
    pub async fn provision(&self) -> Result<ProvisionReport> {
        if self.config.skip_provisioning {
            info!("skipping node provisioning");
            return Ok(ProvisionReport::skipped());
        }
        let nodes = self.gateway.list_nodes().await?;
        NodeProvisioner::new(self.remote.as_ref(), &self.config)
            .provision(&nodes)
            .await
    }

    /// Run every phase and write artifacts into `output_dir`.
    ///
    /// A cancelled `cancel` stops the run before submission, or aborts the
    /// completion wait once the job exists.
    pub async fn run(
        &self,
        template: &Job,
        output_dir: impl Into<PathBuf>,
        cancel: &CancellationToken,
    ) -> Result<RunSummary> {
        let job = self.build_job(template).await?;
        let provisioning = self.provision().await?;

        if cancel.is_cancelled() {
            info!(job = %object_name(&job.metadata), "cancelled before submission");
            return Err(Error::Cancelled {
                job: object_name(&job.metadata).to_string(),
            });
        }

        let mut lifecycle = JobLifecycle::new(self.gateway.as_ref(), &self.config);
        lifecycle.submit(&job).await?;

        let pods = match self.finished_pods(&mut lifecycle, cancel).await {
            Ok(pods) => pods,
            Err(e) => {
                self.cleanup_after_failure(&mut lifecycle).await;
                return Err(e);
            }
        };

        let collections = ResultCollector::new(
            self.gateway.as_ref(),
            self.remote.as_ref(),
            &self.config,
            output_dir,
        )
        .collect(&pods)
        .await;

        let cleanup = if self.config.delete_after {
            Some(lifecycle.delete(&pods).await)
        } else {
            None
        };

        let summary = RunSummary {
            job: lifecycle.name().to_string(),
            state: lifecycle.state(),
            provisioning,
            collections,
            cleanup,
        };
        summary.log();
        Ok(summary)
    }

    async fn finished_pods(
        &self,
        lifecycle: &mut JobLifecycle<'_>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Pod>> {
        lifecycle.await_completion(cancel).await?;
        lifecycle.enumerate_pods().await
    }

    async fn cleanup_after_failure(&self, lifecycle: &mut JobLifecycle<'_>) {
        if !self.config.delete_after {
            return;
        }
        let pods = match lifecycle.enumerate_pods().await {
            Ok(pods) => pods,
            Err(e) => {
                warn!(job = %lifecycle.name(), error = %e, "cannot list pods for cleanup");
                Vec::new()
            }
        };
        let cleanup = lifecycle.delete(&pods).await;
        for failure in &cleanup.failures {
            warn!(resource = %failure.resource, error = %failure.error, "cleanup failure");
        }
    }
}
