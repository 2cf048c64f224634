//! Artifact retrieval from the nodes that ran the job's pods
//!
//! Entirely best-effort: every pod is processed, and every failure is recorded
//! against the pod it belongs to.

use std::path::PathBuf;

use futures::stream::{self, StreamExt};
use k8s_openapi::api::core::v1::Pod;
use tracing::{debug, info};

use kubeprof_common::kube_utils::{external_address, object_name};
use kubeprof_common::{Artifact, Error, ProfileConfig, Result};

use crate::gateway::ClusterGateway;
use crate::remote::{CopyEndpoint, RemoteExec};

/// Command that makes the artifacts readable by the copy user
pub fn permission_repair_command(artifacts: &[Artifact]) -> Vec<String> {
    let mut argv = vec!["sudo".to_string(), "chmod".to_string(), "644".to_string()];
    argv.extend(artifacts.iter().map(|a| a.remote_path.clone()));
    argv
}

/// Collection result for one pod
#[derive(Debug)]
pub struct PodCollection {
    /// Pod name
    pub pod: String,
    /// Node the pod ran on, when known
    pub node: Option<String>,
    /// Local paths of artifacts that were retrieved
    pub artifacts: Vec<PathBuf>,
    /// Failures, in the order they happened
    pub failures: Vec<Error>,
}

impl PodCollection {
    fn new(pod: String) -> Self {
        Self {
            pod,
            node: None,
            artifacts: Vec::new(),
            failures: Vec::new(),
        }
    }

    /// Whether both artifacts were retrieved without any failure
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Copies profiling artifacts from nodes to local storage
pub struct ResultCollector<'a> {
    gateway: &'a dyn ClusterGateway,
    remote: &'a dyn RemoteExec,
    config: &'a ProfileConfig,
    output_dir: PathBuf,
}

impl<'a> ResultCollector<'a> {
    /// Create a collector writing artifacts into `output_dir`
    pub fn new(
        gateway: &'a dyn ClusterGateway,
        remote: &'a dyn RemoteExec,
        config: &'a ProfileConfig,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            gateway,
            remote,
            config,
            output_dir: output_dir.into(),
        }
    }

    /// Collect artifacts for every pod; results keep the order of `pods`
    pub async fn collect(&self, pods: &[Pod]) -> Vec<PodCollection> {
        info!(pods = pods.len(), output = %self.output_dir.display(), "collecting profiling results");
        stream::iter(pods)
            .map(|pod| self.collect_pod(pod))
            .buffered(self.config.concurrency)
            .collect()
            .await
    }

    async fn collect_pod(&self, pod: &Pod) -> PodCollection {
        let mut result = PodCollection::new(object_name(&pod.metadata).to_string());

        let address = match self.pod_address(pod, &mut result).await {
            Ok(address) => address,
            Err(e) => {
                debug!(pod = %result.pod, error = %e, "cannot locate pod host");
                result.failures.push(e);
                return result;
            }
        };

        let artifacts = self.config.tool.artifacts(&self.config.stage.dir);

        if let Err(e) = self.repair_permissions(&address, &artifacts).await {
            debug!(pod = %result.pod, error = %e, "failed to repair artifact permissions, copying anyway");
            result.failures.push(e);
        }

        for artifact in &artifacts {
            let local = self.output_dir.join(artifact.local_name(&result.pod));
            let copied = self
                .remote
                .copy(
                    &CopyEndpoint::remote(&address, &artifact.remote_path),
                    &CopyEndpoint::Local(local.clone()),
                )
                .await;
            match copied {
                Ok(()) => {
                    info!(pod = %result.pod, path = %local.display(), "artifact retrieved");
                    result.artifacts.push(local);
                }
                Err(e) => {
                    debug!(pod = %result.pod, artifact = %artifact.remote_path, error = %e, "failed to retrieve artifact");
                    result.failures.push(e);
                }
            }
        }
        result
    }

    async fn pod_address(&self, pod: &Pod, result: &mut PodCollection) -> Result<String> {
        let node_name = pod
            .spec
            .as_ref()
            .and_then(|s| s.node_name.as_deref())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| Error::NoExternalAddress {
                node: format!("<unscheduled pod {}>", result.pod),
            })?;
        result.node = Some(node_name.to_string());
        let node = self.gateway.get_node(node_name).await?;
        external_address(&node)
    }

    async fn repair_permissions(&self, address: &str, artifacts: &[Artifact]) -> Result<()> {
        let argv = permission_repair_command(artifacts);
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MockClusterGateway;
    use crate::remote::{ExecOutput, MockRemoteExec};
    use k8s_openapi::api::core::v1::{Node, NodeAddress, NodeStatus, PodSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use kubeprof_common::ProfilingTool;

    fn config() -> ProfileConfig {
        ProfileConfig::new(ProfilingTool::new("perf").unwrap())
    }

    fn pod(name: &str, node: Option<&str>) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: Some(PodSpec {
                node_name: node.map(str::to_string),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn node(name: &str, ip: &str) -> Node {
        Node {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            status: Some(NodeStatus {
                addresses: Some(vec![NodeAddress {
                    type_: "ExternalIP".to_string(),
                    address: ip.to_string(),
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn gateway() -> MockClusterGateway {
        let mut gateway = MockClusterGateway::new();
        gateway
            .expect_get_node()
            .returning(|name| Ok(node(name, &format!("34.0.0.{}", &name[name.len() - 1..]))));
        gateway
    }

    #[test]
    fn chmod_covers_both_artifacts() {
        let artifacts = ProfilingTool::new("perf").unwrap().artifacts("/tmp/");
        assert_eq!(
            permission_repair_command(&artifacts),
            vec!["sudo", "chmod", "644", "/tmp/perf.data", "/tmp/perf.report"]
        );
    }

    #[tokio::test]
    async fn copies_artifacts_named_by_pod() {
        let gateway = gateway();
        let mut remote = MockRemoteExec::new();
        remote
            .expect_run()
            .times(1)
            .returning(|_, _| Ok(ExecOutput::with_status(0)));
        remote.expect_copy().times(2).returning(|from, to| {
            match (from, to) {
                (CopyEndpoint::Remote { host, .. }, CopyEndpoint::Local(_)) => {
                    assert_eq!(host, "34.0.0.1")
                }
                other => panic!("unexpected copy direction {:?}", other),
            }
            Ok(())
        });

        let config = config();
        let collector = ResultCollector::new(&gateway, &remote, &config, "/out/run");
        let results = collector.collect(&[pod("job-abc", Some("node-1"))]).await;
        assert!(results[0].is_complete());
        assert_eq!(
            results[0].artifacts,
            vec![
                PathBuf::from("/out/run/job-abc.data"),
                PathBuf::from("/out/run/job-abc.report")
            ]
        );
        assert_eq!(results[0].node.as_deref(), Some("node-1"));
    }

    #[tokio::test]
    async fn permission_failure_still_copies() {
        let gateway = gateway();
        let mut remote = MockRemoteExec::new();
        remote
            .expect_run()
            .returning(|_, _| Ok(ExecOutput::with_status(1)));
        remote.expect_copy().times(2).returning(|_, _| Ok(()));

        let config = config();
        let collector = ResultCollector::new(&gateway, &remote, &config, "/out");
        let results = collector.collect(&[pod("p", Some("node-1"))]).await;
        assert_eq!(results[0].artifacts.len(), 2);
        assert!(matches!(
            results[0].failures.as_slice(),
            [Error::RemoteCommand { status: 1, .. }]
        ));
    }

    #[tokio::test]
    async fn unscheduled_pod_is_reported_without_remote_calls() {
        let mut gateway = MockClusterGateway::new();
        gateway.expect_get_node().never();
        let mut remote = MockRemoteExec::new();
        remote.expect_run().never();
        remote.expect_copy().never();

        let config = config();
        let collector = ResultCollector::new(&gateway, &remote, &config, "/out");
        let results = collector.collect(&[pod("pending", None)]).await;
        assert_eq!(results[0].failures.len(), 1);
        assert!(results[0].artifacts.is_empty());
    }

    #[tokio::test]
    async fn one_failed_copy_keeps_the_other() {
        let gateway = gateway();
        let mut remote = MockRemoteExec::new();
        remote
            .expect_run()
            .returning(|_, _| Ok(ExecOutput::with_status(0)));
        remote.expect_copy().returning(|from, to| match from {
            CopyEndpoint::Remote { path, .. } if path.ends_with(".report") => Err(Error::Copy {
                from: from.to_string(),
                to: to.to_string(),
                message: "No such file or directory".to_string(),
            }),
            _ => Ok(()),
        });

        let config = config();
        let collector = ResultCollector::new(&gateway, &remote, &config, "/out");
        let results = collector.collect(&[pod("p", Some("node-1"))]).await;
        assert_eq!(results[0].artifacts, vec![PathBuf::from("/out/p.data")]);
        assert_eq!(results[0].failures.len(), 1);
    }
}
