//! Cluster access used by the orchestration phases
//!
//! Provides a trait-based abstraction over the handful of Kubernetes calls the
//! orchestrator makes, allowing tests to run every phase against fixtures
//! while production code talks to the API server.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::Client;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use kubeprof_common::kube_utils::label_selector;
use kubeprof_common::{Error, Result};

/// Trait abstracting job, pod and node operations
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterGateway: Send + Sync {
    /// Create a job and return the server's view of it
    async fn create_job(&self, job: &Job) -> Result<Job>;

    /// Get a job by name
    async fn get_job(&self, name: &str) -> Result<Job>;

    /// Delete a job by name
    async fn delete_job(&self, name: &str) -> Result<()>;

    /// List every node in the cluster
    async fn list_nodes(&self) -> Result<Vec<Node>>;

    /// Get a node by name
    async fn get_node(&self, name: &str) -> Result<Node>;

    /// List pods whose labels equal every entry of `selector`
    async fn list_pods(&self, selector: &BTreeMap<String, String>) -> Result<Vec<Pod>>;

    /// Delete a pod by name
    async fn delete_pod(&self, name: &str) -> Result<()>;
}

/// Real gateway backed by a kube client, scoped to one namespace
#[derive(Clone)]
pub struct KubeGateway {
    jobs: Api<Job>,
    pods: Api<Pod>,
    nodes: Api<Node>,
}

impl KubeGateway {
    /// Create a gateway for jobs and pods in `namespace`
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            jobs: Api::namespaced(client.clone(), namespace),
            pods: Api::namespaced(client.clone(), namespace),
            nodes: Api::all(client),
        }
    }
}

#[async_trait]
impl ClusterGateway for KubeGateway {
    async fn create_job(&self, job: &Job) -> Result<Job> {
        self.jobs
            .create(&PostParams::default(), job)
            .await
            .map_err(|e| Error::kube("create job", e))
    }

    async fn get_job(&self, name: &str) -> Result<Job> {
        self.jobs
            .get(name)
            .await
            .map_err(|e| Error::kube(format!("get job {}", name), e))
    }

    async fn delete_job(&self, name: &str) -> Result<()> {
        self.jobs
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| Error::kube(format!("delete job {}", name), e))?;
        Ok(())
    }

    async fn list_nodes(&self) -> Result<Vec<Node>> {
        let list = self
            .nodes
            .list(&ListParams::default())
            .await
            .map_err(|e| Error::kube("list nodes", e))?;
        Ok(list.items)
    }

    async fn get_node(&self, name: &str) -> Result<Node> {
        self.nodes
            .get(name)
            .await
            .map_err(|e| Error::kube(format!("get node {}", name), e))
    }

    async fn list_pods(&self, selector: &BTreeMap<String, String>) -> Result<Vec<Pod>> {
        let selector = label_selector(selector);
        debug!(selector = %selector, "listing pods");
        let list = self
            .pods
            .list(&ListParams::default().labels(&selector))
            .await
            .map_err(|e| Error::kube(format!("list pods {}", selector), e))?;
        Ok(list.items)
    }

    async fn delete_pod(&self, name: &str) -> Result<()> {
        self.pods
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| Error::kube(format!("delete pod {}", name), e))?;
        Ok(())
    }
}
