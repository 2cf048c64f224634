//! Job lifecycle: submit, wait, enumerate pods, clean up
//!
//! A job moves through `Built -> Submitted -> Running -> Completed` and,
//! when cleanup is requested, `Deleted`. Submission and polling errors are
//! fatal; cleanup is best-effort and reports every deletion that failed.

use std::fmt;
use std::time::Duration;

use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use kubeprof_common::kube_utils::{
    is_job_complete, job_failure_message, label_selector, object_name, pod_template_labels,
};
use kubeprof_common::{Error, ProfileConfig, Result};

use crate::gateway::ClusterGateway;

/// Lifecycle state of the profiled job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Instrumented locally, not yet sent to the cluster
    Built,
    /// Accepted by the API server
    Submitted,
    /// Being polled for completion
    Running,
    /// Completion timestamp observed
    Completed,
    /// Job resource deleted
    Deleted,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Built => "Built",
            Self::Submitted => "Submitted",
            Self::Running => "Running",
            Self::Completed => "Completed",
            Self::Deleted => "Deleted",
        };
        f.write_str(s)
    }
}

/// A deletion that failed during cleanup
#[derive(Debug)]
pub struct CleanupFailure {
    /// `job/<name>` or `pod/<name>`
    pub resource: String,
    /// Why the deletion failed
    pub error: Error,
}

/// Outcome of best-effort cleanup
#[derive(Debug, Default)]
pub struct CleanupReport {
    /// Resources that were deleted
    pub deleted: Vec<String>,
    /// Resources that could not be deleted
    pub failures: Vec<CleanupFailure>,
}

/// Drives one job through its lifecycle against a [`ClusterGateway`]
pub struct JobLifecycle<'a> {
    gateway: &'a dyn ClusterGateway,
    poll_interval: Duration,
    deadline: Option<Duration>,
    name: String,
    state: JobState,
}

impl<'a> JobLifecycle<'a> {
    /// Create a lifecycle for a job that has been built but not submitted
    pub fn new(gateway: &'a dyn ClusterGateway, config: &ProfileConfig) -> Self {
        Self {
            gateway,
            poll_interval: config.poll_interval,
            deadline: config.completion_timeout,
            name: String::new(),
            state: JobState::Built,
        }
    }

    /// Current state
    pub fn state(&self) -> JobState {
        self.state
    }

    /// Name of the submitted job (empty before submission)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the job exists in the cluster and has not been deleted
    pub fn is_submitted(&self) -> bool {
        !matches!(self.state, JobState::Built | JobState::Deleted)
    }

    /// Create the job. Failure is fatal and never retried.
    pub async fn submit(&mut self, job: &Job) -> Result<Job> {
        let created = self.gateway.create_job(job).await?;
        self.name = match object_name(&created.metadata) {
            "" => object_name(&job.metadata).to_string(),
            name => name.to_string(),
        };
        self.state = JobState::Submitted;
        info!(job = %self.name, "job submitted");
        Ok(created)
    }

    /// Poll until the job reports a completion timestamp.
    ///
    /// Ends early with [`Error::JobFailed`] on a `Failed` condition,
    /// [`Error::Cancelled`] when `cancel` fires, or [`Error::Timeout`] once the
    /// configured deadline passes. Any error fetching the job is fatal.
    pub async fn await_completion(&mut self, cancel: &CancellationToken) -> Result<Job> {
        if self.state != JobState::Submitted {
            return Err(Error::config(format!(
                "cannot wait for job in state {}",
                self.state
            )));
        }
        self.state = JobState::Running;
        info!(job = %self.name, interval = ?self.poll_interval, "waiting for job completion");

        let wait = poll_completion(self.gateway, &self.name, self.poll_interval);
        let result = match self.deadline {
            Some(limit) => tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(Error::Cancelled { job: self.name.clone() }),
                res = tokio::time::timeout(limit, wait) => res.unwrap_or_else(|_| {
                    Err(Error::Timeout { job: self.name.clone(), seconds: limit.as_secs() })
                }),
            },
            None => tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(Error::Cancelled { job: self.name.clone() }),
                res = wait => res,
            },
        };

        let job = result?;
        self.state = JobState::Completed;
        info!(job = %self.name, "job completed");
        Ok(job)
    }

    /// List the pods spawned by the job.
    ///
    /// The job is re-fetched and its pod template labels are used as an
    /// equality selector.
    pub async fn enumerate_pods(&self) -> Result<Vec<Pod>> {
        let job = self.gateway.get_job(&self.name).await?;
        let labels = pod_template_labels(&job);
        if labels.is_empty() {
            return Err(Error::config(format!(
                "job {} has no pod template labels to select its pods",
                self.name
            )));
        }
        let pods = self.gateway.list_pods(&labels).await?;
        info!(job = %self.name, selector = %label_selector(&labels), pods = pods.len(), "found job pods");
        Ok(pods)
    }

    /// Delete the job, then every pod individually.
    ///
    /// Each failure is recorded and the remaining deletions still run.
    pub async fn delete(&mut self, pods: &[Pod]) -> CleanupReport {
        let mut report = CleanupReport::default();
        if !self.is_submitted() {
            return report;
        }

        let job_resource = format!("job/{}", self.name);
        match self.gateway.delete_job(&self.name).await {
            Ok(()) => {
                self.state = JobState::Deleted;
                info!(job = %self.name, "job deleted");
                report.deleted.push(job_resource);
            }
            Err(error) => {
                debug!(job = %self.name, error = %error, "failed to delete job");
                report.failures.push(CleanupFailure {
                    resource: job_resource,
                    error,
                });
            }
        }

        for pod in pods {
            let name = object_name(&pod.metadata);
            let resource = format!("pod/{}", name);
            match self.gateway.delete_pod(name).await {
                Ok(()) => {
                    debug!(pod = %name, "pod deleted");
                    report.deleted.push(resource);
                }
                Err(error) => {
                    debug!(pod = %name, error = %error, "failed to delete pod");
                    report.failures.push(CleanupFailure { resource, error });
                }
            }
        }
        report
    }
}

async fn poll_completion(
    gateway: &dyn ClusterGateway,
    name: &str,
    poll_interval: Duration,
) -> Result<Job> {
    loop {
        let job = gateway.get_job(name).await?;
        if is_job_complete(&job) {
            return Ok(job);
        }
        if let Some(message) = job_failure_message(&job) {
            return Err(Error::JobFailed {
                job: name.to_string(),
                message,
            });
        }
        debug!(job = %name, "job not complete yet");
        tokio::time::sleep(poll_interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MockClusterGateway;
    use k8s_openapi::api::batch::v1::{JobCondition, JobSpec, JobStatus};
    use k8s_openapi::api::core::v1::PodTemplateSpec;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
    use kubeprof_common::ProfilingTool;
    use std::collections::BTreeMap;

    fn config() -> ProfileConfig {
        ProfileConfig::new(ProfilingTool::new("perf").unwrap())
    }

    fn job(name: &str, labels: &[(&str, &str)]) -> Job {
        Job {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: Some(JobSpec {
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(
                            labels
                                .iter()
                                .map(|(k, v)| (k.to_string(), v.to_string()))
                                .collect(),
                        ),
                        ..Default::default()
                    }),
                    spec: None,
                },
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn completed(mut job: Job) -> Job {
        job.status = Some(JobStatus {
            completion_time: Some(Time(Default::default())),
            ..Default::default()
        });
        job
    }

    fn pod(name: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn submit_records_server_name() {
        let mut gateway = MockClusterGateway::new();
        gateway
            .expect_create_job()
            .times(1)
            .returning(|_| Ok(job("profiled-abc12", &[])));

        let config = config();
        let mut lifecycle = JobLifecycle::new(&gateway, &config);
        assert_eq!(lifecycle.state(), JobState::Built);
        lifecycle.submit(&job("profiled", &[])).await.unwrap();
        assert_eq!(lifecycle.state(), JobState::Submitted);
        assert_eq!(lifecycle.name(), "profiled-abc12");
    }

    #[tokio::test]
    async fn rejected_submission_is_fatal() {
        let mut gateway = MockClusterGateway::new();
        gateway
            .expect_create_job()
            .times(1)
            .returning(|_| Err(Error::config("admission denied")));

        let config = config();
        let mut lifecycle = JobLifecycle::new(&gateway, &config);
        assert!(lifecycle.submit(&job("profiled", &[])).await.is_err());
        assert_eq!(lifecycle.state(), JobState::Built);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_until_completion_time_is_set() {
        let mut gateway = MockClusterGateway::new();
        gateway
            .expect_create_job()
            .returning(|j| Ok(j.clone()));
        let mut polls = 0;
        gateway.expect_get_job().times(3).returning(move |name| {
            polls += 1;
            let j = job(name, &[]);
            Ok(if polls < 3 { j } else { completed(j) })
        });

        let config = config();
        let mut lifecycle = JobLifecycle::new(&gateway, &config);
        lifecycle.submit(&job("profiled", &[])).await.unwrap();
        let done = lifecycle
            .await_completion(&CancellationToken::new())
            .await
            .unwrap();
        assert!(is_job_complete(&done));
        assert_eq!(lifecycle.state(), JobState::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_condition_ends_wait() {
        let mut gateway = MockClusterGateway::new();
        gateway.expect_create_job().returning(|j| Ok(j.clone()));
        gateway.expect_get_job().returning(|name| {
            let mut j = job(name, &[]);
            j.status = Some(JobStatus {
                conditions: Some(vec![JobCondition {
                    type_: "Failed".to_string(),
                    status: "True".to_string(),
                    message: Some("BackoffLimitExceeded".to_string()),
                    ..Default::default()
                }]),
                ..Default::default()
            });
            Ok(j)
        });

        let config = config();
        let mut lifecycle = JobLifecycle::new(&gateway, &config);
        lifecycle.submit(&job("profiled", &[])).await.unwrap();
        match lifecycle.await_completion(&CancellationToken::new()).await {
            Err(Error::JobFailed { job, message }) => {
                assert_eq!(job, "profiled");
                assert_eq!(message, "BackoffLimitExceeded");
            }
            other => panic!("expected JobFailed, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn poll_error_is_fatal() {
        let mut gateway = MockClusterGateway::new();
        gateway.expect_create_job().returning(|j| Ok(j.clone()));
        gateway
            .expect_get_job()
            .times(1)
            .returning(|_| Err(Error::config("connection reset")));

        let config = config();
        let mut lifecycle = JobLifecycle::new(&gateway, &config);
        lifecycle.submit(&job("profiled", &[])).await.unwrap();
        assert!(lifecycle
            .await_completion(&CancellationToken::new())
            .await
            .is_err());
        assert_eq!(lifecycle.state(), JobState::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_bounds_the_wait() {
        let mut gateway = MockClusterGateway::new();
        gateway.expect_create_job().returning(|j| Ok(j.clone()));
        gateway.expect_get_job().returning(|name| Ok(job(name, &[])));

        let mut config = config();
        config.completion_timeout = Some(Duration::from_secs(5));
        let mut lifecycle = JobLifecycle::new(&gateway, &config);
        lifecycle.submit(&job("profiled", &[])).await.unwrap();
        assert!(matches!(
            lifecycle.await_completion(&CancellationToken::new()).await,
            Err(Error::Timeout { seconds: 5, .. })
        ));
    }

    #[tokio::test]
    async fn cancellation_stops_the_wait() {
        let mut gateway = MockClusterGateway::new();
        gateway.expect_create_job().returning(|j| Ok(j.clone()));
        gateway.expect_get_job().returning(|name| Ok(job(name, &[])));

        let config = config();
        let mut lifecycle = JobLifecycle::new(&gateway, &config);
        lifecycle.submit(&job("profiled", &[])).await.unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(
            lifecycle.await_completion(&cancel).await,
            Err(Error::Cancelled { .. })
        ));
        assert!(lifecycle.is_submitted());
    }

    #[tokio::test]
    async fn waiting_before_submit_is_rejected() {
        let gateway = MockClusterGateway::new();
        let config = config();
        let mut lifecycle = JobLifecycle::new(&gateway, &config);
        assert!(lifecycle
            .await_completion(&CancellationToken::new())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn pods_are_selected_by_template_labels() {
        let mut gateway = MockClusterGateway::new();
        gateway.expect_create_job().returning(|j| Ok(j.clone()));
        gateway
            .expect_get_job()
            .returning(|name| Ok(job(name, &[("app", "x"), ("run", "1")])));
        gateway.expect_list_pods().times(1).returning(|selector| {
            let expected: BTreeMap<String, String> = [("app", "x"), ("run", "1")]
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
            assert_eq!(selector, &expected);
            Ok(vec![pod("profiled-1")])
        });

        let config = config();
        let mut lifecycle = JobLifecycle::new(&gateway, &config);
        lifecycle.submit(&job("profiled", &[])).await.unwrap();
        let pods = lifecycle.enumerate_pods().await.unwrap();
        assert_eq!(pods.len(), 1);
    }

    #[tokio::test]
    async fn job_without_labels_cannot_select_pods() {
        let mut gateway = MockClusterGateway::new();
        gateway.expect_create_job().returning(|j| Ok(j.clone()));
        gateway.expect_get_job().returning(|name| Ok(job(name, &[])));
        gateway.expect_list_pods().never();

        let config = config();
        let mut lifecycle = JobLifecycle::new(&gateway, &config);
        lifecycle.submit(&job("profiled", &[])).await.unwrap();
        assert!(lifecycle.enumerate_pods().await.is_err());
    }

    #[tokio::test]
    async fn cleanup_continues_past_failures() {
        let mut gateway = MockClusterGateway::new();
        gateway.expect_create_job().returning(|j| Ok(j.clone()));
        gateway
            .expect_delete_job()
            .times(1)
            .returning(|_| Err(Error::config("forbidden")));
        gateway.expect_delete_pod().times(3).returning(|name| {
            if name == "p2" {
                Err(Error::config("not found"))
            } else {
                Ok(())
            }
        });

        let config = config();
        let mut lifecycle = JobLifecycle::new(&gateway, &config);
        lifecycle.submit(&job("profiled", &[])).await.unwrap();
        let report = lifecycle.delete(&[pod("p1"), pod("p2"), pod("p3")]).await;
        assert_eq!(report.deleted, vec!["pod/p1", "pod/p3"]);
        let failed: Vec<_> = report.failures.iter().map(|f| f.resource.as_str()).collect();
        assert_eq!(failed, vec!["job/profiled", "pod/p2"]);
        assert_ne!(lifecycle.state(), JobState::Deleted);
    }

    #[tokio::test]
    async fn cleanup_marks_job_deleted() {
        let mut gateway = MockClusterGateway::new();
        gateway.expect_create_job().returning(|j| Ok(j.clone()));
        gateway.expect_delete_job().times(1).returning(|_| Ok(()));

        let config = config();
        let mut lifecycle = JobLifecycle::new(&gateway, &config);
        lifecycle.submit(&job("profiled", &[])).await.unwrap();
        let report = lifecycle.delete(&[]).await;
        assert!(report.failures.is_empty());
        assert_eq!(lifecycle.state(), JobState::Deleted);
        assert!(lifecycle.delete(&[]).await.deleted.is_empty());
    }
}
