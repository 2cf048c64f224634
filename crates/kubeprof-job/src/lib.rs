//! Profiling job orchestration for Kubernetes
//!
//! Runs a user-supplied Job under a profiling tool and brings the results home:
//! - Stages the profiling binary on every node over ssh (`NodeProvisioner`)
//! - Rewrites the Job to run its original command under the profiler
//! - Submits the Job and waits for completion (`JobLifecycle`)
//! - Copies each pod's artifacts back from its node (`ResultCollector`)
//!
//! Cluster, remote shell and image access sit behind traits so every phase
//! can be exercised against fixtures.

#![deny(missing_docs)]

pub mod collect;
pub mod command;
pub mod gateway;
pub mod image;
pub mod lifecycle;
pub mod orchestrator;
pub mod provision;
pub mod remote;
pub mod summary;
pub mod transform;

pub use collect::{PodCollection, ResultCollector};
pub use gateway::{ClusterGateway, KubeGateway};
pub use image::{DockerImageResolver, ImageCommandResolver, ImageDefaults};
pub use lifecycle::{CleanupReport, JobLifecycle, JobState};
pub use orchestrator::Orchestrator;
pub use provision::{NodeOutcome, NodeProvisioner, NodeStatus, ProvisionReport};
pub use remote::{CopyEndpoint, ExecOutput, RemoteExec, SshChannel};
pub use summary::RunSummary;
