//! Shared types for kubeprof
//!
//! - [`error`] - Error taxonomy with per-phase severity classification
//! - [`config`] - Run configuration passed to every component
//! - [`tool`] - Profiling tool, staged binary and artifact paths
//! - [`kube_utils`] - Kubernetes client and object helpers

#![deny(missing_docs)]

pub mod config;
pub mod error;
pub mod kube_utils;
pub mod tool;

pub use config::{ConnectivityPolicy, ProfileConfig, StageConfig, StageMountMode};
pub use error::{Error, Severity};
pub use tool::{Artifact, ProfilingTool, StagedBinary};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
