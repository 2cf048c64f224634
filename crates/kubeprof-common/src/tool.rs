//! Profiling tool and staging layout
//!
//! The staging directory is shared between a node and every container that
//! runs on it: the binary is uploaded there and the profiler writes its
//! artifacts there, so host paths and in-container paths under the stage
//! directory are identical.

use std::fmt;
use std::path::Path;

use crate::{Error, Result};

/// Directory inside the container where the staged binary is copied
pub const CONTAINER_BIN_DIR: &str = "/bin/";

/// Extension of the raw profiling data artifact
pub const DATA_EXTENSION: &str = "data";

/// Extension of the formatted report artifact
pub const REPORT_EXTENSION: &str = "report";

/// Join a file name onto a directory, tolerating a trailing separator.
pub fn join_path(dir: &str, name: &str) -> String {
    Path::new(dir).join(name).to_string_lossy().into_owned()
}

/// A profiling tool identified by its executable name (e.g. `perf`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfilingTool {
    name: String,
}

impl ProfilingTool {
    /// Create a tool, rejecting names that can't be used as a file name.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::config("profiling tool not specified"));
        }
        if name.contains('/') || name.chars().any(char::is_whitespace) {
            return Err(Error::config(format!(
                "profiling tool name '{}' must be a bare executable name",
                name
            )));
        }
        Ok(Self { name })
    }

    /// Executable name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The binary as placed on nodes and inside containers
    pub fn staged_binary(&self, stage_dir: &str) -> StagedBinary {
        StagedBinary {
            host_path: join_path(stage_dir, &self.name),
            container_path: join_path(CONTAINER_BIN_DIR, &self.name),
        }
    }

    /// Path of the raw data file the profiler records into
    pub fn data_path(&self, stage_dir: &str) -> String {
        join_path(stage_dir, &format!("{}.{}", self.name, DATA_EXTENSION))
    }

    /// Path of the formatted report
    pub fn report_path(&self, stage_dir: &str) -> String {
        join_path(stage_dir, &format!("{}.{}", self.name, REPORT_EXTENSION))
    }

    /// Both output artifacts, data file first
    pub fn artifacts(&self, stage_dir: &str) -> [Artifact; 2] {
        [
            Artifact {
                remote_path: self.data_path(stage_dir),
                extension: DATA_EXTENSION,
            },
            Artifact {
                remote_path: self.report_path(stage_dir),
                extension: REPORT_EXTENSION,
            },
        ]
    }
}

impl fmt::Display for ProfilingTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// The profiling binary with its canonical locations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedBinary {
    /// Location on the node (stage directory + name)
    pub host_path: String,
    /// Location inside the container's binary search path
    pub container_path: String,
}

/// An output file the profiler leaves in the stage directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Location on the node
    pub remote_path: String,
    /// Extension used for the local copy (`<pod>.<extension>`)
    pub extension: &'static str,
}

impl Artifact {
    /// Local file name for this artifact when collected from `pod`
    pub fn local_name(&self, pod: &str) -> String {
        format!("{}.{}", pod, self.extension)
    }
}
