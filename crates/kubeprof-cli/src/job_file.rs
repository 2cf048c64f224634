//! Job description loading
//!
//! Accepts the native Kubernetes Job schema as JSON or YAML. The format is
//! picked from the extension; anything that isn't `.json` is parsed as YAML,
//! which also accepts JSON.

use std::path::Path;

use k8s_openapi::api::batch::v1::Job;

use crate::{Error, Result};

/// Serialization format of a job file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobFormat {
    Json,
    Yaml,
}

impl JobFormat {
    /// Format implied by the file extension
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => JobFormat::Json,
            _ => JobFormat::Yaml,
        }
    }
}

/// Parse a job description
pub fn parse_job(content: &str, format: JobFormat) -> Result<Job> {
    let job = match format {
        JobFormat::Json => serde_json::from_str(content)?,
        JobFormat::Yaml => serde_yaml::from_str(content)?,
    };
    Ok(job)
}

/// Read and parse the job file at `path`
pub fn load_job(path: &Path) -> Result<Job> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::job_file(path, format!("cannot read: {}", e)))?;
    parse_job(&content, JobFormat::from_path(path))
        .map_err(|e| Error::job_file(path, format!("cannot parse: {}", e)))
}
