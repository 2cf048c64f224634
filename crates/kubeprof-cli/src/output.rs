//! Local output layout
//!
//! Each run writes into its own `<output>/<YYYYMMDDTHHMMSS>/` directory so
//! repeated runs never overwrite each other's artifacts.

use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone};

use crate::Result;

/// Timestamp format of run directory names
pub const RUN_DIR_FORMAT: &str = "%Y%m%dT%H%M%S";

/// Name of the run directory for a run started at `started`
pub fn run_dir_name<Tz: TimeZone>(started: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    started.format(RUN_DIR_FORMAT).to_string()
}

/// Create the run directory under `base` and return its path
pub fn create_run_dir<Tz: TimeZone>(base: &Path, started: &DateTime<Tz>) -> Result<PathBuf>
where
    Tz::Offset: std::fmt::Display,
{
    let dir = base.join(run_dir_name(started));
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
