//! Run report output.
//!
//! Each run leaves one pretty-printed JSON file behind:
//! ```text
//! report_dir/
//! ├── run_20250506T100000.json
//! └── run_20250506T160000.json
//! ```
//! The file name comes from the report's start time, so reports sort
//! chronologically.

use crate::models::RunReport;
use std::error::Error;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{error, info, instrument};

/// File name for `report`: `run_<YYYYMMDDTHHMMSS>.json`.
pub fn report_file_name(report: &RunReport) -> String {
    let stamp: String = report
        .started_at
        .chars()
        .filter(|c| *c != '-' && *c != ':')
        .collect();
    format!("run_{stamp}.json")
}

/// Write `report` into `report_dir` and return the path written.
#[instrument(level = "info", skip_all, fields(report_dir = %report_dir.display()))]
pub async fn write_run_report(
    report: &RunReport,
    report_dir: &Path,
) -> Result<PathBuf, Box<dyn Error>> {
    let json = serde_json::to_string_pretty(report)?;

    if let Err(e) = fs::create_dir_all(report_dir).await {
        error!(error = %e, "Failed to create report dir");
        return Err(e.into());
    }

    let path = report_dir.join(report_file_name(report));
    fs::write(&path, json).await?;
    info!(path = %path.display(), "Wrote run report");
    Ok(path)
}
