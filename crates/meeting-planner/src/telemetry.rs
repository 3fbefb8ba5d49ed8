//! Negotiation reports and the append-only telemetry log.
//!
//! Both writers log failures and carry on: a full disk should never turn
//! a finished negotiation into a failed run.

use std::path::Path;

use chrono::Utc;
use negotiation::NegotiationResult;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

pub const REPORT_FILE: &str = "negotiation-report.json";
pub const TELEMETRY_FILE: &str = ".planner-telemetry.jsonl";

/// Everything worth keeping about one negotiation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NegotiationReport {
    pub negotiation_id: String,
    /// RFC 3339 completion time.
    pub timestamp: String,
    pub participants: usize,
    pub duration_ms: u64,
    pub result: NegotiationResult,
}

impl NegotiationReport {
    pub fn new(participants: usize, duration_ms: u64, result: NegotiationResult) -> Self {
        Self {
            negotiation_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now().to_rfc3339(),
            participants,
            duration_ms,
            result,
        }
    }
}

/// Write `negotiation-report.json` into `dir`, creating it if needed.
pub fn write_report(report: &NegotiationReport, dir: &Path) {
    if let Err(e) = std::fs::create_dir_all(dir) {
        warn!("Failed to create report directory {}: {e}", dir.display());
        return;
    }
    let path = dir.join(REPORT_FILE);
    match serde_json::to_string_pretty(report) {
        Ok(json) => match std::fs::write(&path, json) {
            Ok(()) => info!(path = %path.display(), "Wrote negotiation report"),
            Err(e) => warn!("Failed to write negotiation report: {e}"),
        },
        Err(e) => warn!("Failed to serialize negotiation report: {e}"),
    }
}

/// Append the report as one line of `.planner-telemetry.jsonl` in `dir`.
pub fn append_telemetry(report: &NegotiationReport, dir: &Path) {
    let path = dir.join(TELEMETRY_FILE);
    match serde_json::to_string(report) {
        Ok(json) => {
            use std::io::Write;
            match std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
            {
                Ok(mut file) => {
                    if let Err(e) = writeln!(file, "{json}") {
                        warn!("Failed to append telemetry: {e}");
                    } else {
                        info!(path = %path.display(), "Appended negotiation telemetry");
                    }
                }
                Err(e) => warn!("Failed to open telemetry file: {e}"),
            }
        }
        Err(e) => warn!("Failed to serialize telemetry: {e}"),
    }
}
