//! Run artifacts
//!
//! Every invocation gets a fresh `{output_root}/{connector}/{timestamp}`
//! directory holding one JSON file per step, `summary.json` and an
//! append-only `test.log`. Files are written to a temporary file in the
//! same directory and persisted without clobbering, so an interrupted run
//! never leaves a half-written artifact and nothing is ever overwritten.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::orchestrator::FlowStatus;
use crate::response::ParsedSummary;

/// Name of the aggregated summary file
pub const SUMMARY_FILE: &str = "summary.json";
/// Name of the run log
pub const LOG_FILE: &str = "test.log";

/// Result of one step as recorded in the summary
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
    /// Extracted semantic fields
    #[serde(flatten)]
    pub summary: ParsedSummary,
    /// Transport succeeded and validation found no errors
    pub success: bool,
    /// Artifact path, if the step reached the transport
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
    /// Validation errors and step failures
    #[serde(default)]
    pub errors: BTreeMap<String, String>,
    /// Validation warnings
    #[serde(default)]
    pub warnings: BTreeMap<String, String>,
}

/// Contents of `summary.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowSummary {
    /// Flow name
    pub flow: String,
    /// Connector name
    pub connector: String,
    /// Terminal status
    pub status: FlowStatus,
    /// RFC3339 completion time
    pub timestamp: String,
    /// Run directory
    pub output_dir: String,
    /// Step at which the flow failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<String>,
    /// Failure reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Per-step results, keyed by step name
    pub results: BTreeMap<String, StepRecord>,
}

/// Severity of a log line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Level {
    Info,
    Warn,
    Error,
}

/// Writer for one run directory
#[derive(Debug)]
pub struct RunReporter {
    dir: PathBuf,
    log: File,
}

impl RunReporter {
    /// Create a fresh run directory for `connector` under `output_root`.
    ///
    /// The directory name is the local timestamp; a numeric suffix is added
    /// if that name is already taken, so a directory is never reused.
    pub fn create(output_root: &Path, connector: &str, started: DateTime<Local>) -> Result<Self> {
        let parent = output_root.join(sanitize(connector));
        std::fs::create_dir_all(&parent)?;

        let stamp = started.format("%Y%m%d_%H%M%S").to_string();
        let mut attempt = 0u32;
        let dir = loop {
            let candidate = if attempt == 0 {
                parent.join(&stamp)
            } else {
                parent.join(format!("{stamp}_{attempt}"))
            };
            match std::fs::create_dir(&candidate) {
                Ok(()) => break candidate,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => attempt += 1,
                Err(e) => return Err(e.into()),
            }
        };

        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(LOG_FILE))?;

        tracing::info!("writing run artifacts to {}", dir.display());
        Ok(Self { dir, log })
    }

    /// Run directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Log an informational message to the console and the run log
    pub fn info(&mut self, message: &str) {
        tracing::info!("{}", message);
        self.append(Level::Info, message);
    }

    /// Log a warning to the console and the run log
    pub fn warn(&mut self, message: &str) {
        tracing::warn!("{}", message);
        self.append(Level::Warn, message);
    }

    /// Log an error to the console and the run log
    pub fn error(&mut self, message: &str) {
        tracing::error!("{}", message);
        self.append(Level::Error, message);
    }

    fn append(&mut self, level: Level, message: &str) {
        let label = match level {
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
        };
        let line = format!("{} [{label}] {message}", Local::now().to_rfc3339());
        if let Err(e) = writeln!(self.log, "{line}") {
            tracing::warn!("failed to append to {}: {}", LOG_FILE, e);
        }
    }

    /// Write `{name}.json` with the raw body of a step
    pub fn write_artifact(&self, name: &str, body: &str) -> Result<PathBuf> {
        let path = self.dir.join(artifact_file_name(name));
        self.persist(&path, body.as_bytes())?;
        Ok(path)
    }

    /// Write `summary.json`
    pub fn write_summary(&self, summary: &FlowSummary) -> Result<PathBuf> {
        let path = self.dir.join(SUMMARY_FILE);
        let json = serde_json::to_string_pretty(summary)?;
        self.persist(&path, json.as_bytes())?;
        Ok(path)
    }

    fn persist(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist_noclobber(path).map_err(|e| Error::Report {
            path: path.to_path_buf(),
            message: e.error.to_string(),
        })?;
        Ok(())
    }
}

/// File a step's raw response is written to
pub fn artifact_file_name(step: &str) -> String {
    format!("{}.json", sanitize(step))
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
