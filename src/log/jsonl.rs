//! JSONL (JSON Lines) audit log for checkout assignments
//!
//! Provides append-only logging of handled requests to `.split/assignments.jsonl`

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write as IoWrite;
use std::path::{Path, PathBuf};

use crate::cycle::rules::Variant;
use crate::cycle::service::AssignmentResult;
use crate::error::SplitError;
use crate::handler::CheckoutRequest;

/// One handled checkout request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssignmentRecord {
    /// When the request was handled
    pub timestamp: DateTime<Utc>,
    /// Plan as sent by the caller (may be invalid)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<String>,
    /// Whether an assignment was made
    pub success: bool,
    /// Assigned variant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<Variant>,
    /// Whether the fallback draw was used
    #[serde(default)]
    pub used_fallback: bool,
    /// Rotation index before advancing, coordinated assignments only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cycle_index: Option<u32>,
    /// Version tag returned to the caller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub split_version: Option<String>,
    /// Error category for failed requests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    /// Error message for failed requests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Names of the attribution parameters that were sent
    #[serde(default)]
    pub attribution_keys: Vec<String>,
}

impl AssignmentRecord {
    /// Build a record from a request and its outcome.
    #[must_use]
    pub fn from_outcome(
        request: &CheckoutRequest,
        outcome: &std::result::Result<AssignmentResult, SplitError>,
    ) -> Self {
        let attribution_keys = request.attribution().into_keys().collect();
        match outcome {
            Ok(result) => Self {
                timestamp: Utc::now(),
                plan: request.plan.clone(),
                success: true,
                variant: Some(result.variant),
                used_fallback: result.used_fallback,
                cycle_index: result.cycle_info.map(|info| info.cycle_index),
                split_version: Some(result.split_version.clone()),
                error_kind: None,
                error: None,
                attribution_keys,
            },
            Err(err) => Self {
                timestamp: Utc::now(),
                plan: request.plan.clone(),
                success: false,
                variant: None,
                used_fallback: false,
                cycle_index: None,
                split_version: None,
                error_kind: Some(err.kind().to_string()),
                error: Some(err.to_string()),
                attribution_keys,
            },
        }
    }
}

/// JSONL logger for checkout assignments
///
/// Provides append-only logging to `.split/assignments.jsonl`.
/// Each line is a JSON object representing a single handled request.
pub struct JsonlLogger {
    log_path: PathBuf,
}

impl JsonlLogger {
    /// Create a new JSONL logger
    ///
    /// # Arguments
    /// * `log_dir` - Directory where assignments.jsonl will be stored (typically `.split`)
    ///
    /// # Errors
    /// Returns an error if the log directory cannot be created
    pub fn new<P: AsRef<Path>>(log_dir: P) -> Result<Self> {
        let log_dir = log_dir.as_ref();

        fs::create_dir_all(log_dir)
            .with_context(|| format!("Failed to create log directory: {}", log_dir.display()))?;

        let log_path = log_dir.join("assignments.jsonl");

        Ok(Self { log_path })
    }

    /// Append a record to the log
    ///
    /// # Errors
    /// Returns an error if:
    /// - The log file cannot be opened or created
    /// - The record cannot be serialized to JSON
    /// - Writing to the file fails
    pub fn append(&self, record: &AssignmentRecord) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .with_context(|| format!("Failed to open log file: {}", self.log_path.display()))?;

        let json = serde_json::to_string(record)
            .context("Failed to serialize assignment record to JSON")?;

        writeln!(file, "{json}").context("Failed to write to log file")?;

        Ok(())
    }

    /// Read all records from the log
    ///
    /// # Returns
    /// A vector of all records, in chronological order
    ///
    /// # Errors
    /// Returns an error if:
    /// - The log file cannot be read
    /// - Any line cannot be parsed as valid JSON
    pub fn read_all(&self) -> Result<Vec<AssignmentRecord>> {
        if !self.log_path.exists() {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.log_path)
            .with_context(|| format!("Failed to read log file: {}", self.log_path.display()))?;

        let mut records = Vec::new();

        for (line_num, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }

            let record: AssignmentRecord = serde_json::from_str(line)
                .with_context(|| format!("Failed to parse line {} as JSON", line_num + 1))?;

            records.push(record);
        }

        Ok(records)
    }

    /// Get the path to the log file
    #[must_use]
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }
}
