//! Durable record of one completed run, plus query-side summaries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::RefreshError;
use crate::profile::{FieldMap, ProfileId};

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    Success,
    Failure,
    NoChange,
    /// Accepted from older records and API filters; runs never produce it.
    Warning,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Success => "Success",
            Outcome::Failure => "Failure",
            Outcome::NoChange => "NoChange",
            Outcome::Warning => "Warning",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Outcome {
    type Err = RefreshError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            Outcome::Success,
            Outcome::Failure,
            Outcome::NoChange,
            Outcome::Warning,
        ]
        .into_iter()
        .find(|o| o.as_str().eq_ignore_ascii_case(s))
        .ok_or_else(|| RefreshError::InvalidOutcome(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// UpdateLogEntry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateLogEntry {
    /// Assigned by the log store on append.
    pub id: u64,
    pub profile_id: ProfileId,
    /// Username at the time of the run, kept for readable logs after deletes.
    pub username: String,
    pub executed_at: DateTime<Utc>,
    pub outcome: Outcome,
    pub duration_ms: u64,
    /// Only fields that were actually applied; empty for no-change runs.
    #[serde(default)]
    pub fields_edited: FieldMap,
    pub detail: String,
}

// ---------------------------------------------------------------------------
// LogSummary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogSummary {
    pub total: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub nochange_count: usize,
    pub warning_count: usize,
    pub average_duration_ms: Option<f64>,
    pub recent: Vec<UpdateLogEntry>,
}

impl LogSummary {
    /// Summarise `entries` (newest first), keeping `recent_limit` of them.
    pub fn from_entries(entries: &[UpdateLogEntry], recent_limit: usize) -> Self {
        let mut summary = LogSummary {
            total: entries.len(),
            ..Default::default()
        };
        for entry in entries {
            match entry.outcome {
                Outcome::Success => summary.success_count += 1,
                Outcome::Failure => summary.failure_count += 1,
                Outcome::NoChange => summary.nochange_count += 1,
                Outcome::Warning => summary.warning_count += 1,
            }
        }
        if !entries.is_empty() {
            let total_ms: u64 = entries.iter().map(|e| e.duration_ms).sum();
            summary.average_duration_ms = Some(total_ms as f64 / entries.len() as f64);
        }
        summary.recent = entries.iter().take(recent_limit).cloned().collect();
        summary
    }
}
