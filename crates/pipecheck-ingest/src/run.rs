//! Ingestion run lifecycle
//!
//! A run moves `pending -> processing -> {completed, partial_success, failed}`.
//! Every mutation goes through [`Run::transition`], which rejects moves out of
//! a terminal state and stamps the matching timestamps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ops::AddAssign;
use uuid::Uuid;

use crate::error::{IngestError, IngestResult};

/// Run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Processing,
    Completed,
    PartialSuccess,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Processing => "processing",
            RunStatus::Completed => "completed",
            RunStatus::PartialSuccess => "partial_success",
            RunStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::PartialSuccess | RunStatus::Failed
        )
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for RunStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "pending" => RunStatus::Pending,
            "processing" => RunStatus::Processing,
            "completed" => RunStatus::Completed,
            "partial_success" => RunStatus::PartialSuccess,
            "failed" => RunStatus::Failed,
            _ => RunStatus::Pending,
        }
    }
}

/// Row outcome counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounters {
    /// Rows read from the source
    pub total: i64,
    pub inserted: i64,
    pub updated: i64,
    /// Same-run duplicates
    pub skipped: i64,
    pub rejected: i64,
    /// Error entries written
    pub errors: i64,
}

impl AddAssign for RunCounters {
    fn add_assign(&mut self, other: Self) {
        self.total += other.total;
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.skipped += other.skipped;
        self.rejected += other.rejected;
        self.errors += other.errors;
    }
}

/// State changes a run can undergo
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunTransition {
    /// Begin processing rows
    Start,
    /// A batch committed; counters are the running totals
    Checkpoint(RunCounters),
    /// All rows processed
    Complete(RunCounters),
    /// Abort with a terminal message; counters stay at the last checkpoint
    Fail { message: String },
}

/// Ingestion run (maps to the ingest_runs table)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: Uuid,
    pub filename: String,
    /// SHA-256 of the whole file, lowercase hex
    pub file_hash: String,
    pub status: RunStatus,
    pub counters: RunCounters,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl Run {
    pub fn new(filename: impl Into<String>, file_hash: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            filename: filename.into(),
            file_hash: file_hash.into(),
            status: RunStatus::Pending,
            counters: RunCounters::default(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error_message: None,
        }
    }

    /// Apply a state change
    pub fn transition(&mut self, transition: RunTransition) -> IngestResult<()> {
        let target = match &transition {
            RunTransition::Start | RunTransition::Checkpoint(_) => RunStatus::Processing,
            RunTransition::Complete(counters) if counters.rejected == 0 => RunStatus::Completed,
            RunTransition::Complete(_) => RunStatus::PartialSuccess,
            RunTransition::Fail { .. } => RunStatus::Failed,
        };

        let allowed = match (&self.status, &transition) {
            (RunStatus::Pending, RunTransition::Start) => true,
            (RunStatus::Processing, RunTransition::Checkpoint(_)) => true,
            (RunStatus::Processing, RunTransition::Complete(_)) => true,
            (RunStatus::Pending | RunStatus::Processing, RunTransition::Fail { .. }) => true,
            _ => false,
        };
        if !allowed {
            return Err(IngestError::InvalidTransition {
                from: self.status,
                to: target,
            });
        }

        let now = Utc::now();
        match transition {
            RunTransition::Start => self.started_at = Some(now),
            RunTransition::Checkpoint(counters) => self.counters = counters,
            RunTransition::Complete(counters) => {
                self.counters = counters;
                self.completed_at = Some(now);
            }
            RunTransition::Fail { message } => {
                self.error_message = Some(message);
                self.completed_at = Some(now);
            }
        }
        self.status = target;

        Ok(())
    }
}
