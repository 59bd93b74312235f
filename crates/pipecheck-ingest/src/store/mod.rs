//! Record store interface
//!
//! The pipeline persists three things: runs, canonical records keyed by
//! fingerprint, and append-only error entries. Row writes always happen inside
//! a [`StoreTransaction`] so a batch commits or rolls back as a unit.
//!
//! Run bookkeeping methods on [`RecordStore`] must not be called while a
//! transaction from the same store is open: the in-memory store holds its
//! lock for the whole transaction.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::error::{ErrorKind, StoreResult};
use crate::fingerprint::Fingerprint;
use crate::normalize::CanonicalRecord;
use crate::run::Run;

/// Default page size for run listings
pub const DEFAULT_RUN_LIST_LIMIT: i64 = 50;

/// Result of writing a record by fingerprint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// No record had this fingerprint
    Inserted,
    /// A record from another run was superseded
    ///
    /// `previous_run` is `None` only when a concurrent writer created the
    /// record after this statement's snapshot was taken.
    Updated { previous_run: Option<Uuid> },
    /// The same run already wrote this fingerprint
    Skipped,
}

/// Record about to be written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRecord {
    pub fingerprint: Fingerprint,
    pub run_id: Uuid,
    pub row_index: i64,
    pub canonical: CanonicalRecord,
    pub raw: BTreeMap<String, String>,
    /// Repairs applied before the row validated
    pub fixes: Vec<String>,
}

/// Stored canonical record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub fingerprint: Fingerprint,
    pub run_id: Uuid,
    pub row_index: i64,
    pub canonical: CanonicalRecord,
    pub raw: BTreeMap<String, String>,
    pub fixes: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Rejected row about to be recorded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewErrorEntry {
    pub run_id: Uuid,
    pub row_index: i64,
    pub kind: ErrorKind,
    pub message: String,
    pub raw: BTreeMap<String, String>,
}

/// Stored rejected row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub id: i64,
    pub run_id: Uuid,
    pub row_index: i64,
    pub kind: ErrorKind,
    pub message: String,
    pub raw: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

/// Aggregate figures over all runs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    pub total_runs: i64,
    pub completed_runs: i64,
    pub partial_runs: i64,
    pub failed_runs: i64,
    /// Completed runs as a percentage of all runs
    pub success_rate: f64,
    /// Sum of row totals over completed runs
    pub total_rows_processed: i64,
    pub last_run: Option<Run>,
}

impl RunStats {
    pub(crate) fn success_rate(completed: i64, total: i64) -> f64 {
        if total == 0 {
            0.0
        } else {
            completed as f64 / total as f64 * 100.0
        }
    }
}

/// Durable storage for runs, records and error entries
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Open a batch transaction
    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>>;

    /// Persist a new run; a second run for the same file hash is a conflict
    async fn create_run(&self, run: &Run) -> StoreResult<()>;

    async fn update_run(&self, run: &Run) -> StoreResult<()>;

    async fn get_run(&self, id: Uuid) -> StoreResult<Option<Run>>;

    async fn find_run_by_file_hash(&self, file_hash: &str) -> StoreResult<Option<Run>>;

    /// Newest first
    async fn list_runs(&self, limit: i64) -> StoreResult<Vec<Run>>;

    async fn count_runs(&self) -> StoreResult<i64>;

    /// Error entries of a run in row order
    async fn list_errors(&self, run_id: Uuid) -> StoreResult<Vec<ErrorEntry>>;

    /// Records currently owned by a run in row order
    async fn list_records(&self, run_id: Uuid) -> StoreResult<Vec<Record>>;

    async fn count_records(&self) -> StoreResult<i64>;

    async fn get_record(&self, fingerprint: &Fingerprint) -> StoreResult<Option<Record>>;

    async fn stats(&self) -> StoreResult<RunStats>;
}

/// Atomic unit of row writes
#[async_trait]
pub trait StoreTransaction: Send {
    /// Insert, supersede or skip a record by fingerprint
    async fn upsert_record(&mut self, record: NewRecord) -> StoreResult<UpsertOutcome>;

    async fn insert_error(&mut self, entry: NewErrorEntry) -> StoreResult<()>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;

    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}
