//! In-memory record store
//!
//! Used for dry runs and tests. One async mutex guards all state and a
//! transaction holds it until commit or rollback, so batches are serialized.
//! Writes are staged inside the transaction and only applied on commit;
//! dropping an uncommitted transaction discards them.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{
    ErrorEntry, NewErrorEntry, NewRecord, Record, RecordStore, RunStats, StoreTransaction,
    UpsertOutcome,
};
use crate::error::{StoreError, StoreResult};
use crate::fingerprint::Fingerprint;
use crate::run::{Run, RunStatus};

#[derive(Debug, Default)]
struct MemoryState {
    /// Creation order
    runs: Vec<Run>,
    records: HashMap<Fingerprint, Record>,
    errors: Vec<ErrorEntry>,
    next_error_id: i64,
}

/// Record store kept entirely in process memory
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>> {
        let guard = self.state.clone().lock_owned().await;
        Ok(Box::new(MemoryTransaction {
            guard,
            records: HashMap::new(),
            errors: Vec::new(),
        }))
    }

    async fn create_run(&self, run: &Run) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        if state.runs.iter().any(|r| r.id == run.id) {
            return Err(StoreError::Conflict(format!("Run '{}' already exists", run.id)));
        }
        if state.runs.iter().any(|r| r.file_hash == run.file_hash) {
            return Err(StoreError::Conflict(format!(
                "A run for file hash '{}' already exists",
                run.file_hash
            )));
        }
        state.runs.push(run.clone());
        Ok(())
    }

    async fn update_run(&self, run: &Run) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        let slot = state
            .runs
            .iter_mut()
            .find(|r| r.id == run.id)
            .ok_or_else(|| StoreError::not_found("Run", run.id))?;
        *slot = run.clone();
        Ok(())
    }

    async fn get_run(&self, id: Uuid) -> StoreResult<Option<Run>> {
        let state = self.state.lock().await;
        Ok(state.runs.iter().find(|r| r.id == id).cloned())
    }

    async fn find_run_by_file_hash(&self, file_hash: &str) -> StoreResult<Option<Run>> {
        let state = self.state.lock().await;
        Ok(state.runs.iter().find(|r| r.file_hash == file_hash).cloned())
    }

    async fn list_runs(&self, limit: i64) -> StoreResult<Vec<Run>> {
        let state = self.state.lock().await;
        let mut runs: Vec<Run> = state.runs.iter().rev().cloned().collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        runs.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(runs)
    }

    async fn count_runs(&self) -> StoreResult<i64> {
        let state = self.state.lock().await;
        Ok(state.runs.len() as i64)
    }

    async fn list_errors(&self, run_id: Uuid) -> StoreResult<Vec<ErrorEntry>> {
        let state = self.state.lock().await;
        let mut errors: Vec<ErrorEntry> = state
            .errors
            .iter()
            .filter(|e| e.run_id == run_id)
            .cloned()
            .collect();
        errors.sort_by_key(|e| (e.row_index, e.id));
        Ok(errors)
    }

    async fn list_records(&self, run_id: Uuid) -> StoreResult<Vec<Record>> {
        let state = self.state.lock().await;
        let mut records: Vec<Record> = state
            .records
            .values()
            .filter(|r| r.run_id == run_id)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.row_index);
        Ok(records)
    }

    async fn count_records(&self) -> StoreResult<i64> {
        let state = self.state.lock().await;
        Ok(state.records.len() as i64)
    }

    async fn get_record(&self, fingerprint: &Fingerprint) -> StoreResult<Option<Record>> {
        let state = self.state.lock().await;
        Ok(state.records.get(fingerprint).cloned())
    }

    async fn stats(&self) -> StoreResult<RunStats> {
        let state = self.state.lock().await;

        let count = |status: RunStatus| state.runs.iter().filter(|r| r.status == status).count() as i64;
        let total_runs = state.runs.len() as i64;
        let completed_runs = count(RunStatus::Completed);

        Ok(RunStats {
            total_runs,
            completed_runs,
            partial_runs: count(RunStatus::PartialSuccess),
            failed_runs: count(RunStatus::Failed),
            success_rate: RunStats::success_rate(completed_runs, total_runs),
            total_rows_processed: state
                .runs
                .iter()
                .filter(|r| r.status == RunStatus::Completed)
                .map(|r| r.counters.total)
                .sum(),
            last_run: state.runs.iter().max_by_key(|r| r.created_at).cloned(),
        })
    }
}

/// Batch transaction holding the store lock
struct MemoryTransaction {
    guard: OwnedMutexGuard<MemoryState>,
    /// Staged record writes
    records: HashMap<Fingerprint, Record>,
    /// Staged error entries, ids assigned on commit
    errors: Vec<NewErrorEntry>,
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn upsert_record(&mut self, record: NewRecord) -> StoreResult<UpsertOutcome> {
        let now = Utc::now();
        let existing = self
            .records
            .get(&record.fingerprint)
            .or_else(|| self.guard.records.get(&record.fingerprint));

        let (outcome, created_at) = match existing {
            None => (UpsertOutcome::Inserted, now),
            Some(prev) if prev.run_id == record.run_id => return Ok(UpsertOutcome::Skipped),
            Some(prev) => (
                UpsertOutcome::Updated {
                    previous_run: Some(prev.run_id),
                },
                prev.created_at,
            ),
        };

        self.records.insert(
            record.fingerprint.clone(),
            Record {
                fingerprint: record.fingerprint,
                run_id: record.run_id,
                row_index: record.row_index,
                canonical: record.canonical,
                raw: record.raw,
                fixes: record.fixes,
                created_at,
                updated_at: now,
            },
        );

        Ok(outcome)
    }

    async fn insert_error(&mut self, entry: NewErrorEntry) -> StoreResult<()> {
        self.errors.push(entry);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryTransaction {
            mut guard,
            records,
            errors,
        } = *self;

        guard.records.extend(records);

        let now = Utc::now();
        for entry in errors {
            guard.next_error_id += 1;
            let id = guard.next_error_id;
            guard.errors.push(ErrorEntry {
                id,
                run_id: entry.run_id,
                row_index: entry.row_index,
                kind: entry.kind,
                message: entry.message,
                raw: entry.raw,
                created_at: now,
            });
        }

        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}
