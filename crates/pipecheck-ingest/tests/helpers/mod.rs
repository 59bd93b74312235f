//! Test helpers for PipeCheck integration tests
//!
//! - Ingestor builders over the in-memory store
//! - A store wrapper that fails record writes on demand

#![allow(dead_code)]

use async_trait::async_trait;
use pipecheck_ingest::error::{StoreError, StoreResult};
use pipecheck_ingest::fingerprint::Fingerprint;
use pipecheck_ingest::store::{
    ErrorEntry, NewErrorEntry, NewRecord, Record, RecordStore, RunStats, StoreTransaction,
    UpsertOutcome,
};
use pipecheck_ingest::{Ingestor, MemoryStore, PipelineConfig, RepairEngine, Run, ValidationMode};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Ingestor over `store` with AI repair disabled
pub fn ingestor(store: Arc<dyn RecordStore>) -> Ingestor {
    ingestor_with(store, PipelineConfig::default())
}

pub fn ingestor_with(store: Arc<dyn RecordStore>, config: PipelineConfig) -> Ingestor {
    let engine = RepairEngine::deterministic(config.validation_mode);
    Ingestor::new(store, engine, config)
}

pub fn strict_config() -> PipelineConfig {
    PipelineConfig {
        validation_mode: ValidationMode::Strict,
        ..Default::default()
    }
}

/// Memory store whose record writes fail once a write budget is spent
pub struct FaultyStore {
    inner: MemoryStore,
    writes_left: Arc<AtomicUsize>,
}

impl FaultyStore {
    /// Allow `writes` successful upserts, then fail every later one
    pub fn failing_after(writes: usize) -> Self {
        Self {
            inner: MemoryStore::new(),
            writes_left: Arc::new(AtomicUsize::new(writes)),
        }
    }
}

#[async_trait]
impl RecordStore for FaultyStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>> {
        Ok(Box::new(FaultyTransaction {
            inner: self.inner.begin().await?,
            writes_left: self.writes_left.clone(),
        }))
    }

    async fn create_run(&self, run: &Run) -> StoreResult<()> {
        self.inner.create_run(run).await
    }

    async fn update_run(&self, run: &Run) -> StoreResult<()> {
        self.inner.update_run(run).await
    }

    async fn get_run(&self, id: Uuid) -> StoreResult<Option<Run>> {
        self.inner.get_run(id).await
    }

    async fn find_run_by_file_hash(&self, file_hash: &str) -> StoreResult<Option<Run>> {
        self.inner.find_run_by_file_hash(file_hash).await
    }

    async fn list_runs(&self, limit: i64) -> StoreResult<Vec<Run>> {
        self.inner.list_runs(limit).await
    }

    async fn count_runs(&self) -> StoreResult<i64> {
        self.inner.count_runs().await
    }

    async fn list_errors(&self, run_id: Uuid) -> StoreResult<Vec<ErrorEntry>> {
        self.inner.list_errors(run_id).await
    }

    async fn list_records(&self, run_id: Uuid) -> StoreResult<Vec<Record>> {
        self.inner.list_records(run_id).await
    }

    async fn count_records(&self) -> StoreResult<i64> {
        self.inner.count_records().await
    }

    async fn get_record(&self, fingerprint: &Fingerprint) -> StoreResult<Option<Record>> {
        self.inner.get_record(fingerprint).await
    }

    async fn stats(&self) -> StoreResult<RunStats> {
        self.inner.stats().await
    }
}

struct FaultyTransaction {
    inner: Box<dyn StoreTransaction>,
    writes_left: Arc<AtomicUsize>,
}

#[async_trait]
impl StoreTransaction for FaultyTransaction {
    async fn upsert_record(&mut self, record: NewRecord) -> StoreResult<UpsertOutcome> {
        let spent = self
            .writes_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_err();
        if spent {
            return Err(StoreError::Backend("connection reset by peer".to_string()));
        }
        self.inner.upsert_record(record).await
    }

    async fn insert_error(&mut self, entry: NewErrorEntry) -> StoreResult<()> {
        self.inner.insert_error(entry).await
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.inner.rollback().await
    }
}
