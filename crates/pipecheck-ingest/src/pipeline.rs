//! File ingestion entry points
//!
//! [`Ingestor`] carries the store, the repair engine and the configuration for
//! a whole ingestion: file hashing and duplicate detection, run bookkeeping,
//! format detection, parsing, and the batched commit of rows.

use pipecheck_common::checksum::sha256_hex;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::config::PipelineConfig;
use crate::coordinator::BatchCoordinator;
use crate::error::{IngestError, IngestResult, StoreError};
use crate::format::detect;
use crate::reader::read_table;
use crate::repair::{rate_limiter, repairer_from_config, RepairEngine};
use crate::run::{Run, RunCounters, RunTransition};
use crate::store::RecordStore;

/// Outcome of an ingestion request
#[derive(Debug, Clone, PartialEq)]
pub enum IngestReport {
    /// A run was created and driven to a terminal state
    Processed(Run),
    /// The same bytes were ingested before; no run was created
    DuplicateFile { existing: Run },
}

impl IngestReport {
    pub fn run(&self) -> &Run {
        match self {
            IngestReport::Processed(run) => run,
            IngestReport::DuplicateFile { existing } => existing,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, IngestReport::DuplicateFile { .. })
    }
}

/// Ingestion context
pub struct Ingestor {
    store: Arc<dyn RecordStore>,
    engine: RepairEngine,
    config: PipelineConfig,
}

impl Ingestor {
    pub fn new(store: Arc<dyn RecordStore>, engine: RepairEngine, config: PipelineConfig) -> Self {
        Self {
            store,
            engine,
            config,
        }
    }

    /// Build the repair engine from the AI and validation settings
    ///
    /// Every run through this ingestor draws AI requests from one limiter.
    pub fn from_config(store: Arc<dyn RecordStore>, config: PipelineConfig) -> IngestResult<Self> {
        let limiter = rate_limiter(config.ai.requests_per_minute);
        let repairer = repairer_from_config(&config.ai, limiter)
            .map_err(|e| IngestError::Config(e.to_string()))?;
        let engine = RepairEngine::new(repairer, config.validation_mode);
        Ok(Self::new(store, engine, config))
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Ingest a file from disk
    pub async fn ingest_file(&self, path: impl AsRef<Path>) -> IngestResult<IngestReport> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await?;
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        self.ingest_bytes(&filename, &bytes).await
    }

    /// Ingest file contents
    ///
    /// Row-level and pre-row failures end in a terminal run that is returned
    /// in the report. An error is returned only when the run itself could not
    /// be recorded.
    #[instrument(skip(self, bytes), fields(size = bytes.len()))]
    pub async fn ingest_bytes(&self, filename: &str, bytes: &[u8]) -> IngestResult<IngestReport> {
        let file_hash = sha256_hex(bytes);

        if let Some(existing) = self.store.find_run_by_file_hash(&file_hash).await? {
            info!(run_id = %existing.id, file_hash = %file_hash, "Duplicate file, skipping");
            return Ok(IngestReport::DuplicateFile { existing });
        }

        let mut run = Run::new(filename, file_hash);
        match self.store.create_run(&run).await {
            Ok(()) => {}
            Err(StoreError::Conflict(message)) => {
                // Another request created a run for the same bytes in between
                return match self.store.find_run_by_file_hash(&run.file_hash).await? {
                    Some(existing) => Ok(IngestReport::DuplicateFile { existing }),
                    None => Err(StoreError::Conflict(message).into()),
                };
            }
            Err(e) => return Err(e.into()),
        }

        run.transition(RunTransition::Start)?;
        self.store.update_run(&run).await?;
        info!(run_id = %run.id, filename, "Run started");

        match self.execute(&mut run, bytes).await {
            Ok(totals) => {
                run.transition(RunTransition::Complete(totals))?;
                info!(
                    run_id = %run.id,
                    status = %run.status,
                    total = totals.total,
                    inserted = totals.inserted,
                    updated = totals.updated,
                    skipped = totals.skipped,
                    rejected = totals.rejected,
                    "Run finished"
                );
            }
            Err(e) => {
                warn!(run_id = %run.id, pre_row = e.is_pre_row(), error = %e, "Run failed");
                run.transition(RunTransition::Fail {
                    message: e.to_string(),
                })?;
            }
        }

        self.store.update_run(&run).await?;
        Ok(IngestReport::Processed(run))
    }

    /// Detect, parse and commit all rows of a started run
    async fn execute(&self, run: &mut Run, bytes: &[u8]) -> IngestResult<RunCounters> {
        let format = detect(bytes, &self.config.format)?;
        let table = read_table(bytes, &format)?;

        info!(
            run_id = %run.id,
            encoding = %format.encoding,
            delimiter = %char::from(format.delimiter).escape_default(),
            rows = table.len(),
            malformed_lines = table.malformed_lines,
            dropped_lines = table.dropped_lines,
            "File parsed"
        );

        let coordinator =
            BatchCoordinator::new(self.store.as_ref(), &self.engine, self.config.batch_size);
        coordinator.process(run, &table.headers, table.rows).await
    }
}

impl std::fmt::Debug for Ingestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ingestor")
            .field("engine", &self.engine)
            .field("batch_size", &self.config.batch_size)
            .finish()
    }
}
