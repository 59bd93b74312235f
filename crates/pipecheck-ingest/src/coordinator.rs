//! Batch commit coordinator
//!
//! Rows are processed sequentially in fixed-size batches. A batch is first
//! repaired and validated row by row with no transaction open, so AI repair
//! never holds store locks. Its writes then run in one store transaction: row
//! outcomes and error entries commit together, and a storage fault rolls the
//! batch back and aborts the run. Committed batches are checkpoints; the run
//! row is updated with the running totals after each commit.

use futures::FutureExt;
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use tracing::{debug, info, warn};

use crate::error::{IngestError, IngestResult, RowError, StoreError};
use crate::fingerprint::fingerprint;
use crate::normalize::normalize;
use crate::repair::RepairEngine;
use crate::row::RowView;
use crate::run::{Run, RunCounters, RunTransition};
use crate::store::{NewErrorEntry, NewRecord, RecordStore, StoreTransaction, UpsertOutcome};

/// Applies parsed rows to the store batch by batch
pub struct BatchCoordinator<'a> {
    store: &'a dyn RecordStore,
    engine: &'a RepairEngine,
    batch_size: usize,
}

impl<'a> BatchCoordinator<'a> {
    pub fn new(store: &'a dyn RecordStore, engine: &'a RepairEngine, batch_size: usize) -> Self {
        Self {
            store,
            engine,
            batch_size: batch_size.max(1),
        }
    }

    /// Process every row, checkpointing `run` after each committed batch
    ///
    /// Returns the accumulated counters. On a storage fault the failing batch
    /// is rolled back and the error is returned; `run.counters` then holds the
    /// totals of the batches committed before it.
    pub async fn process(
        &self,
        run: &mut Run,
        columns: &[String],
        rows: Vec<RowView>,
    ) -> IngestResult<RunCounters> {
        let total_batches = rows.len().div_ceil(self.batch_size);
        let mut totals = RunCounters::default();
        let mut rows = rows.into_iter().peekable();
        let mut batch = 0usize;

        while rows.peek().is_some() {
            batch += 1;
            let chunk: Vec<RowView> = rows.by_ref().take(self.batch_size).collect();

            debug!(
                run_id = %run.id,
                batch,
                total_batches,
                rows = chunk.len(),
                "Processing batch"
            );

            let counters = self.apply_batch(run, columns, chunk).await.map_err(|e| {
                warn!(run_id = %run.id, batch, error = %e, "Batch rolled back");
                IngestError::Store(e)
            })?;

            totals += counters;
            run.transition(RunTransition::Checkpoint(totals))?;
            self.store.update_run(run).await?;

            info!(
                run_id = %run.id,
                batch,
                total_batches,
                inserted = counters.inserted,
                updated = counters.updated,
                skipped = counters.skipped,
                rejected = counters.rejected,
                "Batch committed"
            );
        }

        Ok(totals)
    }

    /// Prepare every row of a batch, then write it inside a transaction
    async fn apply_batch(
        &self,
        run: &Run,
        columns: &[String],
        chunk: Vec<RowView>,
    ) -> Result<RunCounters, StoreError> {
        let mut prepared = Vec::with_capacity(chunk.len());
        for row in chunk {
            let row_index = row.index() as i64;
            let raw = row.raw().clone();
            let outcome = self.prepare_row(run, columns, row).await;
            prepared.push(PreparedRow {
                row_index,
                raw,
                outcome,
            });
        }

        let mut tx = self.store.begin().await?;

        let applied = write_rows(tx.as_mut(), run, prepared).await;
        match applied {
            Ok(counters) => {
                tx.commit().await?;
                Ok(counters)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(run_id = %run.id, error = %rollback_err, "Rollback failed");
                }
                Err(e)
            }
        }
    }

    /// Repair, validate, normalize and fingerprint one row
    ///
    /// Panics raised anywhere on this path are caught and reported as a
    /// processing error for the row.
    async fn prepare_row(
        &self,
        run: &Run,
        columns: &[String],
        row: RowView,
    ) -> Result<NewRecord, RowError> {
        let row_index = row.index() as i64;

        let prepared = AssertUnwindSafe(async {
            let valid = self.engine.repair_and_validate(row, columns).await?;
            let canonical = normalize(&valid);
            Ok::<_, RowError>(NewRecord {
                fingerprint: fingerprint(&canonical),
                run_id: run.id,
                row_index,
                canonical,
                raw: valid.raw().clone(),
                fixes: valid.fixes().to_vec(),
            })
        })
        .catch_unwind()
        .await;

        prepared.unwrap_or_else(|payload| {
            let message = panic_message(payload.as_ref());
            warn!(row_index, error = %message, "Row processing panicked");
            Err(RowError::Processing(message))
        })
    }
}

/// A row ready to be written: a record or the reason it was rejected
struct PreparedRow {
    row_index: i64,
    raw: BTreeMap<String, String>,
    outcome: Result<NewRecord, RowError>,
}

async fn write_rows(
    tx: &mut dyn StoreTransaction,
    run: &Run,
    rows: Vec<PreparedRow>,
) -> Result<RunCounters, StoreError> {
    let mut counters = RunCounters::default();

    for PreparedRow {
        row_index,
        raw,
        outcome,
    } in rows
    {
        counters.total += 1;

        match outcome {
            Ok(record) => match tx.upsert_record(record).await? {
                UpsertOutcome::Inserted => counters.inserted += 1,
                UpsertOutcome::Updated { previous_run } => {
                    debug!(row_index, previous_run = ?previous_run, "Record superseded");
                    counters.updated += 1;
                }
                UpsertOutcome::Skipped => counters.skipped += 1,
            },
            Err(error) => {
                debug!(row_index, error = %error, "Row rejected");
                tx.insert_error(NewErrorEntry {
                    run_id: run.id,
                    row_index,
                    kind: error.kind(),
                    message: error.to_string(),
                    raw,
                })
                .await?;
                counters.rejected += 1;
                counters.errors += 1;
            }
        }
    }

    Ok(counters)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "row processing panicked".to_string()
    }
}
