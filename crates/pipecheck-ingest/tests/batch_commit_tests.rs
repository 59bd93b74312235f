//! Batch checkpoint and rollback behavior

mod helpers;

use anyhow::Result;
use helpers::{ingestor_with, FaultyStore};
use pipecheck_ingest::{MemoryStore, PipelineConfig, RecordStore, RunStatus};
use std::sync::Arc;

fn batched(batch_size: usize) -> PipelineConfig {
    PipelineConfig {
        batch_size,
        ..Default::default()
    }
}

fn contacts(count: usize) -> Vec<u8> {
    let mut content = String::from("email,name\n");
    for i in 0..count {
        content.push_str(&format!("person{i}@example.com,Person {i}\n"));
    }
    content.into_bytes()
}

#[tokio::test]
async fn test_storage_fault_rolls_back_batch_and_fails_run() -> Result<()> {
    // Batch 1 (rows 0-1) commits, the third write fails inside batch 2
    let store = Arc::new(FaultyStore::failing_after(2));
    let report = ingestor_with(store.clone(), batched(2))
        .ingest_bytes("faulty.csv", &contacts(5))
        .await?;

    let run = report.run();
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(
        run.error_message.as_deref(),
        Some("Store error: Storage backend failure: connection reset by peer")
    );
    assert_eq!(run.counters.total, 2);
    assert_eq!(run.counters.inserted, 2);

    assert_eq!(store.count_records().await?, 2);
    let persisted = store.get_run(run.id).await?.expect("run is persisted");
    assert_eq!(persisted.status, RunStatus::Failed);
    assert_eq!(persisted.counters.inserted, 2);
    Ok(())
}

#[tokio::test]
async fn test_error_entries_roll_back_with_their_batch() -> Result<()> {
    let store = Arc::new(FaultyStore::failing_after(1));
    let content = b"email,name\nok@example.com,Ok\nnot-an-email,A\nnext@example.com,Next\n";

    let report = ingestor_with(store.clone(), batched(10))
        .ingest_bytes("faulty.csv", content)
        .await?;

    let run = report.run();
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.counters.total, 0);
    assert_eq!(store.count_records().await?, 0);
    assert!(store.list_errors(run.id).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_counters_accumulate_across_batches() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let report = ingestor_with(store.clone(), batched(3))
        .ingest_bytes("many.csv", &contacts(10))
        .await?;

    let run = report.run();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.counters.total, 10);
    assert_eq!(run.counters.inserted, 10);
    assert_eq!(run.counters.rejected, 0);
    assert_eq!(store.list_records(run.id).await?.len(), 10);
    Ok(())
}
