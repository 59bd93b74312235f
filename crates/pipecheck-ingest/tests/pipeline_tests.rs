//! End-to-end ingestion tests against the in-memory store
//!
//! Covers file-level and row-level idempotency, cross-run upserts, the
//! repair examples, and the fatal pre-row failures.

mod helpers;

use anyhow::Result;
use helpers::{ingestor, ingestor_with, strict_config};
use pipecheck_ingest::{ErrorKind, IngestReport, MemoryStore, RecordStore, RunStatus};
use std::io::Write;
use std::sync::Arc;

fn memory_store() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::new())
}

#[tokio::test]
async fn test_byte_identical_file_is_a_duplicate() -> Result<()> {
    let store = memory_store();
    let ingestor = ingestor(store.clone());
    let content = b"email,name\nann@example.com,Ann\nbob@example.com,Bob\n";

    let first = ingestor.ingest_bytes("contacts.csv", content).await?;
    let second = ingestor.ingest_bytes("contacts-copy.csv", content).await?;

    assert!(!first.is_duplicate());
    match second {
        IngestReport::DuplicateFile { existing } => {
            assert_eq!(existing.id, first.run().id);
            assert_eq!(existing.filename, "contacts.csv");
        }
        IngestReport::Processed(run) => panic!("expected duplicate, got run {}", run.id),
    }

    assert_eq!(store.count_runs().await?, 1);
    assert_eq!(store.count_records().await?, 2);
    Ok(())
}

#[tokio::test]
async fn test_same_rows_in_new_file_create_no_records() -> Result<()> {
    let store = memory_store();
    let ingestor = ingestor(store.clone());

    ingestor
        .ingest_bytes("a.csv", b"email,name\nann@example.com,Ann Lee\n")
        .await?;
    let report = ingestor
        .ingest_bytes("b.csv", b"email,name\nann@example.com,Ann Lee\n\n")
        .await?;

    let run = report.run();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.counters.inserted, 0);
    assert_eq!(run.counters.updated, 1);
    assert_eq!(store.count_records().await?, 1);
    Ok(())
}

#[tokio::test]
async fn test_latest_run_wins() -> Result<()> {
    let store = memory_store();
    let ingestor = ingestor(store.clone());

    let first = ingestor
        .ingest_bytes("a.csv", b"email,name\nann@example.com,Ann Lee\n")
        .await?;
    let second = ingestor
        .ingest_bytes(
            "b.csv",
            b"name,email,city\nann lee,ANN@EXAMPLE.COM,\nbob,bob@example.com,oslo\n",
        )
        .await?;

    let counters = second.run().counters;
    assert_eq!(counters.total, 2);
    assert_eq!(counters.updated, 1);
    assert_eq!(counters.inserted, 1);

    assert!(store.list_records(first.run().id).await?.is_empty());
    let owned = store.list_records(second.run().id).await?;
    assert_eq!(owned.len(), 2);
    assert_eq!(owned[0].row_index, 0);
    assert_eq!(owned[0].canonical.get("email"), Some("ann@example.com"));
    assert_eq!(owned[0].raw.get("email").map(String::as_str), Some("ANN@EXAMPLE.COM"));
    assert_eq!(owned[1].canonical.get("city"), Some("Oslo"));
    Ok(())
}

#[tokio::test]
async fn test_same_run_duplicates_are_skipped() -> Result<()> {
    let store = memory_store();
    let report = ingestor(store.clone())
        .ingest_bytes(
            "dupes.csv",
            b"email,name\nann@example.com,ann\n ANN@example.com ,ANN\n",
        )
        .await?;

    let counters = report.run().counters;
    assert_eq!(counters.inserted, 1);
    assert_eq!(counters.skipped, 1);
    assert_eq!(report.run().status, RunStatus::Completed);
    Ok(())
}

#[tokio::test]
async fn test_email_reconstructed_and_name_derived() -> Result<()> {
    let store = memory_store();
    let report = ingestor(store.clone())
        .ingest_bytes("john.csv", b"email,name\nJohnDoe.example.com,\n")
        .await?;

    let run = report.run();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.counters.inserted, 1);

    let records = store.list_records(run.id).await?;
    let record = &records[0];
    assert_eq!(record.canonical.get("email"), Some("john.doe@example.com"));
    assert_eq!(record.canonical.get("name"), Some("John Doe"));
    assert_eq!(record.canonical.get("first_name"), Some("John"));
    assert_eq!(record.canonical.get("last_name"), Some("Doe"));
    assert_eq!(record.fixes.len(), 2);
    assert_eq!(record.raw.get("email").map(String::as_str), Some("JohnDoe.example.com"));
    Ok(())
}

#[tokio::test]
async fn test_email_discovered_in_contact_column() -> Result<()> {
    let store = memory_store();
    let report = ingestor(store.clone())
        .ingest_bytes("contact.csv", b"email,phone,contact\n,555-1234,jane@x.com\n")
        .await?;

    let run = report.run();
    assert_eq!(run.counters.inserted, 1);

    let records = store.list_records(run.id).await?;
    assert_eq!(records[0].canonical.get("email"), Some("jane@x.com"));
    assert!(records[0]
        .fixes
        .iter()
        .any(|fix| fix == "Found email in column 'contact': jane@x.com"));
    Ok(())
}

#[tokio::test]
async fn test_invalid_email_gives_partial_success() -> Result<()> {
    let store = memory_store();
    let report = ingestor(store.clone())
        .ingest_bytes(
            "mixed.csv",
            b"email,name\nok@example.com,Ok\nnot-an-email,A\nfine@example.com,Fine\n",
        )
        .await?;

    let run = report.run();
    assert_eq!(run.status, RunStatus::PartialSuccess);
    assert_eq!(run.counters.inserted, 2);
    assert_eq!(run.counters.rejected, 1);
    assert_eq!(run.counters.errors, 1);

    let errors = store.list_errors(run.id).await?;
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].row_index, 1);
    assert_eq!(errors[0].kind, ErrorKind::Validation);
    assert_eq!(
        errors[0].message,
        "ValidationError: Invalid email format: 'not-an-email'"
    );
    assert_eq!(errors[0].raw.get("name").map(String::as_str), Some("A"));
    Ok(())
}

#[tokio::test]
async fn test_header_only_file_fails_without_error_entries() -> Result<()> {
    let store = memory_store();
    let report = ingestor(store.clone())
        .ingest_bytes("header.csv", b"email,name,phone\n")
        .await?;

    let run = report.run();
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(
        run.error_message.as_deref(),
        Some("HeaderOnlyError: file contains a header but no data rows")
    );
    assert_eq!(run.counters.total, 0);
    assert!(store.list_errors(run.id).await?.is_empty());
    assert_eq!(store.count_records().await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_missing_email_column_fails_header_validation() -> Result<()> {
    let store = memory_store();
    let report = ingestor(store)
        .ingest_bytes("no-email.csv", b"name,phone\nAnn,5551234567\n")
        .await?;

    let run = report.run();
    assert_eq!(run.status, RunStatus::Failed);
    let message = run.error_message.clone().unwrap_or_default();
    assert!(message.starts_with("HeaderValidationError"), "{message}");
    Ok(())
}

#[tokio::test]
async fn test_strict_mode_rejections() -> Result<()> {
    let store = memory_store();
    let report = ingestor_with(store.clone(), strict_config())
        .ingest_bytes(
            "strict.csv",
            b"email,name,phone\nann@example.com,,\nx@example.com,,\nbob@example.com,Bob,+1234567\n",
        )
        .await?;

    let run = report.run();
    assert_eq!(run.status, RunStatus::PartialSuccess);
    // The name derived from the email satisfies strict mode
    assert_eq!(run.counters.inserted, 1);
    assert_eq!(run.counters.rejected, 2);

    let messages: Vec<String> = store
        .list_errors(run.id)
        .await?
        .into_iter()
        .map(|entry| entry.message)
        .collect();
    assert_eq!(
        messages,
        vec![
            "ValidationError: Missing required field: name".to_string(),
            "ValidationError: Phone number must have at least 10 digits: '+1234567'".to_string(),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn test_semicolon_latin1_file() -> Result<()> {
    let store = memory_store();
    let report = ingestor(store.clone())
        .ingest_bytes("latin1.csv", b"email;name;city\nrene@example.com;Ren\xe9;K\xf6ln\n")
        .await?;

    let run = report.run();
    assert_eq!(run.status, RunStatus::Completed);

    let records = store.list_records(run.id).await?;
    assert_eq!(records[0].canonical.get("name"), Some("Ren\u{e9}"));
    assert_eq!(records[0].canonical.get("city"), Some("K\u{f6}ln"));
    Ok(())
}

#[tokio::test]
async fn test_ingest_file_from_disk() -> Result<()> {
    let store = memory_store();
    let mut file = tempfile::Builder::new().suffix(".csv").tempfile()?;
    file.write_all(b"email\tname\nann@example.com\tAnn\n")?;

    let report = ingestor(store.clone()).ingest_file(file.path()).await?;

    let run = report.run();
    assert_eq!(run.status, RunStatus::Completed);
    assert!(run.filename.ends_with(".csv"));
    assert_eq!(
        run.file_hash,
        pipecheck_common::checksum::sha256_hex(b"email\tname\nann@example.com\tAnn\n")
    );
    Ok(())
}

#[tokio::test]
async fn test_stats_over_runs() -> Result<()> {
    let store = memory_store();
    let ingestor = ingestor(store.clone());

    ingestor
        .ingest_bytes("ok.csv", b"email,name\nann@example.com,Ann\nbob@example.com,Bob\n")
        .await?;
    ingestor
        .ingest_bytes("mixed.csv", b"email,name\ncy@example.com,Cy\nnot-an-email,A\n")
        .await?;
    let last = ingestor.ingest_bytes("empty.csv", b"").await?;

    let stats = store.stats().await?;
    assert_eq!(stats.total_runs, 3);
    assert_eq!(stats.completed_runs, 1);
    assert_eq!(stats.partial_runs, 1);
    assert_eq!(stats.failed_runs, 1);
    assert_eq!(stats.total_rows_processed, 2);
    assert!((stats.success_rate - 100.0 / 3.0).abs() < 1e-9);
    assert_eq!(stats.last_run.map(|run| run.id), Some(last.run().id));
    Ok(())
}

#[tokio::test]
async fn test_email_cleared_by_repair_is_a_validation_error() -> Result<()> {
    let store = memory_store();
    let report = ingestor(store.clone())
        .ingest_bytes(
            "cleared.csv",
            b"email,name,phone\n@example.com,,\n,,12\nok@example.com,Ok,\n",
        )
        .await?;

    let run = report.run();
    assert_eq!(run.status, RunStatus::PartialSuccess);
    assert_eq!(run.counters.rejected, 2);

    let errors = store.list_errors(run.id).await?;
    assert_eq!(errors.len(), 2);
    for entry in &errors {
        assert_eq!(entry.kind, ErrorKind::Validation);
        assert_eq!(entry.message, "ValidationError: Missing required field: email");
    }
    assert_eq!(errors[0].raw.get("email").map(String::as_str), Some("@example.com"));
    assert_eq!(errors[1].raw.get("phone").map(String::as_str), Some("12"));
    Ok(())
}

#[tokio::test]
async fn test_unreadable_lines_are_dropped() -> Result<()> {
    let store = memory_store();
    let report = ingestor(store.clone())
        .ingest_bytes(
            "quotes.csv",
            b"email,name\nann@example.com,Ann\n\"bob@example.com,Bob\ncy@example.com,Cy\n",
        )
        .await?;

    let run = report.run();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.counters.total, 2);
    assert_eq!(store.count_records().await?, 2);
    Ok(())
}

#[tokio::test]
async fn test_unterminated_quote_on_every_line_fails_run() -> Result<()> {
    let store = memory_store();
    let report = ingestor(store.clone())
        .ingest_bytes("broken.csv", b"email,name\n\"ann@example.com,Ann\n")
        .await?;

    let run = report.run();
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(
        run.error_message.as_deref(),
        Some("ParseCorruptionError: all 1 data lines are unreadable")
    );
    assert!(store.list_errors(run.id).await?.is_empty());
    assert_eq!(store.count_records().await?, 0);
    Ok(())
}
