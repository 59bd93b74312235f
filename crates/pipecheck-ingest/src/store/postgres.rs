//! PostgreSQL record store
//!
//! Runtime-checked queries over the `ingest_runs`, `records` and
//! `error_entries` tables created by the workspace migrations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{Postgres, Transaction};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use super::{
    ErrorEntry, NewErrorEntry, NewRecord, Record, RecordStore, RunStats, StoreTransaction,
    UpsertOutcome,
};
use crate::config::DatabaseConfig;
use crate::error::{StoreError, StoreResult};
use crate::fingerprint::Fingerprint;
use crate::normalize::CanonicalRecord;
use crate::run::{Run, RunCounters};

const RUN_COLUMNS: &str = "id, filename, file_hash, status, total_rows, rows_inserted, \
     rows_updated, rows_skipped, rows_rejected, errors_count, created_at, started_at, \
     completed_at, error_message";

const RECORD_COLUMNS: &str =
    "fingerprint, run_id, row_index, canonical, raw, fixes, created_at, updated_at";

/// Insert a record, supersede one owned by another run, or return nothing
/// when the same run already owns the fingerprint.
const UPSERT_RECORD: &str = r#"
    WITH prior AS (
        SELECT run_id FROM records WHERE fingerprint = $1 FOR UPDATE
    )
    INSERT INTO records (fingerprint, run_id, row_index, canonical, raw, fixes)
    VALUES ($1, $2, $3, $4, $5, $6)
    ON CONFLICT (fingerprint) DO UPDATE SET
        run_id = EXCLUDED.run_id,
        row_index = EXCLUDED.row_index,
        canonical = EXCLUDED.canonical,
        raw = EXCLUDED.raw,
        fixes = EXCLUDED.fixes,
        updated_at = NOW()
    WHERE records.run_id <> EXCLUDED.run_id
    RETURNING (xmax = 0) AS inserted, (SELECT run_id FROM prior) AS previous_run
"#;

#[derive(Debug, sqlx::FromRow)]
struct RunRow {
    id: Uuid,
    filename: String,
    file_hash: String,
    status: String,
    total_rows: i64,
    rows_inserted: i64,
    rows_updated: i64,
    rows_skipped: i64,
    rows_rejected: i64,
    errors_count: i64,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
}

impl From<RunRow> for Run {
    fn from(row: RunRow) -> Self {
        Run {
            id: row.id,
            filename: row.filename,
            file_hash: row.file_hash,
            status: row.status.into(),
            counters: RunCounters {
                total: row.total_rows,
                inserted: row.rows_inserted,
                updated: row.rows_updated,
                skipped: row.rows_skipped,
                rejected: row.rows_rejected,
                errors: row.errors_count,
            },
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            error_message: row.error_message,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct RecordRow {
    fingerprint: String,
    run_id: Uuid,
    row_index: i64,
    canonical: Json<CanonicalRecord>,
    raw: Json<BTreeMap<String, String>>,
    fixes: Json<Vec<String>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<RecordRow> for Record {
    fn from(row: RecordRow) -> Self {
        Record {
            fingerprint: Fingerprint::from(row.fingerprint),
            run_id: row.run_id,
            row_index: row.row_index,
            canonical: row.canonical.0,
            raw: row.raw.0,
            fixes: row.fixes.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ErrorRow {
    id: i64,
    run_id: Uuid,
    row_index: i64,
    error_code: String,
    message: String,
    raw: Json<BTreeMap<String, String>>,
    created_at: DateTime<Utc>,
}

impl From<ErrorRow> for ErrorEntry {
    fn from(row: ErrorRow) -> Self {
        ErrorEntry {
            id: row.id,
            run_id: row.run_id,
            row_index: row.row_index,
            kind: row.error_code.into(),
            message: row.message,
            raw: row.raw.0,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct StatsRow {
    total_runs: i64,
    completed_runs: i64,
    partial_runs: i64,
    failed_runs: i64,
    total_rows_processed: i64,
}

/// Record store backed by a PostgreSQL pool
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a connection pool
    pub async fn connect(config: &DatabaseConfig) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .connect(&config.url)
            .await?;

        info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "Database connection pool created"
        );

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply pending schema migrations
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        info!("Database migrations applied");
        Ok(())
    }
}

#[async_trait]
impl RecordStore for PgStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTransaction { tx }))
    }

    async fn create_run(&self, run: &Run) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO ingest_runs (
                id, filename, file_hash, status, total_rows, rows_inserted, rows_updated,
                rows_skipped, rows_rejected, errors_count, created_at, started_at,
                completed_at, error_message
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(run.id)
        .bind(&run.filename)
        .bind(&run.file_hash)
        .bind(run.status.as_str())
        .bind(run.counters.total)
        .bind(run.counters.inserted)
        .bind(run.counters.updated)
        .bind(run.counters.skipped)
        .bind(run.counters.rejected)
        .bind(run.counters.errors)
        .bind(run.created_at)
        .bind(run.started_at)
        .bind(run.completed_at)
        .bind(&run.error_message)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(StoreError::Conflict(format!(
                    "A run for file hash '{}' already exists",
                    run.file_hash
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn update_run(&self, run: &Run) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE ingest_runs SET
                status = $2,
                total_rows = $3,
                rows_inserted = $4,
                rows_updated = $5,
                rows_skipped = $6,
                rows_rejected = $7,
                errors_count = $8,
                started_at = $9,
                completed_at = $10,
                error_message = $11
            WHERE id = $1
            "#,
        )
        .bind(run.id)
        .bind(run.status.as_str())
        .bind(run.counters.total)
        .bind(run.counters.inserted)
        .bind(run.counters.updated)
        .bind(run.counters.skipped)
        .bind(run.counters.rejected)
        .bind(run.counters.errors)
        .bind(run.started_at)
        .bind(run.completed_at)
        .bind(&run.error_message)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("Run", run.id));
        }

        debug!(run_id = %run.id, status = %run.status, "Run updated");
        Ok(())
    }

    async fn get_run(&self, id: Uuid) -> StoreResult<Option<Run>> {
        let row: Option<RunRow> =
            sqlx::query_as(&format!("SELECT {RUN_COLUMNS} FROM ingest_runs WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(Run::from))
    }

    async fn find_run_by_file_hash(&self, file_hash: &str) -> StoreResult<Option<Run>> {
        let row: Option<RunRow> = sqlx::query_as(&format!(
            "SELECT {RUN_COLUMNS} FROM ingest_runs WHERE file_hash = $1"
        ))
        .bind(file_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Run::from))
    }

    async fn list_runs(&self, limit: i64) -> StoreResult<Vec<Run>> {
        let rows: Vec<RunRow> = sqlx::query_as(&format!(
            "SELECT {RUN_COLUMNS} FROM ingest_runs ORDER BY created_at DESC LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Run::from).collect())
    }

    async fn count_runs(&self) -> StoreResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ingest_runs")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn list_errors(&self, run_id: Uuid) -> StoreResult<Vec<ErrorEntry>> {
        let rows: Vec<ErrorRow> = sqlx::query_as(
            r#"
            SELECT id, run_id, row_index, error_code, message, raw, created_at
            FROM error_entries
            WHERE run_id = $1
            ORDER BY row_index, id
            "#,
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(ErrorEntry::from).collect())
    }

    async fn list_records(&self, run_id: Uuid) -> StoreResult<Vec<Record>> {
        let rows: Vec<RecordRow> = sqlx::query_as(&format!(
            "SELECT {RECORD_COLUMNS} FROM records WHERE run_id = $1 ORDER BY row_index"
        ))
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Record::from).collect())
    }

    async fn count_records(&self) -> StoreResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn get_record(&self, fingerprint: &Fingerprint) -> StoreResult<Option<Record>> {
        let row: Option<RecordRow> = sqlx::query_as(&format!(
            "SELECT {RECORD_COLUMNS} FROM records WHERE fingerprint = $1"
        ))
        .bind(fingerprint.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Record::from))
    }

    async fn stats(&self) -> StoreResult<RunStats> {
        let totals: StatsRow = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) AS total_runs,
                COUNT(*) FILTER (WHERE status = 'completed') AS completed_runs,
                COUNT(*) FILTER (WHERE status = 'partial_success') AS partial_runs,
                COUNT(*) FILTER (WHERE status = 'failed') AS failed_runs,
                COALESCE(SUM(total_rows) FILTER (WHERE status = 'completed'), 0)::BIGINT
                    AS total_rows_processed
            FROM ingest_runs
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let last_run = self.list_runs(1).await?.into_iter().next();

        Ok(RunStats {
            total_runs: totals.total_runs,
            completed_runs: totals.completed_runs,
            partial_runs: totals.partial_runs,
            failed_runs: totals.failed_runs,
            success_rate: RunStats::success_rate(totals.completed_runs, totals.total_runs),
            total_rows_processed: totals.total_rows_processed,
            last_run,
        })
    }
}

/// Batch transaction on a pooled connection
struct PgTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTransaction for PgTransaction {
    async fn upsert_record(&mut self, record: NewRecord) -> StoreResult<UpsertOutcome> {
        let returned: Option<(bool, Option<Uuid>)> = sqlx::query_as(UPSERT_RECORD)
            .bind(record.fingerprint.as_str())
            .bind(record.run_id)
            .bind(record.row_index)
            .bind(Json(&record.canonical))
            .bind(Json(&record.raw))
            .bind(Json(&record.fixes))
            .fetch_optional(&mut *self.tx)
            .await?;

        Ok(match returned {
            None => UpsertOutcome::Skipped,
            Some((true, _)) => UpsertOutcome::Inserted,
            Some((false, previous_run)) => UpsertOutcome::Updated { previous_run },
        })
    }

    async fn insert_error(&mut self, entry: NewErrorEntry) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO error_entries (run_id, row_index, error_code, message, raw)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(entry.run_id)
        .bind(entry.row_index)
        .bind(entry.kind.as_str())
        .bind(&entry.message)
        .bind(Json(&entry.raw))
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::fingerprint::fingerprint;
    use crate::normalize::normalize;
    use crate::row::RowView;
    use crate::run::RunStatus;

    /// Connect to the test database named by `PIPECHECK_TEST_DATABASE_URL`
    async fn test_store() -> Option<PgStore> {
        let url = std::env::var("PIPECHECK_TEST_DATABASE_URL").ok()?;
        let config = DatabaseConfig {
            url,
            ..Default::default()
        };
        let store = PgStore::connect(&config).await.expect("connect to test database");
        store.migrate().await.expect("apply migrations");
        Some(store)
    }

    fn new_record(run_id: Uuid, email: &str, row_index: i64) -> NewRecord {
        let row = RowView::from_raw(row_index as usize, [("email", email)]);
        let canonical = normalize(&row);
        NewRecord {
            fingerprint: fingerprint(&canonical),
            run_id,
            row_index,
            canonical,
            raw: row.raw().clone(),
            fixes: vec!["Cleaned phone".into()],
        }
    }

    #[tokio::test]
    async fn test_upsert_outcomes() {
        let Some(store) = test_store().await else {
            return;
        };

        let run_a = Run::new("a.csv", Uuid::new_v4().to_string());
        let run_b = Run::new("b.csv", Uuid::new_v4().to_string());
        store.create_run(&run_a).await.unwrap();
        store.create_run(&run_b).await.unwrap();

        let email = format!("{}@example.com", Uuid::new_v4().simple());

        let mut tx = store.begin().await.unwrap();
        assert_eq!(
            tx.upsert_record(new_record(run_a.id, &email, 0)).await.unwrap(),
            UpsertOutcome::Inserted
        );
        assert_eq!(
            tx.upsert_record(new_record(run_a.id, &email, 1)).await.unwrap(),
            UpsertOutcome::Skipped
        );
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert_eq!(
            tx.upsert_record(new_record(run_b.id, &email, 3)).await.unwrap(),
            UpsertOutcome::Updated {
                previous_run: Some(run_a.id)
            }
        );
        tx.commit().await.unwrap();

        let records = store.list_records(run_b.id).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].row_index, 3);
        assert_eq!(records[0].fixes, vec!["Cleaned phone".to_string()]);
    }

    #[tokio::test]
    async fn test_rollback_and_errors() {
        let Some(store) = test_store().await else {
            return;
        };

        let run = Run::new("c.csv", Uuid::new_v4().to_string());
        store.create_run(&run).await.unwrap();

        let email = format!("{}@example.com", Uuid::new_v4().simple());
        let record = new_record(run.id, &email, 0);
        let fp = record.fingerprint.clone();

        let mut tx = store.begin().await.unwrap();
        tx.upsert_record(record).await.unwrap();
        tx.rollback().await.unwrap();
        assert!(store.get_record(&fp).await.unwrap().is_none());

        let mut tx = store.begin().await.unwrap();
        tx.insert_error(NewErrorEntry {
            run_id: run.id,
            row_index: 4,
            kind: ErrorKind::EmptyRow,
            message: "EmptyRowError: row contains no values".into(),
            raw: BTreeMap::from([("email".to_string(), String::new())]),
        })
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let errors = store.list_errors(run.id).await.unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, ErrorKind::EmptyRow);
    }

    #[tokio::test]
    async fn test_run_bookkeeping() {
        let Some(store) = test_store().await else {
            return;
        };

        let mut run = Run::new("d.csv", Uuid::new_v4().to_string());
        store.create_run(&run).await.unwrap();

        let duplicate = Run::new("copy.csv", run.file_hash.clone());
        assert!(matches!(
            store.create_run(&duplicate).await,
            Err(StoreError::Conflict(_))
        ));

        run.status = RunStatus::Completed;
        run.counters.total = 2;
        store.update_run(&run).await.unwrap();

        let loaded = store.find_run_by_file_hash(&run.file_hash).await.unwrap().unwrap();
        assert_eq!(loaded.status, RunStatus::Completed);
        assert_eq!(loaded.counters.total, 2);

        let missing = Run::new("e.csv", Uuid::new_v4().to_string());
        assert!(matches!(
            store.update_run(&missing).await,
            Err(StoreError::NotFound(_))
        ));

        let stats = store.stats().await.unwrap();
        assert!(stats.total_runs >= 1);
        assert!(stats.completed_runs >= 1);
    }
}
