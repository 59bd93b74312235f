//! Error taxonomy for the ingestion pipeline
//!
//! Two scopes exist. [`IngestError`] is fatal to a whole run: the file could
//! not be read as a table, the run bookkeeping is inconsistent, or the store
//! failed. [`RowError`] is scoped to a single row: it is recorded as an error
//! entry and the run carries on.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::run::RunStatus;

/// Result type alias for pipeline operations
pub type IngestResult<T> = std::result::Result<T, IngestError>;

/// Result type alias for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Run-level failures
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("EmptyFileError: file contains no data")]
    EmptyFile,

    #[error("HeaderOnlyError: file contains a header but no data rows")]
    HeaderOnly,

    #[error("DelimiterNotFoundError: none of ',', '\\t', ';', '|' appear in header line '{header}'")]
    DelimiterNotFound { header: String },

    #[error("HeaderValidationError: {0}")]
    HeaderValidation(String),

    #[error("ParseCorruptionError: {0}")]
    ParseCorruption(String),

    #[error("Invalid run transition from {from} to {to}")]
    InvalidTransition { from: RunStatus, to: RunStatus },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl IngestError {
    /// Errors raised before any row is processed
    pub fn is_pre_row(&self) -> bool {
        matches!(
            self,
            IngestError::EmptyFile
                | IngestError::HeaderOnly
                | IngestError::DelimiterNotFound { .. }
                | IngestError::HeaderValidation(_)
                | IngestError::ParseCorruption(_)
        )
    }
}

/// Row-level failures, each persisted as an error entry
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RowError {
    #[error("EmptyRowError: row contains no values")]
    EmptyRow,

    #[error("ValidationError: {0}")]
    Validation(String),

    #[error("ProcessingError: {0}")]
    Processing(String),
}

impl RowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RowError::EmptyRow => ErrorKind::EmptyRow,
            RowError::Validation(_) => ErrorKind::Validation,
            RowError::Processing(_) => ErrorKind::RowProcessing,
        }
    }

    /// Message without the taxonomy prefix, as handed to the AI repairer
    pub fn detail(&self) -> &str {
        match self {
            RowError::EmptyRow => "row contains no values",
            RowError::Validation(message) | RowError::Processing(message) => message,
        }
    }
}

/// Stored error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    EmptyRow,
    #[serde(rename = "VALIDATION_ERROR")]
    Validation,
    #[serde(rename = "ROW_PROCESSING_ERROR")]
    RowProcessing,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::EmptyRow => "EMPTY_ROW",
            ErrorKind::Validation => "VALIDATION_ERROR",
            ErrorKind::RowProcessing => "ROW_PROCESSING_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for ErrorKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "EMPTY_ROW" => ErrorKind::EmptyRow,
            "VALIDATION_ERROR" => ErrorKind::Validation,
            _ => ErrorKind::RowProcessing,
        }
    }
}

/// Record store failures
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database query failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Unique constraint violation, e.g. a second run for the same file hash
    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Storage backend failure: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn not_found(resource: &str, identifier: impl std::fmt::Display) -> Self {
        Self::NotFound(format!("{} '{}' not found", resource, identifier))
    }
}

/// AI repair client failures; never fatal to a row or a run
#[derive(Error, Debug)]
pub enum RepairError {
    #[error("AI repair request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("AI repair service returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("AI repair response contained no content")]
    EmptyResponse,

    #[error("AI repair response is not a JSON object: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("AI repair is not configured: {0}")]
    NotConfigured(String),
}
