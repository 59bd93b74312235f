//! PipeCheck ingestion library
//!
//! Ingests CSV-like files of contact records into a canonical record store.
//! Re-submitting the same logical record never creates a duplicate, and
//! malformed rows are quarantined as error entries instead of aborting the run.
//!
//! # Pipeline
//!
//! - [`format`]: encoding and delimiter detection
//! - [`reader`]: header and row parsing
//! - [`repair`]: deterministic auto-fix, then optional AI repair
//! - [`validate`]: lenient or strict row acceptance
//! - [`normalize`]: canonical casing and field shapes
//! - [`fingerprint`]: content-addressed record identity
//! - [`coordinator`]: batched commits into a [`store::RecordStore`]
//!
//! # Example
//!
//! ```no_run
//! use pipecheck_ingest::{Ingestor, MemoryStore, PipelineConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let ingestor = Ingestor::from_config(Arc::new(MemoryStore::new()), PipelineConfig::default())?;
//!     let report = ingestor.ingest_file("./contacts.csv").await?;
//!     println!("{}: {}", report.run().id, report.run().status);
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod coordinator;
pub mod error;
pub mod fingerprint;
pub mod format;
pub mod normalize;
pub mod pipeline;
pub mod reader;
pub mod repair;
pub mod row;
pub mod run;
pub mod store;
pub mod validate;

pub use config::PipelineConfig;
pub use error::{ErrorKind, IngestError, IngestResult, RowError, StoreError};
pub use pipeline::{IngestReport, Ingestor};
pub use repair::RepairEngine;
pub use run::{Run, RunCounters, RunStatus};
pub use store::{MemoryStore, PgStore, RecordStore};
pub use validate::ValidationMode;
