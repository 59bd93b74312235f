//! PipeCheck Common Library
//!
//! Shared utilities for the PipeCheck workspace:
//!
//! - **Checksums**: SHA-256 content hashing used for file-level idempotency
//!   and record fingerprints
//! - **Logging**: `tracing` subscriber setup driven by environment variables
//!
//! # Example
//!
//! ```
//! use pipecheck_common::checksum::sha256_hex;
//!
//! let digest = sha256_hex(b"email,name\n");
//! assert_eq!(digest.len(), 64);
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod checksum;
pub mod logging;
