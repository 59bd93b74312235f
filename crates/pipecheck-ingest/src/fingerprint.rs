//! Content-addressed record identity
//!
//! The fingerprint covers a fixed set of identity fields, each defaulting to
//! the empty string, serialized as compact JSON with sorted keys and hashed
//! with SHA-256. Column order and unrecognized columns never affect it.

use pipecheck_common::checksum::sha256_hex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::normalize::CanonicalRecord;
use crate::row::Field;

/// Fields that make up a record's identity
pub const IDENTITY_FIELDS: [Field; 8] = [
    Field::Email,
    Field::Name,
    Field::Phone,
    Field::Address,
    Field::City,
    Field::State,
    Field::Zip,
    Field::Country,
];

/// Lowercase hex SHA-256 of the identity fields
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Fingerprint {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Compute the identity fingerprint of a canonical record
pub fn fingerprint(record: &CanonicalRecord) -> Fingerprint {
    Fingerprint(sha256_hex(identity_json(record)))
}

/// `{"address":"...","city":"...",...}` with no whitespace
fn identity_json(record: &CanonicalRecord) -> String {
    let identity: BTreeMap<&str, &str> = IDENTITY_FIELDS
        .iter()
        .map(|field| (field.key(), record.field(*field).unwrap_or_default()))
        .collect();

    let object: serde_json::Map<String, serde_json::Value> = identity
        .into_iter()
        .map(|(key, value)| (key.to_string(), serde_json::Value::from(value)))
        .collect();

    serde_json::Value::Object(object).to_string()
}
