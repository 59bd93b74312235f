//! Row representation shared by every pipeline stage
//!
//! A [`RowView`] keeps the source column order, stores null-like tokens as
//! `None`, and remembers the raw text as submitted so error entries and
//! stored records can always show the original input.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Tokens treated as an absent value
pub const NULL_TOKENS: &[&str] = &["", "NULL", "N/A", "n/a", "null", "-", "--", "none", "NONE"];

/// Whether a raw cell should be treated as absent
pub fn is_null_like(value: &str) -> bool {
    NULL_TOKENS.contains(&value.trim())
}

/// Columns the pipeline understands; everything else passes through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Email,
    Name,
    FirstName,
    LastName,
    Phone,
    Address,
    City,
    State,
    Zip,
    Country,
    Locale,
}

impl Field {
    pub const ALL: [Field; 11] = [
        Field::Email,
        Field::Name,
        Field::FirstName,
        Field::LastName,
        Field::Phone,
        Field::Address,
        Field::City,
        Field::State,
        Field::Zip,
        Field::Country,
        Field::Locale,
    ];

    /// Canonical key used in normalized records
    pub fn key(self) -> &'static str {
        match self {
            Field::Email => "email",
            Field::Name => "name",
            Field::FirstName => "first_name",
            Field::LastName => "last_name",
            Field::Phone => "phone",
            Field::Address => "address",
            Field::City => "city",
            Field::State => "state",
            Field::Zip => "zip",
            Field::Country => "country",
            Field::Locale => "locale",
        }
    }

    /// Recognize a source column name, ignoring case, spaces and dashes
    pub fn from_column(column: &str) -> Option<Field> {
        let folded: String = column
            .trim()
            .chars()
            .map(|c| match c {
                ' ' | '-' => '_',
                other => other.to_ascii_lowercase(),
            })
            .collect();

        match folded.as_str() {
            "email" | "e_mail" | "email_address" => Some(Field::Email),
            "name" | "full_name" | "fullname" => Some(Field::Name),
            "first_name" | "firstname" | "given_name" => Some(Field::FirstName),
            "last_name" | "lastname" | "surname" | "family_name" => Some(Field::LastName),
            "phone" | "phone_number" | "telephone" | "tel" | "mobile" => Some(Field::Phone),
            "address" | "street" | "street_address" => Some(Field::Address),
            "city" | "town" => Some(Field::City),
            "state" | "province" | "region" => Some(Field::State),
            "zip" | "zipcode" | "zip_code" | "postal_code" | "postcode" => Some(Field::Zip),
            "country" | "country_code" => Some(Field::Country),
            "locale" | "language" => Some(Field::Locale),
            _ => None,
        }
    }
}

/// One source row on its way through repair, validation and normalization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowView {
    index: usize,
    columns: Vec<(String, Option<String>)>,
    raw: BTreeMap<String, String>,
    fixes: Vec<String>,
}

impl RowView {
    /// Build from raw cells; null-like cells become `None`
    pub fn from_raw<I, K, V>(index: usize, cells: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut columns = Vec::new();
        let mut raw = BTreeMap::new();

        for (column, value) in cells {
            let column = column.into();
            let value = value.into();
            let parsed = if is_null_like(&value) {
                None
            } else {
                Some(value.clone())
            };
            raw.insert(column.clone(), value);
            columns.push((column, parsed));
        }

        Self {
            index,
            columns,
            raw,
            fixes: Vec::new(),
        }
    }

    /// Zero-based position of the row in the source
    pub fn index(&self) -> usize {
        self.index
    }

    /// Cells as submitted, before any repair
    pub fn raw(&self) -> &BTreeMap<String, String> {
        &self.raw
    }

    pub fn fixes(&self) -> &[String] {
        &self.fixes
    }

    pub fn record_fix(&mut self, description: impl Into<String>) {
        self.fixes.push(description.into());
    }

    pub(crate) fn extend_fixes(&mut self, descriptions: impl IntoIterator<Item = String>) {
        self.fixes.extend(descriptions);
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.columns
            .iter()
            .map(|(column, value)| (column.as_str(), value.as_deref()))
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|(column, _)| column.clone()).collect()
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .and_then(|(_, value)| value.as_deref())
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|(name, _)| name == column)
    }

    /// Replace a cell; a null-like value is stored as `None`
    pub fn set(&mut self, column: &str, value: Option<String>) {
        let value = value.filter(|v| !is_null_like(v));
        match self.columns.iter_mut().find(|(name, _)| name == column) {
            Some((_, slot)) => *slot = value,
            None => self.columns.push((column.to_string(), value)),
        }
    }

    /// First source column recognized as `field`
    pub fn column_for(&self, field: Field) -> Option<&str> {
        self.columns
            .iter()
            .map(|(name, _)| name.as_str())
            .find(|name| Field::from_column(name) == Some(field))
    }

    pub fn field(&self, field: Field) -> Option<&str> {
        self.column_for(field).and_then(|column| self.get(column))
    }

    /// Set a recognized field, adding a canonical column when the source lacks one
    pub fn set_field(&mut self, field: Field, value: Option<String>) {
        let column = self
            .column_for(field)
            .map(str::to_string)
            .unwrap_or_else(|| field.key().to_string());
        self.set(&column, value);
    }

    /// True when every cell was null-like as submitted
    ///
    /// Repairs never make a row blank: a cell cleared by a fix still counts
    /// as submitted content.
    pub fn is_blank(&self) -> bool {
        self.raw.values().all(|value| is_null_like(value))
    }

    pub fn email(&self) -> Option<&str> {
        self.field(Field::Email)
    }

    pub fn name(&self) -> Option<&str> {
        self.field(Field::Name)
    }

    pub fn phone(&self) -> Option<&str> {
        self.field(Field::Phone)
    }

    /// Current cell values keyed by column, for prompts and diagnostics
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.columns
                .iter()
                .map(|(column, value)| {
                    let value = value
                        .as_ref()
                        .map(|v| serde_json::Value::String(v.clone()))
                        .unwrap_or(serde_json::Value::Null);
                    (column.clone(), value)
                })
                .collect(),
        )
    }
}
