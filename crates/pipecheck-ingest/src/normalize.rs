//! Canonical record shape

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::row::{is_null_like, Field, RowView};

/// Normalized field mapping; recognized columns use their canonical key
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalRecord {
    fields: BTreeMap<String, Option<String>>,
}

impl CanonicalRecord {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(|value| value.as_deref())
    }

    pub fn field(&self, field: Field) -> Option<&str> {
        self.get(field.key())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Option<String>) {
        self.fields.insert(key.into(), value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.fields
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_deref()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl FromIterator<(String, Option<String>)> for CanonicalRecord {
    fn from_iter<T: IntoIterator<Item = (String, Option<String>)>>(iter: T) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

/// Map a validated row onto its canonical form
pub fn normalize(row: &RowView) -> CanonicalRecord {
    let mut record = CanonicalRecord::default();

    for (column, value) in row.columns() {
        let column = column.trim();
        let value = value.map(str::trim).filter(|v| !is_null_like(v));

        let field = Field::from_column(column).filter(|f| !record.contains_key(f.key()));
        let (key, value) = match field {
            Some(field) => (field.key().to_string(), value.map(|v| normalize_field(field, v))),
            None => (column.to_string(), value.map(str::to_string)),
        };

        // A recognized key always wins over a pass-through column of the same name
        if field.is_none() && record.contains_key(&key) {
            continue;
        }
        record.insert(key, value);
    }

    if let Some(name) = record.field(Field::Name).map(str::to_string) {
        let mut tokens = name.split_whitespace();
        let first = tokens.next().unwrap_or_default().to_string();
        let rest = tokens.collect::<Vec<_>>().join(" ");
        record.insert(Field::FirstName.key(), Some(first));
        record.insert(Field::LastName.key(), Some(rest));
    }

    record
}

fn normalize_field(field: Field, value: &str) -> String {
    match field {
        Field::Email => value.to_lowercase(),
        Field::Name | Field::FirstName | Field::LastName | Field::City => {
            title_case(&collapse(value))
        }
        Field::State | Field::Country | Field::Locale => value.to_uppercase(),
        Field::Address => collapse(value),
        Field::Zip => normalize_zip(value),
        Field::Phone => value.to_string(),
    }
}

fn collapse(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Upper-case the first letter of every alphabetic run, lower-case the rest
pub fn title_case(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut previous_is_letter = false;

    for c in value.chars() {
        if c.is_alphabetic() {
            if previous_is_letter {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            previous_is_letter = true;
        } else {
            out.push(c);
            previous_is_letter = false;
        }
    }

    out
}

/// Drop a `-suffix`, zero-pad short all-digit codes to five digits
pub fn normalize_zip(value: &str) -> String {
    let head = value.split('-').next().unwrap_or_default().trim();
    if head.is_empty() {
        return value.to_string();
    }

    if head.len() <= 5 && head.chars().all(|c| c.is_ascii_digit()) {
        format!("{:0>5}", head)
    } else {
        head.to_string()
    }
}
