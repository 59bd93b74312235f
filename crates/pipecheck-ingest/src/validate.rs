//! Row acceptance rules
//!
//! Lenient validation only insists on a well-formed email; every other field
//! is cleaned best-effort. Strict validation additionally requires a name and
//! rejects phone numbers with fewer than ten digits.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use crate::error::RowError;
use crate::row::{Field, RowView};

/// Minimum phone digits accepted by strict validation
pub const STRICT_MIN_PHONE_DIGITS: usize = 10;

/// Which acceptance policy to apply
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationMode {
    #[default]
    Lenient,
    Strict,
}

impl std::str::FromStr for ValidationMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "lenient" => Ok(ValidationMode::Lenient),
            "strict" => Ok(ValidationMode::Strict),
            other => Err(anyhow::anyhow!("Invalid validation mode: {}", other)),
        }
    }
}

/// Validate with the given policy
pub fn validate(row: RowView, mode: ValidationMode) -> Result<RowView, RowError> {
    match mode {
        ValidationMode::Lenient => validate_lenient(row),
        ValidationMode::Strict => validate_strict(row),
    }
}

/// Accept any row with a syntactically valid email
///
/// Returns the row with the email trimmed and lower-cased, phone reduced to
/// digits and `+`, and whitespace runs collapsed in the remaining text cells.
pub fn validate_lenient(mut row: RowView) -> Result<RowView, RowError> {
    if row.is_blank() {
        return Err(RowError::EmptyRow);
    }

    let email = match row.email() {
        Some(email) => email.to_string(),
        None => {
            return Err(RowError::Validation(
                "Missing required field: email".to_string(),
            ))
        }
    };

    let trimmed = email.trim();
    if !is_valid_email(trimmed) {
        return Err(RowError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }
    let email = trimmed.to_lowercase();

    let email_column = row.column_for(Field::Email).map(str::to_string);
    let phone_column = row.column_for(Field::Phone).map(str::to_string);

    let cleaned: Vec<(String, Option<String>)> = row
        .columns()
        .map(|(column, value)| {
            let value = value.map(|v| {
                if Some(column) == email_column.as_deref() {
                    email.clone()
                } else if Some(column) == phone_column.as_deref() {
                    clean_phone(v)
                } else {
                    collapse_whitespace(v)
                }
            });
            (column.to_string(), value)
        })
        .collect();

    for (column, value) in cleaned {
        row.set(&column, value);
    }

    Ok(row)
}

/// Lenient rules plus a required name and a ten-digit phone when present
pub fn validate_strict(row: RowView) -> Result<RowView, RowError> {
    let row = validate_lenient(row)?;

    if row.name().is_none() {
        return Err(RowError::Validation(
            "Missing required field: name".to_string(),
        ));
    }

    if let Some(phone) = row.phone() {
        let digits = phone.chars().filter(char::is_ascii_digit).count();
        if digits < STRICT_MIN_PHONE_DIGITS {
            return Err(RowError::Validation(format!(
                "Phone number must have at least {} digits: '{}'",
                STRICT_MIN_PHONE_DIGITS, phone
            )));
        }
    }

    Ok(row)
}

#[allow(clippy::expect_used)]
static EMAIL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$").expect("valid email pattern")
});

/// Email shape check
pub fn is_valid_email(email: &str) -> bool {
    EMAIL_PATTERN.is_match(email)
}

/// Keep only digits and `+`; an empty result is absent
pub(crate) fn clean_phone(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '+')
        .collect()
}

pub(crate) fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}
