//! Deterministic row repairs
//!
//! Heuristics run in a fixed order and each one that changes the row appends
//! a description to the row's fix log. Running them again on a repaired row
//! changes nothing.

use tracing::debug;

use crate::normalize::title_case;
use crate::row::{Field, RowView};
use crate::validate::is_valid_email;

/// Suffixes that mark where a domain ends in an email missing its `@`
pub const KNOWN_TLDS: [&str; 6] = [".com", ".io", ".co", ".net", ".org", ".biz"];

/// Area code used to pad short local phone numbers
pub const PLACEHOLDER_AREA_CODE: &str = "555";

/// Phone numbers with fewer digits are discarded
pub const MIN_PHONE_DIGITS: usize = 7;

/// Numbers with at least this many digits already carry an area code
pub const FULL_PHONE_DIGITS: usize = 10;

/// Apply every heuristic, returning how many changed the row
pub fn auto_fix(row: &mut RowView) -> usize {
    let before = row.fixes().len();

    clear_unrecoverable_email(row);
    reconstruct_email(row);
    discover_email(row);
    fix_phone(row);
    derive_name(row);

    let applied = row.fixes().len() - before;
    if applied > 0 {
        debug!(
            row_index = row.index(),
            fixes = ?&row.fixes()[before..],
            "Auto-fix applied"
        );
    }
    applied
}

fn clear_unrecoverable_email(row: &mut RowView) {
    let Some(email) = row.email().map(str::trim) else {
        return;
    };
    if !email.starts_with('@') {
        return;
    }

    let description = format!("Cleared unrecoverable email '{}'", email);
    row.set_field(Field::Email, None);
    row.record_fix(description);
}

fn reconstruct_email(row: &mut RowView) {
    let Some(email) = row.email().map(str::trim) else {
        return;
    };
    if email.contains('@') {
        return;
    }

    let Some(fixed) = insert_at_sign(email) else {
        return;
    };

    let description = format!("Reconstructed email '{}' -> '{}'", email, fixed);
    row.set_field(Field::Email, Some(fixed));
    row.record_fix(description);
}

/// `johndoe.example.com` -> `johndoe@example.com`
///
/// The `@` goes before the last dot-separated segment preceding a known TLD.
/// The TLD must end the value or be followed by another dot. A camel-cased
/// local part is split into dot-separated words.
fn insert_at_sign(email: &str) -> Option<String> {
    let mut matches: Vec<usize> = KNOWN_TLDS
        .iter()
        .flat_map(|tld| {
            email.match_indices(tld).filter_map(move |(pos, _)| {
                let rest = &email[pos + tld.len()..];
                (rest.is_empty() || rest.starts_with('.')).then_some(pos)
            })
        })
        .collect();
    matches.sort_unstable();
    matches.dedup();

    matches.into_iter().find_map(|pos| {
        let (local, domain) = email[..pos].rsplit_once('.')?;
        if local.is_empty() || domain.is_empty() {
            return None;
        }
        Some(format!("{}@{}{}", camel_split(local), domain, &email[pos..]))
    })
}

/// `JohnDoe` -> `John.Doe`
fn camel_split(local: &str) -> String {
    let mut out = String::with_capacity(local.len() + 2);
    let mut previous_lower = false;
    for c in local.chars() {
        if c.is_ascii_uppercase() && previous_lower {
            out.push('.');
        }
        previous_lower = c.is_ascii_lowercase();
        out.push(c);
    }
    out
}

fn discover_email(row: &mut RowView) {
    if row.email().is_some() {
        return;
    }
    let email_column = row.column_for(Field::Email).map(str::to_string);

    let found = row
        .columns()
        .filter(|(column, _)| Some(*column) != email_column.as_deref())
        .find_map(|(column, value)| {
            let value = value?.trim();
            is_valid_email(value).then(|| (column.to_string(), value.to_string()))
        });

    if let Some((column, email)) = found {
        let description = format!("Found email in column '{}': {}", column, email);
        row.set_field(Field::Email, Some(email));
        row.record_fix(description);
    }
}

fn fix_phone(row: &mut RowView) {
    let Some(phone) = row.phone().map(str::to_string) else {
        return;
    };

    let cleaned: String = phone
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '+')
        .collect();
    let digits = cleaned.chars().filter(char::is_ascii_digit).count();

    if digits < MIN_PHONE_DIGITS {
        row.set_field(Field::Phone, None);
        row.record_fix(format!(
            "Cleared phone '{}': fewer than {} digits",
            phone, MIN_PHONE_DIGITS
        ));
        return;
    }

    if digits < FULL_PHONE_DIGITS && !cleaned.starts_with('+') {
        let padded = format!("{}{}", PLACEHOLDER_AREA_CODE, cleaned);
        row.record_fix(format!(
            "Padded phone '{}' -> '{}' with placeholder area code (low confidence)",
            phone, padded
        ));
        row.set_field(Field::Phone, Some(padded));
        return;
    }

    if cleaned != phone {
        row.record_fix(format!("Cleaned phone '{}' -> '{}'", phone, cleaned));
        row.set_field(Field::Phone, Some(cleaned));
    }
}

fn derive_name(row: &mut RowView) {
    if row.name().is_some() {
        return;
    }
    let Some((local, _)) = row.email().and_then(|email| email.trim().split_once('@')) else {
        return;
    };

    let name = local
        .split(['.', '_', '-'])
        .filter(|segment| !segment.is_empty())
        .map(title_case)
        .collect::<Vec<_>>()
        .join(" ");

    if name.chars().count() < 2 {
        return;
    }

    let description = format!("Derived name '{}' from email", name);
    row.set_field(Field::Name, Some(name));
    row.record_fix(description);
}
