//! Identifier input handling
//!
//! Identifiers are opaque listing keys (ASINs on the default site). This module
//! normalizes them, reads them from text or CSV files, and removes duplicates
//! while keeping first-seen order.

use crate::InputError;
use std::collections::HashSet;
use std::path::Path;

/// Column holding identifiers in CSV input
const CSV_COLUMN: &str = "asin";

/// Normalizes a raw identifier
///
/// Surrounding whitespace and a UTF-8 byte order mark are removed. Returns
/// `None` for blank input or input containing anything other than ASCII
/// letters and digits.
///
/// # Examples
///
/// ```
/// use catalog_gleaner::identifier::normalize_identifier;
///
/// assert_eq!(normalize_identifier("  B09X7CRKRZ \n"), Some("B09X7CRKRZ".to_string()));
/// assert_eq!(normalize_identifier("B09X 7CRKRZ"), None);
/// assert_eq!(normalize_identifier(""), None);
/// ```
pub fn normalize_identifier(raw: &str) -> Option<String> {
    let trimmed = raw.trim_start_matches('\u{feff}').trim();

    if trimmed.is_empty() || !trimmed.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }

    Some(trimmed.to_string())
}

/// Removes duplicate identifiers, keeping the first occurrence of each
pub fn dedupe_identifiers<I, S>(identifiers: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut seen = HashSet::new();
    let mut unique = Vec::new();

    for id in identifiers {
        let id = id.into();
        if seen.insert(id.clone()) {
            unique.push(id);
        }
    }

    unique
}

/// Reads identifiers from a file
///
/// Files ending in `.csv` must have a header row with an `asin` column; any
/// other file is read as one identifier per line. Invalid entries are skipped
/// with a warning.
pub fn load_identifiers(path: &Path) -> Result<Vec<String>, InputError> {
    let content = std::fs::read_to_string(path).map_err(|source| InputError::Read {
        path: path.display().to_string(),
        source,
    })?;

    let is_csv = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("csv"))
        .unwrap_or(false);

    let raw = if is_csv {
        csv_column(&content, path)?
    } else {
        content.lines().map(str::to_string).collect()
    };

    let identifiers = collect_valid(raw);
    tracing::info!(
        "Loaded {} identifiers from {}",
        identifiers.len(),
        path.display()
    );
    Ok(identifiers)
}

/// Normalizes a list of raw identifiers, warning about rejected entries
pub fn collect_valid<I, S>(raw: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    raw.into_iter()
        .filter_map(|entry| {
            let entry = entry.as_ref();
            if entry.trim().is_empty() {
                return None;
            }
            let normalized = normalize_identifier(entry);
            if normalized.is_none() {
                tracing::warn!("Skipping invalid identifier: {:?}", entry.trim());
            }
            normalized
        })
        .collect()
}

/// Extracts the identifier column from CSV content
///
/// Quoted fields may contain commas, quotes and line breaks. Rows shorter
/// than the header are skipped.
fn csv_column(content: &str, path: &Path) -> Result<Vec<String>, InputError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let index = reader
        .headers()?
        .iter()
        .position(|field| field.trim_start_matches('\u{feff}').eq_ignore_ascii_case(CSV_COLUMN))
        .ok_or_else(|| InputError::MissingColumn(path.display().to_string()))?;

    let mut values = Vec::new();
    for record in reader.records() {
        if let Some(value) = record?.get(index) {
            values.push(value.to_string());
        }
    }

    Ok(values)
}
