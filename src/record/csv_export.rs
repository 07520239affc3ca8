//! Combined CSV export
//!
//! Every record written during a run is also flattened into one CSV row:
//! - Nested objects join their keys with `_`
//! - Lists get 1-based positions (`feature_bullets_1`, `offers_data_2_price`)
//! - Missing values become empty cells
//!
//! After the run the rows are written to `all_products_{YYYYmmdd_HHMMSS}.csv`
//! next to the JSON records.

use crate::record::types::{OutputError, OutputResult, ProductRecord};
use crate::record::writer::RecordWriter;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// One flattened record: column name to cell text
pub type CsvRow = BTreeMap<String, String>;

/// Column prefixes listed first, in this order
const LEADING_COLUMNS: &[&str] = &[
    "asin",
    "timestamp",
    "product_details_main_product_details_section",
    "product_details_reviews_histogram_section",
    "product_details_product_information_section",
];

/// Column prefixes listed last
const TRAILING_COLUMNS: &[&str] = &["offers_data"];

/// Flattens a record into a single CSV row
pub fn flatten_record(record: &ProductRecord) -> OutputResult<CsvRow> {
    let value = serde_json::to_value(record).map_err(|source| OutputError::Serialize {
        identifier: record.identifier.clone(),
        source,
    })?;

    let mut row = CsvRow::new();
    flatten_value("", &value, &mut row);
    Ok(row)
}

fn flatten_value(key: &str, value: &Value, row: &mut CsvRow) {
    match value {
        Value::Object(map) => {
            for (name, nested) in map {
                flatten_value(&join_key(key, name), nested, row);
            }
        }
        Value::Array(items) if items.iter().all(Value::is_object) => {
            for (i, item) in items.iter().enumerate() {
                flatten_value(&join_key(key, &(i + 1).to_string()), item, row);
            }
        }
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                row.insert(join_key(key, &(i + 1).to_string()), cell_text(item));
            }
        }
        scalar => {
            row.insert(key.to_string(), cell_text(scalar));
        }
    }
}

fn join_key(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}_{}", parent, name)
    }
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        nested => nested.to_string(),
    }
}

/// Orders columns: identity and product details first, offers last
///
/// Columns are sorted alphabetically within each group.
pub fn sort_columns<I>(columns: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let rank = |column: &str| -> usize {
        if let Some(index) = LEADING_COLUMNS
            .iter()
            .position(|prefix| column.starts_with(prefix))
        {
            return index;
        }
        if TRAILING_COLUMNS
            .iter()
            .any(|prefix| column.starts_with(prefix))
        {
            return LEADING_COLUMNS.len() + 1;
        }
        LEADING_COLUMNS.len()
    };

    let mut sorted: Vec<String> = columns.into_iter().collect();
    sorted.sort_by(|a, b| {
        rank(a.as_str())
            .cmp(&rank(b.as_str()))
            .then_with(|| a.cmp(b))
    });
    sorted
}

/// Writes rows as one CSV file, staging it next to the target first
///
/// # Arguments
///
/// * `rows` - Flattened records; columns are the union over all rows
/// * `target` - Final CSV path
pub fn write_combined_csv(rows: &[CsvRow], target: &Path) -> OutputResult<()> {
    let columns = sort_columns(
        rows.iter()
            .flat_map(|row| row.keys().cloned())
            .collect::<BTreeSet<_>>(),
    );

    let file_name = target
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "all_products.csv".to_string());
    let staging = target.with_file_name(format!(".{}.tmp", file_name));

    let csv_error = |source: csv::Error| OutputError::Csv {
        path: staging.clone(),
        source,
    };

    let mut writer = csv::Writer::from_path(&staging).map_err(csv_error)?;
    writer.write_record(&columns).map_err(csv_error)?;
    for row in rows {
        writer
            .write_record(
                columns
                    .iter()
                    .map(|column| row.get(column).map(String::as_str).unwrap_or("")),
            )
            .map_err(csv_error)?;
    }
    writer.flush().map_err(|source| OutputError::Write {
        path: staging.clone(),
        source,
    })?;
    drop(writer);

    if let Err(source) = fs::rename(&staging, target) {
        let _ = fs::remove_file(&staging);
        return Err(OutputError::Write {
            path: target.to_path_buf(),
            source,
        });
    }

    Ok(())
}

/// Record writer that also keeps a flattened row of every stored record
///
/// Rows are only kept for records the inner writer stored successfully.
pub struct CombinedCsvWriter<W> {
    inner: W,
    rows: Mutex<Vec<CsvRow>>,
}

impl<W: RecordWriter> CombinedCsvWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            rows: Mutex::new(Vec::new()),
        }
    }

    pub fn inner(&self) -> &W {
        &self.inner
    }

    /// Number of rows collected so far
    pub fn row_count(&self) -> usize {
        self.lock().len()
    }

    /// File name of the combined CSV for an export time
    pub fn file_name(at: DateTime<Utc>) -> String {
        format!("all_products_{}.csv", at.format("%Y%m%d_%H%M%S"))
    }

    /// Writes every collected row into `directory`
    ///
    /// Rows are ordered by identifier, then capture time.
    ///
    /// # Returns
    ///
    /// * `Ok(Some(path))` - The combined CSV was written
    /// * `Ok(None)` - No record was stored during the run
    /// * `Err(OutputError)` - The file could not be written
    pub fn export(&self, directory: &Path, at: DateTime<Utc>) -> OutputResult<Option<PathBuf>> {
        let mut rows = self.lock().clone();
        if rows.is_empty() {
            tracing::info!("No records stored, skipping combined CSV");
            return Ok(None);
        }

        rows.sort_by(|a, b| {
            let key = |row: &CsvRow| (row.get("asin").cloned(), row.get("timestamp").cloned());
            key(a).cmp(&key(b))
        });

        let target = directory.join(Self::file_name(at));
        write_combined_csv(&rows, &target)?;
        tracing::info!("Wrote {} rows to {}", rows.len(), target.display());
        Ok(Some(target))
    }

    fn lock(&self) -> MutexGuard<'_, Vec<CsvRow>> {
        self.rows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<W: RecordWriter> RecordWriter for CombinedCsvWriter<W> {
    fn write(&self, record: &ProductRecord) -> OutputResult<PathBuf> {
        let path = self.inner.write(record)?;

        match flatten_record(record) {
            Ok(row) => self.lock().push(row),
            Err(e) => tracing::warn!("{}: not added to combined CSV: {}", record.identifier, e),
        }

        Ok(path)
    }
}
