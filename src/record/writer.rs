//! Record persistence
//!
//! [`RecordWriter`] is the seam between the pipeline and storage. The bundled
//! [`JsonFileWriter`] stores one pretty-printed JSON document per record.

use crate::record::types::{OutputError, OutputResult, ProductRecord};
use std::fs;
use std::path::{Path, PathBuf};

/// Destination for assembled records
pub trait RecordWriter: Send + Sync {
    /// Persists one record
    ///
    /// # Returns
    ///
    /// * `Ok(PathBuf)` - Where the record was stored
    /// * `Err(OutputError)` - The record was not stored
    fn write(&self, record: &ProductRecord) -> OutputResult<PathBuf>;
}

/// Writes `product_{identifier}_{YYYYmmdd_HHMMSS}.json` files into a directory
#[derive(Debug, Clone)]
pub struct JsonFileWriter {
    directory: PathBuf,
}

impl JsonFileWriter {
    /// Creates the writer, creating `directory` if needed
    pub fn new(directory: impl Into<PathBuf>) -> OutputResult<Self> {
        let directory = directory.into();
        fs::create_dir_all(&directory).map_err(|source| OutputError::CreateDir {
            path: directory.clone(),
            source,
        })?;

        Ok(Self { directory })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// File name for a record, derived from identifier and capture time only
    pub fn file_name(record: &ProductRecord) -> String {
        format!(
            "product_{}_{}.json",
            record.identifier,
            record.captured_at.format("%Y%m%d_%H%M%S")
        )
    }
}

impl RecordWriter for JsonFileWriter {
    fn write(&self, record: &ProductRecord) -> OutputResult<PathBuf> {
        let json =
            serde_json::to_string_pretty(record).map_err(|source| OutputError::Serialize {
                identifier: record.identifier.clone(),
                source,
            })?;

        let file_name = Self::file_name(record);
        let target = self.directory.join(&file_name);
        let staging = self.directory.join(format!(".{}.tmp", file_name));

        fs::write(&staging, json.as_bytes()).map_err(|source| OutputError::Write {
            path: staging.clone(),
            source,
        })?;

        if let Err(source) = fs::rename(&staging, &target) {
            let _ = fs::remove_file(&staging);
            return Err(OutputError::Write {
                path: target,
                source,
            });
        }

        tracing::debug!("Wrote {}", target.display());
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ParsedSections;
    use crate::record::assemble_record;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn record(identifier: &str) -> ProductRecord {
        let captured_at = Utc.with_ymd_and_hms(2025, 3, 4, 5, 6, 7).unwrap();
        assemble_record(identifier, captured_at, ParsedSections::default())
    }

    #[test]
    fn test_file_name() {
        assert_eq!(
            JsonFileWriter::file_name(&record("B09X7CRKRZ")),
            "product_B09X7CRKRZ_20250304_050607.json"
        );
    }

    #[test]
    fn test_write_creates_file() {
        let temp_dir = TempDir::new().unwrap();
        let writer = JsonFileWriter::new(temp_dir.path().join("nested/output")).unwrap();

        let path = writer.write(&record("B09X7CRKRZ")).unwrap();
        assert!(path.exists());

        let content = fs::read_to_string(&path).unwrap();
        let json: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(json["asin"], "B09X7CRKRZ");

        // Only the final file remains
        let entries: Vec<_> = fs::read_dir(writer.directory()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_rewrite_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let writer = JsonFileWriter::new(temp_dir.path()).unwrap();

        let first = writer.write(&record("B1")).unwrap();
        let second = writer.write(&record("B1")).unwrap();
        assert_eq!(first, second);
        assert_eq!(fs::read_dir(temp_dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_write_failure_is_reported() {
        let temp_dir = TempDir::new().unwrap();
        let writer = JsonFileWriter::new(temp_dir.path()).unwrap();
        fs::remove_dir_all(temp_dir.path()).unwrap();

        let result = writer.write(&record("B1"));
        assert!(matches!(result, Err(OutputError::Write { .. })));
    }
}
