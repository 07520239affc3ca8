//! Record assembly and output
//!
//! This module handles the last stage of each pipeline:
//! - Assembling parsed sections into a [`ProductRecord`]
//! - Persisting records through a [`RecordWriter`]
//! - Collecting a combined CSV of every stored record
//! - Summarizing how a run went

mod assembler;
mod csv_export;
mod stats;
mod types;
mod writer;

pub use assembler::assemble_record;
pub use csv_export::{flatten_record, sort_columns, write_combined_csv, CombinedCsvWriter, CsvRow};
pub use stats::{print_summary, RunSummary};
pub use types::{OutputError, OutputResult, ProductDetails, ProductRecord};
pub use writer::{JsonFileWriter, RecordWriter};
