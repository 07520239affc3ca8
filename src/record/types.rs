//! Record types and output errors

use crate::parser::{MainDetails, Offer, ProductInformation, ReviewsHistogram, Variants};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while persisting a record
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("Failed to create output directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to serialize record for {identifier}: {source}")]
    Serialize {
        identifier: String,
        source: serde_json::Error,
    },

    #[error("Failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write CSV {}: {source}", path.display())]
    Csv {
        path: PathBuf,
        source: csv::Error,
    },
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;

/// Final record for one identifier
///
/// Sections that could not be extracted serialize as `null`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductRecord {
    #[serde(rename = "asin")]
    pub identifier: String,

    /// Capture time, serialized as epoch seconds
    #[serde(rename = "timestamp", with = "chrono::serde::ts_seconds")]
    pub captured_at: DateTime<Utc>,

    pub product_details: ProductDetails,

    pub offers_data: Option<Vec<Offer>>,

    pub variants: Option<Variants>,
}

/// Sections describing the listing itself
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProductDetails {
    pub main_product_details_section: Option<MainDetails>,
    pub reviews_histogram_section: Option<ReviewsHistogram>,
    pub product_information_section: Option<ProductInformation>,
}

impl ProductRecord {
    /// Number of sections carrying data
    pub fn section_count(&self) -> usize {
        [
            self.product_details.main_product_details_section.is_some(),
            self.product_details.reviews_histogram_section.is_some(),
            self.product_details.product_information_section.is_some(),
            self.offers_data.is_some(),
            self.variants.is_some(),
        ]
        .into_iter()
        .filter(|present| *present)
        .count()
    }
}
