//! Listing page parser
//!
//! This module turns raw listing markup into independent sections:
//! - Main details (title, brand, rating, price, bullets, media)
//! - Reviews histogram
//! - Product information table
//! - Seller offers
//! - Variant options
//!
//! Each extractor returns `Result<Option<T>, SectionError>`. An error only
//! empties its own section; the other sections are still extracted.

mod main_details;
mod offers;
mod product_info;
mod reviews;
mod text;
mod variants;

pub use main_details::{extract_main_details, normalize_brand, MainDetails, Media, ProductImage, ProductVideo};
pub use offers::{
    extract_offers, merge_prime_offers, parse_offer_fragments, parse_offers_page, Offer,
    OffersPage,
};
pub use product_info::{extract_product_information, InfoValue, ProductInformation};
pub use reviews::{extract_reviews_histogram, ReviewsHistogram, StarBucket};
pub use text::{
    clean_text, currency_symbol, parse_count, parse_number, parse_percentage, parse_rating,
};
pub use variants::{extract_variants, VariantOption, Variants};

use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use thiserror::Error;

/// Failure while extracting one section
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SectionError {
    #[error("invalid selector '{selector}': {message}")]
    Selector { selector: String, message: String },

    #[error("malformed {section}: {message}")]
    Malformed {
        section: &'static str,
        message: String,
    },
}

/// Everything extracted from one listing page
///
/// Every field is independent; `None` means the section was absent or could
/// not be extracted.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParsedSections {
    pub main: Option<MainDetails>,
    pub reviews_histogram: Option<ReviewsHistogram>,
    pub product_information: Option<ProductInformation>,
    pub offers: Option<Vec<Offer>>,
    pub variants: Option<Variants>,
}

impl ParsedSections {
    /// Number of sections that were extracted
    pub fn present_count(&self) -> usize {
        [
            self.main.is_some(),
            self.reviews_histogram.is_some(),
            self.product_information.is_some(),
            self.offers.is_some(),
            self.variants.is_some(),
        ]
        .iter()
        .filter(|present| **present)
        .count()
    }
}

/// Parses a listing page into its sections
///
/// The document is parsed once and every extractor runs against it. The
/// output depends only on `html`.
///
/// # Arguments
///
/// * `html` - Raw listing markup
///
/// # Returns
///
/// The sections that could be extracted. Never fails.
pub fn parse_page(html: &str) -> ParsedSections {
    let document = Html::parse_document(html);

    let variants = absorb("variants", extract_variants(&document));

    let mut main = absorb("main details", extract_main_details(&document));
    if let (Some(main), Some(variants)) = (main.as_mut(), variants.as_ref()) {
        main.available_options = variants.keys().cloned().collect();
    }

    let reviews_histogram = absorb(
        "reviews histogram",
        extract_reviews_histogram(&document, main.as_ref()),
    );
    let product_information = absorb(
        "product information",
        extract_product_information(&document),
    );
    let offers = absorb("offers", extract_offers(&document));

    ParsedSections {
        main,
        reviews_histogram,
        product_information,
        offers,
        variants,
    }
}

/// Converts a section result into an optional section, logging failures
fn absorb<T>(section: &str, result: Result<Option<T>, SectionError>) -> Option<T> {
    match result {
        Ok(value) => {
            if value.is_none() {
                tracing::trace!("Section '{}' not present", section);
            }
            value
        }
        Err(e) => {
            tracing::debug!("Section '{}' skipped: {}", section, e);
            None
        }
    }
}

/// Compiles a CSS selector
pub(crate) fn selector(css: &str) -> Result<Selector, SectionError> {
    Selector::parse(css).map_err(|e| SectionError::Selector {
        selector: css.to_string(),
        message: e.to_string(),
    })
}

/// First element under `scope` matching `css`
pub(crate) fn select_first<'a>(
    scope: ElementRef<'a>,
    css: &str,
) -> Result<Option<ElementRef<'a>>, SectionError> {
    Ok(scope.select(&selector(css)?).next())
}

/// First element in the whole document matching `css`
pub(crate) fn document_first<'a>(
    document: &'a Html,
    css: &str,
) -> Result<Option<ElementRef<'a>>, SectionError> {
    Ok(document.select(&selector(css)?).next())
}
