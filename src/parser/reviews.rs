//! Reviews histogram extraction

use crate::parser::main_details::MainDetails;
use crate::parser::text::{element_text, parse_count, parse_percentage, parse_rating};
use crate::parser::{document_first, select_first, selector, SectionError};
use scraper::Html;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReviewsHistogram {
    pub average_rating: Option<f64>,
    pub total_ratings: Option<u64>,
    /// Star bucket (1-5) to its share of ratings
    pub distribution: BTreeMap<u8, StarBucket>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StarBucket {
    pub percentage: u32,
    /// Derived from the percentage and the total; absent without a total
    pub count: Option<u64>,
}

/// Extracts the reviews histogram
///
/// # Arguments
///
/// * `document` - Parsed listing page
/// * `main` - Main details, used to fill a missing average or total
///
/// # Returns
///
/// * `Ok(Some(_))` - At least one star bucket was found
/// * `Ok(None)` - The page has no histogram widget, or it has no rows
pub fn extract_reviews_histogram(
    document: &Html,
    main: Option<&MainDetails>,
) -> Result<Option<ReviewsHistogram>, SectionError> {
    let Some(container) = document_first(document, "#reviewsMedley, #cm_cr_dp_d_rating_histogram")?
    else {
        return Ok(None);
    };

    let mut histogram = ReviewsHistogram {
        average_rating: select_first(
            container,
            "span[data-hook=\"rating-out-of-text\"], span.a-icon-alt",
        )?
        .and_then(|el| parse_rating(&element_text(el))),
        total_ratings: select_first(container, "[data-hook=\"total-review-count\"]")?
            .and_then(|el| parse_count(&element_text(el))),
        distribution: BTreeMap::new(),
    };

    let rows = selector("#histogramTable tr.a-histogram-row, #histogramTable li")?;
    let mut percentages = BTreeMap::new();
    for row in container.select(&rows) {
        if let Some((stars, percentage)) = parse_row(&element_text(row)) {
            percentages.entry(stars).or_insert(percentage);
        }
    }

    if percentages.is_empty() {
        return Ok(None);
    }

    if let Some(main) = main {
        histogram.average_rating = histogram.average_rating.or(main.average_rating);
        histogram.total_ratings = histogram.total_ratings.or(main.number_of_ratings);
    }

    let total = histogram.total_ratings;
    histogram.distribution = percentages
        .into_iter()
        .map(|(stars, percentage)| {
            let count = total.map(|total| (f64::from(percentage) / 100.0 * total as f64).round() as u64);
            (stars, StarBucket { percentage, count })
        })
        .collect();

    Ok(Some(histogram))
}

/// Parses a row such as `"5 star 86%"` into `(5, 86)`
fn parse_row(text: &str) -> Option<(u8, u32)> {
    let stars = text
        .split_whitespace()
        .next()?
        .parse::<u8>()
        .ok()
        .filter(|s| (1..=5).contains(s))?;
    let percentage = parse_percentage(text)?;
    Some((stars, percentage))
}
