//! Record assembly

use crate::parser::ParsedSections;
use crate::record::types::{ProductDetails, ProductRecord};
use chrono::{DateTime, Utc};

/// Combines parsed sections with identifier and capture time
///
/// # Arguments
///
/// * `identifier` - Identifier the page was fetched for
/// * `captured_at` - When the page was captured
/// * `sections` - Whatever the parser extracted, possibly nothing
///
/// # Returns
///
/// The assembled record. Never fails.
pub fn assemble_record(
    identifier: &str,
    captured_at: DateTime<Utc>,
    sections: ParsedSections,
) -> ProductRecord {
    let ParsedSections {
        main,
        reviews_histogram,
        product_information,
        offers,
        variants,
    } = sections;

    ProductRecord {
        identifier: identifier.to_string(),
        captured_at,
        product_details: ProductDetails {
            main_product_details_section: main,
            reviews_histogram_section: reviews_histogram,
            product_information_section: product_information,
        },
        offers_data: offers,
        variants,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{parse_page, MainDetails};
    use chrono::TimeZone;

    fn captured() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, 9, 8, 53, 20).unwrap()
    }

    #[test]
    fn test_empty_sections_still_assemble() {
        let record = assemble_record("B000EMPTY1", captured(), ParsedSections::default());
        assert_eq!(record.section_count(), 0);

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["asin"], "B000EMPTY1");
        assert_eq!(json["timestamp"], 1760000000);
        assert!(json["offers_data"].is_null());
        assert!(json["variants"].is_null());
        assert!(json["product_details"]["reviews_histogram_section"].is_null());
    }

    #[test]
    fn test_sections_are_placed() {
        let sections = ParsedSections {
            main: Some(MainDetails {
                product_title: Some("SanDisk Extreme".to_string()),
                price: Some(23.99),
                ..MainDetails::default()
            }),
            ..ParsedSections::default()
        };

        let record = assemble_record("B09X7CRKRZ", captured(), sections);
        let json = serde_json::to_value(&record).unwrap();
        let main = &json["product_details"]["main_product_details_section"];
        assert_eq!(main["product_title"], "SanDisk Extreme");
        assert_eq!(main["price"], 23.99);
        assert!(main.get("brand").is_none());
    }

    #[test]
    fn test_assembly_is_deterministic() {
        let html = r#"<div id="centerCol"><span id="productTitle">Card</span></div>"#;
        let first = serde_json::to_string(&assemble_record("B1", captured(), parse_page(html)));
        let second = serde_json::to_string(&assemble_record("B1", captured(), parse_page(html)));
        assert_eq!(first.unwrap(), second.unwrap());
    }
}
