//! Variant options extraction
//!
//! Two twister templates are recognised, `variation_<dimension>` blocks and
//! `inline-twister-row-<dimension>` rows. When both describe the same
//! dimension the first one in document order wins.

use crate::parser::text::{clean_text, element_text, non_empty_text, parse_number};
use crate::parser::{select_first, selector, SectionError};
use scraper::{ElementRef, Html};
use serde::Serialize;
use std::collections::BTreeMap;

const DIMENSION_PREFIXES: &[&str] = &["variation_", "inline-twister-row-"];

/// Dimension name (e.g. `size_name`) to its options in page order
pub type Variants = BTreeMap<String, Vec<VariantOption>>;

/// One selectable value of a dimension
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariantOption {
    pub value: String,
    /// Identifier of the listing this option leads to
    pub asin: Option<String>,
    pub price: Option<f64>,
    pub availability: Option<String>,
    pub selected: bool,
}

/// Extracts the variant dimensions of a listing
///
/// Returns `Ok(None)` when the page has no dimension with at least one option.
pub fn extract_variants(document: &Html) -> Result<Option<Variants>, SectionError> {
    let containers = selector("div[id^=\"variation_\"], div[id^=\"inline-twister-row-\"]")?;
    let items = selector("li")?;

    let mut variants = Variants::new();
    for container in document.select(&containers) {
        let Some(dimension) = container.value().id().and_then(dimension_name) else {
            continue;
        };
        if variants.contains_key(&dimension) {
            continue;
        }

        let mut options = Vec::new();
        for item in container.select(&items) {
            if let Some(option) = parse_option(item)? {
                options.push(option);
            }
        }

        if !options.is_empty() {
            variants.insert(dimension, options);
        }
    }

    Ok((!variants.is_empty()).then_some(variants))
}

/// Strips the template prefix from a container id
fn dimension_name(id: &str) -> Option<String> {
    DIMENSION_PREFIXES
        .iter()
        .find_map(|prefix| id.strip_prefix(prefix))
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

/// Reads one option; items without a visible value are skipped
fn parse_option(item: ElementRef<'_>) -> Result<Option<VariantOption>, SectionError> {
    let value = match select_first(item, "span.a-size-base, span.swatch-title-text")?
        .and_then(non_empty_text)
    {
        Some(value) => Some(value),
        None => select_first(item, "img[alt]")?
            .and_then(|img| img.value().attr("alt"))
            .map(clean_text)
            .filter(|alt| !alt.is_empty()),
    };
    let Some(value) = value else {
        return Ok(None);
    };

    let asin = ["data-asin", "data-defaultasin"]
        .iter()
        .filter_map(|attr| item.value().attr(attr))
        .map(str::trim)
        .find(|asin| !asin.is_empty())
        .map(str::to_string);

    let price = match select_first(item, ".a-price span[aria-hidden=\"true\"]")? {
        Some(el) => parse_number(&element_text(el)),
        None => select_first(item, ".a-price .a-offscreen")?
            .and_then(|el| parse_number(&element_text(el))),
    };

    let availability = select_first(item, "span[id*=\"availability\"]")?.and_then(non_empty_text);

    let selected = item
        .value()
        .classes()
        .any(|class| class.contains("selected") || class == "swatchSelect")
        || select_first(item, ".a-button-selected")?.is_some();

    Ok(Some(VariantOption {
        value,
        asin,
        price,
        availability,
        selected,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWISTER: &str = r#"
    <div id="twister_feature_div">
      <div id="variation_size_name"><ul>
        <li data-asin="B09X7BK27V" class="swatch-list-item">
          <span class="a-button"><span class="a-size-base">128GB</span>
          <span class="a-price"><span aria-hidden="true">$14.99</span></span></span>
        </li>
        <li data-asin="B09X7CRKRZ" class="swatch-list-item swatchSelect">
          <span class="a-button a-button-selected"><span class="a-size-base">256GB</span></span>
          <span id="size_name_1_availability">Only 3 left in stock.</span>
        </li>
        <li class="swatch-list-item"><span class="a-size-base"> </span></li>
      </ul></div>
      <div id="inline-twister-row-color_name"><ul>
        <li data-defaultasin="B0COLOR01"><img alt="Red" src="red.jpg"></li>
      </ul></div>
      <div id="inline-twister-row-size_name"><ul>
        <li data-asin="B0DUPLICATE"><span class="a-size-base">1TB</span></li>
      </ul></div>
    </div>"#;

    #[test]
    fn test_extract_variants() {
        let doc = Html::parse_document(TWISTER);
        let variants = extract_variants(&doc).unwrap().unwrap();

        assert_eq!(
            variants.keys().collect::<Vec<_>>(),
            vec!["color_name", "size_name"]
        );

        let sizes = &variants["size_name"];
        assert_eq!(sizes.len(), 2);
        assert_eq!(
            sizes[0],
            VariantOption {
                value: "128GB".to_string(),
                asin: Some("B09X7BK27V".to_string()),
                price: Some(14.99),
                availability: None,
                selected: false,
            }
        );
        assert!(sizes[1].selected);
        assert_eq!(sizes[1].availability.as_deref(), Some("Only 3 left in stock."));

        let colors = &variants["color_name"];
        assert_eq!(colors[0].value, "Red");
        assert_eq!(colors[0].asin.as_deref(), Some("B0COLOR01"));
    }

    #[test]
    fn test_null_fields_are_serialized() {
        let doc = Html::parse_document(TWISTER);
        let variants = extract_variants(&doc).unwrap().unwrap();
        let json = serde_json::to_value(&variants).unwrap();

        assert!(json["size_name"][0]["availability"].is_null());
        assert!(json["color_name"][0]["price"].is_null());
    }

    #[test]
    fn test_dimension_name() {
        assert_eq!(dimension_name("variation_style_name"), Some("style_name".to_string()));
        assert_eq!(dimension_name("inline-twister-row-color_name"), Some("color_name".to_string()));
        assert_eq!(dimension_name("variation_"), None);
    }

    #[test]
    fn test_no_variants() {
        let doc = Html::parse_document("<div id=\"variation_size_name\"><ul></ul></div>");
        assert!(extract_variants(&doc).unwrap().is_none());
    }
}
