//! Product information table extraction
//!
//! Merges the technical-details table, the additional-information table and
//! the detail-bullet list into one attribute map. Tables are read in that
//! order and later rows overwrite earlier ones; detail bullets only fill
//! attributes the tables did not have.

use crate::parser::text::{clean_text, element_text, non_empty_text, parse_count, parse_rating};
use crate::parser::{document_first, select_first, selector, SectionError};
use scraper::{ElementRef, Html};
use serde::Serialize;
use std::collections::BTreeMap;

const DETAIL_TABLES: &[&str] = &[
    "#productDetails_techSpec_section_1",
    "#productDetails_detailBullets_sections1",
];

/// Attribute name to value
pub type ProductInformation = BTreeMap<String, InfoValue>;

/// One attribute value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum InfoValue {
    Text(String),
    Ratings { rating: f64, count: u64 },
    Ranks(Vec<String>),
    Link { text: String, link: String },
}

/// Extracts the product information section
///
/// Returns `Ok(None)` when no attribute was found.
pub fn extract_product_information(
    document: &Html,
) -> Result<Option<ProductInformation>, SectionError> {
    let mut info = ProductInformation::new();

    let rows = selector("tr")?;
    let header = selector("th")?;
    let cell = selector("td")?;

    for table_id in DETAIL_TABLES {
        let Some(table) = document_first(document, table_id)? else {
            continue;
        };

        for row in table.select(&rows) {
            let (Some(th), Some(td)) = (row.select(&header).next(), row.select(&cell).next())
            else {
                continue;
            };

            let key = element_text(th);
            if key.is_empty() {
                continue;
            }
            if let Some(value) = table_value(&key, td)? {
                info.insert(key, value);
            }
        }
    }

    extract_detail_bullets(document, &mut info)?;

    if let Some(warranty) = document_first(document, "#warranty_feature_div div.a-section")? {
        let text = element_text(warranty);
        if !text.is_empty() {
            let link = select_first(warranty, "a[href]")?
                .and_then(|a| a.value().attr("href"))
                .map(str::to_string);
            let value = match link {
                Some(link) => InfoValue::Link { text, link },
                None => InfoValue::Text(text),
            };
            info.entry("warranty_information".to_string())
                .or_insert(value);
        }
    }

    if let Some(important) = document_first(document, "#important-information")? {
        let content = selector("div.a-section.content")?;
        let text = clean_text(
            &important
                .select(&content)
                .map(element_text)
                .collect::<Vec<_>>()
                .join(" "),
        );
        if !text.is_empty() {
            info.entry("important_information".to_string())
                .or_insert(InfoValue::Text(text));
        }
    }

    Ok((!info.is_empty()).then_some(info))
}

/// Interprets one table cell, special-casing ratings and sales ranks
fn table_value(key: &str, td: ElementRef<'_>) -> Result<Option<InfoValue>, SectionError> {
    match key {
        "Customer Reviews" => {
            let rating = select_first(td, "span.a-icon-alt")?
                .and_then(|el| parse_rating(&element_text(el)));
            let count = select_first(td, "#acrCustomerReviewText")?
                .and_then(|el| parse_count(&element_text(el)));
            if let (Some(rating), Some(count)) = (rating, count) {
                return Ok(Some(InfoValue::Ratings { rating, count }));
            }
        }
        "Best Sellers Rank" => {
            let ranks = sales_ranks(td)?;
            if !ranks.is_empty() {
                return Ok(Some(InfoValue::Ranks(ranks)));
            }
        }
        _ => {}
    }

    Ok(non_empty_text(td).map(InfoValue::Text))
}

/// Splits a sales-rank cell into one entry per `#N in Category`
fn sales_ranks(td: ElementRef<'_>) -> Result<Vec<String>, SectionError> {
    let pieces: Vec<String> = td
        .select(&selector("span > span, li")?)
        .filter_map(non_empty_text)
        .collect();

    let mut ranks = Vec::new();
    let mut current = String::new();
    for piece in pieces {
        if piece.starts_with('#') {
            if !current.is_empty() {
                ranks.push(std::mem::take(&mut current));
            }
            current = piece;
        } else if !current.is_empty() {
            current.push(' ');
            current.push_str(&piece);
        }
    }
    if !current.is_empty() {
        ranks.push(current);
    }

    if ranks.is_empty() {
        // Plain text cell: "#1 in Electronics (See Top 100) #2 in Memory Cards"
        let text = element_text(td);
        ranks = text
            .split('#')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| format!("#{}", s))
            .collect();
    }

    Ok(ranks.into_iter().map(|r| clean_text(&r)).collect())
}

/// Reads `Key : Value` pairs from the detail-bullet list
fn extract_detail_bullets(
    document: &Html,
    info: &mut ProductInformation,
) -> Result<(), SectionError> {
    let Some(list) = document_first(document, "#detailBullets_feature_div")? else {
        return Ok(());
    };

    let items = selector("li span.a-list-item")?;
    let bold = selector("span.a-text-bold")?;

    for item in list.select(&items) {
        let Some(label) = item.select(&bold).next() else {
            continue;
        };
        let key = element_text(label)
            .trim_end_matches(|c: char| c == ':' || c.is_whitespace())
            .to_string();
        let full = element_text(item);
        let value = full
            .strip_prefix(element_text(label).as_str())
            .unwrap_or(&full)
            .trim()
            .to_string();

        if !key.is_empty() && !value.is_empty() {
            info.entry(key).or_insert(InfoValue::Text(value));
        }
    }

    Ok(())
}
