//! Seller offers extraction
//!
//! Offers come either inline on the listing page or from the all-offers
//! fragment. Both share the same markup:
//! - `#aod-pinned-offer` holds the buy-box winner
//! - every `#aod-offer` holds one further seller offer
//!
//! The Prime-only fragment is only used to flag which sellers ship with Prime.

use crate::parser::text::{element_text, non_empty_text, parse_number, price_from_parts};
use crate::parser::{document_first, select_first, selector, SectionError};
use scraper::{ElementRef, Html};
use serde::Serialize;
use std::collections::HashSet;
use url::Url;

/// Origin used to resolve relative storefront links; only the query is read
const LINK_BASE: &str = "https://localhost/";

/// One seller offer
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Offer {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seller_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seller_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shipping_cost: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_estimate: Option<String>,
    pub prime: bool,
    pub buy_box_winner: bool,
}

impl Offer {
    /// Key used to match the same seller across fragments
    fn seller_key(&self) -> Option<&str> {
        self.seller_id.as_deref().or(self.seller_name.as_deref())
    }
}

/// Offers read from one offers fragment
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OffersPage {
    pub offers: Vec<Offer>,
    /// Whether the fragment offers a Prime-only filter
    pub has_prime_filter: bool,
}

/// Parses an offers fragment
///
/// Never fails; a fragment without offers yields an empty list.
pub fn parse_offers_page(html: &str) -> OffersPage {
    let document = Html::parse_document(html);

    let offers = match extract_offers(&document) {
        Ok(offers) => offers.unwrap_or_default(),
        Err(e) => {
            tracing::debug!("Offers fragment skipped: {}", e);
            Vec::new()
        }
    };
    let has_prime_filter = document_first(&document, "#aod-filter-list i.a-icon-prime")
        .map(|el| el.is_some())
        .unwrap_or(false);

    OffersPage {
        offers,
        has_prime_filter,
    }
}

/// Extracts the offers present in a document, pinned offer first
///
/// Returns `Ok(None)` when the document has no offer blocks.
pub fn extract_offers(document: &Html) -> Result<Option<Vec<Offer>>, SectionError> {
    let mut offers = Vec::new();

    for pinned in document.select(&selector("#aod-pinned-offer")?) {
        offers.push(parse_offer(pinned, true)?);
    }
    for offer in document.select(&selector("#aod-offer")?) {
        offers.push(parse_offer(offer, false)?);
    }

    Ok((!offers.is_empty()).then_some(offers))
}

/// Flags offers whose seller also appears in the Prime-only list
///
/// # Arguments
///
/// * `all` - Offers from the all-offers fragment
/// * `prime` - Offers from the Prime-only fragment
///
/// # Returns
///
/// `all` in its original order, with `prime` set where the seller matched.
pub fn merge_prime_offers(mut all: Vec<Offer>, prime: &[Offer]) -> Vec<Offer> {
    let prime_sellers: HashSet<&str> = prime.iter().filter_map(Offer::seller_key).collect();

    for offer in &mut all {
        if offer
            .seller_key()
            .is_some_and(|key| prime_sellers.contains(key))
        {
            offer.prime = true;
        }
    }

    all
}

/// Builds the offers section from the fetched fragments
///
/// Returns `None` when the all-offers fragment lists no offers.
pub fn parse_offer_fragments(all_html: &str, prime_html: Option<&str>) -> Option<Vec<Offer>> {
    let all = parse_offers_page(all_html);
    if all.offers.is_empty() {
        return None;
    }

    let offers = match prime_html {
        Some(prime_html) => merge_prime_offers(all.offers, &parse_offers_page(prime_html).offers),
        None => all.offers,
    };
    Some(offers)
}

/// Reads one offer block
fn parse_offer(block: ElementRef<'_>, buy_box_winner: bool) -> Result<Offer, SectionError> {
    let mut offer = Offer {
        buy_box_winner,
        prime: select_first(block, "i.a-icon-prime")?.is_some(),
        ..Offer::default()
    };

    if let Some(price) = select_first(block, "span.a-price")? {
        let whole = select_first(price, "span.a-price-whole")?.map(element_text);
        let fraction = select_first(price, "span.a-price-fraction")?.map(element_text);
        offer.price = match whole {
            Some(whole) => price_from_parts(&whole, fraction.as_deref()),
            None => select_first(price, "span.a-offscreen")?
                .and_then(|el| parse_number(&element_text(el))),
        };
    }

    offer.condition = select_first(block, "#aod-offer-heading")?.and_then(non_empty_text);

    if let Some(promise) = select_first(block, "div.aod-delivery-promise")? {
        let delivery = match select_first(
            promise,
            "span[data-csa-c-content-id=\"DEXUnifiedCXSDM\"]",
        )? {
            Some(fastest) => Some(fastest),
            None => select_first(promise, "span[data-csa-c-content-id=\"DEXUnifiedCXPDM\"]")?,
        };

        if let Some(delivery) = delivery {
            // "FREE" and unparsable charges count as free shipping
            offer.shipping_cost = delivery
                .value()
                .attr("data-csa-c-delivery-price")
                .map(|charge| parse_number(charge).unwrap_or(0.0));
            offer.delivery_estimate =
                select_first(delivery, "span.a-text-bold")?.and_then(non_empty_text);
        }
    }

    offer.total_price = offer
        .price
        .map(|price| round_cents(price + offer.shipping_cost.unwrap_or(0.0)));

    if let Some(sold_by) = select_first(block, "#aod-offer-soldBy")? {
        let seller = match select_first(sold_by, "a.a-size-small.a-link-normal")? {
            Some(link) => Some(link),
            None => select_first(sold_by, "span.a-size-small.a-color-base")?,
        };

        if let Some(seller) = seller {
            offer.seller_name = non_empty_text(seller);
            offer.seller_id = seller.value().attr("href").and_then(seller_id_from_href);
        }
    }

    Ok(offer)
}

/// Reads the `seller` query parameter from a storefront link
fn seller_id_from_href(href: &str) -> Option<String> {
    let base = Url::parse(LINK_BASE).ok()?;
    let link = base.join(href).ok()?;
    link.query_pairs()
        .find(|(key, _)| key == "seller")
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
