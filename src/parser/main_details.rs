//! Main product details: title, brand, rating, price, bullets and media

use crate::parser::text::{
    clean_text, currency_symbol, element_text, non_empty_text, parse_count, parse_number,
    parse_rating, price_from_parts,
};
use crate::parser::{document_first, select_first, selector, SectionError};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html};
use serde::{Deserialize, Serialize};

/// Price containers, most specific first
const PRICE_CONTAINERS: &[&str] = &[
    ".priceToPay",
    "#corePrice_feature_div .a-price",
    "#corePriceDisplay_desktop_feature_div .a-price",
    ".apexPriceToPay",
    "#price_inside_buybox",
    "#priceblock_ourprice",
    "#priceblock_dealprice",
];

// Image gallery data inside the ImageBlockATF script (compiled once)
static COLOR_IMAGES_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)'colorImages':\s*\{\s*'initial':\s*(\[.*?\])\s*\}")
        .expect("Invalid image block regex pattern")
});

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MainDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_title: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_rating: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub number_of_ratings: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub feature_bullets: Vec<String>,

    /// Variant dimensions offered on the page (e.g. `size_name`)
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub available_options: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub media: Option<Media>,
}

impl MainDetails {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Media {
    pub images: Vec<ProductImage>,
    pub videos: Vec<ProductVideo>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductImage {
    pub url: String,
    pub high_res: bool,
    pub thumbnail: Option<String>,
    pub variant: Option<String>,
    pub large: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductVideo {
    pub url: String,
    pub thumbnail: Option<String>,
    pub title: Option<String>,
}

/// Image entry as embedded in the image-block script
#[derive(Debug, Deserialize)]
struct RawImage {
    #[serde(rename = "hiRes")]
    hi_res: Option<String>,
    large: Option<String>,
    thumb: Option<String>,
    variant: Option<String>,
}

/// Video state as embedded in an `a-state` script
#[derive(Debug, Deserialize)]
struct RawVideoState {
    #[serde(rename = "videoUrl")]
    video_url: Option<String>,
    #[serde(rename = "imageUrl")]
    image_url: Option<String>,
    title: Option<String>,
}

/// Extracts the main details section
///
/// Field lookups are scoped to `#centerCol` when the page has one. Media is
/// read from the whole document. Returns `Ok(None)` when no field was found.
pub fn extract_main_details(document: &Html) -> Result<Option<MainDetails>, SectionError> {
    let scope = document_first(document, "#centerCol")?.unwrap_or_else(|| document.root_element());

    let mut details = MainDetails {
        product_title: select_first(scope, "#productTitle")?.and_then(non_empty_text),
        brand: select_first(scope, "#bylineInfo")?
            .map(element_text)
            .and_then(|raw| normalize_brand(&raw)),
        average_rating: extract_rating(scope)?,
        number_of_ratings: select_first(scope, "#acrCustomerReviewText")?
            .and_then(|el| parse_count(&element_text(el))),
        ..MainDetails::default()
    };

    if let Some((price, currency)) = extract_price(scope)? {
        details.price = Some(price);
        details.currency = currency;
    }

    details.feature_bullets = scope
        .select(&selector("#feature-bullets ul li span.a-list-item")?)
        .filter_map(non_empty_text)
        .collect();

    // Media problems only cost the media field.
    match extract_media(document) {
        Ok(media) => details.media = media,
        Err(e) => tracing::debug!("Media skipped: {}", e),
    }

    Ok((!details.is_empty()).then_some(details))
}

/// Strips store-link decorations from a byline
///
/// # Examples
///
/// ```
/// use catalog_gleaner::parser::normalize_brand;
///
/// assert_eq!(normalize_brand("Visit the SanDisk Store"), Some("SanDisk".to_string()));
/// assert_eq!(normalize_brand("Brand: Anker"), Some("Anker".to_string()));
/// assert_eq!(normalize_brand("Shop LG"), Some("LG".to_string()));
/// ```
pub fn normalize_brand(raw: &str) -> Option<String> {
    let text = clean_text(raw);

    let brand = if let Some(rest) = text
        .strip_prefix("Visit the ")
        .or_else(|| text.strip_prefix("Brand: "))
    {
        rest.strip_suffix(" Store").unwrap_or(rest)
    } else if let Some(rest) = text.strip_prefix("Shop ") {
        rest
    } else {
        text.as_str()
    };

    let brand = brand.trim();
    (!brand.is_empty()).then(|| brand.to_string())
}

fn extract_rating(scope: ElementRef<'_>) -> Result<Option<f64>, SectionError> {
    if let Some(popover) = select_first(scope, "#acrPopover")? {
        if let Some(rating) = popover.value().attr("title").and_then(parse_rating) {
            return Ok(Some(rating));
        }
        if let Some(alt) = select_first(popover, "span.a-icon-alt")? {
            return Ok(parse_rating(&element_text(alt)));
        }
    }
    Ok(None)
}

/// Finds the buying price and its currency marker
fn extract_price(scope: ElementRef<'_>) -> Result<Option<(f64, Option<String>)>, SectionError> {
    for css in PRICE_CONTAINERS {
        let Some(container) = select_first(scope, css)? else {
            continue;
        };

        let symbol = select_first(container, ".a-price-symbol")?.and_then(non_empty_text);

        if let Some(whole) = select_first(container, ".a-price-whole")? {
            let fraction = select_first(container, ".a-price-fraction")?.map(element_text);
            if let Some(price) = price_from_parts(&element_text(whole), fraction.as_deref()) {
                return Ok(Some((price, symbol)));
            }
        }

        let text = match select_first(container, ".a-offscreen")? {
            Some(offscreen) => element_text(offscreen),
            None => element_text(container),
        };
        if let Some(price) = parse_number(&text) {
            return Ok(Some((price, symbol.or_else(|| currency_symbol(&text)))));
        }
    }

    Ok(None)
}

/// Reads images from the image-block script and videos from video cards
fn extract_media(document: &Html) -> Result<Option<Media>, SectionError> {
    let media = Media {
        images: extract_images(document)?,
        videos: extract_videos(document)?,
    };

    if media.images.is_empty() && media.videos.is_empty() {
        return Ok(None);
    }
    Ok(Some(media))
}

fn extract_images(document: &Html) -> Result<Vec<ProductImage>, SectionError> {
    let script = document
        .select(&selector("script")?)
        .map(|s| s.text().collect::<String>())
        .find(|text| text.contains("ImageBlockATF"));
    let Some(script) = script else {
        return Ok(Vec::new());
    };

    let Some(initial) = COLOR_IMAGES_PATTERN.captures(&script).and_then(|c| c.get(1)) else {
        return Ok(Vec::new());
    };

    let raw: Vec<RawImage> = serde_json::from_str(&relax_script_json(initial.as_str()))
        .map_err(|e| SectionError::Malformed {
            section: "media",
            message: format!("image data: {}", e),
        })?;

    Ok(raw
        .into_iter()
        .filter_map(|img| {
            let url = img.hi_res.clone().or_else(|| img.large.clone())?;
            Some(ProductImage {
                url,
                high_res: img.hi_res.is_some(),
                thumbnail: img.thumb,
                variant: img.variant,
                large: img.large,
            })
        })
        .collect())
}

/// Turns the script's object literal into JSON: single quotes and trailing commas
fn relax_script_json(raw: &str) -> String {
    let quoted = raw.replace('\'', "\"");
    let mut out = String::with_capacity(quoted.len());
    let mut chars = quoted.chars().peekable();

    while let Some(c) = chars.next() {
        if c == ',' {
            let mut lookahead = chars.clone();
            while lookahead.peek().is_some_and(|n| n.is_whitespace()) {
                lookahead.next();
            }
            if matches!(lookahead.peek(), Some(']') | Some('}')) {
                continue;
            }
        }
        out.push(c);
    }
    out
}

fn extract_videos(document: &Html) -> Result<Vec<ProductVideo>, SectionError> {
    let cards = selector("div.vdp-video-card, div.vse-player-container")?;
    let video_src = selector("video[src]")?;
    let data_url = selector("[data-video-url]")?;
    let poster = selector("video[poster]")?;
    let image = selector("img[src]")?;
    let data_thumb = selector("[data-thumbnail-url]")?;
    let title = selector("div.title, span.title, [class*=\"title\"]")?;
    let state = selector("script[type=\"a-state\"]")?;

    let mut videos = Vec::new();
    for card in document.select(&cards) {
        let attr_of = |sel: &scraper::Selector, name: &str| {
            card.select(sel)
                .next()
                .and_then(|el| el.value().attr(name))
                .map(str::to_string)
        };

        let mut url = attr_of(&video_src, "src").or_else(|| {
            card.value()
                .attr("data-video-url")
                .map(str::to_string)
                .or_else(|| attr_of(&data_url, "data-video-url"))
        });
        let mut thumbnail = attr_of(&poster, "poster")
            .or_else(|| attr_of(&image, "src"))
            .or_else(|| attr_of(&data_thumb, "data-thumbnail-url"));
        let mut video_title = card.select(&title).find_map(non_empty_text);

        if url.is_none() {
            let parsed = card
                .select(&state)
                .map(|s| s.text().collect::<String>())
                .find_map(|json| serde_json::from_str::<RawVideoState>(&json).ok());
            if let Some(state) = parsed {
                url = state.video_url;
                thumbnail = state.image_url.or(thumbnail);
                video_title = state.title.map(|t| clean_text(&t)).or(video_title);
            }
        }

        if let Some(url) = url.filter(|u| !u.is_empty()) {
            videos.push(ProductVideo {
                url,
                thumbnail,
                title: video_title,
            });
        }
    }

    Ok(videos)
}
