//! Text and number helpers shared by the section extractors
//!
//! Listing pages mix invisible direction marks into labels and format numbers
//! by locale, so every extracted string passes through [`clean_text`] and every
//! number through [`parse_number`].

use scraper::ElementRef;

/// Removes control and format characters, then collapses whitespace
///
/// # Examples
///
/// ```
/// use catalog_gleaner::parser::clean_text;
///
/// assert_eq!(clean_text("\u{200e} Manufacturer \u{200f}:\n  SanDisk "), "Manufacturer : SanDisk");
/// ```
pub fn clean_text(raw: &str) -> String {
    let filtered: String = raw
        .chars()
        .filter(|c| c.is_whitespace() || !(c.is_control() || is_format_char(*c)))
        .collect();

    filtered.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Unicode format characters that show up in listing markup
fn is_format_char(c: char) -> bool {
    matches!(
        c,
        '\u{00AD}'
            | '\u{061C}'
            | '\u{180E}'
            | '\u{200B}'..='\u{200F}'
            | '\u{202A}'..='\u{202E}'
            | '\u{2060}'..='\u{2064}'
            | '\u{2066}'..='\u{206F}'
            | '\u{FEFF}'
            | '\u{FFF9}'..='\u{FFFB}'
    )
}

/// Cleaned text content of an element and its descendants
pub fn element_text(element: ElementRef<'_>) -> String {
    clean_text(&element.text().collect::<String>())
}

/// Cleaned text of an element, or `None` when it is empty
pub fn non_empty_text(element: ElementRef<'_>) -> Option<String> {
    let text = element_text(element);
    (!text.is_empty()).then_some(text)
}

/// Parses a locale-formatted number
///
/// Currency symbols, letters and spaces are ignored. When both `,` and `.`
/// appear, the right-most one is the decimal separator. A lone `,` followed by
/// exactly two digits is a decimal separator; otherwise `,` groups thousands.
/// Several `.` without any `,` group thousands too.
///
/// # Examples
///
/// ```
/// use catalog_gleaner::parser::parse_number;
///
/// assert_eq!(parse_number("$23.99"), Some(23.99));
/// assert_eq!(parse_number("₹1,299.00"), Some(1299.0));
/// assert_eq!(parse_number("1.299,50 €"), Some(1299.5));
/// assert_eq!(parse_number("12,50"), Some(12.5));
/// assert_eq!(parse_number("116,877"), Some(116877.0));
/// assert_eq!(parse_number("FREE"), None);
/// ```
pub fn parse_number(text: &str) -> Option<f64> {
    let start = text.find(|c: char| c.is_ascii_digit())?;
    let numeric: String = text[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || matches!(c, ',' | '.' | ' ' | '\u{a0}' | '\u{202f}'))
        .filter(|c| c.is_ascii_digit() || matches!(c, ',' | '.'))
        .collect();
    let numeric = numeric.trim_end_matches(['.', ',']);

    let last_comma = numeric.rfind(',');
    let last_dot = numeric.rfind('.');
    let commas = numeric.matches(',').count();
    let dots = numeric.matches('.').count();

    let normalized = match (last_comma, last_dot) {
        (Some(comma), Some(dot)) if comma > dot => numeric.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => numeric.replace(',', ""),
        (Some(comma), None) if commas == 1 && numeric.len() - comma - 1 == 2 => {
            numeric.replace(',', ".")
        }
        (Some(_), None) => numeric.replace(',', ""),
        (None, Some(_)) if dots > 1 => numeric.replace('.', ""),
        _ => numeric.to_string(),
    };

    normalized.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Extracts the currency marker surrounding a price
///
/// Returns the non-numeric prefix (`"$23.99"` gives `"$"`), or the suffix when
/// there is no prefix (`"12,50 €"` gives `"€"`).
pub fn currency_symbol(text: &str) -> Option<String> {
    let text = clean_text(text);
    let first_digit = text.find(|c: char| c.is_ascii_digit())?;

    let prefix = text[..first_digit].trim();
    if !prefix.is_empty() {
        return Some(prefix.to_string());
    }

    let last_digit = text.rfind(|c: char| c.is_ascii_digit())?;
    let suffix = text[last_digit + 1..].trim_matches(|c: char| c.is_whitespace() || c == '.' || c == ',');
    (!suffix.is_empty()).then(|| suffix.to_string())
}

/// Parses a rating such as `"4.8 out of 5 stars"` or `"4,8 von 5 Sternen"`
pub fn parse_rating(text: &str) -> Option<f64> {
    let start = text.find(|c: char| c.is_ascii_digit())?;
    let token: String = text[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || matches!(c, '.' | ','))
        .collect();
    token
        .trim_end_matches(['.', ','])
        .replace(',', ".")
        .parse::<f64>()
        .ok()
}

/// Parses a count such as `"116,877 ratings"` or `"(1.234)"`
pub fn parse_count(text: &str) -> Option<u64> {
    let start = text.find(|c: char| c.is_ascii_digit())?;
    let digits: String = text[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || matches!(c, ',' | '.' | '\u{a0}' | '\u{202f}'))
        .filter(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

/// Parses a percentage such as `"86%"`
pub fn parse_percentage(text: &str) -> Option<u32> {
    let percent = text.find('%')?;
    let digits: String = text[..percent]
        .chars()
        .rev()
        .skip_while(|c| c.is_whitespace())
        .take_while(char::is_ascii_digit)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    digits.parse().ok()
}

/// Composes a price from `a-price-whole` and `a-price-fraction` texts
pub fn price_from_parts(whole: &str, fraction: Option<&str>) -> Option<f64> {
    let whole: String = whole.chars().filter(char::is_ascii_digit).collect();
    if whole.is_empty() {
        return None;
    }
    let fraction: String = fraction
        .unwrap_or("")
        .chars()
        .filter(char::is_ascii_digit)
        .collect();

    if fraction.is_empty() {
        whole.parse().ok()
    } else {
        format!("{}.{}", whole, fraction).parse().ok()
    }
}
