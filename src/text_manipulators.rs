use scraper::ElementRef;

use crate::models::is_valid_price;

pub fn extract_text(node: ElementRef) -> String {
    node.text().collect::<String>()
}

/// Element text with runs of whitespace (including nbsp) collapsed.
pub fn extract_clean_text(node: ElementRef) -> String {
    extract_text(node)
        .split(|c: char| c.is_whitespace() || c == '\u{a0}')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parses a displayed price such as `$1,234.56`, `1.234,56 €` or `19,99`.
///
/// Only digits and the `,`/`.` separators are kept. When both separators
/// appear, whichever comes last is the decimal point. A lone comma followed
/// by at most two digits is a decimal comma, otherwise commas group
/// thousands. Returns `None` for anything that is not a positive number.
pub fn parse_price(text: &str) -> Option<f64> {
    let cleaned: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == ',' || *c == '.')
        .collect();
    if !cleaned.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    let last_comma = cleaned.rfind(',');
    let last_dot = cleaned.rfind('.');
    let normalized = match (last_comma, last_dot) {
        (Some(comma), Some(dot)) if dot > comma => cleaned.replace(',', ""),
        (Some(_), Some(_)) => cleaned.replace('.', "").replace(',', "."),
        (Some(comma), None) => {
            let decimals = cleaned.len() - comma - 1;
            if cleaned.matches(',').count() == 1 && decimals <= 2 {
                cleaned.replace(',', ".")
            } else {
                cleaned.replace(',', "")
            }
        }
        (None, Some(_)) if cleaned.matches('.').count() > 1 => cleaned.replace('.', ""),
        _ => cleaned,
    };

    normalized
        .parse::<f64>()
        .ok()
        .filter(|price| is_valid_price(*price))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Availability {
    InStock,
    OutOfStock,
}

/// Buckets availability text by keyword. Negative phrases are checked first
/// since "unavailable" contains "available".
pub fn classify_availability(text: &str) -> Option<Availability> {
    let text = text.to_lowercase();
    if ["out of stock", "unavailable"]
        .iter()
        .any(|word| text.contains(word))
    {
        Some(Availability::OutOfStock)
    } else if ["in stock", "available", "ships"]
        .iter()
        .any(|word| text.contains(word))
    {
        Some(Availability::InStock)
    } else {
        None
    }
}
