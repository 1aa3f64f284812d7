//! Pulls product fields out of a fetched product page.
//!
//! Each field owns an ordered list of matchers. A matcher is a plain
//! function of the parsed document; the first one to produce a usable value
//! wins and the rest are skipped. Fields are looked up independently, so a
//! page without a price can still yield a name and an image.

use scraper::{Html, Selector};
use serde::Serialize;

use crate::text_manipulators::{
    Availability, classify_availability, extract_clean_text, parse_price,
};

pub type Matcher<T> = Box<dyn Fn(&Html) -> Option<T> + Send + Sync>;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProductInfo {
    pub name: Option<String>,
    pub price: Option<f64>,
    pub image_url: Option<String>,
    pub availability: Option<Availability>,
}

pub struct Extractor {
    name: Vec<Matcher<String>>,
    price: Vec<Matcher<f64>>,
    image_url: Vec<Matcher<String>>,
    availability: Vec<Matcher<Availability>>,
}

impl Extractor {
    pub fn new(
        name: Vec<Matcher<String>>,
        price: Vec<Matcher<f64>>,
        image_url: Vec<Matcher<String>>,
        availability: Vec<Matcher<Availability>>,
    ) -> Self {
        Self {
            name,
            price,
            image_url,
            availability,
        }
    }

    /// Matchers for Amazon product detail pages, most specific first.
    pub fn amazon() -> Self {
        Self::new(
            ["#productTitle", ".product-title", "h1.a-size-large", "h1"]
                .into_iter()
                .map(text_of)
                .collect(),
            [
                ".a-price-whole",
                ".a-offscreen",
                ".a-price .a-offscreen",
                "#priceblock_dealprice",
                "#priceblock_ourprice",
                "#tp_price_block_total_price_ww",
                ".a-price-range .a-offscreen",
            ]
            .into_iter()
            .map(price_of)
            .collect(),
            [
                "#landingImage",
                ".a-dynamic-image",
                "#imgBlkFront",
                ".item-image-canvas img",
            ]
            .into_iter()
            .map(|css| attr_of(css, &["src", "data-src"]))
            .collect(),
            ["#availability span", ".a-color-success", ".a-color-price"]
                .into_iter()
                .map(availability_of)
                .collect(),
        )
    }

    pub fn extract(&self, markup: &str) -> ProductInfo {
        let document = Html::parse_document(markup);
        ProductInfo {
            name: first_match(&self.name, &document),
            price: first_match(&self.price, &document),
            image_url: first_match(&self.image_url, &document),
            availability: first_match(&self.availability, &document),
        }
    }
}

impl Default for Extractor {
    fn default() -> Self {
        Self::amazon()
    }
}

fn first_match<T>(matchers: &[Matcher<T>], document: &Html) -> Option<T> {
    matchers.iter().find_map(|matcher| matcher(document))
}

fn selector(css: &str) -> Selector {
    // Matchers are built from literal CSS; a parse failure is a typo here.
    Selector::parse(css).unwrap_or_else(|err| panic!("invalid selector {css:?}: {err}"))
}

/// Text of the first element matching `css`, if non-empty.
pub fn text_of(css: &str) -> Matcher<String> {
    let selector = selector(css);
    Box::new(move |document| {
        let element = document.select(&selector).next()?;
        Some(extract_clean_text(element)).filter(|text| !text.is_empty())
    })
}

/// First element matching `css` whose text parses as a price.
pub fn price_of(css: &str) -> Matcher<f64> {
    let selector = selector(css);
    Box::new(move |document| {
        document
            .select(&selector)
            .find_map(|element| parse_price(&extract_clean_text(element)))
    })
}

/// First non-empty attribute of the first element matching `css`, trying
/// `attrs` in order.
pub fn attr_of(css: &str, attrs: &'static [&'static str]) -> Matcher<String> {
    let selector = selector(css);
    Box::new(move |document| {
        let element = document.select(&selector).next()?;
        attrs
            .iter()
            .filter_map(|attr| element.value().attr(attr))
            .map(str::trim)
            .find(|value| !value.is_empty())
            .map(String::from)
    })
}

pub fn availability_of(css: &str) -> Matcher<Availability> {
    let selector = selector(css);
    Box::new(move |document| {
        let element = document.select(&selector).next()?;
        classify_availability(&extract_clean_text(element))
    })
}
