use regex::Regex;
use reqwest::Url;

pub struct AsinExtractor {
    // Path patterns, tried in order: `/dp/<ASIN>` then `/gp/product/<ASIN>`.
    path_regexes: Vec<Regex>,
}

impl AsinExtractor {
    pub fn new() -> anyhow::Result<Self> {
        let path_regexes = vec![
            Regex::new(r"/dp/([A-Z0-9]{10})")?,
            Regex::new(r"/gp/product/([A-Z0-9]{10})")?,
        ];
        Ok(Self { path_regexes })
    }

    /// Finds the ASIN in a product URL. Falls back to an `asin` query
    /// parameter when no known path pattern matches.
    pub fn extract(&self, url: &str) -> Option<String> {
        self.path_regexes
            .iter()
            .find_map(|regex| regex.captures(url)?.get(1))
            .map(|m| m.as_str().to_string())
            .or_else(|| asin_from_query(url))
    }
}

fn asin_from_query(url: &str) -> Option<String> {
    let url = Url::parse(url).ok()?;
    let (_, value) = url.query_pairs().find(|(key, _)| key == "asin")?;
    let value = value.trim().to_ascii_uppercase();
    let is_asin = value.len() == 10 && value.chars().all(|c| c.is_ascii_alphanumeric());
    is_asin.then_some(value)
}
