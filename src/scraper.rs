use log::{debug, info, warn};

use crate::browser::BrowserFetcher;
use crate::config::ScrapingConfig;
use crate::error::{AttemptFailure, FetchError, ScrapeFailure};
use crate::extractor::{Extractor, ProductInfo};
use crate::fetch::FetchStrategy;
use crate::ratelimit::RandomDelay;
use crate::requests::RequestClient;

/// Fetches a product page through an ordered list of strategies and
/// extracts product info from the first one that yields a price.
pub struct Scraper {
    strategies: Vec<Box<dyn FetchStrategy>>,
    extractor: Extractor,
    fetch_delay: RandomDelay,
}

/// Whether a strategy's result ends the run.
fn is_acceptable(info: &ProductInfo) -> bool {
    info.price.is_some()
}

impl Scraper {
    pub fn new(
        strategies: Vec<Box<dyn FetchStrategy>>,
        extractor: Extractor,
        fetch_delay: RandomDelay,
    ) -> Self {
        Self {
            strategies,
            extractor,
            fetch_delay,
        }
    }

    /// Plain HTTP first, then browser rendering when a WebDriver endpoint is
    /// configured.
    pub fn from_config(config: &ScrapingConfig) -> Result<Self, FetchError> {
        let mut strategies: Vec<Box<dyn FetchStrategy>> =
            vec![Box::new(RequestClient::new(config)?)];
        match &config.webdriver_url {
            Some(webdriver_url) => {
                strategies.push(Box::new(BrowserFetcher::new(webdriver_url.clone(), config)))
            }
            None => info!("no WEBDRIVER_URL configured, browser fallback disabled"),
        }
        let scraper = Self::new(
            strategies,
            Extractor::amazon(),
            RandomDelay::new(config.fetch_delay.clone()),
        );
        info!("fetch strategies: {}", scraper.strategy_names().join(" -> "));
        Ok(scraper)
    }

    pub fn strategy_names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub async fn scrape(&self, url: &str) -> Result<ProductInfo, ScrapeFailure> {
        let mut attempts = Vec::new();
        let mut partial: Option<ProductInfo> = None;

        for strategy in &self.strategies {
            let fetched = strategy.fetch(url).await;
            // Every attempt pauses, successful or not.
            self.fetch_delay.wait().await;

            match fetched {
                Ok(markup) => {
                    let info = self.extractor.extract(&markup);
                    if is_acceptable(&info) {
                        debug!("{} strategy found a price for {url}", strategy.name());
                        return Ok(fill_missing(info, partial));
                    }
                    warn!("{} strategy found no price for {url}", strategy.name());
                    attempts.push(AttemptFailure::ExtractionEmpty {
                        strategy: strategy.name().to_string(),
                    });
                    partial = Some(fill_missing(info, partial));
                }
                Err(err) => {
                    warn!("{} strategy failed for {url}: {err}", strategy.name());
                    attempts.push(AttemptFailure::FetchFailure {
                        strategy: strategy.name().to_string(),
                        cause: err.to_string(),
                    });
                }
            }
        }

        Err(ScrapeFailure {
            url: url.to_string(),
            attempts,
            partial,
        })
    }
}

/// Fills `None` fields of `info` from an earlier attempt.
fn fill_missing(info: ProductInfo, earlier: Option<ProductInfo>) -> ProductInfo {
    let Some(earlier) = earlier else {
        return info;
    };
    ProductInfo {
        name: info.name.or(earlier.name),
        price: info.price.or(earlier.price),
        image_url: info.image_url.or(earlier.image_url),
        availability: info.availability.or(earlier.availability),
    }
}
