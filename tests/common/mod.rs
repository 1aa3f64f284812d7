#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use pricewatch::MonitorContext;
use pricewatch::config::{DelayBounds, MonitorConfig, MonitorEnv};
use pricewatch::error::{FetchError, StoreError};
use pricewatch::extractor::Extractor;
use pricewatch::fetch::FetchStrategy;
use pricewatch::models::{NewProduct, PriceObservation, Product, ProductId, ProductUpdate};
use pricewatch::notifier::{NotificationEvent, Notifier};
use pricewatch::ratelimit::RandomDelay;
use pricewatch::store::{MemoryStore, PriceStore};
use pricewatch::Scraper;

/// Product pages served by URL. A URL with no page fails to fetch.
#[derive(Clone, Default)]
pub struct Pages {
    pages: Arc<Mutex<HashMap<String, String>>>,
    fetches: Arc<AtomicUsize>,
}

impl Pages {
    pub fn set_price(&self, url: &str, price: f64) {
        self.set_markup(url, product_page("Test Product", price));
    }

    pub fn set_markup(&self, url: &str, markup: String) {
        self.pages.lock().unwrap().insert(url.to_string(), markup);
    }

    pub fn remove(&self, url: &str) {
        self.pages.lock().unwrap().remove(url);
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

struct ScriptedFetch {
    pages: Pages,
}

#[async_trait]
impl FetchStrategy for ScriptedFetch {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        self.pages.fetches.fetch_add(1, Ordering::SeqCst);
        let page = self.pages.pages.lock().unwrap().get(url).cloned();
        page.ok_or(FetchError::Status {
            url: url.to_string(),
            status: 503,
        })
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<NotificationEvent>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<NotificationEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }

    /// Makes every later delivery report failure.
    pub fn fail_deliveries(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    pub fn price_changes(&self) -> Vec<(f64, f64)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                NotificationEvent::PriceChanged {
                    old_price,
                    new_price,
                    ..
                } => Some((old_price, new_price)),
                _ => None,
            })
            .collect()
    }

    pub fn targets_reached(&self) -> usize {
        self.events()
            .iter()
            .filter(|event| matches!(event, NotificationEvent::TargetReached { .. }))
            .count()
    }

    pub fn scrape_errors(&self) -> Vec<i64> {
        self.events()
            .iter()
            .filter_map(|event| match event {
                NotificationEvent::ScrapeError { product, .. } => Some(product.id),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, event: &NotificationEvent) -> bool {
        self.events.lock().unwrap().push(event.clone());
        !self.failing.load(Ordering::SeqCst)
    }
}

pub fn product_page(name: &str, price: f64) -> String {
    format!(
        r#"<html><body>
            <span id="productTitle">{name}</span>
            <span class="a-price"><span class="a-offscreen">${price:.2}</span></span>
            <img id="landingImage" src="https://images.example/{price}.jpg">
            <div id="availability"><span>In Stock.</span></div>
        </body></html>"#
    )
}

pub fn url_for(asin: &str) -> String {
    format!("https://www.amazon.com/dp/{asin}")
}

/// Default configuration without any pauses.
pub fn test_config() -> MonitorConfig {
    let mut config = MonitorConfig::from_env(MonitorEnv::default()).unwrap();
    config.scheduler.item_delay = DelayBounds::none();
    config.scraping.fetch_delay = DelayBounds::none();
    config.scraping.fetch_timeout = Duration::from_secs(1);
    config
}

pub struct Harness {
    pub context: MonitorContext,
    pub store: Arc<MemoryStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub pages: Pages,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: MonitorConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        Self::build(config, store.clone(), store)
    }

    /// A harness whose first `conflicts` price writes fail with a write
    /// conflict.
    pub fn with_conflicts(conflicts: usize) -> Self {
        let store = Arc::new(MemoryStore::new());
        let conflicting = Arc::new(ConflictingStore {
            inner: store.clone(),
            conflicts_left: AtomicUsize::new(conflicts),
        });
        Self::build(test_config(), store, conflicting)
    }

    fn build(
        config: MonitorConfig,
        store: Arc<MemoryStore>,
        pipeline_store: Arc<dyn PriceStore>,
    ) -> Self {
        let notifier = Arc::new(RecordingNotifier::default());
        let pages = Pages::default();
        let scraper = Scraper::new(
            vec![Box::new(ScriptedFetch {
                pages: pages.clone(),
            })],
            Extractor::amazon(),
            RandomDelay::none(),
        );
        let context =
            MonitorContext::assemble(config, scraper, pipeline_store, notifier.clone()).unwrap();
        Self {
            context,
            store,
            notifier,
            pages,
        }
    }

    /// Inserts a product straight into the store, without scraping.
    pub async fn add_product(&self, asin: &str, target_price: Option<f64>) -> Product {
        self.store
            .insert_product(NewProduct {
                name: format!("Product {asin}"),
                url: url_for(asin),
                asin: asin.to_string(),
                target_price,
                image_url: None,
            })
            .await
            .unwrap()
    }

    pub async fn product(&self, id: i64) -> Product {
        self.store.get_product(id).await.unwrap().unwrap()
    }

    pub async fn observation_count(&self, id: i64) -> usize {
        self.store
            .get_recent_observations(id, usize::MAX)
            .await
            .unwrap()
            .len()
    }
}

/// Wraps a `MemoryStore`, failing `record_price` with `Conflict` a set
/// number of times before passing writes through.
struct ConflictingStore {
    inner: Arc<MemoryStore>,
    conflicts_left: AtomicUsize,
}

#[async_trait]
impl PriceStore for ConflictingStore {
    async fn insert_product(&self, product: NewProduct) -> Result<Product, StoreError> {
        self.inner.insert_product(product).await
    }

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        self.inner.get_product(id).await
    }

    async fn get_product_by_asin(&self, asin: &str) -> Result<Option<Product>, StoreError> {
        self.inner.get_product_by_asin(asin).await
    }

    async fn list_active_products(&self) -> Result<Vec<Product>, StoreError> {
        self.inner.list_active_products().await
    }

    async fn update_product(
        &self,
        id: ProductId,
        update: ProductUpdate,
    ) -> Result<Product, StoreError> {
        self.inner.update_product(id, update).await
    }

    async fn set_active(&self, id: ProductId, active: bool) -> Result<Product, StoreError> {
        self.inner.set_active(id, active).await
    }

    async fn purge(&self, id: ProductId) -> Result<(), StoreError> {
        self.inner.purge(id).await
    }

    async fn add_observation(
        &self,
        product_id: ProductId,
        price: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<PriceObservation, StoreError> {
        self.inner.add_observation(product_id, price, timestamp).await
    }

    async fn set_current_price(
        &self,
        product_id: ProductId,
        price: f64,
        at: DateTime<Utc>,
    ) -> Result<Product, StoreError> {
        self.inner.set_current_price(product_id, price, at).await
    }

    async fn record_price(
        &self,
        product_id: ProductId,
        price: f64,
        at: DateTime<Utc>,
    ) -> Result<Product, StoreError> {
        let conflicted = self
            .conflicts_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if conflicted {
            return Err(StoreError::Conflict(product_id));
        }
        self.inner.record_price(product_id, price, at).await
    }

    async fn get_recent_observations(
        &self,
        product_id: ProductId,
        limit: usize,
    ) -> Result<Vec<PriceObservation>, StoreError> {
        self.inner.get_recent_observations(product_id, limit).await
    }

    async fn observations_since(
        &self,
        product_id: ProductId,
        since: DateTime<Utc>,
    ) -> Result<Vec<PriceObservation>, StoreError> {
        self.inner.observations_since(product_id, since).await
    }

    async fn delete_observations_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        self.inner.delete_observations_older_than(cutoff).await
    }
}
