//! Turns a scrape result into a stored observation and any alerts it
//! warrants.
//!
//! Writes for one product are serialized through a per-product async lock,
//! and the product row is re-read under that lock so the previous price used
//! for alerting is never stale. The observation and current-price writes are
//! committed together; notifications only happen after the commit and
//! can't undo it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use log::{info, warn};
use tokio::sync::Mutex as AsyncMutex;

use crate::analytics::percent_change;
use crate::config::PipelineConfig;
use crate::error::{MonitorError, Result, StoreError};
use crate::extractor::ProductInfo;
use crate::models::{Product, ProductId};
use crate::notifier::{NotificationEvent, Notifier};
use crate::scraper::Scraper;
use crate::store::PriceStore;

pub struct UpdatePipeline {
    scraper: Scraper,
    store: Arc<dyn PriceStore>,
    notifier: Arc<dyn Notifier>,
    config: PipelineConfig,
    product_locks: Mutex<HashMap<ProductId, Arc<AsyncMutex<()>>>>,
}

impl UpdatePipeline {
    pub fn new(
        scraper: Scraper,
        store: Arc<dyn PriceStore>,
        notifier: Arc<dyn Notifier>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            scraper,
            store,
            notifier,
            config,
            product_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn scraper(&self) -> &Scraper {
        &self.scraper
    }

    pub fn store(&self) -> &Arc<dyn PriceStore> {
        &self.store
    }

    /// Scrapes one product and applies the result. Scheduled and manual
    /// checks both come through here.
    pub async fn check_product(&self, product: &Product) -> Result<Option<Product>> {
        info!("checking price for {} ({})", product.name, product.asin);
        let scraped = self.scraper.scrape(&product.url).await;
        let info = scraped.map_err(|failure| MonitorError::Scrape {
            product_id: product.id,
            asin: product.asin.clone(),
            url: product.url.clone(),
            failure,
        })?;
        self.apply_observation(product, &info).await
    }

    /// Records `info.price` for `product` and emits alerts. Returns `None`
    /// without touching the store when there is no price.
    pub async fn apply_observation(
        &self,
        product: &Product,
        info: &ProductInfo,
    ) -> Result<Option<Product>> {
        let Some(new_price) = info.price else {
            warn!(
                "no price for product {} ({}), nothing recorded",
                product.id, product.asin
            );
            return Ok(None);
        };

        let lock = self.lock_for(product.id);
        let guard = lock.lock().await;

        let current = self
            .store
            .get_product(product.id)
            .await?
            .ok_or(MonitorError::ProductNotFound(product.id))?;
        let old_price = current.current_price;
        let updated = self.record_with_retry(&current, new_price).await?;
        drop(guard);

        match old_price {
            Some(old) => info!(
                "price for {} ({}): ${old:.2} -> ${new_price:.2}",
                updated.name, updated.asin
            ),
            None => info!(
                "first price for {} ({}): ${new_price:.2}",
                updated.name, updated.asin
            ),
        }

        self.emit_alerts(&updated, old_price, new_price).await;
        Ok(Some(updated))
    }

    /// Sends a scrape-failure alert for `product`.
    pub async fn report_failure(&self, product: &Product, message: String) {
        let event = NotificationEvent::ScrapeError {
            product: product.clone(),
            message,
        };
        self.deliver(event).await;
    }

    /// Drops the write lock kept for a purged product.
    pub fn forget_product(&self, id: ProductId) {
        self.product_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    fn lock_for(&self, id: ProductId) -> Arc<AsyncMutex<()>> {
        let mut locks = self
            .product_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        locks.entry(id).or_default().clone()
    }

    async fn record_with_retry(&self, product: &Product, price: f64) -> Result<Product> {
        match self.store.record_price(product.id, price, Utc::now()).await {
            Err(err) if err.is_conflict() => {
                warn!(
                    "write conflict on product {} ({}), retrying once: {err}",
                    product.id, product.asin
                );
                self.store
                    .record_price(product.id, price, Utc::now())
                    .await
                    .map_err(|err| conflict_or_store(product, err))
            }
            other => other.map_err(MonitorError::from),
        }
    }

    async fn emit_alerts(&self, product: &Product, old_price: Option<f64>, new_price: f64) {
        if let Some(old_price) = old_price {
            if exceeds_threshold(old_price, new_price, self.config.price_change_threshold) {
                self.deliver(NotificationEvent::PriceChanged {
                    product: product.clone(),
                    old_price,
                    new_price,
                    percent_change: percent_change(old_price, new_price),
                })
                .await;
            }
        }

        if product.target_price.is_some_and(|target| new_price <= target) {
            self.deliver(NotificationEvent::TargetReached {
                product: product.clone(),
            })
            .await;
        }
    }

    async fn deliver(&self, event: NotificationEvent) {
        if !self.config.enable_notifications {
            return;
        }
        if !self.notifier.notify(&event).await {
            warn!(
                "notification for product {} ({}) was not delivered",
                event.product().id,
                event.product().asin
            );
        }
    }
}

fn conflict_or_store(product: &Product, err: StoreError) -> MonitorError {
    if err.is_conflict() {
        MonitorError::PersistenceConflict {
            product_id: product.id,
            asin: product.asin.clone(),
            source: err,
        }
    } else {
        err.into()
    }
}

/// `|new - old| / old * 100 >= threshold`, compared without the division so
/// exact boundaries like 100 -> 105 at 5% are not lost to rounding.
pub fn exceeds_threshold(old_price: f64, new_price: f64, threshold: f64) -> bool {
    old_price > 0.0 && (new_price - old_price).abs() * 100.0 >= threshold * old_price
}
