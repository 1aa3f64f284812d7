use std::sync::Arc;

use chrono::Utc;
use log::{info, warn};

use crate::analytics::{compute_statistics, compute_trend};
use crate::asin::AsinExtractor;
use crate::error::{MonitorError, Result, StoreError};
use crate::models::{
    NewProduct, PriceObservation, PriceStatistics, Product, ProductId, ProductUpdate, Trend,
};
use crate::pipeline::UpdatePipeline;
use crate::scheduler::window_start;
use crate::store::PriceStore;

/// Adds, edits and reports on tracked products.
pub struct Catalog {
    pipeline: Arc<UpdatePipeline>,
    asin_extractor: AsinExtractor,
}

impl Catalog {
    pub fn new(pipeline: Arc<UpdatePipeline>) -> anyhow::Result<Self> {
        Ok(Self {
            pipeline,
            asin_extractor: AsinExtractor::new()?,
        })
    }

    fn store(&self) -> &Arc<dyn PriceStore> {
        self.pipeline.store()
    }

    /// Starts tracking the product behind `url`.
    ///
    /// The page is scraped once to fill in the name, image and first price.
    /// A failed scrape does not stop the product from being added; it is
    /// picked up by the next fleet check instead.
    pub async fn track(
        &self,
        url: &str,
        target_price: Option<f64>,
        name: Option<String>,
    ) -> Result<Product> {
        let asin = self
            .asin_extractor
            .extract(url)
            .ok_or_else(|| MonitorError::InvalidAsin(url.to_string()))?;

        if self.store().get_product_by_asin(&asin).await?.is_some() {
            return Err(StoreError::DuplicateAsin(asin).into());
        }

        let scraped = match self.pipeline.scraper().scrape(url).await {
            Ok(info) => Some(info),
            Err(failure) => {
                warn!("initial scrape for {asin} failed, adding without a price: {failure}");
                failure.partial
            }
        };

        let name = name
            .filter(|name| !name.trim().is_empty())
            .or_else(|| scraped.as_ref().and_then(|info| info.name.clone()))
            .unwrap_or_else(|| format!("Amazon product {asin}"));
        let image_url = scraped.as_ref().and_then(|info| info.image_url.clone());

        let product = self
            .store()
            .insert_product(NewProduct {
                name,
                url: url.to_string(),
                asin,
                target_price,
                image_url,
            })
            .await?;
        info!("now tracking {} ({})", product.name, product.asin);

        match scraped {
            Some(info) => Ok(self
                .pipeline
                .apply_observation(&product, &info)
                .await?
                .unwrap_or(product)),
            None => Ok(product),
        }
    }

    pub async fn edit(&self, id: ProductId, update: ProductUpdate) -> Result<Product> {
        Ok(self.store().update_product(id, update).await?)
    }

    /// Stops scheduled checks for the product but keeps its history.
    pub async fn deactivate(&self, id: ProductId) -> Result<Product> {
        Ok(self.store().set_active(id, false).await?)
    }

    pub async fn reactivate(&self, id: ProductId) -> Result<Product> {
        Ok(self.store().set_active(id, true).await?)
    }

    /// Deletes the product together with its price history.
    pub async fn purge(&self, id: ProductId) -> Result<()> {
        self.store().purge(id).await?;
        self.pipeline.forget_product(id);
        info!("purged product {id} and its price history");
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<Product>> {
        Ok(self.store().list_active_products().await?)
    }

    pub async fn get(&self, id: ProductId) -> Result<Product> {
        self.store()
            .get_product(id)
            .await?
            .ok_or(MonitorError::ProductNotFound(id))
    }

    pub async fn trend(&self, id: ProductId) -> Result<Trend> {
        self.get(id).await?;
        let recent = self.store().get_recent_observations(id, 2).await?;
        Ok(compute_trend(&recent))
    }

    pub async fn statistics(&self, id: ProductId, days: i64) -> Result<Option<PriceStatistics>> {
        let window = self.history(id, days).await?;
        Ok(compute_statistics(&window, days))
    }

    /// Observations from the last `days` days, newest first.
    pub async fn history(&self, id: ProductId, days: i64) -> Result<Vec<PriceObservation>> {
        let since = window_start(Utc::now(), days)?;
        self.get(id).await?;
        Ok(self.store().observations_since(id, since).await?)
    }
}
