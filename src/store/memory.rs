use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{PriceStore, ensure_valid_price};
use crate::error::StoreError;
use crate::models::{NewProduct, PriceObservation, Product, ProductId, ProductUpdate};

/// Keeps everything in process memory. Used when no database is configured
/// and in tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Tables>,
}

#[derive(Debug, Default)]
struct Tables {
    products: BTreeMap<ProductId, Product>,
    observations: Vec<PriceObservation>,
    last_product_id: ProductId,
    last_observation_id: i64,
}

impl Tables {
    fn product_mut(&mut self, id: ProductId) -> Result<&mut Product, StoreError> {
        self.products
            .get_mut(&id)
            .ok_or(StoreError::ProductNotFound(id))
    }

    fn push_observation(
        &mut self,
        product_id: ProductId,
        price: f64,
        timestamp: DateTime<Utc>,
    ) -> PriceObservation {
        self.last_observation_id += 1;
        let observation = PriceObservation {
            id: self.last_observation_id,
            product_id,
            price,
            timestamp,
        };
        self.observations.push(observation.clone());
        observation
    }

    fn newest_first(&self, keep: impl Fn(&PriceObservation) -> bool) -> Vec<PriceObservation> {
        let mut rows: Vec<_> = self.observations.iter().filter(|o| keep(*o)).cloned().collect();
        rows.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        rows
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PriceStore for MemoryStore {
    async fn insert_product(&self, product: NewProduct) -> Result<Product, StoreError> {
        if let Some(price) = product.target_price {
            ensure_valid_price(price)?;
        }
        let mut tables = self.inner.write().await;
        if tables.products.values().any(|p| p.asin == product.asin) {
            return Err(StoreError::DuplicateAsin(product.asin));
        }
        tables.last_product_id += 1;
        let now = Utc::now();
        let product = Product {
            id: tables.last_product_id,
            name: product.name,
            url: product.url,
            asin: product.asin,
            target_price: product.target_price,
            current_price: None,
            image_url: product.image_url,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        tables.products.insert(product.id, product.clone());
        Ok(product)
    }

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        Ok(self.inner.read().await.products.get(&id).cloned())
    }

    async fn get_product_by_asin(&self, asin: &str) -> Result<Option<Product>, StoreError> {
        let tables = self.inner.read().await;
        Ok(tables.products.values().find(|p| p.asin == asin).cloned())
    }

    async fn list_active_products(&self) -> Result<Vec<Product>, StoreError> {
        let tables = self.inner.read().await;
        Ok(tables
            .products
            .values()
            .filter(|p| p.is_active)
            .cloned()
            .collect())
    }

    async fn update_product(
        &self,
        id: ProductId,
        update: ProductUpdate,
    ) -> Result<Product, StoreError> {
        if let Some(price) = update.target_price {
            ensure_valid_price(price)?;
        }
        let mut tables = self.inner.write().await;
        let product = tables.product_mut(id)?;
        if let Some(name) = update.name {
            product.name = name;
        }
        if let Some(target_price) = update.target_price {
            product.target_price = Some(target_price);
        }
        if let Some(image_url) = update.image_url {
            product.image_url = Some(image_url);
        }
        product.updated_at = Utc::now();
        Ok(product.clone())
    }

    async fn set_active(&self, id: ProductId, active: bool) -> Result<Product, StoreError> {
        let mut tables = self.inner.write().await;
        let product = tables.product_mut(id)?;
        product.is_active = active;
        product.updated_at = Utc::now();
        Ok(product.clone())
    }

    async fn purge(&self, id: ProductId) -> Result<(), StoreError> {
        let mut tables = self.inner.write().await;
        tables
            .products
            .remove(&id)
            .ok_or(StoreError::ProductNotFound(id))?;
        tables.observations.retain(|o| o.product_id != id);
        Ok(())
    }

    async fn add_observation(
        &self,
        product_id: ProductId,
        price: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<PriceObservation, StoreError> {
        ensure_valid_price(price)?;
        let mut tables = self.inner.write().await;
        tables.product_mut(product_id)?;
        Ok(tables.push_observation(product_id, price, timestamp))
    }

    async fn set_current_price(
        &self,
        product_id: ProductId,
        price: f64,
        at: DateTime<Utc>,
    ) -> Result<Product, StoreError> {
        ensure_valid_price(price)?;
        let mut tables = self.inner.write().await;
        let product = tables.product_mut(product_id)?;
        product.current_price = Some(price);
        product.updated_at = at;
        Ok(product.clone())
    }

    async fn record_price(
        &self,
        product_id: ProductId,
        price: f64,
        at: DateTime<Utc>,
    ) -> Result<Product, StoreError> {
        ensure_valid_price(price)?;
        // One write guard for both rows.
        let mut tables = self.inner.write().await;
        tables.product_mut(product_id)?;
        tables.push_observation(product_id, price, at);
        let product = tables.product_mut(product_id)?;
        product.current_price = Some(price);
        product.updated_at = at;
        Ok(product.clone())
    }

    async fn get_recent_observations(
        &self,
        product_id: ProductId,
        limit: usize,
    ) -> Result<Vec<PriceObservation>, StoreError> {
        let tables = self.inner.read().await;
        let mut rows = tables.newest_first(|o| o.product_id == product_id);
        rows.truncate(limit);
        Ok(rows)
    }

    async fn observations_since(
        &self,
        product_id: ProductId,
        since: DateTime<Utc>,
    ) -> Result<Vec<PriceObservation>, StoreError> {
        let tables = self.inner.read().await;
        Ok(tables.newest_first(|o| o.product_id == product_id && o.timestamp >= since))
    }

    async fn delete_observations_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut tables = self.inner.write().await;
        let before = tables.observations.len();
        tables.observations.retain(|o| o.timestamp >= cutoff);
        Ok((before - tables.observations.len()) as u64)
    }
}
