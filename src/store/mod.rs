//! Persistence for tracked products and their price history.
//!
//! A product owns its observations: purging a product deletes its history,
//! while deactivating it only takes it out of scheduling. Observations are
//! never edited after they are written.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::models::{NewProduct, PriceObservation, Product, ProductId, ProductUpdate};

#[async_trait]
pub trait PriceStore: Send + Sync {
    /// Fails with `DuplicateAsin` if the ASIN is known, active or not.
    async fn insert_product(&self, product: NewProduct) -> Result<Product, StoreError>;

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>, StoreError>;

    async fn get_product_by_asin(&self, asin: &str) -> Result<Option<Product>, StoreError>;

    async fn list_active_products(&self) -> Result<Vec<Product>, StoreError>;

    async fn update_product(
        &self,
        id: ProductId,
        update: ProductUpdate,
    ) -> Result<Product, StoreError>;

    async fn set_active(&self, id: ProductId, active: bool) -> Result<Product, StoreError>;

    /// Removes the product and all of its observations.
    async fn purge(&self, id: ProductId) -> Result<(), StoreError>;

    async fn add_observation(
        &self,
        product_id: ProductId,
        price: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<PriceObservation, StoreError>;

    async fn set_current_price(
        &self,
        product_id: ProductId,
        price: f64,
        at: DateTime<Utc>,
    ) -> Result<Product, StoreError>;

    /// `add_observation` and `set_current_price` as one atomic write.
    async fn record_price(
        &self,
        product_id: ProductId,
        price: f64,
        at: DateTime<Utc>,
    ) -> Result<Product, StoreError>;

    /// Newest first.
    async fn get_recent_observations(
        &self,
        product_id: ProductId,
        limit: usize,
    ) -> Result<Vec<PriceObservation>, StoreError>;

    /// Newest first.
    async fn observations_since(
        &self,
        product_id: ProductId,
        since: DateTime<Utc>,
    ) -> Result<Vec<PriceObservation>, StoreError>;

    /// Returns the number of deleted rows.
    async fn delete_observations_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError>;
}

fn ensure_valid_price(price: f64) -> Result<(), StoreError> {
    if crate::models::is_valid_price(price) {
        Ok(())
    } else {
        Err(StoreError::InvalidPrice(price))
    }
}
