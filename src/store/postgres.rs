use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::info;
use sqlx::postgres::{PgPool, PgPoolOptions};

use super::{PriceStore, ensure_valid_price};
use crate::error::StoreError;
use crate::models::{NewProduct, PriceObservation, Product, ProductId, ProductUpdate};

const SQL_UP: &str = include_str!("../../sql/up.sql");

const PRODUCT_COLUMNS: &str = r#""id", "name", "url", "asin", "target_price", "current_price",
    "image_url", "is_active", "created_at", "updated_at""#;

const UNIQUE_VIOLATION: &str = "23505";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Creates the tables if they don't exist yet.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SQL_UP).execute(&self.pool).await?;
        info!("database schema is up to date");
        Ok(())
    }

    async fn fetch_product(&self, id: ProductId) -> Result<Product, StoreError> {
        self.get_product(id)
            .await?
            .ok_or(StoreError::ProductNotFound(id))
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.code().as_deref() == Some(UNIQUE_VIOLATION),
        _ => false,
    }
}

#[async_trait]
impl PriceStore for PgStore {
    async fn insert_product(&self, product: NewProduct) -> Result<Product, StoreError> {
        if let Some(price) = product.target_price {
            ensure_valid_price(price)?;
        }
        let query = format!(
            r#"INSERT INTO products ("name", "url", "asin", "target_price", "image_url")
               VALUES ($1, $2, $3, $4, $5)
               RETURNING {PRODUCT_COLUMNS}"#
        );
        sqlx::query_as::<_, Product>(&query)
            .bind(&product.name)
            .bind(&product.url)
            .bind(&product.asin)
            .bind(product.target_price)
            .bind(&product.image_url)
            .fetch_one(&self.pool)
            .await
            .map_err(|err| {
                if is_unique_violation(&err) {
                    StoreError::DuplicateAsin(product.asin.clone())
                } else {
                    StoreError::Database(err)
                }
            })
    }

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        let query = format!(r#"SELECT {PRODUCT_COLUMNS} FROM products WHERE "id" = $1"#);
        let product = sqlx::query_as::<_, Product>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(product)
    }

    async fn get_product_by_asin(&self, asin: &str) -> Result<Option<Product>, StoreError> {
        let query = format!(r#"SELECT {PRODUCT_COLUMNS} FROM products WHERE "asin" = $1"#);
        let product = sqlx::query_as::<_, Product>(&query)
            .bind(asin)
            .fetch_optional(&self.pool)
            .await?;
        Ok(product)
    }

    async fn list_active_products(&self) -> Result<Vec<Product>, StoreError> {
        let query = format!(
            r#"SELECT {PRODUCT_COLUMNS} FROM products WHERE "is_active" ORDER BY "id""#
        );
        let products = sqlx::query_as::<_, Product>(&query)
            .fetch_all(&self.pool)
            .await?;
        Ok(products)
    }

    async fn update_product(
        &self,
        id: ProductId,
        update: ProductUpdate,
    ) -> Result<Product, StoreError> {
        if let Some(price) = update.target_price {
            ensure_valid_price(price)?;
        }
        let query = format!(
            r#"UPDATE products SET
                   "name" = COALESCE($2, "name"),
                   "target_price" = COALESCE($3, "target_price"),
                   "image_url" = COALESCE($4, "image_url"),
                   "updated_at" = now()
               WHERE "id" = $1
               RETURNING {PRODUCT_COLUMNS}"#
        );
        sqlx::query_as::<_, Product>(&query)
            .bind(id)
            .bind(update.name)
            .bind(update.target_price)
            .bind(update.image_url)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::ProductNotFound(id))
    }

    async fn set_active(&self, id: ProductId, active: bool) -> Result<Product, StoreError> {
        let query = format!(
            r#"UPDATE products SET "is_active" = $2, "updated_at" = now()
               WHERE "id" = $1
               RETURNING {PRODUCT_COLUMNS}"#
        );
        sqlx::query_as::<_, Product>(&query)
            .bind(id)
            .bind(active)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::ProductNotFound(id))
    }

    async fn purge(&self, id: ProductId) -> Result<(), StoreError> {
        // Observations go with the product through ON DELETE CASCADE.
        let result = sqlx::query(r#"DELETE FROM products WHERE "id" = $1"#)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::ProductNotFound(id));
        }
        Ok(())
    }

    async fn add_observation(
        &self,
        product_id: ProductId,
        price: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<PriceObservation, StoreError> {
        ensure_valid_price(price)?;
        self.fetch_product(product_id).await?;
        let observation = sqlx::query_as::<_, PriceObservation>(
            r#"INSERT INTO price_observations ("product_id", "price", "timestamp")
               VALUES ($1, $2, $3)
               RETURNING "id", "product_id", "price", "timestamp""#,
        )
        .bind(product_id)
        .bind(price)
        .bind(timestamp)
        .fetch_one(&self.pool)
        .await?;
        Ok(observation)
    }

    async fn set_current_price(
        &self,
        product_id: ProductId,
        price: f64,
        at: DateTime<Utc>,
    ) -> Result<Product, StoreError> {
        ensure_valid_price(price)?;
        let query = format!(
            r#"UPDATE products SET "current_price" = $2, "updated_at" = $3
               WHERE "id" = $1
               RETURNING {PRODUCT_COLUMNS}"#
        );
        sqlx::query_as::<_, Product>(&query)
            .bind(product_id)
            .bind(price)
            .bind(at)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::ProductNotFound(product_id))
    }

    async fn record_price(
        &self,
        product_id: ProductId,
        price: f64,
        at: DateTime<Utc>,
    ) -> Result<Product, StoreError> {
        ensure_valid_price(price)?;
        let mut tx = self.pool.begin().await?;

        // Updating first takes the row lock, so concurrent writers for the
        // same product queue up here rather than interleave.
        let query = format!(
            r#"UPDATE products SET "current_price" = $2, "updated_at" = $3
               WHERE "id" = $1
               RETURNING {PRODUCT_COLUMNS}"#
        );
        let product = sqlx::query_as::<_, Product>(&query)
            .bind(product_id)
            .bind(price)
            .bind(at)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(StoreError::ProductNotFound(product_id))?;

        sqlx::query(
            r#"INSERT INTO price_observations ("product_id", "price", "timestamp")
               VALUES ($1, $2, $3)"#,
        )
        .bind(product_id)
        .bind(price)
        .bind(at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(product)
    }

    async fn get_recent_observations(
        &self,
        product_id: ProductId,
        limit: usize,
    ) -> Result<Vec<PriceObservation>, StoreError> {
        let rows = sqlx::query_as::<_, PriceObservation>(
            r#"SELECT "id", "product_id", "price", "timestamp" FROM price_observations
               WHERE "product_id" = $1
               ORDER BY "timestamp" DESC, "id" DESC
               LIMIT $2"#,
        )
        .bind(product_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn observations_since(
        &self,
        product_id: ProductId,
        since: DateTime<Utc>,
    ) -> Result<Vec<PriceObservation>, StoreError> {
        let rows = sqlx::query_as::<_, PriceObservation>(
            r#"SELECT "id", "product_id", "price", "timestamp" FROM price_observations
               WHERE "product_id" = $1 AND "timestamp" >= $2
               ORDER BY "timestamp" DESC, "id" DESC"#,
        )
        .bind(product_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn delete_observations_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(r#"DELETE FROM price_observations WHERE "timestamp" < $1"#)
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
