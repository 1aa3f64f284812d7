use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type ProductId = i64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub url: String,
    pub asin: String,
    pub target_price: Option<f64>,
    pub current_price: Option<f64>,
    pub image_url: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What a caller supplies to start tracking a product.
#[derive(Debug, Clone)]
pub struct NewProduct {
    pub name: String,
    pub url: String,
    pub asin: String,
    pub target_price: Option<f64>,
    pub image_url: Option<String>,
}

/// Editable fields. `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct ProductUpdate {
    pub name: Option<String>,
    pub target_price: Option<f64>,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct PriceObservation {
    pub id: i64,
    pub product_id: ProductId,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Up,
    Down,
    Flat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trend {
    pub direction: TrendDirection,
    pub change: f64,
    pub change_percent: f64,
    pub current_price: Option<f64>,
    pub previous_price: Option<f64>,
}

impl Trend {
    pub fn neutral() -> Self {
        Self {
            direction: TrendDirection::Flat,
            change: 0.0,
            change_percent: 0.0,
            current_price: None,
            previous_price: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceStatistics {
    pub current_price: f64,
    pub min_price: f64,
    pub max_price: f64,
    pub avg_price: f64,
    pub price_points: usize,
    pub days_tracked: i64,
    pub price_change: f64,
    pub price_change_percent: f64,
}

pub fn is_valid_price(price: f64) -> bool {
    price.is_finite() && price > 0.0
}
