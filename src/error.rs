use std::fmt;
use std::time::Duration;

/// A single fetch strategy failed to produce markup.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("browser error: {0}")]
    Browser(String),
}

/// Outcome of one strategy inside a scrape run.
#[derive(Debug)]
pub enum AttemptFailure {
    FetchFailure { strategy: String, cause: String },
    ExtractionEmpty { strategy: String },
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptFailure::FetchFailure { strategy, cause } => {
                write!(f, "{strategy}: fetch failed ({cause})")
            }
            AttemptFailure::ExtractionEmpty { strategy } => {
                write!(f, "{strategy}: no price found on page")
            }
        }
    }
}

/// Every fetch strategy was exhausted without finding a price.
#[derive(Debug, thiserror::Error)]
#[error("could not scrape a price from {}: [{}]", .url, join_attempts(.attempts))]
pub struct ScrapeFailure {
    pub url: String,
    pub attempts: Vec<AttemptFailure>,
    /// Whatever was extracted without a price, e.g. a product name.
    pub partial: Option<crate::extractor::ProductInfo>,
}

fn join_attempts(attempts: &[AttemptFailure]) -> String {
    attempts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("product {0} not found")]
    ProductNotFound(i64),

    #[error("a product with ASIN {0} is already tracked")]
    DuplicateAsin(String),

    #[error("invalid price {0}: prices must be positive")]
    InvalidPrice(f64),

    #[error("concurrent write to product {0}")]
    Conflict(i64),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        match self {
            StoreError::Conflict(_) => true,
            // serialization_failure / deadlock_detected
            StoreError::Database(sqlx::Error::Database(db)) => {
                matches!(db.code().as_deref(), Some("40001") | Some("40P01"))
            }
            _ => false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("could not find an ASIN in {0}")]
    InvalidAsin(String),

    #[error("product {product_id} ({asin}) at {url}: {failure}")]
    Scrape {
        product_id: i64,
        asin: String,
        url: String,
        failure: ScrapeFailure,
    },

    #[error("product {product_id} ({asin}): write conflicted twice: {source}")]
    PersistenceConflict {
        product_id: i64,
        asin: String,
        source: StoreError,
    },

    #[error("product {0} not found")]
    ProductNotFound(i64),

    #[error("a window of {0} days is out of range")]
    InvalidWindow(i64),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for MonitorError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ProductNotFound(id) => MonitorError::ProductNotFound(id),
            other => MonitorError::Store(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, MonitorError>;
