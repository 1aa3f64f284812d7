pub mod analytics;
pub mod asin;
pub mod browser;
pub mod catalog;
pub mod config;
pub mod context;
pub mod error;
pub mod extractor;
pub mod fetch;
pub mod models;
pub mod notifier;
pub mod pipeline;
pub mod ratelimit;
pub mod requests;
pub mod scheduler;
pub mod scraper;
pub mod store;
mod text_manipulators;

pub use crate::catalog::Catalog;
pub use crate::context::MonitorContext;
pub use crate::error::{MonitorError, Result};
pub use crate::pipeline::UpdatePipeline;
pub use crate::scheduler::Scheduler;
pub use crate::scraper::Scraper;
pub use crate::text_manipulators::{Availability, parse_price};
