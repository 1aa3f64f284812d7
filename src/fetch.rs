use async_trait::async_trait;

use crate::error::FetchError;

/// One way of turning a product URL into page markup.
#[async_trait]
pub trait FetchStrategy: Send + Sync {
    fn name(&self) -> &str;
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;
}
