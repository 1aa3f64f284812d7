use std::time::Duration;

use async_trait::async_trait;
use fantoccini::{Client, ClientBuilder, Locator};
use log::{debug, warn};
use serde_json::json;

use crate::config::ScrapingConfig;
use crate::error::FetchError;
use crate::fetch::FetchStrategy;

/// The heavyweight strategy: renders the page in headless Chrome through a
/// WebDriver server (chromedriver) and returns the resulting DOM.
pub struct BrowserFetcher {
    webdriver_url: String,
    user_agent: String,
    timeout: Duration,
}

impl BrowserFetcher {
    pub fn new(webdriver_url: impl Into<String>, config: &ScrapingConfig) -> Self {
        Self {
            webdriver_url: webdriver_url.into(),
            user_agent: config.user_agent.clone(),
            timeout: config.fetch_timeout,
        }
    }

    fn capabilities(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut caps = serde_json::Map::new();
        caps.insert(
            "goog:chromeOptions".to_string(),
            json!({
                "args": [
                    "--headless",
                    "--no-sandbox",
                    "--disable-dev-shm-usage",
                    "--disable-gpu",
                    "--window-size=1920,1080",
                    format!("--user-agent={}", self.user_agent),
                ]
            }),
        );
        caps
    }

    async fn connect(&self) -> Result<Client, FetchError> {
        let mut builder = ClientBuilder::native();
        builder.capabilities(self.capabilities());
        tokio::time::timeout(self.timeout, builder.connect(&self.webdriver_url))
            .await
            .map_err(|_| FetchError::Timeout(self.timeout))?
            .map_err(|err| FetchError::Browser(format!("could not start session: {err}")))
    }

    async fn render(&self, client: &Client, url: &str) -> Result<String, FetchError> {
        let rendering = async {
            client.goto(url).await?;
            client
                .wait()
                .at_most(self.timeout)
                .for_element(Locator::Css("body"))
                .await?;
            client.source().await
        };
        tokio::time::timeout(self.timeout, rendering)
            .await
            .map_err(|_| FetchError::Timeout(self.timeout))?
            .map_err(|err| FetchError::Browser(err.to_string()))
    }

    async fn close(&self, client: Client) {
        close_within(self.timeout, client.close()).await;
    }
}

/// Awaits a session teardown, giving up after `limit`. Returns whether the
/// session closed cleanly.
async fn close_within<E: std::fmt::Display>(
    limit: Duration,
    closing: impl Future<Output = Result<(), E>>,
) -> bool {
    match tokio::time::timeout(limit, closing).await {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            debug!("failed to close WebDriver session: {err}");
            false
        }
        Err(_) => {
            warn!("closing WebDriver session timed out after {limit:?}, abandoning it");
            false
        }
    }
}

#[async_trait]
impl FetchStrategy for BrowserFetcher {
    fn name(&self) -> &str {
        "browser"
    }

    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let client = self.connect().await?;
        let result = self.render(&client, url).await;
        self.close(client).await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DelayBounds;

    #[test]
    fn chrome_options_carry_the_user_agent() {
        let config = ScrapingConfig {
            fetch_timeout: Duration::from_secs(10),
            fetch_delay: DelayBounds::none(),
            user_agent: "TestAgent/1.0".to_string(),
            webdriver_url: None,
        };
        let fetcher = BrowserFetcher::new("http://localhost:4444", &config);
        let caps = fetcher.capabilities();
        let args = caps["goog:chromeOptions"]["args"].as_array().unwrap();
        assert!(args.iter().any(|arg| arg == "--headless"));
        assert!(args.iter().any(|arg| arg == "--user-agent=TestAgent/1.0"));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_session_close_gives_up_after_the_timeout() {
        let started = tokio::time::Instant::now();
        let closed = close_within(
            Duration::from_secs(10),
            std::future::pending::<Result<(), String>>(),
        )
        .await;
        assert!(!closed);
        assert_eq!(started.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn clean_close_is_reported() {
        assert!(close_within(Duration::from_secs(1), async { Ok::<(), String>(()) }).await);
        assert!(!close_within(Duration::from_secs(1), async { Err::<(), _>("gone") }).await);
    }
}
