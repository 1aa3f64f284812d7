use std::time::Duration;

use async_trait::async_trait;
use log::{error, info, warn};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::SlackConfig;
use crate::models::Product;

const SLACK_API: &str = "https://slack.com/api";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NotificationEvent {
    PriceChanged {
        product: Product,
        old_price: f64,
        new_price: f64,
        percent_change: f64,
    },
    TargetReached {
        product: Product,
    },
    ScrapeError {
        product: Product,
        message: String,
    },
}

impl NotificationEvent {
    pub fn product(&self) -> &Product {
        match self {
            NotificationEvent::PriceChanged { product, .. }
            | NotificationEvent::TargetReached { product }
            | NotificationEvent::ScrapeError { product, .. } => product,
        }
    }

    /// Human-readable message, formatted with Slack mrkdwn.
    pub fn render(&self) -> String {
        match self {
            NotificationEvent::PriceChanged {
                product,
                old_price,
                new_price,
                percent_change,
            } => {
                let arrow = if new_price < old_price { "📉" } else { "📈" };
                let target = match product.target_price {
                    Some(target) if *new_price <= target => format!("${target:.2} ✅"),
                    Some(target) => format!("${target:.2}"),
                    None => "not set".to_string(),
                };
                format!(
                    "{arrow} *Price Alert: {name}*\n\n\
                     💰 *Price Change:* ${old_price:.2} → ${new_price:.2}\n\
                     📊 *Change:* ${diff:.2} ({percent_change:+.1}%)\n\
                     🎯 *Target Price:* {target}\n\n\
                     🔗 <{url}|View on Amazon>",
                    name = product.name,
                    diff = (new_price - old_price).abs(),
                    url = product.url,
                )
            }
            NotificationEvent::TargetReached { product } => {
                let current = product.current_price.unwrap_or_default();
                let target = product.target_price.unwrap_or_default();
                format!(
                    "🎯 *Target Price Reached!*\n\n*{name}*\n\n\
                     💰 *Current Price:* ${current:.2}\n\
                     🎯 *Target Price:* ${target:.2}\n\
                     ✅ *Savings:* ${savings:.2}\n\n\
                     🔗 <{url}|Buy Now on Amazon>",
                    name = product.name,
                    savings = target - current,
                    url = product.url,
                )
            }
            NotificationEvent::ScrapeError { product, message } => format!(
                "⚠️ *Scraping Error*\n\n*Product:* {name} ({asin})\n*Error:* {message}\n\
                 *URL:* {url}\n\nPlease check the product URL and try again.",
                name = product.name,
                asin = product.asin,
                url = product.url,
            ),
        }
    }
}

/// Delivers alert events somewhere a human will see them. Returns whether
/// delivery succeeded; callers log failures and move on.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &NotificationEvent) -> bool;
}

/// Writes events to the log. Used when no Slack token is configured.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: &NotificationEvent) -> bool {
        info!("notification for {}:\n{}", event.product().asin, event.render());
        true
    }
}

#[derive(Serialize)]
struct PostMessage<'a> {
    channel: &'a str,
    text: &'a str,
    unfurl_links: bool,
    unfurl_media: bool,
}

#[derive(Deserialize)]
struct SlackResponse {
    ok: bool,
    error: Option<String>,
}

pub struct SlackNotifier {
    client: Client,
    api_base: String,
    bot_token: String,
    channel: String,
}

impl SlackNotifier {
    pub fn new(config: &SlackConfig) -> anyhow::Result<Self> {
        Self::with_api_base(config, SLACK_API)
    }

    pub fn with_api_base(config: &SlackConfig, api_base: &str) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            bot_token: config.bot_token.clone(),
            channel: config.channel.clone(),
        })
    }

    async fn call(&self, method: &str, body: Option<&PostMessage<'_>>) -> anyhow::Result<()> {
        let request = self
            .client
            .post(format!("{}/{}", self.api_base, method))
            .bearer_auth(&self.bot_token);
        let request = match body {
            Some(body) => request.json(body),
            None => request,
        };
        let response: SlackResponse = request.send().await?.error_for_status()?.json().await?;
        if response.ok {
            Ok(())
        } else {
            Err(anyhow::anyhow!(
                "Slack API error: {}",
                response.error.unwrap_or_else(|| "unknown".to_string())
            ))
        }
    }

    /// Checks the token against `auth.test`.
    pub async fn test_connection(&self) -> bool {
        match self.call("auth.test", None).await {
            Ok(()) => true,
            Err(err) => {
                error!("Slack connection test failed: {err}");
                false
            }
        }
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn notify(&self, event: &NotificationEvent) -> bool {
        let text = event.render();
        let message = PostMessage {
            channel: &self.channel,
            text: &text,
            unfurl_links: false,
            unfurl_media: false,
        };
        match self.call("chat.postMessage", Some(&message)).await {
            Ok(()) => {
                info!("Slack alert sent for {}", event.product().asin);
                true
            }
            Err(err) => {
                warn!(
                    "failed to send Slack alert for {}: {err}",
                    event.product().asin
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn product(target_price: Option<f64>, current_price: Option<f64>) -> Product {
        Product {
            id: 7,
            name: "Acme Widget".to_string(),
            url: "https://www.amazon.com/dp/B08N5WRWNW".to_string(),
            asin: "B08N5WRWNW".to_string(),
            target_price,
            current_price,
            image_url: None,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn price_change_message_shows_signed_percent() {
        let event = NotificationEvent::PriceChanged {
            product: product(Some(80.0), Some(90.0)),
            old_price: 100.0,
            new_price: 90.0,
            percent_change: -10.0,
        };
        let text = event.render();
        assert!(text.contains("$100.00 → $90.00"));
        assert!(text.contains("(-10.0%)"));
        assert!(text.contains("📉"));
        assert!(!text.contains("✅"));
    }

    #[test]
    fn target_message_shows_savings() {
        let event = NotificationEvent::TargetReached {
            product: product(Some(50.0), Some(45.5)),
        };
        assert!(event.render().contains("*Savings:* $4.50"));
    }

    #[test]
    fn scrape_error_message_names_the_product_and_url() {
        let event = NotificationEvent::ScrapeError {
            product: product(None, None),
            message: "timed out".to_string(),
        };
        let text = event.render();
        assert!(text.contains("B08N5WRWNW"));
        assert!(text.contains("https://www.amazon.com/dp/B08N5WRWNW"));
        assert!(text.contains("timed out"));
    }

    #[tokio::test]
    async fn unreachable_slack_reports_failure_instead_of_erroring() {
        let config = SlackConfig {
            bot_token: "xoxb-test".to_string(),
            channel: "#alerts".to_string(),
        };
        // Port 9 (discard) on localhost refuses connections.
        let notifier = SlackNotifier::with_api_base(&config, "http://127.0.0.1:9").unwrap();
        let event = NotificationEvent::TargetReached {
            product: product(Some(50.0), Some(49.0)),
        };
        assert!(!notifier.notify(&event).await);
    }
}
