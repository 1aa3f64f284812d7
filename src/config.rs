use std::ops::RangeInclusive;
use std::time::Duration;

use anyhow::{Context, ensure};
use serde::{Deserialize, de::DeserializeOwned};

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// The env vars read by the monitor. Every value has a default so an empty
/// environment yields a working (in-memory, log-only) configuration.
#[derive(Debug, Deserialize)]
pub struct MonitorEnv {
    #[serde(default = "default_scrape_interval_hours")]
    scrape_interval_hours: u64,
    #[serde(default = "default_price_change_threshold")]
    price_change_threshold: f64,
    #[serde(default = "default_retention_days")]
    retention_days: i64,
    #[serde(default = "default_cleanup_hour")]
    cleanup_hour: u32,
    #[serde(default = "default_min_scrape_delay")]
    min_scrape_delay: f64,
    #[serde(default = "default_max_scrape_delay")]
    max_scrape_delay: f64,
    #[serde(default = "default_min_fetch_delay")]
    min_fetch_delay: f64,
    #[serde(default = "default_max_fetch_delay")]
    max_fetch_delay: f64,
    #[serde(default = "default_fetch_timeout_secs")]
    fetch_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    user_agent: String,
    #[serde(default = "default_true")]
    enable_notifications: bool,
    webdriver_url: Option<String>,
    database_url: Option<String>,
    slack_bot_token: Option<String>,
    #[serde(default = "default_slack_channel")]
    slack_channel: String,
}

fn default_scrape_interval_hours() -> u64 {
    6
}
fn default_price_change_threshold() -> f64 {
    5.0
}
fn default_retention_days() -> i64 {
    90
}
fn default_cleanup_hour() -> u32 {
    3
}
fn default_min_scrape_delay() -> f64 {
    2.0
}
fn default_max_scrape_delay() -> f64 {
    5.0
}
fn default_min_fetch_delay() -> f64 {
    1.0
}
fn default_max_fetch_delay() -> f64 {
    3.0
}
fn default_fetch_timeout_secs() -> u64 {
    10
}
fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}
fn default_true() -> bool {
    true
}
fn default_slack_channel() -> String {
    "#price-alerts".to_string()
}

const MAX_INTERVAL_HOURS: u64 = 24 * 365;
const MAX_RETENTION_DAYS: i64 = 36_500;
const MAX_FETCH_TIMEOUT_SECS: u64 = 60 * 60;
const MAX_DELAY_SECS: f64 = 60.0 * 60.0;

/// Bounds for a randomized pause, in seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct DelayBounds {
    pub min: Duration,
    pub max: Duration,
}

impl DelayBounds {
    pub fn from_secs(min: f64, max: f64) -> anyhow::Result<Self> {
        ensure!(
            min.is_finite() && max.is_finite() && min >= 0.0,
            "delay bounds must be finite and non-negative, got {min}..{max}"
        );
        ensure!(min <= max, "minimum delay {min}s exceeds maximum delay {max}s");
        ensure!(
            max <= MAX_DELAY_SECS,
            "maximum delay {max}s exceeds the {MAX_DELAY_SECS}s limit"
        );
        Ok(Self {
            min: Duration::try_from_secs_f64(min)?,
            max: Duration::try_from_secs_f64(max)?,
        })
    }

    pub fn none() -> Self {
        Self {
            min: Duration::ZERO,
            max: Duration::ZERO,
        }
    }

    pub fn as_range(&self) -> RangeInclusive<Duration> {
        self.min..=self.max
    }
}

#[derive(Debug, Clone)]
pub struct ScrapingConfig {
    pub fetch_timeout: Duration,
    pub fetch_delay: DelayBounds,
    pub user_agent: String,
    pub webdriver_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Percent.
    pub price_change_threshold: f64,
    pub enable_notifications: bool,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub scrape_interval: Duration,
    pub item_delay: DelayBounds,
    pub retention_days: i64,
    pub cleanup_hour: u32,
    pub notify_on_error: bool,
}

#[derive(Debug, Clone)]
pub struct SlackConfig {
    pub bot_token: String,
    pub channel: String,
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub scraping: ScrapingConfig,
    pub pipeline: PipelineConfig,
    pub scheduler: SchedulerConfig,
    pub database_url: Option<String>,
    pub slack: Option<SlackConfig>,
}

impl MonitorConfig {
    pub fn new() -> anyhow::Result<Self> {
        let env = MonitorEnv::load_from_env()?;
        Self::from_env(env)
    }

    pub fn from_env(env: MonitorEnv) -> anyhow::Result<Self> {
        ensure!(
            (1..=MAX_INTERVAL_HOURS).contains(&env.scrape_interval_hours),
            "SCRAPE_INTERVAL_HOURS must be in 1..={MAX_INTERVAL_HOURS}"
        );
        ensure!(
            env.price_change_threshold.is_finite() && env.price_change_threshold >= 0.0,
            "PRICE_CHANGE_THRESHOLD must be a non-negative percentage"
        );
        ensure!(
            (1..=MAX_RETENTION_DAYS).contains(&env.retention_days),
            "RETENTION_DAYS must be in 1..={MAX_RETENTION_DAYS}"
        );
        ensure!(env.cleanup_hour < 24, "CLEANUP_HOUR must be in 0..=23");
        ensure!(
            (1..=MAX_FETCH_TIMEOUT_SECS).contains(&env.fetch_timeout_secs),
            "FETCH_TIMEOUT_SECS must be in 1..={MAX_FETCH_TIMEOUT_SECS}"
        );

        let item_delay = DelayBounds::from_secs(env.min_scrape_delay, env.max_scrape_delay)
            .context("invalid MIN_SCRAPE_DELAY/MAX_SCRAPE_DELAY")?;
        let fetch_delay = DelayBounds::from_secs(env.min_fetch_delay, env.max_fetch_delay)
            .context("invalid MIN_FETCH_DELAY/MAX_FETCH_DELAY")?;

        let slack = env
            .slack_bot_token
            .filter(|token| !token.trim().is_empty())
            .map(|bot_token| SlackConfig {
                bot_token,
                channel: env.slack_channel.clone(),
            });

        Ok(Self {
            scraping: ScrapingConfig {
                fetch_timeout: Duration::from_secs(env.fetch_timeout_secs),
                fetch_delay,
                user_agent: env.user_agent,
                webdriver_url: env.webdriver_url.filter(|url| !url.trim().is_empty()),
            },
            pipeline: PipelineConfig {
                price_change_threshold: env.price_change_threshold,
                enable_notifications: env.enable_notifications,
            },
            scheduler: SchedulerConfig {
                scrape_interval: Duration::from_secs(env.scrape_interval_hours * 60 * 60),
                item_delay,
                retention_days: env.retention_days,
                cleanup_hour: env.cleanup_hour,
                notify_on_error: env.enable_notifications,
            },
            database_url: env.database_url.filter(|url| !url.trim().is_empty()),
            slack,
        })
    }
}

impl Default for MonitorEnv {
    fn default() -> Self {
        Self {
            scrape_interval_hours: default_scrape_interval_hours(),
            price_change_threshold: default_price_change_threshold(),
            retention_days: default_retention_days(),
            cleanup_hour: default_cleanup_hour(),
            min_scrape_delay: default_min_scrape_delay(),
            max_scrape_delay: default_max_scrape_delay(),
            min_fetch_delay: default_min_fetch_delay(),
            max_fetch_delay: default_max_fetch_delay(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            user_agent: default_user_agent(),
            enable_notifications: true,
            webdriver_url: None,
            database_url: None,
            slack_bot_token: None,
            slack_channel: default_slack_channel(),
        }
    }
}

// Extension trait.
pub trait LoadFromEnv: DeserializeOwned {
    fn load_from_env() -> anyhow::Result<Self> {
        // Don't throw an error if .env file doesn't exist.
        let _ = dotenv::dotenv();
        let config =
            envy::from_env::<Self>().context("failed to load env variables into config struct")?;
        Ok(config)
    }
}

impl<T: DeserializeOwned> LoadFromEnv for T {}
