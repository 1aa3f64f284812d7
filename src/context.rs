use std::sync::Arc;

use anyhow::Context;
use log::{info, warn};

use crate::catalog::Catalog;
use crate::config::MonitorConfig;
use crate::notifier::{LogNotifier, Notifier, SlackNotifier};
use crate::pipeline::UpdatePipeline;
use crate::scheduler::Scheduler;
use crate::scraper::Scraper;
use crate::store::{MemoryStore, PgStore, PriceStore};

/// Everything the monitor needs, wired from one configuration.
pub struct MonitorContext {
    pub config: MonitorConfig,
    pub pipeline: Arc<UpdatePipeline>,
    pub scheduler: Scheduler,
    pub catalog: Catalog,
}

impl MonitorContext {
    pub async fn new(config: MonitorConfig) -> anyhow::Result<Self> {
        let store = open_store(&config).await?;
        let notifier = build_notifier(&config).await?;
        let scraper =
            Scraper::from_config(&config.scraping).context("failed to build HTTP client")?;
        Self::assemble(config, scraper, store, notifier)
    }

    /// Wires already-built parts together. Tests use this to plug in a
    /// scripted scraper and an in-memory store.
    pub fn assemble(
        config: MonitorConfig,
        scraper: Scraper,
        store: Arc<dyn PriceStore>,
        notifier: Arc<dyn Notifier>,
    ) -> anyhow::Result<Self> {
        let pipeline = Arc::new(UpdatePipeline::new(
            scraper,
            store,
            notifier,
            config.pipeline.clone(),
        ));
        let scheduler = Scheduler::new(pipeline.clone(), config.scheduler.clone());
        let catalog = Catalog::new(pipeline.clone())?;
        Ok(Self {
            config,
            pipeline,
            scheduler,
            catalog,
        })
    }
}

async fn open_store(config: &MonitorConfig) -> anyhow::Result<Arc<dyn PriceStore>> {
    match &config.database_url {
        Some(url) => {
            let store = PgStore::connect(url)
                .await
                .context("failed to connect to DATABASE_URL")?;
            store.migrate().await.context("failed to create schema")?;
            info!("using Postgres price store");
            Ok(Arc::new(store))
        }
        None => {
            warn!("DATABASE_URL not set, price history will not survive a restart");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

async fn build_notifier(config: &MonitorConfig) -> anyhow::Result<Arc<dyn Notifier>> {
    match &config.slack {
        Some(slack) => {
            let notifier = SlackNotifier::new(slack)?;
            if !notifier.test_connection().await {
                warn!("Slack token was rejected, alerts will fail until it is fixed");
            }
            Ok(Arc::new(notifier))
        }
        None => {
            info!("SLACK_BOT_TOKEN not set, alerts go to the log");
            Ok(Arc::new(LogNotifier))
        }
    }
}
