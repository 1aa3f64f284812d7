use std::env;

use anyhow::{Context, bail};
use dotenv::dotenv;
use log::{LevelFilter, error, info, warn};

use pricewatch::MonitorContext;
use pricewatch::config::MonitorConfig;

const USAGE: &str = "usage: pricewatch [check | status | track <url> [target_price]]

  (none)   run the scheduler until Ctrl-C
  check    check every active product once and print the report
  status   print the job table of this process's own scheduler, which is
           never started for this command; it does not inspect another
           running monitor
  track    add a product, scraping it once for its name and first price

Without DATABASE_URL, products and prices live in memory and are lost when
the process exits, so `track` and `check` only make sense with a database.";

/// Warning for commands whose effect doesn't outlive the process.
fn one_shot_caveat(command: &str, has_database: bool) -> Option<&'static str> {
    match command {
        "status" => Some(
            "status only reflects this process's scheduler, which is not running; \
             it cannot see a monitor started elsewhere",
        ),
        "track" | "check" if !has_database => Some(
            "DATABASE_URL is not set, so this runs against an in-memory store \
             and nothing is kept after exit",
        ),
        _ => None,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::Builder::new()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();

    let config = MonitorConfig::new()?;
    let context = MonitorContext::new(config).await?;

    let args: Vec<String> = env::args().skip(1).collect();
    if let Some(caveat) = args
        .first()
        .and_then(|command| one_shot_caveat(command, context.config.database_url.is_some()))
    {
        warn!("{caveat}");
    }
    match args.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        [] => run_scheduler(&context).await,
        ["check"] => {
            let report = context.scheduler.check_all_now().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        ["status"] => {
            println!(
                "{}",
                serde_json::to_string_pretty(&context.scheduler.status())?
            );
            Ok(())
        }
        ["track", url] => track(&context, url, None).await,
        ["track", url, target] => {
            let target = target
                .parse::<f64>()
                .with_context(|| format!("invalid target price {target:?}"))?;
            track(&context, url, Some(target)).await
        }
        _ => bail!(USAGE),
    }
}

async fn run_scheduler(context: &MonitorContext) -> anyhow::Result<()> {
    context.scheduler.start();
    info!("price monitor running, press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("shutting down");
    context.scheduler.stop().await;
    Ok(())
}

async fn track(context: &MonitorContext, url: &str, target: Option<f64>) -> anyhow::Result<()> {
    match context.catalog.track(url, target, None).await {
        Ok(product) => {
            match product.current_price {
                Some(price) => info!("added {} at ${price:.2}", product.name),
                None => info!("added {} (price not available yet)", product.name),
            }
            println!("{}", serde_json::to_string_pretty(&product)?);
            Ok(())
        }
        Err(err) => {
            error!("could not track {url}: {err}");
            Err(err.into())
        }
    }
}
