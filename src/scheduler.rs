//! Background jobs: the periodic fleet price check and the daily retention
//! cleanup.
//!
//! Each job runs on its own task and never overlaps with itself: the next
//! firing is computed only after the current run finishes, and firings that
//! came due meanwhile are skipped. Products within a fleet check are handled
//! one at a time with a randomized pause after each, which keeps the request
//! rate against the source low. Stopping the scheduler prevents new firings;
//! a fleet check in progress stops before its next product.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Days, Local, TimeDelta, TimeZone, Utc};
use log::{error, info, warn};
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::SchedulerConfig;
use crate::error::{MonitorError, Result};
use crate::models::{Product, ProductId};
use crate::pipeline::UpdatePipeline;
use crate::ratelimit::RandomDelay;

pub const PRICE_CHECK_JOB: &str = "price_check_job";
pub const CLEANUP_JOB: &str = "cleanup_job";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Idle,
    Running,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStatus {
    pub id: String,
    pub name: String,
    pub next_run_time: Option<DateTime<Utc>>,
    pub last_run_time: Option<DateTime<Utc>>,
    pub state: JobState,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub jobs: Vec<JobStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedCheck {
    pub product_id: ProductId,
    pub asin: String,
    pub message: String,
}

/// Outcome of one pass over the active products.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FleetReport {
    pub checked: usize,
    pub updated: usize,
    pub failed: Vec<FailedCheck>,
    /// True when shutdown cut the pass short.
    pub interrupted: bool,
}

struct Shared {
    pipeline: Arc<UpdatePipeline>,
    config: SchedulerConfig,
    item_delay: RandomDelay,
    jobs: Mutex<Vec<JobStatus>>,
    last_report: Mutex<Option<FleetReport>>,
}

struct Running {
    token: CancellationToken,
    tracker: TaskTracker,
}

pub struct Scheduler {
    shared: Arc<Shared>,
    running: Mutex<Option<Running>>,
}

impl Scheduler {
    pub fn new(pipeline: Arc<UpdatePipeline>, config: SchedulerConfig) -> Self {
        let jobs = vec![
            idle_job(PRICE_CHECK_JOB, "Check all product prices"),
            idle_job(CLEANUP_JOB, "Clean up old price data"),
        ];
        let shared = Shared {
            pipeline,
            item_delay: RandomDelay::new(config.item_delay.clone()),
            config,
            jobs: Mutex::new(jobs),
            last_report: Mutex::new(None),
        };
        Self {
            shared: Arc::new(shared),
            running: Mutex::new(None),
        }
    }

    /// Spawns both job loops. Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if running.is_some() {
            warn!("price scheduler already running");
            return;
        }

        let token = CancellationToken::new();
        let tracker = TaskTracker::new();
        tracker.spawn(price_check_loop(self.shared.clone(), token.clone()));
        tracker.spawn(cleanup_loop(self.shared.clone(), token.clone()));
        tracker.close();

        info!(
            "price scheduler started - checking every {} hours",
            self.shared.config.scrape_interval.as_secs() / 3600
        );
        *running = Some(Running { token, tracker });
    }

    /// Stops new firings and waits for the job loops to exit.
    pub async fn stop(&self) {
        let running = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(Running { token, tracker }) = running else {
            return;
        };
        token.cancel();
        tracker.wait().await;
        for job in self.shared.jobs_guard().iter_mut() {
            job.next_run_time = None;
        }
        info!("price scheduler stopped");
    }

    pub fn status(&self) -> SchedulerStatus {
        let running = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|running| {
                !running.token.is_cancelled() && !running.tracker.is_empty()
            });
        SchedulerStatus {
            running,
            jobs: self.shared.jobs_guard().clone(),
        }
    }

    /// The report of the most recent fleet check, scheduled or manual.
    pub fn last_fleet_report(&self) -> Option<FleetReport> {
        self.shared
            .last_report
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Checks one product right away, propagating any failure.
    pub async fn check_product_now(&self, id: ProductId) -> Result<Option<Product>> {
        let product = self
            .shared
            .pipeline
            .store()
            .get_product(id)
            .await?
            .ok_or(MonitorError::ProductNotFound(id))?;
        self.shared.pipeline.check_product(&product).await
    }

    /// Runs a full fleet check now, outside the schedule.
    pub async fn check_all_now(&self) -> Result<FleetReport> {
        self.shared.run_fleet_check(&CancellationToken::new()).await
    }

    /// Runs retention cleanup now, returning the number of deleted rows.
    pub async fn run_cleanup_now(&self) -> Result<u64> {
        self.shared.run_cleanup().await
    }
}

fn idle_job(id: &str, name: &str) -> JobStatus {
    JobStatus {
        id: id.to_string(),
        name: name.to_string(),
        next_run_time: None,
        last_run_time: None,
        state: JobState::Idle,
    }
}

impl Shared {
    fn jobs_guard(&self) -> std::sync::MutexGuard<'_, Vec<JobStatus>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update_job(&self, id: &str, update: impl FnOnce(&mut JobStatus)) {
        if let Some(job) = self.jobs_guard().iter_mut().find(|job| job.id == id) {
            update(job);
        }
    }

    async fn run_fleet_check(&self, token: &CancellationToken) -> Result<FleetReport> {
        let products = self.pipeline.store().list_active_products().await?;
        info!("starting price check for {} products", products.len());

        let mut report = FleetReport::default();
        for product in products {
            if token.is_cancelled() {
                warn!("shutdown requested, stopping price check early");
                report.interrupted = true;
                break;
            }
            report.checked += 1;

            match self.check_isolated(&product).await {
                Ok(Some(_)) => report.updated += 1,
                Ok(None) => {}
                Err(message) => {
                    error!(
                        "error checking price for product {} ({}) at {}: {message}",
                        product.id, product.asin, product.url
                    );
                    if self.config.notify_on_error {
                        self.pipeline.report_failure(&product, message.clone()).await;
                    }
                    report.failed.push(FailedCheck {
                        product_id: product.id,
                        asin: product.asin.clone(),
                        message,
                    });
                }
            }

            tokio::select! {
                _ = token.cancelled() => {}
                _ = self.item_delay.wait() => {}
            }
        }

        info!(
            "completed price check cycle: {} checked, {} updated, {} failed",
            report.checked,
            report.updated,
            report.failed.len()
        );
        *self
            .last_report
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(report.clone());
        Ok(report)
    }

    /// Runs one product's check on its own task so that even a panic stays
    /// contained to that product.
    async fn check_isolated(&self, product: &Product) -> std::result::Result<Option<Product>, String> {
        let pipeline = self.pipeline.clone();
        let product = product.clone();
        let handle = tokio::spawn(async move { pipeline.check_product(&product).await });
        match handle.await {
            Ok(result) => result.map_err(|err| err.to_string()),
            Err(join_err) => Err(format!("check aborted: {join_err}")),
        }
    }

    async fn run_cleanup(&self) -> Result<u64> {
        let retention_days = self.config.retention_days;
        let cutoff = window_start(Utc::now(), retention_days)?;
        let deleted = self
            .pipeline
            .store()
            .delete_observations_older_than(cutoff)
            .await?;
        info!(
            "cleaned up {deleted} price observations older than {retention_days} days"
        );
        Ok(deleted)
    }
}

async fn price_check_loop(shared: Arc<Shared>, token: CancellationToken) {
    let interval = shared.config.scrape_interval.max(Duration::from_secs(1));
    let mut next = Instant::now() + interval;
    loop {
        shared.update_job(PRICE_CHECK_JOB, |job| {
            job.next_run_time = wall_clock_after(next.saturating_duration_since(Instant::now()));
        });
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep_until(next) => {}
        }

        shared.update_job(PRICE_CHECK_JOB, |job| {
            job.state = JobState::Running;
            job.last_run_time = Some(Utc::now());
        });
        if let Err(err) = shared.run_fleet_check(&token).await {
            error!("price check run failed: {err}");
        }
        shared.update_job(PRICE_CHECK_JOB, |job| job.state = JobState::Idle);

        let now = Instant::now();
        next += interval;
        if next <= now {
            warn!("price check overran its interval, skipping missed firings");
            while next <= now {
                next += interval;
            }
        }
    }
}

async fn cleanup_loop(shared: Arc<Shared>, token: CancellationToken) {
    let hour = shared.config.cleanup_hour;
    loop {
        let now = Local::now();
        let wait = match next_daily_run(&now, hour) {
            Some(at) => (at - now).to_std().unwrap_or(Duration::ZERO),
            None => Duration::from_secs(24 * 60 * 60),
        };
        shared.update_job(CLEANUP_JOB, |job| job.next_run_time = wall_clock_after(wait));
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }

        shared.update_job(CLEANUP_JOB, |job| {
            job.state = JobState::Running;
            job.last_run_time = Some(Utc::now());
        });
        if let Err(err) = shared.run_cleanup().await {
            error!("error during cleanup: {err}");
        }
        shared.update_job(CLEANUP_JOB, |job| job.state = JobState::Idle);
    }
}

fn wall_clock_after(wait: Duration) -> Option<DateTime<Utc>> {
    let wait = TimeDelta::from_std(wait).ok()?;
    Utc::now().checked_add_signed(wait)
}

/// `now` minus `days` days. Negative or unrepresentable windows are errors.
pub fn window_start(now: DateTime<Utc>, days: i64) -> Result<DateTime<Utc>> {
    if days < 0 {
        return Err(MonitorError::InvalidWindow(days));
    }
    TimeDelta::try_days(days)
        .and_then(|window| now.checked_sub_signed(window))
        .ok_or(MonitorError::InvalidWindow(days))
}

/// The first `hour:00` strictly after `now` in `now`'s time zone. Days where
/// that hour does not exist (DST gaps) are skipped.
pub fn next_daily_run<Tz: TimeZone>(now: &DateTime<Tz>, hour: u32) -> Option<DateTime<Tz>> {
    let tz = now.timezone();
    (0..=2).find_map(|offset| {
        let date = now.date_naive().checked_add_days(Days::new(offset))?;
        let candidate = tz
            .from_local_datetime(&date.and_hms_opt(hour, 0, 0)?)
            .earliest()?;
        (candidate > *now).then_some(candidate)
    })
}

#[cfg(test)]
mod tests {
    use chrono::{FixedOffset, Timelike};

    use super::*;

    #[test]
    fn retention_window_rejects_unrepresentable_spans() {
        let now = Utc::now();
        assert_eq!(window_start(now, 0).unwrap(), now);
        assert!(matches!(
            window_start(now, 100_000_000),
            Err(MonitorError::InvalidWindow(100_000_000))
        ));
        assert!(matches!(window_start(now, -1), Err(MonitorError::InvalidWindow(-1))));
        assert!(window_start(now, i64::MAX).is_err());
    }

    #[test]
    fn wall_clock_after_huge_wait_is_none() {
        assert!(wall_clock_after(Duration::from_secs(60)).is_some());
        assert!(wall_clock_after(Duration::from_secs(u64::MAX)).is_none());
    }

    #[test]
    fn next_daily_run_later_today() {
        let tz = FixedOffset::west_opt(5 * 3600).unwrap();
        let now = tz.with_ymd_and_hms(2026, 3, 1, 1, 30, 0).unwrap();
        let next = next_daily_run(&now, 3).unwrap();
        assert_eq!(next, tz.with_ymd_and_hms(2026, 3, 1, 3, 0, 0).unwrap());
    }

    #[test]
    fn next_daily_run_rolls_to_tomorrow() {
        let tz = FixedOffset::east_opt(0).unwrap();
        let now = tz.with_ymd_and_hms(2026, 12, 31, 3, 0, 0).unwrap();
        let next = next_daily_run(&now, 3).unwrap();
        assert_eq!(next, tz.with_ymd_and_hms(2027, 1, 1, 3, 0, 0).unwrap());
        assert_eq!(next.hour(), 3);
    }
}
