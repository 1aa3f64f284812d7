mod common;

use std::time::Duration;

use chrono::Utc;
use pricewatch::MonitorError;
use pricewatch::config::DelayBounds;
use pricewatch::scheduler::{CLEANUP_JOB, JobState, PRICE_CHECK_JOB};
use pricewatch::store::PriceStore;

use common::{Harness, test_config};

#[tokio::test]
async fn failing_product_does_not_stop_the_fleet() {
    let harness = Harness::new();
    let mut products = Vec::new();
    for n in 1..=5 {
        let product = harness.add_product(&format!("B00000000{n}"), None).await;
        if n != 3 {
            harness.pages.set_price(&product.url, 10.0 * n as f64);
        }
        products.push(product);
    }

    let report = harness.context.scheduler.check_all_now().await.unwrap();

    assert_eq!(report.checked, 5);
    assert_eq!(report.updated, 4);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].product_id, products[2].id);
    assert_eq!(report.failed[0].asin, "B000000003");
    assert!(!report.interrupted);

    for (i, product) in products.iter().enumerate() {
        let expected = if i == 2 { 0 } else { 1 };
        assert_eq!(harness.observation_count(product.id).await, expected);
    }
    assert_eq!(harness.notifier.scrape_errors(), vec![products[2].id]);
}

#[tokio::test]
async fn failures_are_not_notified_when_notifications_are_off() {
    let mut config = test_config();
    config.scheduler.notify_on_error = false;
    let harness = Harness::with_config(config);
    harness.add_product("B000000001", None).await;

    let report = harness.context.scheduler.check_all_now().await.unwrap();

    assert_eq!(report.failed.len(), 1);
    assert!(harness.notifier.events().is_empty());
}

#[tokio::test]
async fn inactive_products_are_skipped() {
    let harness = Harness::new();
    let product = harness.add_product("B000000001", None).await;
    harness.pages.set_price(&product.url, 10.0);
    harness.context.catalog.deactivate(product.id).await.unwrap();

    let report = harness.context.scheduler.check_all_now().await.unwrap();

    assert_eq!(report.checked, 0);
    assert_eq!(harness.pages.fetches(), 0);
}

#[tokio::test]
async fn cleanup_deletes_only_observations_past_retention() {
    let harness = Harness::new();
    let product = harness.add_product("B000000001", None).await;
    let now = Utc::now();
    harness
        .store
        .add_observation(product.id, 12.0, now - chrono::Duration::days(91))
        .await
        .unwrap();
    harness
        .store
        .add_observation(product.id, 11.0, now - chrono::Duration::days(89))
        .await
        .unwrap();

    let deleted = harness.context.scheduler.run_cleanup_now().await.unwrap();

    assert_eq!(deleted, 1);
    let remaining = harness
        .store
        .get_recent_observations(product.id, 10)
        .await
        .unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].price, 11.0);
}

#[tokio::test]
async fn manual_check_of_unknown_product_fails() {
    let harness = Harness::new();

    let err = harness.context.scheduler.check_product_now(42).await.unwrap_err();

    assert!(matches!(err, MonitorError::ProductNotFound(42)));
}

#[tokio::test]
async fn manual_check_propagates_scrape_failures() {
    let harness = Harness::new();
    let product = harness.add_product("B000000001", None).await;

    let err = harness
        .context
        .scheduler
        .check_product_now(product.id)
        .await
        .unwrap_err();

    assert!(matches!(err, MonitorError::Scrape { .. }));
    assert!(harness.notifier.events().is_empty());
}

#[tokio::test]
async fn status_lists_both_jobs_while_stopped() {
    let harness = Harness::new();

    let status = harness.context.scheduler.status();

    assert!(!status.running);
    let ids: Vec<_> = status.jobs.iter().map(|job| job.id.as_str()).collect();
    assert_eq!(ids, vec![PRICE_CHECK_JOB, CLEANUP_JOB]);
    assert_eq!(status.jobs[0].name, "Check all product prices");
    assert_eq!(status.jobs[1].name, "Clean up old price data");
    assert!(status.jobs.iter().all(|job| job.next_run_time.is_none()));
}

#[tokio::test(start_paused = true)]
async fn scheduled_check_fires_after_one_interval() {
    let harness = Harness::new();
    let product = harness.add_product("B000000001", None).await;
    harness.pages.set_price(&product.url, 15.0);
    let scheduler = &harness.context.scheduler;

    scheduler.start();
    tokio::time::sleep(Duration::from_secs(60)).await;

    let status = scheduler.status();
    assert!(status.running);
    assert!(status.jobs.iter().all(|job| job.next_run_time.is_some()));
    assert_eq!(harness.observation_count(product.id).await, 0);

    tokio::time::sleep(Duration::from_secs(6 * 60 * 60)).await;

    assert_eq!(harness.observation_count(product.id).await, 1);
    let job = &scheduler.status().jobs[0];
    assert!(job.last_run_time.is_some());
    assert_eq!(job.state, JobState::Idle);

    scheduler.stop().await;
    let status = scheduler.status();
    assert!(!status.running);
    assert!(status.jobs.iter().all(|job| job.next_run_time.is_none()));
}

#[tokio::test(start_paused = true)]
async fn starting_twice_keeps_one_set_of_jobs() {
    let harness = Harness::new();
    let product = harness.add_product("B000000001", None).await;
    harness.pages.set_price(&product.url, 15.0);
    let scheduler = &harness.context.scheduler;

    scheduler.start();
    scheduler.start();
    tokio::time::sleep(Duration::from_secs(6 * 60 * 60 + 60)).await;

    assert_eq!(harness.observation_count(product.id).await, 1);
    scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn fleet_check_pauses_after_every_product() {
    let mut config = test_config();
    config.scheduler.item_delay = DelayBounds::from_secs(2.0, 2.0).unwrap();
    let harness = Harness::with_config(config);
    for n in 1..=3 {
        let product = harness.add_product(&format!("B00000000{n}"), None).await;
        // The second product fails; its pause must still happen.
        if n != 2 {
            harness.pages.set_price(&product.url, 10.0);
        }
    }

    let started = tokio::time::Instant::now();
    let report = harness.context.scheduler.check_all_now().await.unwrap();

    assert_eq!(report.checked, 3);
    assert_eq!(report.failed.len(), 1);
    assert!(started.elapsed() >= Duration::from_secs(2 * 3));
    assert_eq!(harness.context.scheduler.last_fleet_report(), Some(report));
}

#[tokio::test(start_paused = true)]
async fn stopping_mid_run_leaves_remaining_products_unchecked() {
    let mut config = test_config();
    config.scheduler.item_delay = DelayBounds::from_secs(10.0, 10.0).unwrap();
    let harness = Harness::with_config(config);
    let mut products = Vec::new();
    for n in 1..=3 {
        let product = harness.add_product(&format!("B00000000{n}"), None).await;
        harness.pages.set_price(&product.url, 10.0);
        products.push(product);
    }
    let scheduler = &harness.context.scheduler;

    scheduler.start();
    // Lands inside the pause after the first product.
    tokio::time::sleep(Duration::from_secs(6 * 60 * 60 + 5)).await;
    scheduler.stop().await;

    let report = scheduler.last_fleet_report().unwrap();
    assert!(report.interrupted);
    assert_eq!(report.checked, 1);
    assert_eq!(harness.observation_count(products[0].id).await, 1);
    assert_eq!(harness.observation_count(products[1].id).await, 0);
    assert_eq!(harness.observation_count(products[2].id).await, 0);
}
