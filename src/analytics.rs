use crate::models::{PriceObservation, PriceStatistics, Trend, TrendDirection};

pub const DEFAULT_LOOKBACK_DAYS: i64 = 30;

/// Signed percent change from `old` to `new`. Zero when `old` is not positive.
pub fn percent_change(old: f64, new: f64) -> f64 {
    if old > 0.0 {
        (new - old) / old * 100.0
    } else {
        0.0
    }
}

/// Trend between the two most recent observations. `observations` must be
/// ordered newest first.
pub fn compute_trend(observations: &[PriceObservation]) -> Trend {
    let [current, previous, ..] = observations else {
        return Trend::neutral();
    };
    let change = current.price - previous.price;
    let direction = if change > 0.0 {
        TrendDirection::Up
    } else if change < 0.0 {
        TrendDirection::Down
    } else {
        TrendDirection::Flat
    };
    Trend {
        direction,
        change,
        change_percent: percent_change(previous.price, current.price),
        current_price: Some(current.price),
        previous_price: Some(previous.price),
    }
}

/// Statistics over a window of observations ordered newest first.
/// `days_tracked` is the window length the caller queried.
pub fn compute_statistics(
    observations: &[PriceObservation],
    days_tracked: i64,
) -> Option<PriceStatistics> {
    let newest = observations.first()?;
    let oldest = observations.last()?;
    let prices = observations.iter().map(|o| o.price);
    let min_price = prices.clone().fold(f64::INFINITY, f64::min);
    let max_price = prices.clone().fold(f64::NEG_INFINITY, f64::max);
    let avg_price = prices.sum::<f64>() / observations.len() as f64;

    let (price_change, price_change_percent) = if observations.len() > 1 {
        (
            newest.price - oldest.price,
            percent_change(oldest.price, newest.price),
        )
    } else {
        (0.0, 0.0)
    };

    Some(PriceStatistics {
        current_price: newest.price,
        min_price,
        max_price,
        avg_price,
        price_points: observations.len(),
        days_tracked,
        price_change,
        price_change_percent,
    })
}
