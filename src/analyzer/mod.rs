//! Price momentum analysis feeding the sizing formula.
//!
//! Everything here is pure over a slice of samples; the caller decides where
//! the samples come from (feed, cache) and what to do on failure.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;

use crate::error::Error;
use crate::models::Analysis;
use crate::Result;

/// A single (timestamp, price) observation.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PriceSample {
    pub timestamp: DateTime<Utc>,
    pub price: f64,
}

/// Minimum history length the analyzer accepts.
pub const MIN_SAMPLES: usize = 30;

/// Analyze a price history. Requires at least [`MIN_SAMPLES`] samples.
///
/// The randomness in the price factor is the only non-determinism; pass a
/// seeded rng to pin it down in tests.
pub fn analyze<R: Rng>(samples: &[PriceSample], rng: &mut R) -> Result<Analysis> {
    if samples.len() < MIN_SAMPLES {
        return Err(Error::InsufficientData {
            got: samples.len(),
            need: MIN_SAMPLES,
        });
    }

    let mut sorted = samples.to_vec();
    sorted.sort_by_key(|s| s.timestamp);

    let prices: Vec<f64> = sorted.iter().map(|s| s.price).collect();
    let ma7 = sma(&prices, 7).unwrap_or(0.0);
    let ma30 = sma(&prices, prices.len().min(30)).unwrap_or(0.0);

    let change = price_change_24h(&sorted);
    let factor = price_factor(change, rng);

    Ok(Analysis {
        moving_average_7d: ma7,
        moving_average_30d: ma30,
        price_change_percentage: change,
        price_factor: factor,
        is_price_going_up: change > 0.0,
    })
}

/// Simple moving average over the most recent `period` prices.
pub fn sma(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 || prices.len() < period {
        return None;
    }

    let sum: f64 = prices.iter().rev().take(period).sum();
    Some(sum / period as f64)
}

/// Percentage change between the latest sample and the sample closest to
/// 24 hours before it.
///
/// Closeness is absolute timestamp difference; on a tie the sample
/// encountered first in ascending order wins. `sorted` must be ascending by
/// timestamp and non-empty.
fn price_change_24h(sorted: &[PriceSample]) -> f64 {
    let latest = match sorted.last() {
        Some(s) => s,
        None => return 0.0,
    };
    let target = latest.timestamp - Duration::hours(24);

    let mut baseline = &sorted[0];
    let mut best_diff = i64::MAX;
    for sample in sorted {
        let diff = (sample.timestamp - target).num_milliseconds().abs();
        if diff < best_diff {
            best_diff = diff;
            baseline = sample;
        }
    }

    if baseline.price == 0.0 {
        return 0.0;
    }
    (latest.price - baseline.price) / baseline.price * 100.0
}

/// Map a 24h percentage change to a factor in [0, 2].
///
/// Downtrends shrink the factor (buy less aggressively into momentum),
/// uptrends grow it; each band draws uniformly from its range.
pub fn price_factor<R: Rng>(change_pct: f64, rng: &mut R) -> f64 {
    if change_pct < 0.0 {
        let drop = change_pct.abs();
        if drop <= 3.0 {
            rng.gen_range(0.7..1.0)
        } else if drop <= 10.0 {
            rng.gen_range(0.4..0.7)
        } else {
            rng.gen_range(0.1..0.3)
        }
    } else if change_pct <= 3.0 {
        rng.gen_range(1.0..1.3)
    } else if change_pct <= 10.0 {
        rng.gen_range(1.4..1.7)
    } else {
        rng.gen_range(1.7..1.9)
    }
}
