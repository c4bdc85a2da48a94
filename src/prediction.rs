//! # Disk-Full Prediction - Linear Regression on Free Space
//!
//! The actuator loop records one free-space point per volume every five
//! minutes into a bounded ring. Given enough history (at least 12 points,
//! about an hour), a least-squares fit of free bytes against time yields a
//! consumption rate; a negative slope extrapolates to the day the volume
//! runs dry. A flat or improving trend reports no prediction.
//!
//! The ring is deliberately not persisted: after a restart the prediction
//! goes quiet for an hour rather than extrapolating across the gap.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};

/// Points required before a prediction is produced (≈ 1 h of data)
pub const MIN_POINTS: usize = 12;

/// Ring capacity per volume (24 h at the 5-minute cadence)
pub const MAX_POINTS: usize = 288;

const BYTES_PER_GB: f64 = 1_000_000_000.0;

/// One free-space observation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UsagePoint {
    pub at: DateTime<Utc>,
    pub free_bytes: u64,
}

/// Extrapolated fill-up forecast for one volume
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Days until the volume is full; -1 when no prediction applies
    pub days_until_full: f64,
    /// Current consumption in GB per day; 0 when freeing or stable
    pub gb_per_day: f64,
}

impl Prediction {
    pub fn none() -> Self {
        Self {
            days_until_full: -1.0,
            gb_per_day: 0.0,
        }
    }

    pub fn is_meaningful(&self) -> bool {
        self.days_until_full >= 0.0
    }
}

/// Least-squares fit over the retained points
///
/// Returns no prediction for short series and for non-shrinking free space.
pub fn predict(points: &[UsagePoint]) -> Prediction {
    if points.len() < MIN_POINTS {
        return Prediction::none();
    }

    let origin = points[0].at;
    let xs: Vec<f64> = points
        .iter()
        .map(|point| (point.at - origin).num_seconds() as f64 / 86_400.0)
        .collect();
    let ys: Vec<f64> = points
        .iter()
        .map(|point| point.free_bytes as f64 / BYTES_PER_GB)
        .collect();

    let n = xs.len() as f64;
    let mean_x = xs.iter().sum::<f64>() / n;
    let mean_y = ys.iter().sum::<f64>() / n;

    let mut covariance = 0.0;
    let mut variance = 0.0;
    for (x, y) in xs.iter().zip(ys.iter()) {
        covariance += (x - mean_x) * (y - mean_y);
        variance += (x - mean_x) * (x - mean_x);
    }
    if variance == 0.0 {
        return Prediction::none();
    }

    // GB of free space gained (positive) or lost (negative) per day
    let slope = covariance / variance;
    if slope >= 0.0 {
        return Prediction::none();
    }

    let current_free_gb = ys.last().copied().unwrap_or(0.0);
    Prediction {
        days_until_full: current_free_gb / -slope,
        gb_per_day: -slope,
    }
}

/// Bounded per-volume history of free-space points
#[derive(Debug, Clone, Default)]
pub struct DiskUsageHistory {
    points: HashMap<String, VecDeque<UsagePoint>>,
}

impl DiskUsageHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one observation, dropping the oldest past capacity
    pub fn record(&mut self, volume: &str, free_bytes: u64, at: DateTime<Utc>) {
        let ring = self.points.entry(volume.to_string()).or_default();
        ring.push_back(UsagePoint { at, free_bytes });
        while ring.len() > MAX_POINTS {
            ring.pop_front();
        }
    }

    pub fn point_count(&self, volume: &str) -> usize {
        self.points.get(volume).map(VecDeque::len).unwrap_or(0)
    }

    /// Current forecast per volume, deterministic order
    pub fn predictions(&self) -> BTreeMap<String, Prediction> {
        self.points
            .iter()
            .map(|(volume, ring)| {
                let series: Vec<UsagePoint> = ring.iter().copied().collect();
                (volume.clone(), predict(&series))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn series(days: usize, start_gb: f64, delta_gb_per_day: f64) -> Vec<UsagePoint> {
        let t0 = Utc::now();
        (0..days)
            .map(|day| UsagePoint {
                at: t0 + ChronoDuration::days(day as i64),
                free_bytes: ((start_gb + delta_gb_per_day * day as f64) * BYTES_PER_GB) as u64,
            })
            .collect()
    }

    #[test]
    fn short_series_has_no_prediction() {
        let points = series(5, 100.0, -1.0);
        assert_eq!(predict(&points), Prediction::none());
    }

    #[test]
    fn flat_series_has_no_prediction() {
        let points = series(20, 100.0, 0.0);
        let prediction = predict(&points);
        assert_eq!(prediction.days_until_full, -1.0);
    }

    #[test]
    fn growing_free_space_has_no_prediction() {
        let points = series(20, 100.0, 2.0);
        assert!(!predict(&points).is_meaningful());
    }

    #[test]
    fn one_gb_per_day_decrease_predicts_ninety_days() {
        // 10 days of history from 100 GB free, shrinking 1 GB/day,
        // sampled twice a day: ends at 90 GB free
        let t0 = Utc::now();
        let points: Vec<UsagePoint> = (0..=20)
            .map(|half_day| UsagePoint {
                at: t0 + ChronoDuration::hours(half_day * 12),
                free_bytes: ((100.0 - half_day as f64 * 0.5) * BYTES_PER_GB) as u64,
            })
            .collect();

        let prediction = predict(&points);
        assert!(prediction.is_meaningful());
        assert!(
            (prediction.days_until_full - 90.0).abs() / 90.0 < 0.05,
            "days_until_full = {}",
            prediction.days_until_full
        );
        assert!(
            (prediction.gb_per_day - 1.0).abs() < 0.05,
            "gb_per_day = {}",
            prediction.gb_per_day
        );
    }

    #[test]
    fn history_ring_is_bounded() {
        let mut history = DiskUsageHistory::new();
        let t0 = Utc::now();
        for i in 0..(MAX_POINTS + 20) {
            history.record("ssd", 1_000_000, t0 + ChronoDuration::minutes(i as i64 * 5));
        }
        assert_eq!(history.point_count("ssd"), MAX_POINTS);
    }

    #[test]
    fn predictions_cover_each_volume_independently() {
        let mut history = DiskUsageHistory::new();
        let t0 = Utc::now();
        for day in 0..15 {
            let at = t0 + ChronoDuration::days(day);
            history.record("hdd", ((200.0 - day as f64) * BYTES_PER_GB) as u64, at);
            history.record("ssd", (50.0 * BYTES_PER_GB) as u64, at);
        }
        let predictions = history.predictions();
        assert!(predictions["hdd"].is_meaningful());
        assert!(!predictions["ssd"].is_meaningful());
    }
}
