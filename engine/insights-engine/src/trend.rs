//! # Trend Estimation
//!
//! Ordinary least squares over the most recent weeks of a metric, ending at
//! the target week. Points are indexed by position (0, 1, 2, ...) rather than
//! absolute week number, and missing weeks are skipped rather than imputed.

use crate::config::TrendConfig;
use crate::delta::readable_value;
use crate::metrics::Metric;
use crate::models::{EntityRecord, TrendDirection, TrendPoint, TrendResult, TrendSample};
use std::ops::RangeInclusive;

/// Weeks covered by a trend window of `window` weeks ending at `target_week`
pub fn window_weeks(target_week: u32, window: u32) -> RangeInclusive<u32> {
    let start = target_week.saturating_sub(window.saturating_sub(1)).max(1);
    start..=target_week
}

/// Build the sample for one metric from an entity's records, oldest first.
/// Weeks where the entity or the metric is absent or malformed contribute no
/// point.
pub fn sample(metric: Metric, history: &[(u32, Option<&EntityRecord>)]) -> TrendSample {
    let points = history
        .iter()
        .filter_map(|(week, record)| {
            let value = readable_value(metric, (*record)?)?;
            Some(TrendPoint { week: *week, value })
        })
        .collect();
    TrendSample { points }
}

/// Fit a line through the sample. `None` with fewer than two points.
pub fn fit(sample: &TrendSample, epsilon: f64) -> Option<TrendResult> {
    let n = sample.len();
    if n < 2 {
        return None;
    }

    let mean_x = (n - 1) as f64 / 2.0;
    let mean_y = sample.points.iter().map(|p| p.value).sum::<f64>() / n as f64;

    let (mut sxy, mut sxx) = (0.0, 0.0);
    for (i, point) in sample.points.iter().enumerate() {
        let dx = i as f64 - mean_x;
        sxy += dx * (point.value - mean_y);
        sxx += dx * dx;
    }
    let slope = sxy / sxx;

    let direction = if slope > epsilon {
        TrendDirection::Rising
    } else if slope < -epsilon {
        TrendDirection::Falling
    } else {
        TrendDirection::Flat
    };

    let last = sample.points[n - 1].value;
    Some(TrendResult { slope, projected_next: last + slope, direction, sample_count: n })
}

/// Sample and fit in one step using the configured epsilon for `metric`
pub fn estimate(
    config: &TrendConfig,
    metric: Metric,
    history: &[(u32, Option<&EntityRecord>)],
) -> (TrendSample, Option<TrendResult>) {
    let sample = sample(metric, history);
    let trend = fit(&sample, config.epsilon_for(metric));
    (sample, trend)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EntityKind;
    use serde_json::json;

    fn points(values: &[(u32, f64)]) -> TrendSample {
        let points = values.iter().map(|&(week, value)| TrendPoint { week, value }).collect();
        TrendSample { points }
    }

    #[test]
    fn test_window_is_clipped_at_week_one() {
        assert_eq!(window_weeks(6, 3), 4..=6);
        assert_eq!(window_weeks(2, 3), 1..=2);
        assert_eq!(window_weeks(1, 3), 1..=1);
        assert_eq!(window_weeks(10, 5), 6..=10);
    }

    #[test]
    fn test_three_point_fit() {
        let trend = fit(&points(&[(4, 10.0), (5, 12.0), (6, 17.0)]), 0.05).unwrap();

        assert!((trend.slope - 3.5).abs() < 1e-9);
        assert!((trend.projected_next - 20.5).abs() < 1e-9);
        assert_eq!(trend.direction, TrendDirection::Rising);
        assert_eq!(trend.sample_count, 3);
    }

    #[test]
    fn test_two_point_fit_is_the_difference() {
        let trend = fit(&points(&[(1, 0.30), (3, 0.20)]), 0.005).unwrap();

        assert!((trend.slope + 0.10).abs() < 1e-9);
        assert_eq!(trend.direction, TrendDirection::Falling);
    }

    #[test]
    fn test_fit_ignores_absolute_week_numbers() {
        let a = fit(&points(&[(1, 5.0), (2, 6.0), (3, 8.0)]), 0.05).unwrap();
        let b = fit(&points(&[(11, 5.0), (12, 6.0), (13, 8.0)]), 0.05).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_epsilon_band_is_flat() {
        let trend = fit(&points(&[(1, 5.0), (2, 5.04)]), 0.05).unwrap();
        assert_eq!(trend.direction, TrendDirection::Flat);

        let trend = fit(&points(&[(1, 5.0), (2, 5.04)]), 0.0).unwrap();
        assert_eq!(trend.direction, TrendDirection::Rising);
    }

    #[test]
    fn test_insufficient_points() {
        assert!(fit(&points(&[]), 0.05).is_none());
        assert!(fit(&points(&[(6, 12.0)]), 0.05).is_none());
    }

    #[test]
    fn test_sample_skips_missing_weeks() {
        let w4 = EntityRecord::from_json("p1", EntityKind::Player, json!({ "carries": 10 }));
        let w5 = EntityRecord::from_json("p1", EntityKind::Player, json!({ "targets": 4 }));
        let w6 = EntityRecord::from_json("p1", EntityKind::Player, json!({ "carries": 14 }));

        let history = [(3, None), (4, Some(&w4)), (5, Some(&w5)), (6, Some(&w6))];
        let (sample, trend) = estimate(&TrendConfig::default(), Metric::Carries, &history);

        assert_eq!(sample.values(), vec![10.0, 14.0]);
        assert_eq!(sample.points[1].week, 6);
        let trend = trend.unwrap();
        assert_eq!(trend.sample_count, 2);
        assert!((trend.slope - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_malformed_week_is_left_out_of_the_sample() {
        let record = |metrics| EntityRecord::from_json("p1", EntityKind::Player, metrics);
        let w4 = record(json!({ "carries": "n/a", "targets": 3 }));
        let w5 = record(json!({ "carries": 12, "targets": 5 }));
        let w6 = record(json!({ "carries": 15, "targets": 7 }));
        let history = [(4, Some(&w4)), (5, Some(&w5)), (6, Some(&w6))];

        let carries = sample(Metric::Carries, &history);
        assert_eq!(carries.values(), vec![12.0, 15.0]);
        assert_eq!(carries.points[0].week, 5);

        let targets = sample(Metric::Targets, &history);
        assert_eq!(targets.len(), 3);
    }
}
