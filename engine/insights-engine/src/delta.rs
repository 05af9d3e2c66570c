//! Single-metric change between a baseline and a target week

use crate::metrics::Metric;
use crate::models::{EntityRecord, MetricDelta};
use tracing::warn;

/// Compute the change of `metric` from `baseline` to `target`.
///
/// Either record may be absent (entity not present that week). A missing
/// operand yields `available = false` with no delta; it is never read as zero.
/// A malformed operand is treated the same way and only affects `metric`.
pub fn metric_delta(
    metric: Metric,
    baseline: Option<&EntityRecord>,
    target: Option<&EntityRecord>,
) -> MetricDelta {
    let baseline_value = baseline.and_then(|record| readable_value(metric, record));
    let target_value = target.and_then(|record| readable_value(metric, record));

    compute(metric, baseline_value, target_value)
}

/// Value of `metric` in `record`; a malformed input reads as unavailable
pub fn readable_value(metric: Metric, record: &EntityRecord) -> Option<f64> {
    match metric.value(record) {
        Ok(value) => value,
        Err(e) => {
            warn!("{} unavailable for {}: {}", metric.as_str(), record.entity_id, e);
            None
        }
    }
}

/// Delta over already-extracted values
pub fn compute(
    metric: Metric,
    baseline_value: Option<f64>,
    target_value: Option<f64>,
) -> MetricDelta {
    let (Some(baseline), Some(target)) = (baseline_value, target_value) else {
        return MetricDelta {
            metric,
            baseline_value,
            target_value,
            delta: None,
            delta_pct: None,
            available: false,
            zero_baseline: false,
        };
    };

    let delta = target - baseline;
    let (delta_pct, zero_baseline) = if baseline != 0.0 {
        (Some(delta / baseline * 100.0), false)
    } else if target == 0.0 {
        (Some(0.0), false)
    } else {
        (None, true)
    };

    MetricDelta {
        metric,
        baseline_value: Some(baseline),
        target_value: Some(target),
        delta: Some(delta),
        delta_pct,
        available: true,
        zero_baseline,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EntityKind;
    use serde_json::json;

    #[test]
    fn test_target_share_delta() {
        let delta = compute(Metric::TargetShare, Some(0.220), Some(0.280));

        assert!(delta.available);
        assert!((delta.delta.unwrap() - 0.060).abs() < 1e-9);
        assert!((delta.delta_pct.unwrap() - 27.27).abs() < 0.01);
        assert!(!delta.zero_baseline);
    }

    #[test]
    fn test_zero_baseline_has_no_percentage() {
        let delta = compute(Metric::Carries, Some(0.0), Some(8.0));
        assert!(delta.available);
        assert_eq!(delta.delta, Some(8.0));
        assert_eq!(delta.delta_pct, None);
        assert!(delta.zero_baseline);

        let unchanged = compute(Metric::Carries, Some(0.0), Some(0.0));
        assert_eq!(unchanged.delta_pct, Some(0.0));
        assert!(!unchanged.zero_baseline);
    }

    #[test]
    fn test_missing_operand_is_unavailable() {
        let target =
            EntityRecord::from_json("p1", EntityKind::Player, json!({ "target_share": 0.3 }));

        let delta = metric_delta(Metric::TargetShare, None, Some(&target));
        assert!(!delta.available);
        assert_eq!(delta.delta, None);
        assert_eq!(delta.target_value, Some(0.3));
        assert_eq!(delta.available_delta(), None);
    }

    #[test]
    fn test_malformed_operand_is_unavailable() {
        let baseline = EntityRecord::from_json(
            "p1",
            EntityKind::Player,
            json!({ "carries": "lots", "receptions": 4 }),
        );
        let target = EntityRecord::from_json(
            "p1",
            EntityKind::Player,
            json!({ "carries": 10, "receptions": 6 }),
        );

        let carries = metric_delta(Metric::Carries, Some(&baseline), Some(&target));
        assert!(!carries.available);
        assert_eq!(carries.baseline_value, None);
        assert_eq!(carries.target_value, Some(10.0));

        // Other metrics of the same record are unaffected
        let receptions = metric_delta(Metric::Receptions, Some(&baseline), Some(&target));
        assert_eq!(receptions.delta, Some(2.0));
    }
}
