//! # Insight Assembly
//!
//! Turns the snapshots of one comparison into per-entity insight records.
//! A record-level failure (empty or duplicate id) is recorded as a
//! [`SkippedEntity`]. A malformed metric value only makes that metric
//! unavailable; the entity's other metrics are still reported.

use crate::config::AnalysisConfig;
use crate::delta::metric_delta;
use crate::error::{InsightsError, Result};
use crate::metrics::{Metric, MetricGroup, StatKey};
use crate::models::{
    EntityInsight, EntityKind, EntityRecord, InsightFlag, MetricReport, SkippedEntity,
    SnapshotIndex, TargetShareEntry, TeamPersonnel, TrendDirection, WeekPair, WeekStatSnapshot,
};
use crate::trend::{self, window_weeks};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// Insights of one comparison, before ranking
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssembledInsights {
    pub players: Vec<EntityInsight>,
    pub teams: Vec<EntityInsight>,
    pub skipped: Vec<SkippedEntity>,
}

pub struct InsightAssembler<'a> {
    config: &'a AnalysisConfig,
}

impl<'a> InsightAssembler<'a> {
    pub fn new(config: &'a AnalysisConfig) -> Self {
        Self { config }
    }

    /// Assemble every entity present in either the baseline or the target
    /// week. `snapshots` must hold both of those weeks; other weeks of the
    /// trend window are used when present.
    pub fn assemble(
        &self,
        season: i32,
        pair: WeekPair,
        snapshots: &BTreeMap<u32, &WeekStatSnapshot>,
    ) -> Result<AssembledInsights> {
        let baseline = snapshots
            .get(&pair.week_from)
            .ok_or(InsightsError::MissingSnapshot { season, week: pair.week_from })?;
        let target = snapshots
            .get(&pair.week_to)
            .ok_or(InsightsError::MissingSnapshot { season, week: pair.week_to })?;

        let mut assembled = AssembledInsights::default();
        for kind in [EntityKind::Player, EntityKind::Team] {
            let (insights, skipped) =
                self.assemble_kind(season, pair, kind, baseline, target, snapshots);
            match kind {
                EntityKind::Player => assembled.players = insights,
                EntityKind::Team => assembled.teams = insights,
            }
            assembled.skipped.extend(skipped);
        }

        debug!(
            "Assembled {} players, {} teams, {} skipped for {}",
            assembled.players.len(),
            assembled.teams.len(),
            assembled.skipped.len(),
            pair
        );
        Ok(assembled)
    }

    fn assemble_kind(
        &self,
        season: i32,
        pair: WeekPair,
        kind: EntityKind,
        baseline: &WeekStatSnapshot,
        target: &WeekStatSnapshot,
        snapshots: &BTreeMap<u32, &WeekStatSnapshot>,
    ) -> (Vec<EntityInsight>, Vec<SkippedEntity>) {
        let window = window_weeks(pair.week_to, self.config.trend.window);
        let history: Vec<(u32, SnapshotIndex<'_>)> = window
            .filter_map(|week| snapshots.get(&week).map(|s| (week, s.index(kind))))
            .collect();
        let baseline_index = baseline.index(kind);
        let target_index = target.index(kind);

        let mut skipped = Vec::new();
        let duplicates: BTreeSet<&str> = baseline_index
            .duplicates
            .iter()
            .chain(target_index.duplicates.iter())
            .copied()
            .collect();
        for id in &duplicates {
            skipped.push(SkippedEntity {
                entity_id: id.to_string(),
                entity_type: kind,
                reason: "duplicate entity id in snapshot".to_string(),
            });
        }

        let ids: BTreeSet<&str> = baseline_index
            .records
            .keys()
            .chain(target_index.records.keys())
            .copied()
            .filter(|id| !duplicates.contains(id))
            .collect();

        let mut insights = Vec::with_capacity(ids.len());
        for id in ids {
            let result = if id.trim().is_empty() {
                Err(InsightsError::malformed(id, "empty entity id"))
            } else {
                let records: Vec<(u32, Option<&EntityRecord>)> =
                    history.iter().map(|(week, index)| (*week, index.get(id))).collect();
                self.assemble_entity(
                    season,
                    pair,
                    kind,
                    baseline_index.get(id),
                    target_index.get(id),
                    &records,
                    target,
                )
            };

            match result {
                Ok(insight) => insights.push(insight),
                Err(e) => {
                    warn!("Skipping {} {} in {}: {}", kind, id, pair, e);
                    skipped.push(SkippedEntity {
                        entity_id: id.to_string(),
                        entity_type: kind,
                        reason: e.to_string(),
                    });
                }
            }
        }

        (insights, skipped)
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble_entity(
        &self,
        season: i32,
        pair: WeekPair,
        kind: EntityKind,
        baseline: Option<&EntityRecord>,
        target: Option<&EntityRecord>,
        history: &[(u32, Option<&EntityRecord>)],
        target_snapshot: &WeekStatSnapshot,
    ) -> Result<EntityInsight> {
        // Identity comes from the most recent record available
        let identity = target
            .or(baseline)
            .ok_or_else(|| InsightsError::malformed("", "no record in either week"))?;

        let mut insight = EntityInsight {
            entity_id: identity.entity_id.clone(),
            entity_type: kind,
            name: identity.name.clone(),
            position: identity.position.clone(),
            team: identity.team.clone(),
            season,
            week_from: pair.week_from,
            week_to: pair.week_to,
            volume_trends: BTreeMap::new(),
            efficiency_trends: BTreeMap::new(),
            production: BTreeMap::new(),
            touches_delta: None,
            fantasy_points_delta: None,
            personnel: None,
            flags: Vec::new(),
        };

        for &metric in Metric::for_kind(kind) {
            let delta = metric_delta(metric, baseline, target);
            let report = if metric.trend_eligible() {
                let (sample, trend) = trend::estimate(&self.config.trend, metric, history);
                MetricReport { delta, three_week_values: sample.values(), trend }
            } else {
                MetricReport { delta, three_week_values: Vec::new(), trend: None }
            };

            let section = match metric.group() {
                MetricGroup::Volume => &mut insight.volume_trends,
                MetricGroup::Efficiency => &mut insight.efficiency_trends,
                MetricGroup::Production => &mut insight.production,
            };
            section.insert(metric, report);
        }

        if kind == EntityKind::Player {
            insight.touches_delta =
                insight.delta(Metric::Touches).and_then(|d| d.available_delta());
            insight.fantasy_points_delta =
                insight.delta(Metric::FantasyPointsPpr).and_then(|d| d.available_delta());
        }

        if let (EntityKind::Team, Some(record)) = (kind, target) {
            let team = record.team.as_deref().unwrap_or(&record.entity_id);
            insight.personnel = Some(team_personnel(target_snapshot, team));
        }

        insight.flags = self.flags(&insight, baseline.is_some(), target.is_some());
        Ok(insight)
    }

    fn flags(
        &self,
        insight: &EntityInsight,
        in_baseline: bool,
        in_target: bool,
    ) -> Vec<InsightFlag> {
        let mut flags = Vec::new();
        let rule = self.config.flags.rule_for(insight.entity_type);

        let delta = insight.delta(rule.metric).and_then(|d| d.available_delta());
        let direction = insight.trend(rule.metric).map(|t| t.direction);
        match (delta, direction) {
            (Some(d), Some(TrendDirection::Rising)) if d > rule.threshold => {
                flags.push(InsightFlag::BreakoutCandidate)
            }
            (Some(d), Some(TrendDirection::Falling)) if d < -rule.threshold => {
                flags.push(InsightFlag::BustRisk)
            }
            _ => {}
        }

        if !in_baseline {
            flags.push(InsightFlag::NewInTarget);
        }
        if !in_target {
            flags.push(InsightFlag::AbsentInTarget);
        }
        flags
    }
}

/// RB committee entropy and WR target distribution of one team
pub fn team_personnel(snapshot: &WeekStatSnapshot, team: &str) -> TeamPersonnel {
    let mut rb_touches = Vec::new();
    let mut wr_targets = Vec::new();

    for player in snapshot.team_players(team) {
        match player.position.as_deref() {
            Some("RB") => {
                if let Ok(Some(touches)) = Metric::Touches.value(player) {
                    if touches > 0.0 {
                        rb_touches.push(touches);
                    }
                }
            }
            Some("WR") => {
                if let Ok(Some(targets)) = player.stat(StatKey::Targets) {
                    if targets > 0.0 {
                        let name =
                            player.name.clone().unwrap_or_else(|| player.entity_id.clone());
                        wr_targets.push((name, player.entity_id.as_str(), targets));
                    }
                }
            }
            _ => {}
        }
    }

    let total_touches: f64 = rb_touches.iter().sum();
    let entropy = if total_touches > 0.0 {
        -rb_touches
            .iter()
            .map(|t| t / total_touches)
            .map(|p| p * p.log2())
            .sum::<f64>()
    } else {
        0.0
    };

    let total_targets: f64 = wr_targets.iter().map(|(_, _, t)| t).sum();
    wr_targets.sort_by(|a, b| b.2.total_cmp(&a.2).then_with(|| a.1.cmp(b.1)));
    let wr_target_distribution = wr_targets
        .into_iter()
        .take(3)
        .map(|(name, _, targets)| TargetShareEntry {
            name,
            share: round3(targets / total_targets),
        })
        .collect();

    TeamPersonnel {
        rb_committee_entropy: round3(entropy.max(0.0)),
        wr_target_distribution,
    }
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalysisConfig;
    use serde_json::json;

    fn player(id: &str, metrics: serde_json::Value) -> EntityRecord {
        EntityRecord::from_json(id, EntityKind::Player, metrics).with_team("KC").with_position("WR")
    }

    fn run(snapshots: &[WeekStatSnapshot], from: u32, to: u32) -> AssembledInsights {
        let config = AnalysisConfig::default();
        let map: BTreeMap<u32, &WeekStatSnapshot> =
            snapshots.iter().map(|s| (s.week, s)).collect();
        let pair = WeekPair { week_from: from, week_to: to };
        InsightAssembler::new(&config).assemble(2025, pair, &map).unwrap()
    }

    #[test]
    fn test_assembles_deltas_and_trends() {
        let week = |w: u32, share: f64, carries: u32, receptions: u32| {
            let metrics =
                json!({ "target_share": share, "carries": carries, "receptions": receptions });
            WeekStatSnapshot::new(2025, w, vec![player("p1", metrics)])
        };
        let snapshots = vec![week(1, 0.18, 2, 3), week(2, 0.22, 3, 5), week(3, 0.28, 6, 8)];

        let result = run(&snapshots, 2, 3);
        assert_eq!(result.players.len(), 1);
        let insight = &result.players[0];

        let report = insight.report(Metric::TargetShare).unwrap();
        assert!((report.delta.delta.unwrap() - 0.06).abs() < 1e-9);
        assert_eq!(report.three_week_values, vec![0.18, 0.22, 0.28]);
        assert_eq!(report.trend.unwrap().direction, TrendDirection::Rising);

        assert_eq!(insight.touches_delta, Some(6.0));
        assert!(insight.has_flag(InsightFlag::BreakoutCandidate));
        assert!(!insight.has_flag(InsightFlag::NewInTarget));

        // Production metrics carry no trend
        assert!(insight.report(Metric::FantasyPointsPpr).unwrap().trend.is_none());
    }

    #[test]
    fn test_entity_missing_in_baseline() {
        let snapshots = vec![
            WeekStatSnapshot::new(2025, 1, vec![player("p1", json!({ "targets": 5 }))]),
            WeekStatSnapshot::new(
                2025,
                2,
                vec![player("p1", json!({ "targets": 6 })), player("p2", json!({ "targets": 9 }))],
            ),
        ];

        let result = run(&snapshots, 1, 2);
        let p2 = result.players.iter().find(|i| i.entity_id == "p2").unwrap();

        assert!(!p2.delta(Metric::Targets).unwrap().available);
        assert!(p2.has_flag(InsightFlag::NewInTarget));
    }

    #[test]
    fn test_bust_risk() {
        let week = |w: u32, carries: u32, receptions: u32| {
            let metrics = json!({ "carries": carries, "receptions": receptions });
            WeekStatSnapshot::new(2025, w, vec![player("p1", metrics)])
        };
        let snapshots = vec![week(4, 20, 4), week(5, 15, 3), week(6, 8, 2)];

        let insight = &run(&snapshots, 4, 6).players[0];
        assert_eq!(insight.touches_delta, Some(-14.0));
        assert!(insight.has_flag(InsightFlag::BustRisk));
    }

    #[test]
    fn test_empty_entity_id_is_skipped_not_fatal() {
        let snapshots = vec![
            WeekStatSnapshot::new(
                2025,
                1,
                vec![player(" ", json!({ "carries": 2 })), player("good", json!({ "carries": 3 }))],
            ),
            WeekStatSnapshot::new(2025, 2, vec![player("good", json!({ "carries": 5 }))]),
        ];

        let result = run(&snapshots, 1, 2);
        assert_eq!(result.players.len(), 1);
        assert_eq!(result.players[0].entity_id, "good");
        assert_eq!(result.skipped.len(), 1);
        assert_eq!(result.skipped[0].entity_id, " ");
    }

    #[test]
    fn test_malformed_baseline_value_only_drops_that_metric() {
        let snapshots = vec![
            WeekStatSnapshot::new(
                2025,
                1,
                vec![player("p1", json!({ "target_share": 0.20, "air_yards_share": "bad" }))],
            ),
            WeekStatSnapshot::new(
                2025,
                2,
                vec![player("p1", json!({ "target_share": 0.25, "air_yards_share": 0.3 }))],
            ),
        ];

        let result = run(&snapshots, 1, 2);
        assert!(result.skipped.is_empty());
        let insight = &result.players[0];

        let air_yards = insight.delta(Metric::AirYardsShare).unwrap();
        assert!(!air_yards.available);
        assert_eq!(air_yards.target_value, Some(0.3));
        let target_share = insight.delta(Metric::TargetShare).unwrap();
        assert!((target_share.delta.unwrap() - 0.05).abs() < 1e-9);

        let config = AnalysisConfig::default();
        let ranked =
            crate::superlatives::rank(&config.superlatives, &result.players, &result.teams);
        assert!(ranked.iter().any(|s| s.subcategory == Metric::TargetShare));
        assert!(ranked.iter().all(|s| s.subcategory != Metric::AirYardsShare));
    }

    #[test]
    fn test_malformed_trend_week_keeps_the_entity() {
        let week = |w: u32, carries: serde_json::Value| {
            let metrics = json!({ "carries": carries, "receptions": 2, "targets": 4 });
            let records = vec![player("p1", metrics), player("p2", json!({ "carries": 1 }))];
            WeekStatSnapshot::new(2025, w, records)
        };
        let snapshots = vec![week(4, json!("n/a")), week(5, json!(10)), week(6, json!(14))];

        let result = run(&snapshots, 5, 6);
        assert!(result.skipped.is_empty());
        let p1 = result.players.iter().find(|i| i.entity_id == "p1").unwrap();

        assert_eq!(p1.delta(Metric::Carries).unwrap().delta, Some(4.0));
        let carries = p1.report(Metric::Carries).unwrap();
        assert_eq!(carries.three_week_values, vec![10.0, 14.0]);
        assert_eq!(carries.trend.unwrap().sample_count, 2);
        assert_eq!(p1.report(Metric::Targets).unwrap().three_week_values.len(), 3);
    }

    #[test]
    fn test_duplicate_ids_are_skipped() {
        let snapshots = vec![
            WeekStatSnapshot::new(
                2025,
                1,
                vec![player("dup", json!({})), player("dup", json!({}))],
            ),
            WeekStatSnapshot::new(2025, 2, vec![player("dup", json!({}))]),
        ];

        let result = run(&snapshots, 1, 2);
        assert!(result.players.is_empty());
        assert_eq!(result.skipped[0].reason, "duplicate entity id in snapshot");
    }

    #[test]
    fn test_team_personnel() {
        let snapshot = WeekStatSnapshot::new(
            2025,
            3,
            vec![
                player("rb1", json!({ "carries": 10, "receptions": 0 })).with_position("RB"),
                player("rb2", json!({ "carries": 10, "receptions": 0 })).with_position("RB"),
                player("wr1", json!({ "targets": 6 })).with_name("A"),
                player("wr2", json!({ "targets": 3 })).with_name("B"),
                player("wr3", json!({ "targets": 1 })).with_name("C"),
                player("wr4", json!({ "targets": 0 })).with_name("D"),
            ],
        );

        let personnel = team_personnel(&snapshot, "KC");
        assert_eq!(personnel.rb_committee_entropy, 1.0);
        assert_eq!(personnel.wr_target_distribution.len(), 3);
        let top = TargetShareEntry { name: "A".into(), share: 0.6 };
        assert_eq!(personnel.wr_target_distribution[0], top);
        assert_eq!(personnel.wr_target_distribution[2].share, 0.1);

        let empty = team_personnel(&snapshot, "BUF");
        assert_eq!(empty.rb_committee_entropy, 0.0);
        assert!(empty.wr_target_distribution.is_empty());
    }

    #[test]
    fn test_team_insights_from_rollup() {
        let week = |w: u32, attempts: u32, carries: u32| {
            WeekStatSnapshot::new(
                2025,
                w,
                vec![EntityRecord::from_json(
                    "qb",
                    EntityKind::Player,
                    json!({ "attempts": attempts, "carries": carries }),
                )
                .with_team("KC")
                .with_position("QB")],
            )
            .with_team_rollups()
        };
        let snapshots = vec![week(1, 30, 2), week(2, 40, 0)];

        let result = run(&snapshots, 1, 2);
        let team = &result.teams[0];
        assert_eq!(team.entity_id, "KC");
        assert_eq!(team.delta(Metric::Plays).unwrap().delta, Some(8.0));
        assert!(team.personnel.is_some());
    }
}
