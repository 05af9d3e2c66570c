//! # Data Model
//!
//! Snapshot inputs, per-entity insight records, superlatives, and the
//! per-pair comparison result.

use crate::error::{InsightsError, Result};
use crate::metrics::{Metric, MetricGroup, StatKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Kind of entity a record describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Player,
    Team,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Player => f.write_str("player"),
            EntityKind::Team => f.write_str("team"),
        }
    }
}

/// One entity's metrics for one week, as supplied upstream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub entity_id: String,
    pub entity_type: EntityKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team: Option<String>,
    /// Loose metric map; only registry keys are ever read from it
    #[serde(default)]
    pub metrics: BTreeMap<String, serde_json::Value>,
}

impl EntityRecord {
    pub fn new(entity_id: impl Into<String>, entity_type: EntityKind) -> Self {
        Self {
            entity_id: entity_id.into(),
            entity_type,
            name: None,
            position: None,
            team: None,
            metrics: BTreeMap::new(),
        }
    }

    /// Build a record from a JSON object of metrics; non-objects give no metrics
    pub fn from_json(
        entity_id: impl Into<String>,
        entity_type: EntityKind,
        metrics: serde_json::Value,
    ) -> Self {
        let mut record = Self::new(entity_id, entity_type);
        if let serde_json::Value::Object(map) = metrics {
            record.metrics = map.into_iter().collect();
        }
        record
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_position(mut self, position: impl Into<String>) -> Self {
        self.position = Some(position.into());
        self
    }

    pub fn with_team(mut self, team: impl Into<String>) -> Self {
        self.team = Some(team.into());
        self
    }

    pub fn with_stat(mut self, key: StatKey, value: f64) -> Self {
        self.metrics.insert(key.as_str().to_string(), serde_json::json!(value));
        self
    }

    /// Typed read of a raw statistic. Absent and `null` read as `None`.
    pub fn stat(&self, key: StatKey) -> Result<Option<f64>> {
        match self.metrics.get(key.as_str()) {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(serde_json::Value::Number(n)) => match n.as_f64() {
                Some(v) => key.check(&self.entity_id, v).map(Some),
                None => Err(InsightsError::malformed(
                    &self.entity_id,
                    format!("{key} is not representable"),
                )),
            },
            Some(other) => Err(InsightsError::malformed(
                &self.entity_id,
                format!("{key} is not numeric: {other}"),
            )),
        }
    }
}

/// The complete set of entity records for one season/week
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeekStatSnapshot {
    pub season: i32,
    pub week: u32,
    #[serde(default)]
    pub records: Vec<EntityRecord>,
}

/// Lookup of a snapshot's records by id, with the ids that cannot be used
#[derive(Debug, Default)]
pub struct SnapshotIndex<'a> {
    pub records: BTreeMap<&'a str, &'a EntityRecord>,
    /// Ids that appear more than once; ambiguous and therefore rejected
    pub duplicates: BTreeSet<&'a str>,
}

impl<'a> SnapshotIndex<'a> {
    pub fn get(&self, entity_id: &str) -> Option<&'a EntityRecord> {
        self.records.get(entity_id).copied()
    }
}

impl WeekStatSnapshot {
    pub fn new(season: i32, week: u32, records: Vec<EntityRecord>) -> Self {
        Self { season, week, records }
    }

    /// Index the records of one kind by entity id
    pub fn index(&self, kind: EntityKind) -> SnapshotIndex<'_> {
        let mut index = SnapshotIndex::default();
        for record in self.records.iter().filter(|r| r.entity_type == kind) {
            let id = record.entity_id.as_str();
            if index.records.insert(id, record).is_some() {
                index.duplicates.insert(id);
            }
        }
        for id in &index.duplicates {
            index.records.remove(id);
        }
        index
    }

    /// Players on a team, in record order
    pub fn team_players<'s>(
        &'s self,
        team: &'s str,
    ) -> impl Iterator<Item = &'s EntityRecord> + 's {
        self.records
            .iter()
            .filter(move |r| r.entity_type == EntityKind::Player && r.team.as_deref() == Some(team))
    }

    /// Add an aggregated team record for every team that has players but no
    /// explicit team record. Explicit team records are left untouched.
    pub fn with_team_rollups(mut self) -> Self {
        let explicit: BTreeSet<String> = self
            .records
            .iter()
            .filter(|r| r.entity_type == EntityKind::Team)
            .map(|r| r.entity_id.clone())
            .collect();

        let teams: BTreeSet<String> = self
            .records
            .iter()
            .filter(|r| r.entity_type == EntityKind::Player)
            .filter_map(|r| r.team.clone())
            .filter(|t| !t.is_empty() && !explicit.contains(t))
            .collect();

        let rollups: Vec<EntityRecord> =
            teams.iter().map(|team| self.roll_up_team(team)).collect();
        self.records.extend(rollups);
        self
    }

    fn roll_up_team(&self, team: &str) -> EntityRecord {
        let mut totals: BTreeMap<StatKey, f64> = BTreeMap::new();
        let mut add = |key: StatKey, value: Option<f64>| {
            if let Some(v) = value {
                *totals.entry(key).or_insert(0.0) += v;
            }
        };

        for player in self.team_players(team) {
            // Malformed values are the player's problem, not the team's
            let read = |key: StatKey| player.stat(key).ok().flatten();

            if player.position.as_deref() == Some("QB") {
                add(StatKey::PassAttempts, read(StatKey::Attempts));
            }
            add(StatKey::RushAttempts, read(StatKey::Carries));
            for key in [StatKey::PassingYards, StatKey::RushingYards, StatKey::ReceivingYards] {
                add(StatKey::TotalYards, read(key));
            }
            for key in [StatKey::PassingTds, StatKey::RushingTds, StatKey::ReceivingTds] {
                add(StatKey::TotalTds, read(key));
            }
        }

        let mut record = EntityRecord::new(team, EntityKind::Team).with_team(team);
        for (key, value) in totals {
            record = record.with_stat(key, value);
        }
        record
    }
}

/// Season pointer published alongside the weekly snapshots
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeasonMetadata {
    pub current_season: i32,
    pub current_week: u32,
}

/// Explicit (season, max_week) context threaded through a generation run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeasonContext {
    pub season: i32,
    pub max_week: u32,
}

/// A directional comparison: baseline `week_from`, target `week_to`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WeekPair {
    pub week_from: u32,
    pub week_to: u32,
}

impl WeekPair {
    /// Validate `1 <= from < to <= max_week`
    pub fn new(week_from: u32, week_to: u32, max_week: u32) -> Result<Self> {
        if week_from == 0 || week_from >= week_to || week_to > max_week {
            return Err(InsightsError::InvalidWeekRange { week_from, week_to, max_week });
        }
        Ok(Self { week_from, week_to })
    }

    pub fn gap(&self) -> u32 {
        self.week_to - self.week_from
    }
}

impl fmt::Display for WeekPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-to-{}", self.week_from, self.week_to)
    }
}

impl FromStr for WeekPair {
    type Err = String;

    /// Accepts `3-5` or `3-to-5`; range checks happen at plan time
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized = s.replace("-to-", "-");
        let (from, to) = normalized
            .split_once('-')
            .ok_or_else(|| format!("expected FROM-TO, got {s:?}"))?;
        let week_from = from.trim().parse::<u32>().map_err(|e| format!("bad week {from:?}: {e}"))?;
        let week_to = to.trim().parse::<u32>().map_err(|e| format!("bad week {to:?}: {e}"))?;
        Ok(Self { week_from, week_to })
    }
}

/// Change of one metric for one entity between baseline and target
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricDelta {
    pub metric: Metric,
    #[serde(rename = "previous_value", skip_serializing_if = "Option::is_none")]
    pub baseline_value: Option<f64>,
    #[serde(rename = "current_value", skip_serializing_if = "Option::is_none")]
    pub target_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta_pct: Option<f64>,
    pub available: bool,
    /// Set when the baseline was zero and the target was not, so the
    /// percentage change is undefined rather than infinite
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub zero_baseline: bool,
}

impl MetricDelta {
    /// The delta, only when both operands were present
    pub fn available_delta(&self) -> Option<f64> {
        if self.available {
            self.delta
        } else {
            None
        }
    }
}

/// Three-way classification of a fitted slope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Rising,
    Falling,
    Flat,
}

/// One observed (week, value) point
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrendPoint {
    pub week: u32,
    pub value: f64,
}

/// Available points in the trend window, strictly increasing by week
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrendSample {
    pub points: Vec<TrendPoint>,
}

impl TrendSample {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn values(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.value).collect()
    }
}

/// Least-squares trend over the sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrendResult {
    pub slope: f64,
    pub projected_next: f64,
    #[serde(rename = "trend_direction")]
    pub direction: TrendDirection,
    pub sample_count: usize,
}

/// Delta plus (optional) trend for one metric, as written to the artifact
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricReport {
    #[serde(flatten)]
    pub delta: MetricDelta,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub three_week_values: Vec<f64>,
    #[serde(flatten)]
    pub trend: Option<TrendResult>,
}

/// Derived boolean signals on an insight
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightFlag {
    BreakoutCandidate,
    BustRisk,
    /// Present at the target week but not at the baseline
    NewInTarget,
    /// Present at the baseline but not at the target week
    AbsentInTarget,
}

/// Share of a team's WR targets for one receiver
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetShareEntry {
    pub name: String,
    pub share: f64,
}

/// Personnel usage of a team in the target week
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TeamPersonnel {
    pub rb_committee_entropy: f64,
    pub wr_target_distribution: Vec<TargetShareEntry>,
}

/// Everything computed for one entity in one comparison
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityInsight {
    pub entity_id: String,
    pub entity_type: EntityKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team: Option<String>,
    pub season: i32,
    pub week_from: u32,
    pub week_to: u32,
    pub volume_trends: BTreeMap<Metric, MetricReport>,
    pub efficiency_trends: BTreeMap<Metric, MetricReport>,
    pub production: BTreeMap<Metric, MetricReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub touches_delta: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fantasy_points_delta: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub personnel: Option<TeamPersonnel>,
    pub flags: Vec<InsightFlag>,
}

impl EntityInsight {
    pub fn report(&self, metric: Metric) -> Option<&MetricReport> {
        match metric.group() {
            MetricGroup::Volume => self.volume_trends.get(&metric),
            MetricGroup::Efficiency => self.efficiency_trends.get(&metric),
            MetricGroup::Production => self.production.get(&metric),
        }
    }

    pub fn delta(&self, metric: Metric) -> Option<&MetricDelta> {
        self.report(metric).map(|r| &r.delta)
    }

    pub fn trend(&self, metric: Metric) -> Option<&TrendResult> {
        self.report(metric).and_then(|r| r.trend.as_ref())
    }

    pub fn has_flag(&self, flag: InsightFlag) -> bool {
        self.flags.contains(&flag)
    }
}

/// An entity excluded from a comparison by a per-entity failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedEntity {
    pub entity_id: String,
    pub entity_type: EntityKind,
    pub reason: String,
}

/// A ranked league-wide award for one metric's change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Superlative {
    pub category: String,
    pub subcategory: Metric,
    pub award_name: String,
    pub entity_id: String,
    pub entity_type: EntityKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team: Option<String>,
    pub value: f64,
    pub rank: u32,
    pub season: i32,
    pub week_from: u32,
    pub week_to: u32,
}

/// Full output of one (season, week_from, week_to) comparison
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonResult {
    pub season: i32,
    pub week_from: u32,
    pub week_to: u32,
    pub player_insights: Vec<EntityInsight>,
    pub team_insights: Vec<EntityInsight>,
    pub superlatives: Vec<Superlative>,
    pub skipped_entities: Vec<SkippedEntity>,
    pub generated_at: DateTime<Utc>,
}

/// Body of the `.../insights` artifact
#[derive(Debug, Serialize)]
pub struct InsightsArtifact<'a> {
    pub season: i32,
    pub week_from: u32,
    pub week_to: u32,
    pub gap: u32,
    pub generated_at: DateTime<Utc>,
    pub player_insights: &'a [EntityInsight],
    pub team_insights: &'a [EntityInsight],
    pub skipped_entities: &'a [SkippedEntity],
    pub metadata: ArtifactMetadata,
}

#[derive(Debug, Serialize)]
pub struct ArtifactMetadata {
    pub total_players: usize,
    pub total_teams: usize,
    pub total_superlatives: usize,
    pub total_skipped: usize,
}

/// Body of the `.../superlatives` artifact
#[derive(Debug, Serialize)]
pub struct SuperlativesArtifact<'a> {
    pub season: i32,
    pub week_from: u32,
    pub week_to: u32,
    pub gap: u32,
    pub superlatives: &'a [Superlative],
    pub generated_at: DateTime<Utc>,
}

impl ComparisonResult {
    pub fn pair(&self) -> WeekPair {
        WeekPair { week_from: self.week_from, week_to: self.week_to }
    }

    pub fn insights_artifact(&self) -> InsightsArtifact<'_> {
        InsightsArtifact {
            season: self.season,
            week_from: self.week_from,
            week_to: self.week_to,
            gap: self.pair().gap(),
            generated_at: self.generated_at,
            player_insights: &self.player_insights,
            team_insights: &self.team_insights,
            skipped_entities: &self.skipped_entities,
            metadata: ArtifactMetadata {
                total_players: self.player_insights.len(),
                total_teams: self.team_insights.len(),
                total_superlatives: self.superlatives.len(),
                total_skipped: self.skipped_entities.len(),
            },
        }
    }

    pub fn superlatives_artifact(&self) -> SuperlativesArtifact<'_> {
        SuperlativesArtifact {
            season: self.season,
            week_from: self.week_from,
            week_to: self.week_to,
            gap: self.pair().gap(),
            superlatives: &self.superlatives,
            generated_at: self.generated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_week_pair_validation() {
        assert!(WeekPair::new(1, 2, 7).is_ok());
        assert_eq!(WeekPair::new(2, 7, 7).unwrap().gap(), 5);
        assert!(matches!(WeekPair::new(3, 3, 7), Err(InsightsError::InvalidWeekRange { .. })));
        assert!(WeekPair::new(6, 5, 7).is_err());
        assert!(WeekPair::new(0, 2, 7).is_err());
        assert!(WeekPair::new(5, 8, 7).is_err());
    }

    #[test]
    fn test_week_pair_parse_and_display() {
        let pair: WeekPair = "3-5".parse().unwrap();
        assert_eq!(pair, WeekPair { week_from: 3, week_to: 5 });
        assert_eq!(pair.to_string(), "3-to-5");
        assert_eq!("3-to-5".parse::<WeekPair>().unwrap(), pair);
        assert!("three".parse::<WeekPair>().is_err());
    }

    #[test]
    fn test_index_rejects_duplicates() {
        let snapshot = WeekStatSnapshot::new(
            2025,
            3,
            vec![
                EntityRecord::new("p1", EntityKind::Player),
                EntityRecord::new("p2", EntityKind::Player),
                EntityRecord::new("p2", EntityKind::Player),
                EntityRecord::new("KC", EntityKind::Team),
            ],
        );

        let players = snapshot.index(EntityKind::Player);
        assert!(players.get("p1").is_some());
        assert!(players.get("p2").is_none());
        assert!(players.duplicates.contains("p2"));
        assert_eq!(snapshot.index(EntityKind::Team).records.len(), 1);
    }

    #[test]
    fn test_team_rollup_from_players() {
        let snapshot = WeekStatSnapshot::new(
            2025,
            3,
            vec![
                EntityRecord::from_json(
                    "qb1",
                    EntityKind::Player,
                    json!({
                        "attempts": 35,
                        "carries": 4,
                        "passing_yards": 280,
                        "rushing_yards": 12,
                        "passing_tds": 2
                    }),
                )
                .with_position("QB")
                .with_team("KC"),
                EntityRecord::from_json(
                    "rb1",
                    EntityKind::Player,
                    json!({
                        "carries": 18,
                        "rushing_yards": 90,
                        "receiving_yards": 20,
                        "rushing_tds": 1
                    }),
                )
                .with_position("RB")
                .with_team("KC"),
                EntityRecord::from_json(
                    "buf",
                    EntityKind::Team,
                    json!({ "pass_attempts": 30, "rush_attempts": 30 }),
                )
                .with_team("BUF"),
                EntityRecord::from_json("wr1", EntityKind::Player, json!({ "targets": 9 }))
                    .with_position("WR")
                    .with_team("BUF"),
            ],
        )
        .with_team_rollups();

        let teams = snapshot.index(EntityKind::Team);
        let kc = teams.get("KC").unwrap();
        assert_eq!(kc.stat(StatKey::PassAttempts).unwrap(), Some(35.0));
        assert_eq!(kc.stat(StatKey::RushAttempts).unwrap(), Some(22.0));
        assert_eq!(kc.stat(StatKey::TotalYards).unwrap(), Some(402.0));
        assert_eq!(kc.stat(StatKey::TotalTds).unwrap(), Some(3.0));

        // BUF players exist, but "buf" is not the team id they carry, so BUF
        // gets its own roll-up and the explicit record stays as supplied
        assert!(teams.get("buf").is_some());
        assert!(teams.get("BUF").is_some());
    }

    #[test]
    fn test_snapshot_deserializes_loose_metrics() {
        let snapshot: WeekStatSnapshot = serde_json::from_value(json!({
            "season": 2025,
            "week": 4,
            "records": [
                {
                    "entity_id": "p1",
                    "entity_type": "player",
                    "name": "Puka Nacua",
                    "metrics": { "target_share": 0.28, "notes": "ignored" }
                }
            ]
        }))
        .unwrap();

        let record = &snapshot.records[0];
        assert_eq!(record.stat(StatKey::TargetShare).unwrap(), Some(0.28));
        assert_eq!(record.stat(StatKey::Carries).unwrap(), None);
    }

    #[test]
    fn test_metric_delta_serialization() {
        let delta = MetricDelta {
            metric: Metric::TargetShare,
            baseline_value: Some(0.0),
            target_value: Some(0.1),
            delta: Some(0.1),
            delta_pct: None,
            available: true,
            zero_baseline: true,
        };

        let value = serde_json::to_value(&delta).unwrap();
        assert_eq!(value["previous_value"], json!(0.0));
        assert_eq!(value["current_value"], json!(0.1));
        assert!(value.get("delta_pct").is_none());
        assert_eq!(value["zero_baseline"], json!(true));
    }
}
