//! # Metric Registry
//!
//! The fixed set of metrics the engine understands. Snapshot records carry a
//! loose name → value map; everything the engine reads goes through
//! [`StatKey`] (raw upstream values) or [`Metric`] (tracked, possibly derived
//! values). Names outside the registry are never looked at.

use crate::error::{InsightsError, Result};
use crate::models::{EntityKind, EntityRecord};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Raw statistic keys read from a snapshot record's metric map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatKey {
    TargetShare,
    AirYardsShare,
    Carries,
    Targets,
    Receptions,
    RushingYards,
    ReceivingYards,
    PassingYards,
    FantasyPointsPpr,
    /// Passing attempts on a player (QB) record
    Attempts,
    PassingTds,
    RushingTds,
    ReceivingTds,
    PassAttempts,
    RushAttempts,
    TotalYards,
    TotalTds,
}

/// Value domain used to reject malformed inputs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatBound {
    /// Fraction in [0, 1]
    Share,
    /// Non-negative count
    Count,
    /// Any finite value (yards and points can go negative)
    Signed,
}

impl StatKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatKey::TargetShare => "target_share",
            StatKey::AirYardsShare => "air_yards_share",
            StatKey::Carries => "carries",
            StatKey::Targets => "targets",
            StatKey::Receptions => "receptions",
            StatKey::RushingYards => "rushing_yards",
            StatKey::ReceivingYards => "receiving_yards",
            StatKey::PassingYards => "passing_yards",
            StatKey::FantasyPointsPpr => "fantasy_points_ppr",
            StatKey::Attempts => "attempts",
            StatKey::PassingTds => "passing_tds",
            StatKey::RushingTds => "rushing_tds",
            StatKey::ReceivingTds => "receiving_tds",
            StatKey::PassAttempts => "pass_attempts",
            StatKey::RushAttempts => "rush_attempts",
            StatKey::TotalYards => "total_yards",
            StatKey::TotalTds => "total_tds",
        }
    }

    fn bound(&self) -> StatBound {
        match self {
            StatKey::TargetShare | StatKey::AirYardsShare => StatBound::Share,
            StatKey::RushingYards
            | StatKey::ReceivingYards
            | StatKey::PassingYards
            | StatKey::FantasyPointsPpr
            | StatKey::TotalYards => StatBound::Signed,
            _ => StatBound::Count,
        }
    }

    /// Check a raw value against the key's domain
    pub fn check(&self, entity_id: &str, value: f64) -> Result<f64> {
        if !value.is_finite() {
            return Err(InsightsError::malformed(entity_id, format!("{} is not finite", self)));
        }
        match self.bound() {
            StatBound::Share if !(0.0..=1.0).contains(&value) => Err(InsightsError::malformed(
                entity_id,
                format!("{} = {} is outside [0, 1]", self, value),
            )),
            StatBound::Count if value < 0.0 => Err(InsightsError::malformed(
                entity_id,
                format!("{} = {} is negative", self, value),
            )),
            _ => Ok(value),
        }
    }
}

impl fmt::Display for StatKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which section of an insight a metric is reported under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricGroup {
    Volume,
    Efficiency,
    Production,
}

/// Tracked metrics, each with a typed accessor over an [`EntityRecord`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    // Player volume
    TargetShare,
    AirYardsShare,
    Carries,
    Targets,
    Receptions,
    Touches,
    // Player efficiency
    YardsPerCarry,
    YardsPerTarget,
    CatchRate,
    YardsPerReception,
    FantasyPointsPerTouch,
    // Player production
    FantasyPointsPpr,
    RushingYards,
    ReceivingYards,
    // Team
    Plays,
    PassAttempts,
    RushAttempts,
    PassRate,
    TotalYards,
    TotalTds,
}

const PLAYER_METRICS: [Metric; 14] = [
    Metric::TargetShare,
    Metric::AirYardsShare,
    Metric::Carries,
    Metric::Targets,
    Metric::Receptions,
    Metric::Touches,
    Metric::YardsPerCarry,
    Metric::YardsPerTarget,
    Metric::CatchRate,
    Metric::YardsPerReception,
    Metric::FantasyPointsPerTouch,
    Metric::FantasyPointsPpr,
    Metric::RushingYards,
    Metric::ReceivingYards,
];

const TEAM_METRICS: [Metric; 6] = [
    Metric::Plays,
    Metric::PassAttempts,
    Metric::RushAttempts,
    Metric::PassRate,
    Metric::TotalYards,
    Metric::TotalTds,
];

impl Metric {
    /// All tracked metrics for an entity kind, in report order
    pub fn for_kind(kind: EntityKind) -> &'static [Metric] {
        match kind {
            EntityKind::Player => &PLAYER_METRICS,
            EntityKind::Team => &TEAM_METRICS,
        }
    }

    pub fn entity_kind(&self) -> EntityKind {
        if TEAM_METRICS.contains(self) {
            EntityKind::Team
        } else {
            EntityKind::Player
        }
    }

    pub fn group(&self) -> MetricGroup {
        match self {
            Metric::TargetShare
            | Metric::AirYardsShare
            | Metric::Carries
            | Metric::Targets
            | Metric::Receptions
            | Metric::Touches
            | Metric::Plays
            | Metric::PassAttempts
            | Metric::RushAttempts => MetricGroup::Volume,
            Metric::YardsPerCarry
            | Metric::YardsPerTarget
            | Metric::CatchRate
            | Metric::YardsPerReception
            | Metric::FantasyPointsPerTouch
            | Metric::PassRate => MetricGroup::Efficiency,
            Metric::FantasyPointsPpr
            | Metric::RushingYards
            | Metric::ReceivingYards
            | Metric::TotalYards
            | Metric::TotalTds => MetricGroup::Production,
        }
    }

    /// Volume and efficiency rates get a short-horizon trend; raw production
    /// totals and team volume splits are delta-only.
    pub fn trend_eligible(&self) -> bool {
        match self.entity_kind() {
            EntityKind::Player => self.group() != MetricGroup::Production,
            EntityKind::Team => matches!(self, Metric::Plays | Metric::PassRate),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::TargetShare => "target_share",
            Metric::AirYardsShare => "air_yards_share",
            Metric::Carries => "carries",
            Metric::Targets => "targets",
            Metric::Receptions => "receptions",
            Metric::Touches => "touches",
            Metric::YardsPerCarry => "yards_per_carry",
            Metric::YardsPerTarget => "yards_per_target",
            Metric::CatchRate => "catch_rate",
            Metric::YardsPerReception => "yards_per_reception",
            Metric::FantasyPointsPerTouch => "fantasy_points_per_touch",
            Metric::FantasyPointsPpr => "fantasy_points_ppr",
            Metric::RushingYards => "rushing_yards",
            Metric::ReceivingYards => "receiving_yards",
            Metric::Plays => "plays",
            Metric::PassAttempts => "pass_attempts",
            Metric::RushAttempts => "rush_attempts",
            Metric::PassRate => "pass_rate",
            Metric::TotalYards => "total_yards",
            Metric::TotalTds => "total_tds",
        }
    }

    /// Human-readable label used in award names
    pub fn label(&self) -> &'static str {
        match self {
            Metric::TargetShare => "Target Share",
            Metric::AirYardsShare => "Air Yards Share",
            Metric::Carries => "Carries",
            Metric::Targets => "Targets",
            Metric::Receptions => "Receptions",
            Metric::Touches => "Touches",
            Metric::YardsPerCarry => "YPC",
            Metric::YardsPerTarget => "Yards per Target",
            Metric::CatchRate => "Catch Rate",
            Metric::YardsPerReception => "Yards per Reception",
            Metric::FantasyPointsPerTouch => "Fantasy Points per Touch",
            Metric::FantasyPointsPpr => "Fantasy Points",
            Metric::RushingYards => "Rushing Yards",
            Metric::ReceivingYards => "Receiving Yards",
            Metric::Plays => "Plays",
            Metric::PassAttempts => "Pass Attempts",
            Metric::RushAttempts => "Rush Attempts",
            Metric::PassRate => "Pass Rate",
            Metric::TotalYards => "Total Yards",
            Metric::TotalTds => "Total TDs",
        }
    }

    /// Read this metric from a record.
    ///
    /// `Ok(None)` means the value is absent (missing operand or zero
    /// denominator); `Err` means the record itself is malformed.
    pub fn value(&self, record: &EntityRecord) -> Result<Option<f64>> {
        let stat = |key: StatKey| record.stat(key);

        let value = match self {
            Metric::TargetShare => stat(StatKey::TargetShare)?,
            Metric::AirYardsShare => stat(StatKey::AirYardsShare)?,
            Metric::Carries => stat(StatKey::Carries)?,
            Metric::Targets => stat(StatKey::Targets)?,
            Metric::Receptions => stat(StatKey::Receptions)?,
            Metric::Touches => sum(stat(StatKey::Carries)?, stat(StatKey::Receptions)?),
            Metric::YardsPerCarry => ratio(stat(StatKey::RushingYards)?, stat(StatKey::Carries)?),
            Metric::YardsPerTarget => {
                ratio(stat(StatKey::ReceivingYards)?, stat(StatKey::Targets)?)
            }
            Metric::CatchRate => ratio(stat(StatKey::Receptions)?, stat(StatKey::Targets)?),
            Metric::YardsPerReception => {
                ratio(stat(StatKey::ReceivingYards)?, stat(StatKey::Receptions)?)
            }
            Metric::FantasyPointsPerTouch => ratio(
                stat(StatKey::FantasyPointsPpr)?,
                sum(stat(StatKey::Carries)?, stat(StatKey::Receptions)?),
            ),
            Metric::FantasyPointsPpr => stat(StatKey::FantasyPointsPpr)?,
            Metric::RushingYards => stat(StatKey::RushingYards)?,
            Metric::ReceivingYards => stat(StatKey::ReceivingYards)?,
            Metric::Plays => sum(stat(StatKey::PassAttempts)?, stat(StatKey::RushAttempts)?),
            Metric::PassAttempts => stat(StatKey::PassAttempts)?,
            Metric::RushAttempts => stat(StatKey::RushAttempts)?,
            Metric::PassRate => ratio(
                stat(StatKey::PassAttempts)?,
                sum(stat(StatKey::PassAttempts)?, stat(StatKey::RushAttempts)?),
            ),
            Metric::TotalYards => stat(StatKey::TotalYards)?,
            Metric::TotalTds => stat(StatKey::TotalTds)?,
        };

        Ok(value)
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn sum(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    Some(a? + b?)
}

fn ratio(numerator: Option<f64>, denominator: Option<f64>) -> Option<f64> {
    let denominator = denominator?;
    if denominator > 0.0 {
        Some(numerator? / denominator)
    } else {
        None
    }
}
