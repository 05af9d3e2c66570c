//! Configuration for the insights engine

use crate::error::{InsightsError, Result};
use crate::metrics::Metric;
use crate::models::EntityKind;
use config::{Config, Environment, File};
use persistence::RetryConfig;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Top-level engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InsightsConfig {
    /// Delta, trend, flag and ranking settings
    pub analysis: AnalysisConfig,

    /// Batch generation settings
    pub generation: GenerationConfig,

    /// Storage location and key layout
    pub storage: StorageConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub trend: TrendConfig,
    pub flags: FlagConfig,
    pub superlatives: SuperlativesConfig,
}

/// Short-horizon trend fitting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendConfig {
    /// Number of weeks ending at the target week considered for the fit
    pub window: u32,

    /// Slopes within `±flat_epsilon` are classified flat
    pub flat_epsilon: f64,

    /// Per-metric epsilon overrides, keyed by metric name
    pub metric_epsilon: BTreeMap<String, f64>,
}

impl Default for TrendConfig {
    fn default() -> Self {
        // Shares and rates live in [0, 1], so the count-scale default is far too coarse
        let metric_epsilon = [
            (Metric::TargetShare, 0.005),
            (Metric::AirYardsShare, 0.005),
            (Metric::CatchRate, 0.01),
            (Metric::PassRate, 0.01),
        ]
        .into_iter()
        .map(|(metric, eps)| (metric.as_str().to_string(), eps))
        .collect();

        Self { window: 3, flat_epsilon: 0.05, metric_epsilon }
    }
}

impl TrendConfig {
    pub fn epsilon_for(&self, metric: Metric) -> f64 {
        self.metric_epsilon.get(metric.as_str()).copied().unwrap_or(self.flat_epsilon)
    }
}

/// Breakout / bust-risk rule for one entity kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlagRule {
    /// Primary volume metric the rule watches
    pub metric: Metric,

    /// Minimum absolute delta of `metric` to raise a flag
    pub threshold: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlagConfig {
    pub player: FlagRule,
    pub team: FlagRule,
}

impl Default for FlagConfig {
    fn default() -> Self {
        Self {
            player: FlagRule { metric: Metric::Touches, threshold: 4.0 },
            team: FlagRule { metric: Metric::Plays, threshold: 6.0 },
        }
    }
}

impl FlagConfig {
    pub fn rule_for(&self, kind: EntityKind) -> &FlagRule {
        match kind {
            EntityKind::Player => &self.player,
            EntityKind::Team => &self.team,
        }
    }
}

/// Which end of the delta ordering a slot awards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankDirection {
    Gainer,
    Loser,
}

/// One `(category, metric)` award list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuperlativeSlot {
    pub category: String,
    pub metric: Metric,
    pub direction: RankDirection,

    /// Only strictly positive deltas are eligible (improver awards)
    #[serde(default)]
    pub positive_only: bool,
}

impl SuperlativeSlot {
    pub fn new(category: &str, metric: Metric, direction: RankDirection) -> Self {
        Self { category: category.to_string(), metric, direction, positive_only: false }
    }

    pub fn improver(category: &str, metric: Metric) -> Self {
        Self { positive_only: true, ..Self::new(category, metric, RankDirection::Gainer) }
    }

    pub fn award_name(&self) -> String {
        let suffix = match (self.direction, self.positive_only) {
            (RankDirection::Gainer, true) => "Improver",
            (RankDirection::Gainer, false) => "Gainer",
            (RankDirection::Loser, _) => "Loser",
        };
        format!("{} {}", self.metric.label(), suffix)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuperlativesConfig {
    /// Awards per slot
    pub top_k: usize,
    pub slots: Vec<SuperlativeSlot>,
}

impl Default for SuperlativesConfig {
    fn default() -> Self {
        use RankDirection::{Gainer, Loser};

        Self {
            top_k: 3,
            slots: vec![
                SuperlativeSlot::new("volume_gainers", Metric::TargetShare, Gainer),
                SuperlativeSlot::new("volume_losers", Metric::TargetShare, Loser),
                SuperlativeSlot::new("volume_gainers", Metric::Touches, Gainer),
                SuperlativeSlot::new("volume_gainers", Metric::AirYardsShare, Gainer),
                SuperlativeSlot::improver("efficiency_improvers", Metric::YardsPerCarry),
                SuperlativeSlot::improver("efficiency_improvers", Metric::CatchRate),
                SuperlativeSlot::new("fantasy_gainers", Metric::FantasyPointsPpr, Gainer),
                SuperlativeSlot::new("fantasy_losers", Metric::FantasyPointsPpr, Loser),
                SuperlativeSlot::new("team_gainers", Metric::Plays, Gainer),
                SuperlativeSlot::new("team_gainers", Metric::PassRate, Gainer),
            ],
        }
    }
}

/// Batch generation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Pairs generated concurrently
    pub workers: usize,

    /// Manifest is flushed after this many pair completions
    pub manifest_flush_every: usize,

    /// Attempts at a conditional manifest write before giving up
    pub manifest_conflict_retries: u32,

    /// Retry policy for artifact writes
    pub retry: RetryConfig,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            manifest_flush_every: 10,
            manifest_conflict_retries: 5,
            retry: RetryConfig::default(),
        }
    }
}

/// Storage location and key layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Base directory of the local blob store
    pub data_dir: PathBuf,

    /// Prefix of the upstream snapshot keys
    pub stats_prefix: String,

    /// Prefix prepended to every output key
    pub output_prefix: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            stats_prefix: "stats/".to_string(),
            output_prefix: String::new(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: "pretty".to_string() }
    }
}

impl InsightsConfig {
    /// Load defaults, then an optional TOML file, then `INSIGHTS__*` env vars
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder =
            Config::builder().add_source(Config::try_from(&InsightsConfig::default())?);

        if let Some(path) = path {
            tracing::debug!("Loading configuration from file: {:?}", path);
            builder = builder.add_source(File::from(path).required(true));
        }

        builder = builder
            .add_source(Environment::with_prefix("INSIGHTS").separator("__").try_parsing(true));

        let config: InsightsConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let trend = &self.analysis.trend;
        if trend.window < 2 {
            return Err(InsightsError::config("analysis.trend.window must be at least 2"));
        }
        if !(trend.flat_epsilon >= 0.0) {
            return Err(InsightsError::config("analysis.trend.flat_epsilon must be non-negative"));
        }
        for (name, eps) in &trend.metric_epsilon {
            if parse_metric(name).is_none() {
                return Err(InsightsError::config(format!(
                    "unknown metric in metric_epsilon: {name}"
                )));
            }
            if !(*eps >= 0.0) {
                return Err(InsightsError::config(format!(
                    "epsilon for {name} must be non-negative"
                )));
            }
        }

        let flags = &self.analysis.flags;
        for (kind, rule) in [(EntityKind::Player, &flags.player), (EntityKind::Team, &flags.team)] {
            if rule.metric.entity_kind() != kind {
                return Err(InsightsError::config(format!(
                    "{kind} flag metric {} is not a {kind} metric",
                    rule.metric
                )));
            }
            if !rule.metric.trend_eligible() {
                return Err(InsightsError::config(format!(
                    "{kind} flag metric {} has no trend",
                    rule.metric
                )));
            }
            if !(rule.threshold >= 0.0) {
                return Err(InsightsError::config(format!(
                    "{kind} flag threshold must be non-negative"
                )));
            }
        }

        let superlatives = &self.analysis.superlatives;
        if superlatives.top_k == 0 {
            return Err(InsightsError::config("analysis.superlatives.top_k must be greater than 0"));
        }
        let mut seen = BTreeSet::new();
        for slot in &superlatives.slots {
            if !seen.insert((slot.category.as_str(), slot.metric)) {
                return Err(InsightsError::config(format!(
                    "duplicate superlative slot ({}, {})",
                    slot.category, slot.metric
                )));
            }
            if slot.positive_only && slot.direction == RankDirection::Loser {
                return Err(InsightsError::config(format!(
                    "superlative slot ({}, {}) cannot be a positive-only loser list",
                    slot.category, slot.metric
                )));
            }
        }
        // A category ranks one entity kind only
        let mut category_kinds: BTreeMap<&str, EntityKind> = BTreeMap::new();
        for slot in &superlatives.slots {
            let kind = slot.metric.entity_kind();
            if let Some(existing) = category_kinds.insert(slot.category.as_str(), kind) {
                if existing != kind {
                    return Err(InsightsError::config(format!(
                        "superlative category {} mixes player and team metrics",
                        slot.category
                    )));
                }
            }
        }

        if self.generation.workers == 0 {
            return Err(InsightsError::config("generation.workers must be greater than 0"));
        }
        if self.generation.manifest_flush_every == 0 {
            return Err(InsightsError::config(
                "generation.manifest_flush_every must be greater than 0",
            ));
        }
        if self.generation.manifest_conflict_retries == 0 {
            return Err(InsightsError::config(
                "generation.manifest_conflict_retries must be greater than 0",
            ));
        }
        self.persistence().validate().map_err(InsightsError::Config)?;

        match self.logging.format.as_str() {
            "pretty" | "json" => {}
            other => return Err(InsightsError::config(format!("unknown log format: {other}"))),
        }

        Ok(())
    }

    /// Persistence settings for the local blob store
    pub fn persistence(&self) -> persistence::PersistenceConfig {
        persistence::PersistenceConfig {
            data_dir: self.storage.data_dir.clone(),
            retry: self.generation.retry.clone(),
        }
    }
}

fn parse_metric(name: &str) -> Option<Metric> {
    serde_json::from_value(serde_json::Value::String(name.to_string())).ok()
}
