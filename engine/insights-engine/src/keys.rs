//! Deterministic storage key layout

use crate::models::WeekPair;

/// Builds every key the engine reads or writes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyScheme {
    stats_prefix: String,
    output_prefix: String,
}

impl Default for KeyScheme {
    fn default() -> Self {
        Self::new("stats/", "")
    }
}

impl KeyScheme {
    pub fn new(stats_prefix: &str, output_prefix: &str) -> Self {
        Self { stats_prefix: normalize(stats_prefix), output_prefix: normalize(output_prefix) }
    }

    pub fn season_metadata(&self) -> String {
        format!("{}metadata.json", self.stats_prefix)
    }

    pub fn weekly_prefix(&self, season: i32) -> String {
        format!("{}weekly/season/{season}/week/", self.stats_prefix)
    }

    pub fn weekly_snapshot(&self, season: i32, week: u32) -> String {
        format!("{}{week}/data.json", self.weekly_prefix(season))
    }

    /// Week number of a key under [`Self::weekly_prefix`], if it is a snapshot key
    pub fn parse_weekly_snapshot(&self, season: i32, key: &str) -> Option<u32> {
        key.strip_prefix(&self.weekly_prefix(season))?.strip_suffix("/data.json")?.parse().ok()
    }

    pub fn summary(&self, season: i32) -> String {
        format!("{}season/{season}/comparisons/summary", self.output_prefix)
    }

    pub fn insights(&self, season: i32, pair: WeekPair) -> String {
        format!("{}season/{season}/comparisons/{pair}/insights", self.output_prefix)
    }

    pub fn superlatives(&self, season: i32, pair: WeekPair) -> String {
        format!("{}season/{season}/comparisons/{pair}/superlatives", self.output_prefix)
    }
}

fn normalize(prefix: &str) -> String {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{trimmed}/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_keys() {
        let keys = KeyScheme::default();
        let pair = WeekPair { week_from: 3, week_to: 5 };

        assert_eq!(keys.summary(2025), "season/2025/comparisons/summary");
        assert_eq!(keys.insights(2025, pair), "season/2025/comparisons/3-to-5/insights");
        assert_eq!(keys.superlatives(2025, pair), "season/2025/comparisons/3-to-5/superlatives");
    }

    #[test]
    fn test_prefixes_are_normalized() {
        let keys = KeyScheme::new("/raw/stats", "insights/");
        assert_eq!(keys.season_metadata(), "raw/stats/metadata.json");
        assert_eq!(keys.summary(2024), "insights/season/2024/comparisons/summary");
    }

    #[test]
    fn test_weekly_snapshot_round_trip() {
        let keys = KeyScheme::default();
        let key = keys.weekly_snapshot(2025, 7);

        assert_eq!(key, "stats/weekly/season/2025/week/7/data.json");
        assert_eq!(keys.parse_weekly_snapshot(2025, &key), Some(7));
        assert_eq!(keys.parse_weekly_snapshot(2024, &key), None);
        let raw = keys.parse_weekly_snapshot(2025, "stats/weekly/season/2025/week/7/raw.csv");
        assert_eq!(raw, None);
    }
}
