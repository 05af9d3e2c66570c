//! # Season Manifest
//!
//! The manifest is the source of truth for which comparison pairs exist.
//! It is the only key workers contend on, so all mutation goes through a
//! single [`ManifestWriter`] task that drains completions from a channel and
//! flushes in batches. Flushes use conditional writes; on conflict the
//! stored manifest is re-read and merged before trying again.

use crate::error::{InsightsError, Result};
use crate::keys::KeyScheme;
use crate::models::WeekPair;
use chrono::{DateTime, Utc};
use persistence::{with_retry, BlobVersion, PersistenceBackend, PersistenceError, RetryConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairStatus {
    Ok,
    Failed,
}

/// Sizes of a written comparison
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairCounts {
    pub players: usize,
    pub teams: usize,
    pub superlatives: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub week_from: u32,
    pub week_to: u32,
    pub gap: u32,
    pub storage_key: String,
    pub generated_at: DateTime<Utc>,
    pub status: PairStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counts: Option<PairCounts>,
}

impl ManifestEntry {
    pub fn ok(pair: WeekPair, storage_key: String, counts: PairCounts) -> Self {
        Self {
            week_from: pair.week_from,
            week_to: pair.week_to,
            gap: pair.gap(),
            storage_key,
            generated_at: Utc::now(),
            status: PairStatus::Ok,
            error: None,
            counts: Some(counts),
        }
    }

    pub fn failed(pair: WeekPair, storage_key: String, error: impl Into<String>) -> Self {
        Self {
            week_from: pair.week_from,
            week_to: pair.week_to,
            gap: pair.gap(),
            storage_key,
            generated_at: Utc::now(),
            status: PairStatus::Failed,
            error: Some(error.into()),
            counts: None,
        }
    }

    pub fn pair(&self) -> WeekPair {
        WeekPair { week_from: self.week_from, week_to: self.week_to }
    }
}

/// Lifecycle of a season's generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeasonStatus {
    Planned,
    Generating,
    Complete,
    PartiallyFailed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GapCounts {
    pub expected: usize,
    pub ok: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeasonManifest {
    pub season: i32,
    pub max_week: u32,
    pub total_expected: usize,
    pub status: SeasonStatus,
    pub run_id: Uuid,
    pub updated_at: DateTime<Utc>,
    pub successful: usize,
    pub failed: usize,
    pub counts_by_gap: BTreeMap<u32, GapCounts>,
    pub failed_pairs: Vec<WeekPair>,
    /// Sorted by (week_from, week_to), one per pair
    pub entries: Vec<ManifestEntry>,
}

/// `n·(n−1)/2` pairs for `n` closed weeks
pub fn expected_pairs(max_week: u32) -> usize {
    let n = max_week as usize;
    n * n.saturating_sub(1) / 2
}

impl SeasonManifest {
    pub fn planned(season: i32, max_week: u32) -> Self {
        let mut manifest = Self {
            season,
            max_week,
            total_expected: 0,
            status: SeasonStatus::Planned,
            run_id: Uuid::new_v4(),
            updated_at: Utc::now(),
            successful: 0,
            failed: 0,
            counts_by_gap: BTreeMap::new(),
            failed_pairs: Vec::new(),
            entries: Vec::new(),
        };
        manifest.refresh();
        manifest
    }

    pub fn entry(&self, pair: WeekPair) -> Option<&ManifestEntry> {
        self.entries
            .binary_search_by_key(&pair, ManifestEntry::pair)
            .ok()
            .map(|i| &self.entries[i])
    }

    pub fn is_ok(&self, pair: WeekPair) -> bool {
        self.entry(pair).is_some_and(|e| e.status == PairStatus::Ok)
    }

    /// Insert or replace the entry for a pair
    pub fn record(&mut self, entry: ManifestEntry) {
        match self.entries.binary_search_by_key(&entry.pair(), ManifestEntry::pair) {
            Ok(i) => self.entries[i] = entry,
            Err(i) => self.entries.insert(i, entry),
        }
    }

    /// Fold another writer's view into this one; per pair the most recently
    /// generated entry wins and the wider season range is kept.
    pub fn merge_from(&mut self, other: &SeasonManifest) {
        self.max_week = self.max_week.max(other.max_week);
        for theirs in &other.entries {
            let newer = match self.entry(theirs.pair()) {
                Some(ours) => theirs.generated_at > ours.generated_at,
                None => true,
            };
            if newer {
                self.record(theirs.clone());
            }
        }
        self.refresh();
    }

    /// Recompute the summary fields from the entries. Every recorded entry
    /// counts, including pairs beyond `max_week`.
    pub fn refresh(&mut self) {
        self.max_week = self.entries.iter().map(|e| e.week_to).fold(self.max_week, u32::max);
        self.total_expected = expected_pairs(self.max_week);
        self.counts_by_gap = (1..self.max_week)
            .map(|gap| {
                let expected = (self.max_week - gap) as usize;
                (gap, GapCounts { expected, ok: 0, failed: 0 })
            })
            .collect();
        self.failed_pairs.clear();
        self.successful = 0;
        self.failed = 0;

        for entry in &self.entries {
            let counts = self.counts_by_gap.entry(entry.gap).or_default();
            match entry.status {
                PairStatus::Ok => {
                    counts.ok += 1;
                    self.successful += 1;
                }
                PairStatus::Failed => {
                    counts.failed += 1;
                    self.failed += 1;
                    self.failed_pairs.push(entry.pair());
                }
            }
        }
        self.updated_at = Utc::now();
    }

    /// Settle the status once no more pairs are in flight. A season with
    /// pairs never attempted stays `Generating` until a later run fills them.
    pub fn is_settled(&self) -> bool {
        matches!(self.status, SeasonStatus::Complete | SeasonStatus::PartiallyFailed)
    }

    pub fn finalize(&mut self) {
        self.refresh();
        self.status = if self.failed > 0 {
            SeasonStatus::PartiallyFailed
        } else if self.successful >= self.total_expected {
            SeasonStatus::Complete
        } else {
            SeasonStatus::Generating
        };
    }
}

/// Versioned load/save of the manifest blob
#[derive(Clone)]
pub struct ManifestStore {
    store: Arc<dyn PersistenceBackend>,
    keys: KeyScheme,
    retry: RetryConfig,
    conflict_retries: u32,
}

impl ManifestStore {
    pub fn new(
        store: Arc<dyn PersistenceBackend>,
        keys: KeyScheme,
        retry: RetryConfig,
        conflict_retries: u32,
    ) -> Self {
        Self { store, keys, retry, conflict_retries }
    }

    pub async fn load(&self, season: i32) -> Result<Option<(SeasonManifest, BlobVersion)>> {
        let key = self.keys.summary(season);
        match self.store.get(&key).await? {
            Some(blob) => Ok(Some((serde_json::from_slice(&blob.bytes)?, blob.version))),
            None => Ok(None),
        }
    }

    /// Conditionally write `manifest` over `version`. On conflict the stored
    /// manifest is merged in and the write retried; `version` tracks the
    /// version now stored. A settled status is recomputed after a merge.
    pub async fn save(
        &self,
        manifest: &mut SeasonManifest,
        version: &mut Option<BlobVersion>,
    ) -> Result<()> {
        let key = self.keys.summary(manifest.season);

        for attempt in 1..=self.conflict_retries {
            let bytes = serde_json::to_vec_pretty(manifest)?;
            let expected = *version;
            let result = with_retry(&self.retry, "manifest write", || {
                self.store.put_if_version(&key, bytes.clone(), expected)
            })
            .await;

            match result {
                Ok(new_version) => {
                    *version = Some(new_version);
                    debug!(
                        "Manifest for season {} saved ({} entries)",
                        manifest.season,
                        manifest.entries.len()
                    );
                    return Ok(());
                }
                Err(PersistenceError::Conflict { .. }) if attempt < self.conflict_retries => {
                    warn!("Manifest write conflict on attempt {}, merging stored copy", attempt);
                    match self.load(manifest.season).await? {
                        Some((stored, stored_version)) => {
                            manifest.merge_from(&stored);
                            if manifest.is_settled() {
                                manifest.finalize();
                            }
                            *version = Some(stored_version);
                        }
                        None => *version = None,
                    }
                }
                Err(source) => return Err(InsightsError::PersistenceWrite { key, source }),
            }
        }

        Err(InsightsError::PersistenceWrite {
            key: key.clone(),
            source: PersistenceError::Conflict { key, expected: *version, found: None },
        })
    }
}

/// Sole owner of the in-progress manifest during a run
pub struct ManifestWriter {
    store: ManifestStore,
    manifest: SeasonManifest,
    version: Option<BlobVersion>,
    flush_every: usize,
}

impl ManifestWriter {
    pub fn new(
        store: ManifestStore,
        manifest: SeasonManifest,
        version: Option<BlobVersion>,
        flush_every: usize,
    ) -> Self {
        Self { store, manifest, version, flush_every: flush_every.max(1) }
    }

    /// Drain completions until every sender is dropped, then write the final
    /// manifest. Intermediate flush failures are logged; the final one is not
    /// swallowed.
    pub async fn run(
        mut self,
        mut completions: mpsc::Receiver<ManifestEntry>,
    ) -> Result<SeasonManifest> {
        let mut pending = 0;

        while let Some(entry) = completions.recv().await {
            self.manifest.record(entry);
            pending += 1;

            if pending >= self.flush_every {
                self.manifest.refresh();
                match self.store.save(&mut self.manifest, &mut self.version).await {
                    Ok(()) => pending = 0,
                    Err(e) => warn!("Periodic manifest flush failed: {}", e),
                }
            }
        }

        self.manifest.finalize();
        self.store.save(&mut self.manifest, &mut self.version).await?;
        info!(
            "Manifest for season {} finalized: {:?}, {}/{} ok, {} failed",
            self.manifest.season,
            self.manifest.status,
            self.manifest.successful,
            self.manifest.total_expected,
            self.manifest.failed
        );
        Ok(self.manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use persistence::InMemoryPersistence;

    fn pair(from: u32, to: u32) -> WeekPair {
        WeekPair { week_from: from, week_to: to }
    }

    fn ok(from: u32, to: u32) -> ManifestEntry {
        let key = format!("season/2025/comparisons/{from}-to-{to}");
        ManifestEntry::ok(pair(from, to), key, PairCounts::default())
    }

    fn manifest_store(store: Arc<InMemoryPersistence>) -> ManifestStore {
        let retry = RetryConfig {
            max_attempts: 2,
            initial_delay_ms: 1,
            max_delay_ms: 2,
            backoff_multiplier: 2.0,
        };
        ManifestStore::new(store, KeyScheme::default(), retry, 3)
    }

    #[test]
    fn test_expected_pairs() {
        assert_eq!(expected_pairs(0), 0);
        assert_eq!(expected_pairs(1), 0);
        assert_eq!(expected_pairs(7), 21);
        assert_eq!(expected_pairs(18), 153);
    }

    #[test]
    fn test_counts_by_gap() {
        let mut manifest = SeasonManifest::planned(2025, 4);
        manifest.record(ok(1, 2));
        manifest.record(ok(2, 3));
        manifest.record(ManifestEntry::failed(pair(1, 3), "k".into(), "missing week"));
        manifest.refresh();

        assert_eq!(manifest.total_expected, 6);
        assert_eq!(manifest.counts_by_gap[&1], GapCounts { expected: 3, ok: 2, failed: 0 });
        assert_eq!(manifest.counts_by_gap[&2], GapCounts { expected: 2, ok: 0, failed: 1 });
        assert_eq!(manifest.counts_by_gap[&3], GapCounts { expected: 1, ok: 0, failed: 0 });
        assert_eq!(manifest.failed_pairs, vec![pair(1, 3)]);
    }

    #[test]
    fn test_record_replaces_and_keeps_order() {
        let mut manifest = SeasonManifest::planned(2025, 3);
        manifest.record(ok(2, 3));
        manifest.record(ManifestEntry::failed(pair(1, 2), "k".into(), "boom"));
        manifest.record(ok(1, 2));

        let pairs: Vec<_> = manifest.entries.iter().map(ManifestEntry::pair).collect();
        assert_eq!(pairs, vec![pair(1, 2), pair(2, 3)]);
        assert!(manifest.is_ok(pair(1, 2)));
    }

    #[test]
    fn test_finalize_status() {
        let mut manifest = SeasonManifest::planned(2025, 3);
        manifest.record(ok(1, 2));
        manifest.finalize();
        assert_eq!(manifest.status, SeasonStatus::Generating);

        manifest.record(ok(1, 3));
        manifest.record(ok(2, 3));
        manifest.finalize();
        assert_eq!(manifest.status, SeasonStatus::Complete);

        manifest.record(ManifestEntry::failed(pair(2, 3), "k".into(), "boom"));
        manifest.finalize();
        assert_eq!(manifest.status, SeasonStatus::PartiallyFailed);
    }

    #[tokio::test]
    async fn test_save_merges_on_conflict() {
        let backend = Arc::new(InMemoryPersistence::with_default_config());
        let store = manifest_store(backend.clone());

        // Two writers start from the same (absent) version
        let mut first = SeasonManifest::planned(2025, 3);
        let mut first_version = None;
        let mut second = SeasonManifest::planned(2025, 3);
        let mut second_version = None;

        first.record(ok(1, 2));
        store.save(&mut first, &mut first_version).await.unwrap();

        second.record(ok(2, 3));
        store.save(&mut second, &mut second_version).await.unwrap();

        let (stored, version) = store.load(2025).await.unwrap().unwrap();
        assert_eq!(Some(version), second_version);
        assert!(stored.is_ok(pair(1, 2)));
        assert!(stored.is_ok(pair(2, 3)));
    }

    #[tokio::test]
    async fn test_writer_flushes_and_finalizes() {
        let backend = Arc::new(InMemoryPersistence::with_default_config());
        let store = manifest_store(backend.clone());
        let (tx, rx) = mpsc::channel(8);

        let writer = ManifestWriter::new(store.clone(), SeasonManifest::planned(2025, 3), None, 2);
        let handle = tokio::spawn(writer.run(rx));

        tx.send(ok(1, 2)).await.unwrap();
        tx.send(ok(1, 3)).await.unwrap();
        tx.send(ManifestEntry::failed(pair(2, 3), "k".into(), "boom")).await.unwrap();
        drop(tx);

        let manifest = handle.await.unwrap().unwrap();
        assert_eq!(manifest.status, SeasonStatus::PartiallyFailed);
        assert_eq!(manifest.failed_pairs, vec![pair(2, 3)]);

        let (stored, _) = store.load(2025).await.unwrap().unwrap();
        assert_eq!(stored, manifest);
    }

    #[test]
    fn test_merge_keeps_wider_range_and_failures() {
        let mut wide = SeasonManifest::planned(2025, 5);
        wide.record(ManifestEntry::failed(pair(3, 5), "k".into(), "missing week 5"));
        wide.refresh();

        let mut narrow = SeasonManifest::planned(2025, 3);
        narrow.record(ok(1, 2));
        narrow.merge_from(&wide);

        assert_eq!(narrow.max_week, 5);
        assert_eq!(narrow.total_expected, 10);
        assert_eq!(narrow.failed_pairs, vec![pair(3, 5)]);
        narrow.finalize();
        assert_eq!(narrow.status, SeasonStatus::PartiallyFailed);
    }

    #[tokio::test]
    async fn test_settled_status_is_recomputed_after_merge() {
        let backend = Arc::new(InMemoryPersistence::with_default_config());
        let store = manifest_store(backend.clone());

        let mut first = SeasonManifest::planned(2025, 3);
        let mut first_version = None;
        first.record(ok(1, 2));
        first.record(ok(1, 3));
        store.save(&mut first, &mut first_version).await.unwrap();

        // Second writer settles having seen only its own pair
        let mut second = SeasonManifest::planned(2025, 3);
        let mut second_version = None;
        second.record(ok(2, 3));
        second.status = SeasonStatus::Complete;
        store.save(&mut second, &mut second_version).await.unwrap();

        let (stored, _) = store.load(2025).await.unwrap().unwrap();
        assert_eq!(stored.successful, 3);
        assert_eq!(stored.status, SeasonStatus::Complete);

        // A settled writer that lost a failure in the race picks it up
        let mut third = SeasonManifest::planned(2025, 3);
        let mut third_version = None;
        third.record(ManifestEntry::failed(pair(1, 2), "k".into(), "boom"));
        store.save(&mut third, &mut third_version).await.unwrap();
        let mut fourth = stored.clone();
        let mut fourth_version = None;
        fourth.finalize();
        store.save(&mut fourth, &mut fourth_version).await.unwrap();

        let (stored, _) = store.load(2025).await.unwrap().unwrap();
        assert_eq!(stored.status, SeasonStatus::PartiallyFailed);
    }
}
