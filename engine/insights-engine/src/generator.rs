//! # Comparison Matrix Generator
//!
//! Plans every `(from, to)` pair of a season, generates each pair on a
//! bounded worker pool, and records the outcome in the season manifest.
//!
//! ## Lifecycle
//!
//! `Planned → Generating → Complete | PartiallyFailed`
//!
//! - A pair failure is recorded and never touches its siblings
//! - A pair is published whole: if its superlatives cannot be written, its
//!   insights blob is rolled back to the previous content
//! - A panicking pair task is recorded as a failed pair
//! - Pairs already `ok` in the manifest are skipped unless forced
//! - Cancellation stops scheduling new pairs; in-flight pairs finish and
//!   are recorded

use crate::assembler::InsightAssembler;
use crate::config::{AnalysisConfig, InsightsConfig};
use crate::error::{InsightsError, Result};
use crate::keys::KeyScheme;
use crate::manifest::{
    ManifestEntry, ManifestStore, ManifestWriter, PairCounts, PairStatus, SeasonManifest,
    SeasonStatus,
};
use crate::models::{ComparisonResult, SeasonContext, WeekPair, WeekStatSnapshot};
use crate::source::SnapshotSource;
use crate::superlatives;
use crate::trend::window_weeks;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::FutureExt;
use persistence::{with_retry, PersistenceBackend, PersistenceError, RetryConfig, StoredBlob};
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{mpsc, OnceCell, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// All valid pairs for `max_week` closed weeks, ordered by (from, to)
pub fn plan_pairs(max_week: u32) -> Vec<WeekPair> {
    (1..=max_week)
        .flat_map(|from| {
            (from + 1..=max_week).map(move |to| WeekPair { week_from: from, week_to: to })
        })
        .collect()
}

/// Number of planned pairs per gap
pub fn pairs_by_gap(pairs: &[WeekPair]) -> BTreeMap<u32, usize> {
    let mut counts = BTreeMap::new();
    for pair in pairs {
        *counts.entry(pair.gap()).or_insert(0) += 1;
    }
    counts
}

/// Determine the number of closed weeks: explicit value, then the season
/// pointer (same season only), then the highest week with a snapshot.
pub async fn resolve_max_week(
    source: &dyn SnapshotSource,
    season: i32,
    explicit: Option<u32>,
) -> Result<SeasonContext> {
    if let Some(max_week) = explicit {
        return Ok(SeasonContext { season, max_week });
    }

    let metadata = source
        .season_metadata()
        .await
        .map_err(|e| InsightsError::SeasonMetadata(format!("cannot read season metadata: {e}")))?;
    if let Some(metadata) = metadata.filter(|m| m.current_season == season) {
        return Ok(SeasonContext { season, max_week: metadata.current_week });
    }

    let weeks = source.available_weeks(season).await.map_err(|e| {
        InsightsError::SeasonMetadata(format!("cannot list weeks for season {season}: {e}"))
    })?;
    match weeks.last() {
        Some(&max_week) => Ok(SeasonContext { season, max_week }),
        None => Err(InsightsError::SeasonMetadata(format!(
            "no weeks available for season {season}"
        ))),
    }
}

/// Compute one comparison from already-loaded snapshots.
///
/// Pure: identical snapshots and `generated_at` give an identical result.
pub fn build_comparison(
    config: &AnalysisConfig,
    season: i32,
    pair: WeekPair,
    snapshots: &BTreeMap<u32, &WeekStatSnapshot>,
    generated_at: DateTime<Utc>,
) -> Result<ComparisonResult> {
    let assembled = InsightAssembler::new(config).assemble(season, pair, snapshots)?;
    let superlatives =
        superlatives::rank(&config.superlatives, &assembled.players, &assembled.teams);

    Ok(ComparisonResult {
        season,
        week_from: pair.week_from,
        week_to: pair.week_to,
        player_insights: assembled.players,
        team_insights: assembled.teams,
        superlatives,
        skipped_entities: assembled.skipped,
        generated_at,
    })
}

/// Parameters of one generation run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationRequest {
    pub season: i32,
    pub max_week: Option<u32>,
    pub force_regenerate: bool,
    /// Restrict the run to these pairs; `None` means the full plan
    pub only_pairs: Option<Vec<WeekPair>>,
}

impl GenerationRequest {
    pub fn season(season: i32) -> Self {
        Self { season, ..Default::default() }
    }
}

/// Outcome of a generation run
#[derive(Debug, Clone)]
pub struct GenerationReport {
    pub season: i32,
    pub max_week: u32,
    pub planned: usize,
    pub attempted: usize,
    pub succeeded: usize,
    pub skipped_existing: usize,
    pub failed_pairs: Vec<WeekPair>,
    pub cancelled: bool,
    pub status: SeasonStatus,
    pub manifest: SeasonManifest,
}

impl GenerationReport {
    /// Surface failed pairs of this run as an error
    pub fn into_result(self) -> Result<Self> {
        if self.failed_pairs.is_empty() {
            Ok(self)
        } else {
            Err(InsightsError::PartialBatchFailure {
                season: self.season,
                failed: self.failed_pairs,
            })
        }
    }
}

/// Per-run snapshot cache; each week is fetched at most once
struct SnapshotCache {
    source: Arc<dyn SnapshotSource>,
    season: i32,
    weeks: DashMap<u32, Arc<OnceCell<Option<Arc<WeekStatSnapshot>>>>>,
}

impl SnapshotCache {
    fn new(source: Arc<dyn SnapshotSource>, season: i32) -> Self {
        Self { source, season, weeks: DashMap::new() }
    }

    async fn get(&self, week: u32) -> Result<Option<Arc<WeekStatSnapshot>>> {
        let cell = self.weeks.entry(week).or_default().clone();
        let snapshot = cell
            .get_or_try_init(|| async {
                let snapshot = self.source.fetch(self.season, week).await?;
                Ok::<_, InsightsError>(snapshot.map(|s| Arc::new(s.with_team_rollups())))
            })
            .await?;
        Ok(snapshot.clone())
    }
}

/// Shared state handed to every pair task
struct PairContext {
    season: i32,
    cache: SnapshotCache,
    store: Arc<dyn PersistenceBackend>,
    config: Arc<InsightsConfig>,
    keys: KeyScheme,
}

impl PairContext {
    async fn generate(&self, pair: WeekPair) -> ManifestEntry {
        let storage_key = self.keys.insights(self.season, pair);
        let outcome = AssertUnwindSafe(self.write_pair(pair)).catch_unwind().await;
        match outcome {
            Ok(Ok(counts)) => {
                debug!("Pair {} written: {} players, {} teams", pair, counts.players, counts.teams);
                ManifestEntry::ok(pair, storage_key, counts)
            }
            Ok(Err(e)) => {
                warn!("Pair {} failed: {}", pair, e);
                ManifestEntry::failed(pair, storage_key, e.to_string())
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!("Pair {} panicked: {}", pair, message);
                ManifestEntry::failed(pair, storage_key, format!("pair task panicked: {message}"))
            }
        }
    }

    async fn write_pair(&self, pair: WeekPair) -> Result<PairCounts> {
        let window = self.config.analysis.trend.window;
        let mut weeks: BTreeSet<u32> = window_weeks(pair.week_to, window).collect();
        weeks.insert(pair.week_from);

        let mut loaded = BTreeMap::new();
        for week in weeks {
            match self.cache.get(week).await? {
                Some(snapshot) => {
                    loaded.insert(week, snapshot);
                }
                None if week == pair.week_from || week == pair.week_to => {
                    return Err(InsightsError::MissingSnapshot { season: self.season, week });
                }
                // Trend windows tolerate gaps
                None => {}
            }
        }
        let snapshots: BTreeMap<u32, &WeekStatSnapshot> =
            loaded.iter().map(|(w, s)| (*w, s.as_ref())).collect();

        let result =
            build_comparison(&self.config.analysis, self.season, pair, &snapshots, Utc::now())?;
        let counts = PairCounts {
            players: result.player_insights.len(),
            teams: result.team_insights.len(),
            superlatives: result.superlatives.len(),
            skipped: result.skipped_entities.len(),
        };

        let insights = serde_json::to_vec_pretty(&result.insights_artifact())?;
        let superlatives = serde_json::to_vec_pretty(&result.superlatives_artifact())?;
        let store = self.store.as_ref();
        let retry = &self.config.generation.retry;
        let insights_key = self.keys.insights(self.season, pair);

        let previous = with_retry(retry, &insights_key, || store.get(&insights_key)).await?;
        write_blob(store, retry, &insights_key, insights).await?;
        let superlatives_key = self.keys.superlatives(self.season, pair);
        if let Err(e) = write_blob(store, retry, &superlatives_key, superlatives).await {
            self.roll_back(&insights_key, previous).await;
            return Err(e);
        }

        Ok(counts)
    }

    /// Put back the blob a failed pair write replaced
    async fn roll_back(&self, key: &str, previous: Option<StoredBlob>) {
        let store = self.store.as_ref();
        let retry = &self.config.generation.retry;
        let restored = match previous {
            Some(blob) => with_retry(retry, key, || store.put(key, blob.bytes.clone()))
                .await
                .map(|_| ()),
            None => with_retry(retry, key, || store.delete(key)).await,
        };
        match restored {
            Ok(()) => debug!("Rolled back {}", key),
            Err(e) => error!("Cannot roll back {} after a failed pair write: {}", key, e),
        }
    }
}

async fn write_blob(
    store: &dyn PersistenceBackend,
    retry: &RetryConfig,
    key: &str,
    bytes: Vec<u8>,
) -> Result<()> {
    with_retry(retry, key, || store.put(key, bytes.clone()))
        .await
        .map(|_| ())
        .map_err(|source| InsightsError::PersistenceWrite { key: key.to_string(), source })
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Drives generation for one season at a time
pub struct ComparisonMatrixGenerator {
    source: Arc<dyn SnapshotSource>,
    store: Arc<dyn PersistenceBackend>,
    config: Arc<InsightsConfig>,
    keys: KeyScheme,
}

impl ComparisonMatrixGenerator {
    pub fn new(
        source: Arc<dyn SnapshotSource>,
        store: Arc<dyn PersistenceBackend>,
        config: InsightsConfig,
    ) -> Self {
        let keys = KeyScheme::new(&config.storage.stats_prefix, &config.storage.output_prefix);
        Self { source, store, config: Arc::new(config), keys }
    }

    pub fn keys(&self) -> &KeyScheme {
        &self.keys
    }

    fn manifest_store(&self) -> ManifestStore {
        ManifestStore::new(
            self.store.clone(),
            self.keys.clone(),
            self.config.generation.retry.clone(),
            self.config.generation.manifest_conflict_retries,
        )
    }

    /// Resolve `max_week` and validate any explicit pairs against it
    pub async fn plan(
        &self,
        season: i32,
        max_week: Option<u32>,
        only_pairs: Option<&[WeekPair]>,
    ) -> Result<(SeasonContext, Vec<WeekPair>)> {
        let context = resolve_max_week(self.source.as_ref(), season, max_week).await?;

        let pairs = match only_pairs {
            Some(pairs) => {
                let mut validated = pairs
                    .iter()
                    .map(|p| WeekPair::new(p.week_from, p.week_to, context.max_week))
                    .collect::<Result<Vec<_>>>()?;
                validated.sort();
                validated.dedup();
                validated
            }
            None => plan_pairs(context.max_week),
        };
        Ok((context, pairs))
    }

    /// Stored manifest of a season, if any
    pub async fn manifest(&self, season: i32) -> Result<Option<SeasonManifest>> {
        Ok(self.manifest_store().load(season).await?.map(|(manifest, _)| manifest))
    }

    /// Compute a single comparison without writing anything
    pub async fn compare(
        &self,
        season: i32,
        week_from: u32,
        week_to: u32,
    ) -> Result<ComparisonResult> {
        let context = resolve_max_week(self.source.as_ref(), season, None).await?;
        let pair = WeekPair::new(week_from, week_to, context.max_week)?;

        let cache = SnapshotCache::new(self.source.clone(), season);
        let mut loaded = BTreeMap::new();
        let window = window_weeks(pair.week_to, self.config.analysis.trend.window);
        for week in window.chain([pair.week_from]) {
            if let Some(snapshot) = cache.get(week).await? {
                loaded.insert(week, snapshot);
            }
        }
        let snapshots: BTreeMap<u32, &WeekStatSnapshot> =
            loaded.iter().map(|(w, s)| (*w, s.as_ref())).collect();

        build_comparison(&self.config.analysis, season, pair, &snapshots, Utc::now())
    }

    /// Rerun exactly the pairs the stored manifest marks failed
    pub async fn retry_failed(
        &self,
        season: i32,
        cancel: CancellationToken,
    ) -> Result<GenerationReport> {
        let manifest = self.manifest(season).await?.ok_or_else(|| {
            InsightsError::SeasonMetadata(format!("no manifest for season {season}"))
        })?;

        info!("Retrying {} failed pair(s) for season {}", manifest.failed_pairs.len(), season);
        let request = GenerationRequest {
            season,
            max_week: Some(manifest.max_week),
            force_regenerate: true,
            only_pairs: Some(manifest.failed_pairs.clone()),
        };
        self.generate(request, cancel).await
    }

    /// Generate every planned pair that is not already `ok`.
    ///
    /// Returns `Err` only for run-level failures (season metadata, manifest
    /// storage). Pair failures are reported in [`GenerationReport`].
    pub async fn generate(
        &self,
        request: GenerationRequest,
        cancel: CancellationToken,
    ) -> Result<GenerationReport> {
        let (context, plan) = self
            .plan(request.season, request.max_week, request.only_pairs.as_deref())
            .await?;
        let season = context.season;

        let manifest_store = self.manifest_store();
        let (mut manifest, mut version) = match manifest_store.load(season).await? {
            Some((manifest, version)) => (manifest, Some(version)),
            None => (SeasonManifest::planned(season, context.max_week), None),
        };
        // A narrower run never shrinks the season; recorded pairs stay tracked
        manifest.max_week = manifest.max_week.max(context.max_week);
        manifest.run_id = uuid::Uuid::new_v4();
        manifest.status = SeasonStatus::Generating;
        manifest.refresh();
        manifest_store.save(&mut manifest, &mut version).await?;

        let todo: Vec<WeekPair> = plan
            .iter()
            .copied()
            .filter(|pair| request.force_regenerate || !manifest.is_ok(*pair))
            .collect();
        let skipped_existing = plan.len() - todo.len();
        info!(
            "Generating season {}: max week {}, {} planned, {} to generate, {} already ok (run {})",
            season,
            context.max_week,
            plan.len(),
            todo.len(),
            skipped_existing,
            manifest.run_id
        );

        let workers = self.config.generation.workers.max(1);
        let (tx, rx) = mpsc::channel(workers * 2);
        let flush_every = self.config.generation.manifest_flush_every;
        let writer = ManifestWriter::new(manifest_store, manifest, version, flush_every);
        let writer_handle = tokio::spawn(writer.run(rx));

        let pair_context = Arc::new(PairContext {
            season,
            cache: SnapshotCache::new(self.source.clone(), season),
            store: self.store.clone(),
            config: self.config.clone(),
            keys: self.keys.clone(),
        });
        let semaphore = Arc::new(Semaphore::new(workers));
        let mut tasks = JoinSet::new();
        let mut cancelled = false;

        for pair in todo {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let pair_context = pair_context.clone();
            let tx = tx.clone();
            let span =
                info_span!("pair", season, week_from = pair.week_from, week_to = pair.week_to);
            tasks.spawn(
                async move {
                    let entry = pair_context.generate(pair).await;
                    let ok = entry.status == PairStatus::Ok;
                    if tx.send(entry).await.is_err() {
                        error!("Manifest writer stopped before {} was recorded", pair);
                    }
                    drop(permit);
                    (pair, ok)
                }
                .instrument(span),
            );
        }
        drop(tx);

        if cancelled {
            warn!("Generation cancelled; waiting for {} in-flight pair(s)", tasks.len());
        }

        let mut attempted = 0;
        let mut succeeded = 0;
        let mut failed_pairs = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((pair, ok)) => {
                    attempted += 1;
                    if ok {
                        succeeded += 1;
                    } else {
                        failed_pairs.push(pair);
                    }
                }
                Err(e) => error!("Pair task aborted: {}", e),
            }
        }
        failed_pairs.sort();

        let manifest = writer_handle.await.map_err(|e| {
            InsightsError::Persistence(PersistenceError::generic(format!(
                "manifest writer aborted: {e}"
            )))
        })??;

        info!(
            "Season {} generation finished: {} attempted, {} ok, {} failed, status {:?}",
            season,
            attempted,
            succeeded,
            failed_pairs.len(),
            manifest.status
        );

        Ok(GenerationReport {
            season,
            max_week: context.max_week,
            planned: plan.len(),
            attempted,
            succeeded,
            skipped_existing,
            failed_pairs,
            cancelled,
            status: manifest.status,
            manifest,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntityKind, EntityRecord, SeasonMetadata};
    use crate::source::InMemorySnapshotSource;
    use serde_json::json;

    #[test]
    fn test_plan_counts() {
        assert_eq!(plan_pairs(7).len(), 21);
        assert_eq!(plan_pairs(18).len(), 153);
        assert!(plan_pairs(1).is_empty());
        assert!(plan_pairs(0).is_empty());
    }

    #[test]
    fn test_plan_is_strictly_directional() {
        let pairs = plan_pairs(6);
        assert!(pairs
            .iter()
            .all(|p| p.week_from < p.week_to && p.week_from >= 1 && p.week_to <= 6));
        assert!(pairs.contains(&WeekPair { week_from: 5, week_to: 6 }));
        assert!(!pairs.contains(&WeekPair { week_from: 6, week_to: 5 }));

        let by_gap = pairs_by_gap(&pairs);
        assert_eq!(by_gap[&1], 5);
        assert_eq!(by_gap[&5], 1);
    }

    #[tokio::test]
    async fn test_resolve_max_week_precedence() {
        let source = InMemorySnapshotSource::new();
        for week in [1, 2, 3] {
            source.insert(WeekStatSnapshot::new(2025, week, vec![])).await;
        }

        assert_eq!(resolve_max_week(&source, 2025, Some(9)).await.unwrap().max_week, 9);
        assert_eq!(resolve_max_week(&source, 2025, None).await.unwrap().max_week, 3);

        source.set_metadata(SeasonMetadata { current_season: 2025, current_week: 5 }).await;
        assert_eq!(resolve_max_week(&source, 2025, None).await.unwrap().max_week, 5);

        // Metadata for another season does not apply
        let other_season = resolve_max_week(&source, 2024, None).await;
        assert!(matches!(other_season, Err(InsightsError::SeasonMetadata(_))));
    }

    #[test]
    fn test_build_comparison_is_idempotent() {
        let week = |w: u32, targets: u32| {
            WeekStatSnapshot::new(
                2025,
                w,
                vec![
                    EntityRecord::from_json(
                        "a",
                        EntityKind::Player,
                        json!({ "targets": targets, "target_share": 0.2 }),
                    ),
                    EntityRecord::from_json(
                        "b",
                        EntityKind::Player,
                        json!({ "targets": targets + 1, "target_share": 0.1 }),
                    ),
                ],
            )
        };
        let snapshots = [week(1, 4), week(2, 7)];
        let map: BTreeMap<u32, &WeekStatSnapshot> =
            snapshots.iter().map(|s| (s.week, s)).collect();
        let config = AnalysisConfig::default();
        let at = Utc::now();
        let pair = WeekPair { week_from: 1, week_to: 2 };

        let first = build_comparison(&config, 2025, pair, &map, at).unwrap();
        let second = build_comparison(&config, 2025, pair, &map, at).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_vec(&first.insights_artifact()).unwrap(),
            serde_json::to_vec(&second.insights_artifact()).unwrap()
        );
    }

    #[test]
    fn test_report_into_result() {
        let manifest = SeasonManifest::planned(2025, 3);
        let report = GenerationReport {
            season: 2025,
            max_week: 3,
            planned: 3,
            attempted: 3,
            succeeded: 2,
            skipped_existing: 0,
            failed_pairs: vec![WeekPair { week_from: 1, week_to: 3 }],
            cancelled: false,
            status: SeasonStatus::PartiallyFailed,
            manifest,
        };

        match report.into_result() {
            Err(InsightsError::PartialBatchFailure { season, failed }) => {
                assert_eq!(season, 2025);
                assert_eq!(failed, vec![WeekPair { week_from: 1, week_to: 3 }]);
            }
            other => panic!("expected partial failure, got {other:?}"),
        }
    }
}
