//! # Snapshot Source
//!
//! Read-only access to weekly stat snapshots and the season pointer. The
//! engine never writes through this interface.

use crate::error::{InsightsError, Result};
use crate::keys::KeyScheme;
use crate::models::{SeasonMetadata, WeekStatSnapshot};
use async_trait::async_trait;
use persistence::PersistenceBackend;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Supplier of weekly snapshots
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Snapshot of one week, or `None` when that week has none
    async fn fetch(&self, season: i32, week: u32) -> Result<Option<WeekStatSnapshot>>;

    /// Weeks of `season` with a snapshot, ascending
    async fn available_weeks(&self, season: i32) -> Result<Vec<u32>>;

    /// Current season/week pointer, if published
    async fn season_metadata(&self) -> Result<Option<SeasonMetadata>>;
}

/// Snapshots stored as JSON blobs in a persistence backend
pub struct StoreSnapshotSource {
    store: Arc<dyn PersistenceBackend>,
    keys: KeyScheme,
}

impl StoreSnapshotSource {
    pub fn new(store: Arc<dyn PersistenceBackend>, keys: KeyScheme) -> Self {
        Self { store, keys }
    }
}

#[async_trait]
impl SnapshotSource for StoreSnapshotSource {
    async fn fetch(&self, season: i32, week: u32) -> Result<Option<WeekStatSnapshot>> {
        let key = self.keys.weekly_snapshot(season, week);
        let Some(blob) = self.store.get(&key).await? else {
            debug!("No snapshot at {}", key);
            return Ok(None);
        };

        let snapshot: WeekStatSnapshot = serde_json::from_slice(&blob.bytes)?;
        if snapshot.season != season || snapshot.week != week {
            return Err(InsightsError::malformed(
                key,
                format!("snapshot is for season {} week {}", snapshot.season, snapshot.week),
            ));
        }
        Ok(Some(snapshot))
    }

    async fn available_weeks(&self, season: i32) -> Result<Vec<u32>> {
        let keys = self.store.list(&self.keys.weekly_prefix(season)).await?;
        let mut weeks: Vec<u32> =
            keys.iter().filter_map(|key| self.keys.parse_weekly_snapshot(season, key)).collect();
        weeks.sort_unstable();
        weeks.dedup();
        Ok(weeks)
    }

    async fn season_metadata(&self) -> Result<Option<SeasonMetadata>> {
        let key = self.keys.season_metadata();
        match self.store.get(&key).await? {
            Some(blob) => serde_json::from_slice(&blob.bytes)
                .map(Some)
                .map_err(|e| InsightsError::SeasonMetadata(format!("{key}: {e}"))),
            None => Ok(None),
        }
    }
}

/// In-memory snapshot source for testing
#[derive(Default)]
pub struct InMemorySnapshotSource {
    snapshots: RwLock<BTreeMap<(i32, u32), WeekStatSnapshot>>,
    metadata: RwLock<Option<SeasonMetadata>>,
    fetches: AtomicUsize,
}

impl InMemorySnapshotSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, snapshot: WeekStatSnapshot) {
        self.snapshots.write().await.insert((snapshot.season, snapshot.week), snapshot);
    }

    pub async fn remove(&self, season: i32, week: u32) -> Option<WeekStatSnapshot> {
        self.snapshots.write().await.remove(&(season, week))
    }

    pub async fn set_metadata(&self, metadata: SeasonMetadata) {
        *self.metadata.write().await = Some(metadata);
    }

    /// Number of `fetch` calls served so far
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl SnapshotSource for InMemorySnapshotSource {
    async fn fetch(&self, season: i32, week: u32) -> Result<Option<WeekStatSnapshot>> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        Ok(self.snapshots.read().await.get(&(season, week)).cloned())
    }

    async fn available_weeks(&self, season: i32) -> Result<Vec<u32>> {
        let snapshots = self.snapshots.read().await;
        Ok(snapshots.keys().filter(|(s, _)| *s == season).map(|(_, w)| *w).collect())
    }

    async fn season_metadata(&self) -> Result<Option<SeasonMetadata>> {
        Ok(self.metadata.read().await.clone())
    }
}
