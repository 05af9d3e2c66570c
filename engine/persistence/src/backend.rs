//! Persistence backend trait and implementations

use crate::config::PersistenceConfig;
use crate::error::{PersistenceError, Result};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Opaque version tag of a stored blob, compared by conditional writes
pub type BlobVersion = u64;

/// A blob together with the version it was read at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub bytes: Vec<u8>,
    pub version: BlobVersion,
}

/// Abstract trait for key/blob persistence backends
#[async_trait::async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Read a blob, `None` when the key does not exist
    async fn get(&self, key: &str) -> Result<Option<StoredBlob>>;

    /// Unconditionally replace the blob under `key`
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<BlobVersion>;

    /// Replace the blob only if its current version matches `expected`.
    ///
    /// `expected = None` means the key must not exist yet. A mismatch returns
    /// [`PersistenceError::Conflict`] and leaves the stored blob untouched.
    async fn put_if_version(
        &self,
        key: &str,
        bytes: Vec<u8>,
        expected: Option<BlobVersion>,
    ) -> Result<BlobVersion>;

    /// List keys starting with `prefix`, sorted
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Remove a blob; removing a missing key is not an error
    async fn delete(&self, key: &str) -> Result<()>;

    /// Get the configuration
    fn config(&self) -> &PersistenceConfig;

    /// Short backend name for logs
    fn backend_name(&self) -> &'static str;
}

fn content_version(bytes: &[u8]) -> BlobVersion {
    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    hasher.finish()
}

/// Reject keys that could escape the data directory
pub(crate) fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(PersistenceError::invalid_key("empty key"));
    }
    if key.starts_with('/') || key.contains('\\') {
        return Err(PersistenceError::invalid_key(key.to_string()));
    }
    let escapes = Path::new(key).components().any(|c| !matches!(c, Component::Normal(_)));
    if escapes || key.ends_with('/') {
        return Err(PersistenceError::invalid_key(key.to_string()));
    }
    Ok(())
}

/// Local file-based persistence backend
///
/// Each key maps to a file below `data_dir`. Writes go to a temporary sibling
/// and are renamed into place, so readers never observe a half-written blob.
/// Versions are content hashes, which makes them stable across restarts.
pub struct LocalPersistence {
    config: PersistenceConfig,
    write_lock: Mutex<()>,
}

impl LocalPersistence {
    /// Create a new local persistence backend
    pub fn new(config: PersistenceConfig) -> Result<Self> {
        // Validate configuration
        config.validate().map_err(PersistenceError::config)?;

        std::fs::create_dir_all(&config.data_dir).map_err(PersistenceError::Io)?;

        tracing::info!("Local persistence backend initialized at: {:?}", config.data_dir);

        Ok(Self { config, write_lock: Mutex::new(()) })
    }

    /// Create a new local persistence backend with default config
    pub fn with_default_config(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let config = PersistenceConfig::new(data_dir);
        Self::new(config)
    }

    /// Get the data directory
    pub fn data_dir(&self) -> &PathBuf {
        &self.config.data_dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.config.data_dir.join(key))
    }

    async fn read_blob(path: &Path) -> Result<Option<StoredBlob>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => {
                let version = content_version(&bytes);
                Ok(Some(StoredBlob { bytes, version }))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PersistenceError::Io(e)),
        }
    }

    async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<BlobVersion> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| PersistenceError::invalid_key(path.display().to_string()))?;
        let tmp_path = path.with_file_name(format!(".{}.tmp-{}", file_name, Uuid::new_v4()));

        tokio::fs::write(&tmp_path, bytes).await?;
        if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(PersistenceError::Io(e));
        }

        Ok(content_version(bytes))
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for LocalPersistence {
    async fn get(&self, key: &str) -> Result<Option<StoredBlob>> {
        let path = self.path_for(key)?;
        Self::read_blob(&path).await
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<BlobVersion> {
        let path = self.path_for(key)?;
        let _guard = self.write_lock.lock().await;
        Self::write_atomic(&path, &bytes).await
    }

    async fn put_if_version(
        &self,
        key: &str,
        bytes: Vec<u8>,
        expected: Option<BlobVersion>,
    ) -> Result<BlobVersion> {
        let path = self.path_for(key)?;
        let _guard = self.write_lock.lock().await;

        let found = Self::read_blob(&path).await?.map(|blob| blob.version);
        if found != expected {
            return Err(PersistenceError::Conflict { key: key.to_string(), expected, found });
        }

        Self::write_atomic(&path, &bytes).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let root = self.config.data_dir.clone();
        let mut keys = Vec::new();
        let mut pending = vec![root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(PersistenceError::Io(e)),
            };

            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                    continue;
                }

                // Temporary files are hidden and never listed
                let hidden = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with('.'))
                    .unwrap_or(true);
                if hidden {
                    continue;
                }

                if let Ok(relative) = path.strip_prefix(&root) {
                    let key = relative
                        .components()
                        .filter_map(|c| c.as_os_str().to_str())
                        .collect::<Vec<_>>()
                        .join("/");
                    if key.starts_with(prefix) {
                        keys.push(key);
                    }
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PersistenceError::Io(e)),
        }
    }

    fn config(&self) -> &PersistenceConfig {
        &self.config
    }

    fn backend_name(&self) -> &'static str {
        "local"
    }
}

/// In-memory persistence backend (for testing)
pub struct InMemoryPersistence {
    config: PersistenceConfig,
    blobs: Arc<Mutex<HashMap<String, StoredBlob>>>,
}

impl InMemoryPersistence {
    /// Create a new in-memory persistence backend
    pub fn new(config: PersistenceConfig) -> Self {
        Self { config, blobs: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Create a new in-memory persistence backend with default config
    pub fn with_default_config() -> Self {
        let config = PersistenceConfig::default();
        Self::new(config)
    }

    /// Number of stored blobs
    pub async fn len(&self) -> usize {
        self.blobs.lock().await.len()
    }

    /// Whether nothing has been stored
    pub async fn is_empty(&self) -> bool {
        self.blobs.lock().await.is_empty()
    }

    fn store(blobs: &mut HashMap<String, StoredBlob>, key: &str, bytes: Vec<u8>) -> BlobVersion {
        // Monotonic per key so that rewriting identical bytes still bumps the version
        let version = blobs.get(key).map(|b| b.version + 1).unwrap_or(1);
        blobs.insert(key.to_string(), StoredBlob { bytes, version });
        version
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for InMemoryPersistence {
    async fn get(&self, key: &str) -> Result<Option<StoredBlob>> {
        validate_key(key)?;
        let blobs = self.blobs.lock().await;
        Ok(blobs.get(key).cloned())
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<BlobVersion> {
        validate_key(key)?;
        let mut blobs = self.blobs.lock().await;
        Ok(Self::store(&mut blobs, key, bytes))
    }

    async fn put_if_version(
        &self,
        key: &str,
        bytes: Vec<u8>,
        expected: Option<BlobVersion>,
    ) -> Result<BlobVersion> {
        validate_key(key)?;
        let mut blobs = self.blobs.lock().await;

        let found = blobs.get(key).map(|b| b.version);
        if found != expected {
            return Err(PersistenceError::Conflict { key: key.to_string(), expected, found });
        }

        Ok(Self::store(&mut blobs, key, bytes))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let blobs = self.blobs.lock().await;
        let mut keys: Vec<String> =
            blobs.keys().filter(|k| k.starts_with(prefix)).cloned().collect();
        keys.sort();
        Ok(keys)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        self.blobs.lock().await.remove(key);
        Ok(())
    }

    fn config(&self) -> &PersistenceConfig {
        &self.config
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
