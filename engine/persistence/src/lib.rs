//! # Persistence Layer
//!
//! This crate provides the key/blob store the insights engine writes its
//! comparison artifacts and season manifests into.
//!
//! ## Architecture
//!
//! - **PersistenceBackend**: Abstract trait over get/put/list by key, with
//!   conditional (version-checked) writes
//! - **LocalPersistence**: Local file-based implementation with atomic renames
//! - **InMemoryPersistence**: Map-backed implementation for tests
//! - **with_retry**: Bounded exponential backoff for transient failures
//!
//! ## Usage
//!
//! ```rust
//! use persistence::{create_local_persistence, PersistenceBackend};
//! use tempfile::TempDir;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let temp_dir = TempDir::new()?;
//!     let persistence = create_local_persistence(temp_dir.path())?;
//!
//!     let version = persistence.put("season/2025/comparisons/summary", b"{}".to_vec()).await?;
//!     let blob = persistence.get("season/2025/comparisons/summary").await?;
//!     assert_eq!(blob.map(|b| b.version), Some(version));
//!
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod local;
pub mod retry;

pub use backend::{
    BlobVersion, InMemoryPersistence, LocalPersistence, PersistenceBackend, StoredBlob,
};
pub use config::{PersistenceConfig, RetryConfig};
pub use error::{PersistenceError, Result};
pub use local::{create_local_persistence, create_local_persistence_with_config};
pub use retry::with_retry;
