//! # Insights Engine
//!
//! Week-over-week comparison insights for fantasy football. Given a baseline
//! and a target week, the engine computes per-metric deltas, fits
//! short-horizon trends, flags breakouts and bust risks, and ranks
//! league-wide superlatives. The [`ComparisonMatrixGenerator`] precomputes
//! this for every `(from, to)` pair of a season and keeps a season manifest
//! of what exists.
//!
//! Data flow: [`SnapshotSource`] → [`delta`]/[`trend`] → [`InsightAssembler`]
//! → [`superlatives`] → [`ComparisonMatrixGenerator`] → persistence.

pub mod assembler;
pub mod cli;
pub mod config;
pub mod delta;
pub mod error;
pub mod generator;
pub mod keys;
pub mod logging;
pub mod manifest;
pub mod metrics;
pub mod models;
pub mod source;
pub mod superlatives;
pub mod trend;


pub use assembler::InsightAssembler;
pub use config::InsightsConfig;
pub use error::{InsightsError, Result};
pub use generator::{ComparisonMatrixGenerator, GenerationReport, GenerationRequest};
pub use keys::KeyScheme;
pub use manifest::{SeasonManifest, SeasonStatus};
pub use metrics::Metric;
pub use models::{
    ComparisonResult, EntityInsight, EntityKind, EntityRecord, WeekPair, WeekStatSnapshot,
};
pub use source::{InMemorySnapshotSource, SnapshotSource, StoreSnapshotSource};

/// Current version of the insights engine
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
