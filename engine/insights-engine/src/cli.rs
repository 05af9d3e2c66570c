//! # Command Line Interface
//!
//! CLI for generating, retrying, and inspecting season comparisons.

use crate::config::InsightsConfig;
use crate::generator::{
    pairs_by_gap, ComparisonMatrixGenerator, GenerationReport, GenerationRequest,
};
use crate::keys::KeyScheme;
use crate::manifest::SeasonStatus;
use crate::models::WeekPair;
use crate::source::StoreSnapshotSource;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use persistence::{create_local_persistence_with_config, PersistenceBackend};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Insights CLI for week-over-week comparison generation
#[derive(Parser)]
#[command(name = "insights-cli")]
#[command(about = "Generate and inspect fantasy football comparison insights")]
pub struct Cli {
    /// Optional TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Override the storage data directory
    #[arg(short, long)]
    pub data_dir: Option<PathBuf>,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate every comparison pair of a season
    Generate {
        #[arg(long)]
        season: i32,

        /// Number of closed weeks; resolved from metadata when omitted
        #[arg(long)]
        max_week: Option<u32>,

        /// Regenerate pairs already marked ok
        #[arg(long)]
        force: bool,

        /// Only these pairs, e.g. `--pair 3-5 --pair 1-to-2`
        #[arg(long = "pair")]
        pairs: Vec<WeekPair>,
    },
    /// Regenerate the pairs the manifest marks failed
    RetryFailed {
        #[arg(long)]
        season: i32,
    },
    /// Show the pair plan without generating anything
    Plan {
        #[arg(long)]
        season: i32,

        #[arg(long)]
        max_week: Option<u32>,
    },
    /// Show the stored season manifest
    Status {
        #[arg(long)]
        season: i32,
    },
    /// Compute one comparison and print its superlatives
    Compare {
        #[arg(long)]
        season: i32,

        #[arg(long)]
        from: u32,

        #[arg(long)]
        to: u32,
    },
}

impl Cli {
    /// Load configuration and apply command-line overrides
    pub fn load_config(&self) -> Result<InsightsConfig> {
        let mut config = InsightsConfig::load(self.config.as_deref())?;
        if let Some(data_dir) = &self.data_dir {
            config.storage.data_dir = data_dir.clone();
        }
        Ok(config)
    }
}

/// CLI handler
pub struct CliHandler {
    generator: ComparisonMatrixGenerator,
}

impl CliHandler {
    /// Create a handler over the local blob store
    pub fn new(config: InsightsConfig) -> Result<Self> {
        let data_dir = &config.storage.data_dir;
        let store: Arc<dyn PersistenceBackend> = Arc::new(
            create_local_persistence_with_config(config.persistence())
                .with_context(|| format!("cannot open data directory {:?}", data_dir))?,
        );
        Ok(Self::with_store(store, config))
    }

    pub fn with_store(store: Arc<dyn PersistenceBackend>, config: InsightsConfig) -> Self {
        let keys = KeyScheme::new(&config.storage.stats_prefix, &config.storage.output_prefix);
        let source = Arc::new(StoreSnapshotSource::new(store.clone(), keys));
        Self { generator: ComparisonMatrixGenerator::new(source, store, config) }
    }

    /// Handle CLI commands
    pub async fn handle_command(&self, command: Commands) -> Result<ExitCode> {
        match command {
            Commands::Generate { season, max_week, force, pairs } => {
                let request = GenerationRequest {
                    season,
                    max_week,
                    force_regenerate: force,
                    only_pairs: (!pairs.is_empty()).then_some(pairs),
                };
                let report = self.generator.generate(request, ctrl_c_token()).await?;
                Ok(self.print_report(&report))
            }
            Commands::RetryFailed { season } => {
                let report = self.generator.retry_failed(season, ctrl_c_token()).await?;
                Ok(self.print_report(&report))
            }
            Commands::Plan { season, max_week } => {
                self.show_plan(season, max_week).await?;
                Ok(ExitCode::SUCCESS)
            }
            Commands::Status { season } => {
                self.show_status(season).await?;
                Ok(ExitCode::SUCCESS)
            }
            Commands::Compare { season, from, to } => {
                self.show_comparison(season, from, to).await?;
                Ok(ExitCode::SUCCESS)
            }
        }
    }

    /// Exit code 0 when complete, 2 when any pair failed
    fn print_report(&self, report: &GenerationReport) -> ExitCode {
        println!("📊 Season {} Generation", report.season);
        println!("{}", "=".repeat(50));
        println!("Max week:          {}", report.max_week);
        println!("Planned pairs:     {}", report.planned);
        println!("Already ok:        {}", report.skipped_existing);
        println!("Attempted:         {}", report.attempted);
        println!("Succeeded:         {}", report.succeeded);
        println!("Failed:            {}", report.failed_pairs.len());
        println!("Season status:     {:?}", report.status);
        if report.cancelled {
            println!("⚠️  Cancelled before all pairs were scheduled");
        }
        for pair in &report.failed_pairs {
            println!("  ❌ {pair}");
        }

        if !report.failed_pairs.is_empty() || report.status == SeasonStatus::PartiallyFailed {
            ExitCode::from(2)
        } else {
            ExitCode::SUCCESS
        }
    }

    async fn show_plan(&self, season: i32, max_week: Option<u32>) -> Result<()> {
        let (context, pairs) = self.generator.plan(season, max_week, None).await?;

        println!("🗓️  Season {} Plan (max week {})", season, context.max_week);
        println!("{}", "=".repeat(50));
        println!("Total pairs: {}", pairs.len());
        for (gap, count) in pairs_by_gap(&pairs) {
            println!("  gap {:>2}: {:>3} pairs", gap, count);
        }
        Ok(())
    }

    async fn show_status(&self, season: i32) -> Result<()> {
        let Some(manifest) = self.generator.manifest(season).await? else {
            println!("No manifest for season {season}");
            return Ok(());
        };

        println!("📈 Season {} Status", season);
        println!("{}", "=".repeat(50));
        println!("Status:       {:?}", manifest.status);
        println!("Run:          {}", manifest.run_id);
        println!("Updated:      {}", manifest.updated_at.to_rfc3339());
        println!("Max week:     {}", manifest.max_week);
        println!("Ok / total:   {}/{}", manifest.successful, manifest.total_expected);
        println!("Failed:       {}", manifest.failed);
        for (gap, counts) in &manifest.counts_by_gap {
            println!(
                "  gap {:>2}: {:>3}/{:<3} ok, {} failed",
                gap, counts.ok, counts.expected, counts.failed
            );
        }
        for pair in &manifest.failed_pairs {
            let reason =
                manifest.entry(*pair).and_then(|e| e.error.as_deref()).unwrap_or("unknown");
            println!("  ❌ {pair}: {reason}");
        }
        Ok(())
    }

    async fn show_comparison(&self, season: i32, from: u32, to: u32) -> Result<()> {
        let result = self.generator.compare(season, from, to).await?;

        println!("🏆 Season {} Week {} → {} Superlatives", season, from, to);
        println!("{}", "=".repeat(50));
        for superlative in &result.superlatives {
            let name = superlative.name.as_deref().unwrap_or(&superlative.entity_id);
            println!(
                "  [{}] #{} {:<24} {:<28} {:+.3}",
                superlative.category,
                superlative.rank,
                superlative.award_name,
                name,
                superlative.value
            );
        }
        println!(
            "{} players, {} teams, {} skipped",
            result.player_insights.len(),
            result.team_insights.len(),
            result.skipped_entities.len()
        );
        Ok(())
    }
}

/// Token cancelled on the first Ctrl-C
fn ctrl_c_token() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received, finishing in-flight pairs");
                child.cancel();
            }
            Err(e) => warn!("Cannot listen for Ctrl-C: {}", e),
        }
    });
    token
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_generate_pairs() {
        let cli = Cli::try_parse_from([
            "insights-cli",
            "generate",
            "--season",
            "2025",
            "--pair",
            "3-5",
            "--pair",
            "1-to-2",
            "--force",
        ])
        .unwrap();

        match cli.command {
            Commands::Generate { season, max_week, force, pairs } => {
                assert_eq!(season, 2025);
                assert_eq!(max_week, None);
                assert!(force);
                let expected = vec![
                    WeekPair { week_from: 3, week_to: 5 },
                    WeekPair { week_from: 1, week_to: 2 },
                ];
                assert_eq!(pairs, expected);
            }
            _ => panic!("expected generate"),
        }
    }

    #[test]
    fn test_parse_compare() {
        let cli = Cli::try_parse_from([
            "insights-cli",
            "--data-dir",
            "/tmp/x",
            "compare",
            "--season",
            "2025",
            "--from",
            "5",
            "--to",
            "6",
        ])
        .unwrap();
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/x")));
        assert!(matches!(cli.command, Commands::Compare { from: 5, to: 6, .. }));
    }

    #[test]
    fn test_bad_pair_is_rejected() {
        let parsed =
            Cli::try_parse_from(["insights-cli", "generate", "--season", "2025", "--pair", "x"]);
        assert!(parsed.is_err());
    }
}
