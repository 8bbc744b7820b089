//! # Banana Vision CLI (`bvs`)
//!
//! Runs the dashboard API and a couple of operator commands against the
//! same configuration.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `bvs serve` | Start the HTTP API |
//! | `bvs stats --tree-type <type>` | Print weekly counts for one tree type |
//! | `bvs check-config` | Validate the config and print it with keys masked |
//!
//! ## Examples
//!
//! ```bash
//! # Start the API with credentials from the environment
//! SUPABASE_URL=https://xyz.supabase.co SUPABASE_KEY=... SUPABASE_SERVICE_KEY=... \
//!   bvs serve --config ./config/bvs.toml
//!
//! # Twelve weeks of infected trees
//! bvs stats --tree-type infected --weeks 12
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};

use banana_vision::config::{self, Config};
use banana_vision_core::aggregate::WeeklyAggregator;
use banana_vision_core::models::TreeType;
use banana_vision_core::store::ResultStore;
use banana_vision::logging;
use banana_vision::platform::PlatformClient;
use banana_vision::results::PlatformResultStore;
use banana_vision::server;

/// Banana Vision: backend for the farm-monitoring dashboard.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/bvs.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "bvs",
    about = "Banana Vision: backend for the farm-monitoring dashboard",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/bvs.toml", env = "BVS_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API.
    ///
    /// Binds to `[server].bind` and mounts the API under `[server].api_prefix`.
    Serve,

    /// Print the weekly counts the dashboard would show.
    Stats {
        /// `healthy` or `infected` (case-insensitive).
        #[arg(long, default_value = "healthy")]
        tree_type: String,

        /// Window length in weeks; defaults to `[dashboard].window_weeks`.
        #[arg(long)]
        weeks: Option<usize>,
    },

    /// Validate the configuration and print it with keys masked.
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    logging::init(&cfg.logging.filter);

    match cli.command {
        Commands::Serve => server::run_server(&cfg).await?,
        Commands::Stats { tree_type, weeks } => print_stats(&cfg, &tree_type, weeks).await?,
        Commands::CheckConfig => {
            println!("Config OK: {}", cli.config.display());
            println!("{:#?}", cfg.redacted());
        }
    }

    Ok(())
}

async fn print_stats(cfg: &Config, tree_type: &str, weeks: Option<usize>) -> anyhow::Result<()> {
    let tree_type: TreeType = tree_type.parse()?;
    let client = PlatformClient::new(&cfg.platform)?;
    let store: Arc<dyn ResultStore> = Arc::new(PlatformResultStore::new(client));
    let aggregator = WeeklyAggregator::new(store, weeks.unwrap_or(cfg.dashboard.window_weeks))?;

    let series = aggregator
        .weekly_stats(&tree_type.fusion_decision(), Utc::now())
        .await
        .with_context(|| format!("Failed to compute stats for {}", tree_type))?;

    println!("{} trees, last {} weeks", tree_type, aggregator.window());
    println!();
    for (label, count) in series.labels.iter().zip(&series.counts) {
        println!("  {:<10} {:>6}", label.to_string(), count);
    }
    println!();
    println!(
        "in window: {}   all time: {}",
        series.windowed_sum(),
        series.total
    );
    Ok(())
}
