#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for the metro map data pipeline.

use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{Parser, Subcommand};
use metro_map_pipeline::{Aggregate, CancellationToken, PipelineConfig};

#[derive(Parser)]
#[command(name = "metro_map", about = "Metro map data pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch every layer, join demographics and write the map artifacts
    Fetch {
        /// TOML config replacing the built-in St. Louis configuration
        #[arg(long)]
        config: Option<PathBuf>,
        /// Also save the whole run as one snapshot (`.json` or `.json.gz`)
        #[arg(long)]
        snapshot: Option<PathBuf>,
        /// Directory the per-layer JSON artifacts are written to
        #[arg(long, default_value = "data")]
        output_dir: PathBuf,
    },
    /// Write the map artifacts from a previously saved snapshot
    Load {
        /// Snapshot written by `fetch --snapshot`
        #[arg(long)]
        snapshot: PathBuf,
        /// Directory the per-layer JSON artifacts are written to
        #[arg(long, default_value = "data")]
        output_dir: PathBuf,
    },
    /// Print the effective configuration as TOML
    Config {
        /// TOML config replacing the built-in St. Louis configuration
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

/// Cancels `token` on Ctrl-C so in-flight layers stop before their next
/// request.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted; cancelling");
            token.cancel();
        }
    });
}

fn write_artifacts(
    aggregate: &Aggregate,
    output_dir: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let written = aggregate.write_artifacts(output_dir)?;
    for path in &written {
        log::debug!("Wrote {}", path.display());
    }
    log::info!(
        "{} stops, {} counties, {} tracts, {} spatial layer(s)",
        aggregate.stops.len(),
        aggregate.counties.len(),
        aggregate.tracts.len(),
        aggregate.layers.len()
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init_custom_env("RUST_LOG");
    let cli = Cli::parse();

    match cli.command {
        Commands::Fetch {
            config,
            snapshot,
            output_dir,
        } => {
            let config = PipelineConfig::load(config.as_deref())?;
            let cancel = CancellationToken::new();
            cancel_on_ctrl_c(cancel.clone());

            let start = Instant::now();
            let aggregate = metro_map_pipeline::run(&config, cancel).await?;
            log::info!(
                "Fetched {} features in {:.1}s",
                aggregate.feature_count(),
                start.elapsed().as_secs_f64()
            );

            if let Some(snapshot) = snapshot {
                aggregate.save(&snapshot)?;
            }
            write_artifacts(&aggregate, &output_dir)?;
        }
        Commands::Load {
            snapshot,
            output_dir,
        } => {
            let aggregate = Aggregate::load(&snapshot)?;
            write_artifacts(&aggregate, &output_dir)?;
        }
        Commands::Config { config } => {
            let mut config = PipelineConfig::load(config.as_deref())?;
            if config.census.api_key.is_some() {
                config.census.api_key = Some("<redacted>".to_string());
            }
            print!("{}", config.to_toml_string()?);
        }
    }

    Ok(())
}
