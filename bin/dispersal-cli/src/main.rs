//! Dispersal CLI - placement from the command line
//!
//! Loads a configuration, builds the placement map and answers placement
//! queries for hex identifiers or object keys.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dispersal_common::{Config, Error, FragmentId};
use dispersal_placement::{PlacementService, Topology};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "dispersal-cli")]
#[command(about = "Weighted hierarchical fragment placement")]
#[command(version)]
struct Args {
    /// Configuration file (defaults are used if it does not exist)
    #[arg(short, long, env = "DISPERSAL_CONFIG", default_value = "dispersal.toml")]
    config: PathBuf,

    /// Log level (overrides the configuration)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the placement map (ids, pdf and cdf per domain) as JSON
    Topology {
        /// Print the weighted tree instead
        #[arg(long)]
        tree: bool,
    },
    /// Place hex fragment identifiers
    Place {
        /// Identifiers, as wide as the configured identifier width
        #[arg(required = true)]
        ids: Vec<String>,

        /// Place all identifiers as the fragments of one object
        #[arg(long)]
        batch: bool,
    },
    /// Derive fragment identifiers for an object key and place them
    Object {
        /// Object key
        key: String,

        /// Number of fragments
        #[arg(short, long, default_value_t = 6)]
        fragments: u32,
    },
    /// Print the effective configuration
    Config,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    let level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| level.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    run(args.command, &config).inspect_err(|e| {
        if let Some(err) = e.downcast_ref::<Error>() {
            error!(kind = %err.kind(), retryable = err.is_retryable(), "{err}");
        }
    })
}

fn run(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Topology { tree } => {
            config.validate()?;
            let topology = Topology::from_config(config)?;
            info!(leaves = topology.leaf_count(), "loaded topology");
            let json = if tree {
                serde_json::to_string_pretty(&topology)?
            } else {
                serde_json::to_string_pretty(&topology.finalize())?
            };
            println!("{json}");
        }
        Commands::Place { ids, batch } => {
            let service = PlacementService::from_config(config)?;
            let ids = ids
                .iter()
                .map(|hex| FragmentId::parse(hex, config.identifier_bits))
                .collect::<dispersal_common::Result<Vec<_>>>()?;

            let paths = if batch {
                service.place_batch(&ids)?
            } else {
                ids.iter()
                    .map(|id| service.place(id))
                    .collect::<dispersal_common::Result<Vec<_>>>()?
            };
            for (id, path) in ids.iter().zip(&paths) {
                println!("{id}\t{path}");
            }
        }
        Commands::Object { key, fragments } => {
            let service = PlacementService::from_config(config)?;
            let placements = service.place_object(&key, fragments)?;
            info!(key = %key, fragments, "placed object");
            println!("{}", serde_json::to_string_pretty(&placements)?);
        }
        Commands::Config => {
            config.validate()?;
            print!("{}", config.to_toml_string()?);
        }
    }
    Ok(())
}
