//! CLI command definitions and handlers.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use overlay_core::OverlayConfig;
use overlay_graph::{GraphClient, GraphQueryPort, Neo4jGraph};

pub mod clear;
pub mod deploy;
pub mod import;
pub mod list;
pub mod stats;

/// Exercise/scenario overlays on the resource graph
#[derive(Parser)]
#[command(name = "overlay")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file (defaults to $OVERLAY_CONFIG, then ./overlay.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Also write logs to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Print machine-readable JSON instead of tables
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Annotate graph resources from a directory of declarations
    Import(import::ImportArgs),

    /// Deploy an overlay to the live environment
    Deploy(deploy::DeployArgs),

    /// List annotated resources
    List(list::ListArgs),

    /// Remove overlay annotations
    Clear(clear::ClearArgs),

    /// Show overlay statistics
    Stats(stats::StatsArgs),
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        let config =
            OverlayConfig::load(self.config.as_deref()).context("Failed to load configuration")?;

        match self.command {
            Commands::Import(args) => import::execute(args, &config, self.json).await,
            Commands::Deploy(args) => deploy::execute(args, &config, self.json).await,
            Commands::List(args) => list::execute(args, &config, self.json).await,
            Commands::Clear(args) => clear::execute(args, &config).await,
            Commands::Stats(args) => stats::execute(args, &config, self.json).await,
        }
    }
}

/// Connect to the configured Neo4j instance.
pub(crate) async fn connect_client(config: &OverlayConfig) -> Result<GraphClient> {
    GraphClient::connect(&config.graph)
        .await
        .with_context(|| format!("Failed to connect to Neo4j at {}", config.graph.uri))
}

pub(crate) async fn connect_graph(config: &OverlayConfig) -> Result<Arc<dyn GraphQueryPort>> {
    let client = connect_client(config).await?;
    Ok(Arc::new(Neo4jGraph::new(client)))
}

/// The `--layer` flag, else the configured default.
pub(crate) fn layer_or_default(layer: Option<String>, config: &OverlayConfig) -> String {
    layer.unwrap_or_else(|| config.scope.layer.clone())
}
