//! `overlay stats`

use anyhow::Result;
use clap::Args;

use overlay_core::OverlayConfig;
use overlay_graph::AnnotationStore;

use crate::output;

#[derive(Args)]
pub struct StatsArgs {
    /// Only this exercise
    #[arg(long)]
    pub exercise: Option<String>,

    /// Graph layer (defaults to [scope] layer)
    #[arg(long)]
    pub layer: Option<String>,
}

pub async fn execute(args: StatsArgs, config: &OverlayConfig, json: bool) -> Result<()> {
    let layer = super::layer_or_default(args.layer, config);
    let store = AnnotationStore::new(super::connect_graph(config).await?);
    let stats = store.statistics(args.exercise.as_deref(), &layer).await?;

    if json {
        output::print_json(&stats)
    } else {
        output::print_statistics(&layer, &stats);
        Ok(())
    }
}
