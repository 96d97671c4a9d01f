//! `overlay list`

use anyhow::Result;
use clap::Args;

use overlay_core::OverlayConfig;
use overlay_graph::AnnotationStore;

use crate::output;

#[derive(Args)]
pub struct ListArgs {
    /// Only this exercise
    #[arg(long)]
    pub exercise: Option<String>,

    /// Only this scenario
    #[arg(long)]
    pub scenario: Option<String>,

    /// Graph layer (defaults to [scope] layer)
    #[arg(long)]
    pub layer: Option<String>,
}

pub async fn execute(args: ListArgs, config: &OverlayConfig, json: bool) -> Result<()> {
    let layer = super::layer_or_default(args.layer, config);
    let store = AnnotationStore::new(super::connect_graph(config).await?);
    let resources = store
        .query(args.exercise.as_deref(), args.scenario.as_deref(), &layer)
        .await?;

    if json {
        output::print_json(&resources)
    } else {
        output::print_annotations_table(&resources);
        Ok(())
    }
}
