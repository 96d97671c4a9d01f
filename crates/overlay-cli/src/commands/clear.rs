//! `overlay clear`

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use dialoguer::Confirm;

use overlay_core::OverlayConfig;
use overlay_graph::AnnotationStore;

#[derive(Args)]
pub struct ClearArgs {
    /// Exercise whose annotations are removed
    #[arg(long)]
    pub exercise: String,

    /// Only this scenario (defaults to every scenario of the exercise)
    #[arg(long)]
    pub scenario: Option<String>,

    /// Graph layer (defaults to [scope] layer)
    #[arg(long)]
    pub layer: Option<String>,

    /// Skip the confirmation prompt
    #[arg(long, short)]
    pub yes: bool,
}

pub async fn execute(args: ClearArgs, config: &OverlayConfig) -> Result<()> {
    let layer = super::layer_or_default(args.layer, config);
    let store = AnnotationStore::new(super::connect_graph(config).await?);
    let target = match &args.scenario {
        Some(scenario) => format!("{}/{}", args.exercise, scenario),
        None => format!("{} (all scenarios)", args.exercise),
    };

    if !args.yes {
        let pending = store
            .query(Some(&args.exercise), args.scenario.as_deref(), &layer)
            .await?
            .len();
        if pending == 0 {
            println!("{}", format!("No annotations for {} in layer '{}'.", target, layer).dimmed());
            return Ok(());
        }

        let confirmed = Confirm::new()
            .with_prompt(format!(
                "Remove {} overlay annotations for {} in layer '{}'?",
                pending, target, layer
            ))
            .default(false)
            .interact()?;
        if !confirmed {
            println!("{}", "Aborted.".dimmed());
            return Ok(());
        }
    }

    let cleared = store.clear(&args.exercise, args.scenario.as_deref(), &layer).await?;
    println!(
        "{} Cleared {} annotations for {}",
        "✓".green(),
        cleared.to_string().bold(),
        target.cyan()
    );
    Ok(())
}
