//! `overlay deploy`

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};

use overlay_core::OverlayConfig;
use overlay_deploy::{CommandEmitter, DeployPipeline, DeployRequest, RetryPolicy, TerraformExecutor};
use overlay_graph::AnnotationStore;

use crate::output;

#[derive(Args)]
pub struct DeployArgs {
    /// Exercise identifier
    #[arg(long)]
    pub exercise: String,

    /// Scenario identifier
    #[arg(long)]
    pub scenario: String,

    /// Graph layer (defaults to [scope] layer)
    #[arg(long)]
    pub layer: Option<String>,

    /// Directory for generated declarations and executor state
    #[arg(long)]
    pub output: PathBuf,

    /// Plan only; change nothing in the live environment
    #[arg(long)]
    pub dry_run: bool,
}

fn spinner(message: String) -> Result<ProgressBar> {
    let bar = ProgressBar::new_spinner();
    bar.set_style(ProgressStyle::with_template("{spinner:.cyan} {msg}")?);
    bar.set_message(message);
    bar.enable_steady_tick(Duration::from_millis(100));
    Ok(bar)
}

pub async fn execute(args: DeployArgs, config: &OverlayConfig, json: bool) -> Result<()> {
    let graph = super::connect_graph(config).await?;
    let pipeline = DeployPipeline::new(
        AnnotationStore::new(graph),
        Arc::new(CommandEmitter::new(&config.deploy.emitter_program)),
        Arc::new(TerraformExecutor::new(&config.deploy.terraform_binary)),
    )
    .with_retry(RetryPolicy::from_config(&config.deploy));

    let request = DeployRequest {
        layer: super::layer_or_default(args.layer, config),
        exercise: args.exercise,
        scenario: args.scenario,
        output_directory: args.output,
        dry_run: args.dry_run,
    };

    let verb = if request.dry_run { "Planning" } else { "Deploying" };
    let bar = if json {
        ProgressBar::hidden()
    } else {
        spinner(format!("{} {}...", verb, request.key()))?
    };

    // Dropping the deploy future kills any running executor process.
    let outcome = tokio::select! {
        outcome = pipeline.deploy(&request) => outcome,
        _ = tokio::signal::ctrl_c() => {
            bar.finish_and_clear();
            bail!("Deployment cancelled. Run deploy again to converge the remaining resources.");
        }
    };
    bar.finish_and_clear();

    let result = match outcome {
        Ok(result) => result,
        Err(err) => {
            if let Some(diagnostics) = err.diagnostics().filter(|d| !d.trim().is_empty()) {
                eprintln!("{}", "Executor output:".bold());
                eprintln!("{}", diagnostics.dimmed());
            }
            return Err(err).context("Deployment failed");
        }
    };

    if json {
        output::print_json(&result)?;
    } else {
        output::print_deployment_result(&request.key(), &result);
    }

    if !result.success {
        bail!(
            "{}",
            result
                .error_message
                .unwrap_or_else(|| "deployment did not complete".to_string())
        );
    }
    Ok(())
}
