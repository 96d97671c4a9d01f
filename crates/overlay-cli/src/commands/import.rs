//! `overlay import`

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use overlay_core::{OverlayConfig, RoleTable};
use overlay_graph::{initialize_schema, ImportPipeline, ImportRequest, Neo4jGraph};

use crate::output;

#[derive(Args)]
pub struct ImportArgs {
    /// Directory of declaration files
    #[arg(long)]
    pub dir: PathBuf,

    /// Exercise identifier
    #[arg(long)]
    pub exercise: String,

    /// Scenario identifier
    #[arg(long)]
    pub scenario: String,

    /// Graph layer (defaults to [scope] layer)
    #[arg(long)]
    pub layer: Option<String>,

    /// Tenant to match within (defaults to [scope] tenant)
    #[arg(long)]
    pub tenant: Option<String>,

    /// Replace existing annotations for this exercise/scenario/layer
    #[arg(long)]
    pub overwrite: bool,

    /// Also read declarations in subdirectories
    #[arg(long)]
    pub recursive: bool,

    /// TOML file of name = "role" assignments
    #[arg(long)]
    pub roles: Option<PathBuf>,
}

pub async fn execute(args: ImportArgs, config: &OverlayConfig, json: bool) -> Result<()> {
    let tenant = args
        .tenant
        .or_else(|| config.scope.tenant.clone())
        .context("No tenant given. Pass --tenant or set [scope] tenant in the configuration.")?;
    let layer = super::layer_or_default(args.layer, config);

    let mut roles: RoleTable = config.role_table()?;
    if let Some(path) = &args.roles {
        let extra = RoleTable::load(path)
            .with_context(|| format!("Failed to load roles from {}", path.display()))?;
        roles.extend(extra);
    }

    let client = super::connect_client(config).await?;
    initialize_schema(&client).await?;
    let pipeline = ImportPipeline::new(
        Arc::new(Neo4jGraph::new(client)),
        config.matching.correlation_tag.as_str(),
    );

    let mut request = ImportRequest::new(&args.dir, args.exercise, args.scenario, tenant, layer);
    request.overwrite = args.overwrite;
    request.recursive = args.recursive;
    request.roles = roles;

    if !json {
        println!(
            "{} Importing {} as {}",
            "→".blue().bold(),
            args.dir.display().to_string().cyan(),
            request.key().to_string().yellow()
        );
    }

    let result = pipeline.import(&request).await.context("Import failed")?;

    if json {
        output::print_json(&result)?;
    } else {
        output::print_import_result(&result);
    }
    Ok(())
}
