//! Declaration emitter and live-environment importer.
//!
//! The emitter turns annotated resources into declaration files, optionally
//! with import directives for resources that already exist. The same
//! collaborator reports which resources are currently present, which is
//! what makes repeated deploys converge.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info};

use overlay_core::{AnnotatedResource, OverlayError, OverlayResult};

/// File the resource list is handed over in.
pub const RESOURCES_FILE: &str = "overlay-resources.json";

/// A resource found in the live environment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceRef {
    /// Declaration address, e.g. `azurerm_subnet.app`.
    pub address: String,
    /// Provider-side identifier, when known.
    #[serde(default)]
    pub resource_id: String,
}

impl ResourceRef {
    /// Whether this live resource is the one `resource` describes.
    pub fn refers_to(&self, resource: &AnnotatedResource) -> bool {
        let annotation = &resource.annotation;
        self.address == annotation.source_address
            || (!self.resource_id.is_empty()
                && self.resource_id.eq_ignore_ascii_case(&annotation.resource_id))
    }
}

/// How many of `resources` appear in `live`.
pub fn count_present(resources: &[AnnotatedResource], live: &[ResourceRef]) -> usize {
    resources
        .iter()
        .filter(|resource| live.iter().any(|r| r.refers_to(resource)))
        .count()
}

#[derive(Debug, Clone)]
pub struct GenerateOptions {
    /// Emit import directives for resources that already exist.
    pub auto_detect_existing: bool,
    pub output_dir: PathBuf,
}

#[async_trait]
pub trait Emitter: Send + Sync {
    /// Write declarations for `resources`; returns the directory to plan in.
    async fn generate(
        &self,
        resources: &[AnnotatedResource],
        options: &GenerateOptions,
    ) -> OverlayResult<PathBuf>;

    /// Resources from the declarations in `output_dir` that exist live.
    async fn detect_existing(&self, output_dir: &Path) -> OverlayResult<Vec<ResourceRef>>;
}

/// Emitter backed by an external program.
///
/// Invoked as `<program> generate --input <json> --output <dir> [--auto-import]`
/// and `<program> detect --output <dir>`; `detect` prints a JSON array of
/// [`ResourceRef`] on stdout.
#[derive(Debug, Clone)]
pub struct CommandEmitter {
    program: String,
}

impl CommandEmitter {
    pub fn new(program: impl Into<String>) -> Self {
        Self { program: program.into() }
    }

    async fn run(&self, args: &[&str]) -> OverlayResult<String> {
        debug!(program = %self.program, ?args, "Running emitter");
        let output = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                OverlayError::Emitter(format!("failed to run '{}': {}", self.program, e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OverlayError::Emitter(format!(
                "'{} {}' exited with {}: {}",
                self.program,
                args.first().unwrap_or(&""),
                output.status,
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[async_trait]
impl Emitter for CommandEmitter {
    async fn generate(
        &self,
        resources: &[AnnotatedResource],
        options: &GenerateOptions,
    ) -> OverlayResult<PathBuf> {
        tokio::fs::create_dir_all(&options.output_dir).await?;
        let input = options.output_dir.join(RESOURCES_FILE);
        tokio::fs::write(&input, serde_json::to_vec_pretty(resources)?).await?;

        let input_arg = input.display().to_string();
        let output_arg = options.output_dir.display().to_string();
        let mut args = vec![
            "generate",
            "--input",
            input_arg.as_str(),
            "--output",
            output_arg.as_str(),
        ];
        if options.auto_detect_existing {
            args.push("--auto-import");
        }
        self.run(&args).await?;

        info!(
            resources = resources.len(),
            output = %options.output_dir.display(),
            "Generated declarations"
        );
        Ok(options.output_dir.clone())
    }

    async fn detect_existing(&self, output_dir: &Path) -> OverlayResult<Vec<ResourceRef>> {
        let output_arg = output_dir.display().to_string();
        let stdout = self.run(&["detect", "--output", output_arg.as_str()]).await?;
        if stdout.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&stdout)
            .map_err(|e| OverlayError::Emitter(format!("unreadable detect output: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use overlay_core::{Attributes, OverlayAnnotation};

    fn resource(address: &str, resource_id: &str) -> AnnotatedResource {
        AnnotatedResource {
            annotation: OverlayAnnotation {
                node_id: "n1".to_string(),
                resource_id: resource_id.to_string(),
                resource_kind: "Microsoft.Network/subnets".to_string(),
                resource_name: "snet".to_string(),
                exercise: "ex1".to_string(),
                scenario: "red".to_string(),
                layer: "base".to_string(),
                role: None,
                source_address: address.to_string(),
                source_location: "main.tf:1".to_string(),
            },
            annotated_at: None,
            properties: Attributes::new(),
        }
    }

    #[test]
    fn test_count_present() {
        let resources = vec![
            resource("azurerm_subnet.a", "/subs/1/subnets/a"),
            resource("azurerm_subnet.b", "/subs/1/subnets/b"),
            resource("azurerm_subnet.c", ""),
        ];
        let live = vec![
            ResourceRef {
                address: "azurerm_subnet.a".to_string(),
                resource_id: String::new(),
            },
            ResourceRef {
                address: "renamed".to_string(),
                resource_id: "/SUBS/1/subnets/b".to_string(),
            },
        ];
        assert_eq!(count_present(&resources, &live), 2);
        assert_eq!(count_present(&resources, &[]), 0);
    }

    #[test]
    fn test_resource_ref_json() {
        let refs: Vec<ResourceRef> =
            serde_json::from_str(r#"[{"address":"azurerm_subnet.a"}]"#).unwrap();
        assert_eq!(refs[0].address, "azurerm_subnet.a");
        assert!(refs[0].resource_id.is_empty());
    }

    #[tokio::test]
    async fn test_missing_program_is_emitter_error() {
        let dir = tempfile::tempdir().unwrap();
        let emitter = CommandEmitter::new("overlay-test-no-such-emitter");
        let options = GenerateOptions {
            auto_detect_existing: true,
            output_dir: dir.path().join("out"),
        };
        let err = emitter.generate(&[resource("a.b", "")], &options).await.unwrap_err();
        assert!(matches!(err, OverlayError::Emitter(_)));
        assert!(dir.path().join("out").join(RESOURCES_FILE).exists());
    }
}
