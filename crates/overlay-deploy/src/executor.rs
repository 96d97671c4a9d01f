//! Plan/apply executor abstraction and the Terraform subprocess implementation.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Output fragments that mark a failure as worth retrying.
const TRANSIENT_MARKERS: &[&str] = &[
    "429",
    "toomanyrequests",
    "too many requests",
    "rate limit",
    "ratelimit",
    "timeout",
    "timed out",
    "connection reset",
    "connection refused",
    "temporarily unavailable",
];

const PLAN_FILE: &str = "overlay.tfplan";

/// Resource counts from a plan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlanSummary {
    pub to_import: usize,
    pub to_add: usize,
    pub to_change: usize,
    pub to_destroy: usize,
}

impl PlanSummary {
    pub fn has_changes(&self) -> bool {
        self.to_import + self.to_add + self.to_change + self.to_destroy > 0
    }
}

/// Resource counts from an apply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ApplySummary {
    pub imported: usize,
    pub added: usize,
    pub changed: usize,
    pub destroyed: usize,
}

/// Executor failure, classified for the retry policy.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecutorError {
    #[error("transient executor failure: {message}")]
    Transient { message: String, diagnostics: String },

    #[error("executor failure: {message}")]
    Fatal { message: String, diagnostics: String },
}

impl ExecutorError {
    /// Classify raw executor output.
    pub fn classify(message: impl Into<String>, diagnostics: impl Into<String>) -> Self {
        let message = message.into();
        let diagnostics = diagnostics.into();
        if is_transient_output(&diagnostics) || is_transient_output(&message) {
            Self::Transient { message, diagnostics }
        } else {
            Self::Fatal { message, diagnostics }
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Transient { message, .. } | Self::Fatal { message, .. } => message,
        }
    }

    pub fn diagnostics(&self) -> &str {
        match self {
            Self::Transient { diagnostics, .. } | Self::Fatal { diagnostics, .. } => diagnostics,
        }
    }
}

fn is_transient_output(text: &str) -> bool {
    let lowered = text.to_lowercase();
    TRANSIENT_MARKERS.iter().any(|marker| lowered.contains(marker))
}

/// Plans and applies generated declarations against the live environment.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn plan(&self, directory: &Path) -> Result<PlanSummary, ExecutorError>;

    async fn apply(&self, directory: &Path) -> Result<ApplySummary, ExecutorError>;
}

/// Pull the `<n>` out of a `<n> <label>` fragment of a summary line.
fn count_before(line: &str, label: &str) -> usize {
    line.split([',', ':'])
        .map(|part| part.trim().trim_end_matches('.'))
        .find_map(|part| part.strip_suffix(label)?.trim().parse().ok())
        .unwrap_or(0)
}

/// Parse the `Plan: ...` line. `No changes.` yields zeros.
pub fn parse_plan_output(output: &str) -> Option<PlanSummary> {
    if let Some(line) = output.lines().map(str::trim).find(|l| l.starts_with("Plan:")) {
        return Some(PlanSummary {
            to_import: count_before(line, "to import"),
            to_add: count_before(line, "to add"),
            to_change: count_before(line, "to change"),
            to_destroy: count_before(line, "to destroy"),
        });
    }
    output
        .lines()
        .any(|l| l.trim().starts_with("No changes."))
        .then(PlanSummary::default)
}

/// Parse the `Apply complete! Resources: ...` line.
pub fn parse_apply_output(output: &str) -> Option<ApplySummary> {
    let line = output
        .lines()
        .map(str::trim)
        .find(|l| l.starts_with("Apply complete!"))?;
    Some(ApplySummary {
        imported: count_before(line, "imported"),
        added: count_before(line, "added"),
        changed: count_before(line, "changed"),
        destroyed: count_before(line, "destroyed"),
    })
}

/// Runs the `terraform` CLI in the output directory.
///
/// Children are spawned with `kill_on_drop`, so dropping a plan or apply
/// future terminates the subprocess.
#[derive(Debug, Clone)]
pub struct TerraformExecutor {
    binary: String,
}

impl TerraformExecutor {
    pub fn new(binary: impl Into<String>) -> Self {
        Self { binary: binary.into() }
    }

    async fn run(&self, directory: &Path, args: &[&str]) -> Result<String, ExecutorError> {
        debug!(binary = %self.binary, ?args, directory = %directory.display(), "Running executor");

        let output = Command::new(&self.binary)
            .args(args)
            .current_dir(directory)
            .env("TF_IN_AUTOMATION", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ExecutorError::Fatal {
                message: format!("failed to run '{}': {}", self.binary, e),
                diagnostics: String::new(),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if output.status.success() {
            return Ok(stdout);
        }

        let diagnostics = if stderr.is_empty() {
            stdout
        } else {
            format!("{}\nSTDERR:\n{}", stdout, stderr)
        };
        Err(ExecutorError::classify(
            format!(
                "'{} {}' exited with {}",
                self.binary,
                args.first().unwrap_or(&""),
                output.status
            ),
            diagnostics,
        ))
    }
}

#[async_trait]
impl Executor for TerraformExecutor {
    async fn plan(&self, directory: &Path) -> Result<PlanSummary, ExecutorError> {
        self.run(directory, &["init", "-input=false", "-no-color"]).await?;
        let output = self
            .run(directory, &["plan", "-input=false", "-no-color", "-out", PLAN_FILE])
            .await?;
        parse_plan_output(&output).ok_or_else(|| ExecutorError::Fatal {
            message: "plan output has no summary line".to_string(),
            diagnostics: output,
        })
    }

    async fn apply(&self, directory: &Path) -> Result<ApplySummary, ExecutorError> {
        let output = self
            .run(
                directory,
                &["apply", "-input=false", "-no-color", "-auto-approve", PLAN_FILE],
            )
            .await?;
        parse_apply_output(&output).ok_or_else(|| ExecutorError::Fatal {
            message: "apply output has no summary line".to_string(),
            diagnostics: output,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plan_output() {
        let output = concat!(
            "\nTerraform will perform the following actions:\n\n",
            "Plan: 2 to import, 3 to add, 1 to change, 0 to destroy.\n",
        );
        assert_eq!(
            parse_plan_output(output),
            Some(PlanSummary {
                to_import: 2,
                to_add: 3,
                to_change: 1,
                to_destroy: 0,
            })
        );

        let without_import = "Plan: 4 to add, 0 to change, 0 to destroy.";
        let summary = parse_plan_output(without_import).unwrap();
        assert_eq!(summary.to_import, 0);
        assert_eq!(summary.to_add, 4);

        let no_changes = "No changes. Your infrastructure matches the configuration.";
        assert_eq!(parse_plan_output(no_changes), Some(PlanSummary::default()));
        assert!(!PlanSummary::default().has_changes());

        assert_eq!(parse_plan_output("something else"), None);
    }

    #[test]
    fn test_parse_apply_output() {
        let output = concat!(
            "azurerm_subnet.a: Creation complete after 3s\n\n",
            "Apply complete! Resources: 1 imported, 2 added, 0 changed, 0 destroyed.\n",
        );
        assert_eq!(
            parse_apply_output(output),
            Some(ApplySummary {
                imported: 1,
                added: 2,
                changed: 0,
                destroyed: 0,
            })
        );

        let plain = "Apply complete! Resources: 0 added, 0 changed, 0 destroyed.";
        assert_eq!(parse_apply_output(plain), Some(ApplySummary::default()));
        assert_eq!(parse_apply_output("Error: boom"), None);
    }

    #[test]
    fn test_classification() {
        let throttled =
            ExecutorError::classify("apply failed", "Status=429 Code=\"TooManyRequests\"");
        assert!(throttled.is_transient());

        let reset = ExecutorError::classify("plan failed", "read tcp: connection reset by peer");
        assert!(reset.is_transient());

        let timeout = ExecutorError::classify(
            "plan failed",
            "context deadline exceeded (Client.Timeout exceeded)",
        );
        assert!(timeout.is_transient());

        let denied = ExecutorError::classify(
            "apply failed",
            "Code=\"AuthorizationFailed\" Message=\"does not have authorization\"",
        );
        assert!(!denied.is_transient());
        assert_eq!(denied.message(), "apply failed");
        assert!(denied.diagnostics().contains("AuthorizationFailed"));

        let invalid = ExecutorError::classify("plan failed", "Error: Unsupported argument");
        assert!(!invalid.is_transient());
    }

    #[tokio::test]
    async fn test_missing_binary_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let executor = TerraformExecutor::new("overlay-test-no-such-binary");
        let err = executor.plan(dir.path()).await.unwrap_err();
        assert!(!err.is_transient());
        assert!(err.message().contains("failed to run"));
    }
}
