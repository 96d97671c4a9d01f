//! Centralized error types for overlay operations.

use serde::Serialize;
use thiserror::Error;

/// One rejected entry of a bulk annotation write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnnotationFailure {
    pub node_id: String,
    pub reason: String,
}

impl std::fmt::Display for AnnotationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.node_id, self.reason)
    }
}

/// Main error type for overlay operations.
#[derive(Error, Debug)]
pub enum OverlayError {
    #[error("{file}:{line}: {message}")]
    Parse {
        file: String,
        line: usize,
        message: String,
    },

    #[error("Graph transport error: {0}")]
    GraphTransport(String),

    #[error(
        "Annotation transaction rolled back ({} failed): {}",
        .failures.len(),
        join_failures(.failures)
    )]
    AnnotationTransaction { failures: Vec<AnnotationFailure> },

    #[error(
        "Overlay {exercise}/{scenario} already has {existing} annotations in layer '{layer}'; \
         request overwrite to replace them"
    )]
    OverlayExists {
        exercise: String,
        scenario: String,
        layer: String,
        existing: usize,
    },

    #[error("Deployment failed after {attempts} attempts: {message}")]
    DeployTransient {
        attempts: u32,
        message: String,
        diagnostics: String,
    },

    #[error("Deployment failed: {message}")]
    DeployFatal { message: String, diagnostics: String },

    #[error("Emitter error: {0}")]
    Emitter(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for overlay operations.
pub type OverlayResult<T> = Result<T, OverlayError>;

impl OverlayError {
    /// Create a parse error at a source location.
    pub fn parse(file: impl Into<String>, line: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            file: file.into(),
            line,
            message: message.into(),
        }
    }

    /// Create a graph transport error.
    pub fn transport(msg: impl std::fmt::Display) -> Self {
        Self::GraphTransport(msg.to_string())
    }

    /// Create a validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Raw executor output attached to deploy failures, if any.
    pub fn diagnostics(&self) -> Option<&str> {
        match self {
            Self::DeployTransient { diagnostics, .. } | Self::DeployFatal { diagnostics, .. } => {
                Some(diagnostics.as_str())
            }
            _ => None,
        }
    }
}

fn join_failures(failures: &[AnnotationFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_shows_location() {
        let err = OverlayError::parse("main.tf", 12, "expected '{'");
        assert_eq!(err.to_string(), "main.tf:12: expected '{'");
    }

    #[test]
    fn test_transaction_error_lists_every_failure() {
        let err = OverlayError::AnnotationTransaction {
            failures: vec![
                AnnotationFailure { node_id: "n1".into(), reason: "node not found".into() },
                AnnotationFailure { node_id: "n2".into(), reason: "empty scenario".into() },
            ],
        };
        let text = err.to_string();
        assert!(text.contains("2 failed"));
        assert!(text.contains("n1: node not found"));
        assert!(text.contains("n2: empty scenario"));
    }

    #[test]
    fn test_diagnostics_only_on_deploy_errors() {
        let fatal = OverlayError::DeployFatal {
            message: "authorization failed".into(),
            diagnostics: "Error: AuthorizationFailed".into(),
        };
        assert_eq!(fatal.diagnostics(), Some("Error: AuthorizationFailed"));
        assert!(OverlayError::validation("x").diagnostics().is_none());
    }
}
