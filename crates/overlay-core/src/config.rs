//! Configuration loading (`overlay.toml` plus environment overrides).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::error::{OverlayError, OverlayResult};
use crate::role::RoleTable;

/// Default config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "overlay.toml";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    pub graph: GraphConfig,
    pub scope: ScopeConfig,
    pub matching: MatchingConfig,
    /// Name → role pairs applied to every import.
    pub roles: BTreeMap<String, String>,
    pub deploy: DeployConfig,
}

/// Configuration for connecting to Neo4j.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub uri: String,
    pub user: String,
    pub password: String,
    pub database: String,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            uri: "bolt://localhost:7687".to_string(),
            user: "neo4j".to_string(),
            password: "neo4j".to_string(),
            database: "neo4j".to_string(),
        }
    }
}

/// Default tenant and layer for commands that omit them.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScopeConfig {
    pub tenant: Option<String>,
    pub layer: String,
}

impl Default for ScopeConfig {
    fn default() -> Self {
        Self {
            tenant: None,
            layer: "default".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Tag key compared by the TAG tier.
    pub correlation_tag: String,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            correlation_tag: "correlation_id".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    pub terraform_binary: String,
    pub emitter_program: String,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            terraform_binary: "terraform".to_string(),
            emitter_program: "overlay-emit".to_string(),
            max_attempts: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 30_000,
        }
    }
}

impl OverlayConfig {
    /// Load configuration.
    ///
    /// Resolution order: explicit path, `$OVERLAY_CONFIG`, `./overlay.toml`.
    /// An explicit path must exist; the fallbacks may be absent, yielding defaults.
    pub fn load(explicit: Option<&Path>) -> OverlayResult<Self> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => {
                let path = std::env::var_os("OVERLAY_CONFIG")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
                if path.exists() {
                    Self::from_file(&path)?
                } else {
                    debug!(path = %path.display(), "No config file, using defaults");
                    Self::default()
                }
            }
        };
        config.apply_env();
        Ok(config)
    }

    /// Parse a config file.
    pub fn from_file(path: &Path) -> OverlayResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| OverlayError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
            .map_err(|e| OverlayError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Parse config text.
    pub fn from_toml_str(text: &str) -> OverlayResult<Self> {
        toml::from_str(text).map_err(|e| OverlayError::Config(e.to_string()))
    }

    /// Apply `NEO4J_*` environment overrides.
    pub fn apply_env(&mut self) {
        if let Ok(uri) = std::env::var("NEO4J_URI") {
            self.graph.uri = uri;
        }
        if let Ok(user) = std::env::var("NEO4J_USER") {
            self.graph.user = user;
        }
        if let Ok(password) = std::env::var("NEO4J_PASSWORD") {
            self.graph.password = password;
        }
    }

    /// The `[roles]` section as a validated table.
    pub fn role_table(&self) -> OverlayResult<RoleTable> {
        RoleTable::from_pairs(self.roles.iter().map(|(k, v)| (k.clone(), v.as_str())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = OverlayConfig::default();
        assert_eq!(config.graph.uri, "bolt://localhost:7687");
        assert_eq!(config.scope.layer, "default");
        assert_eq!(config.matching.correlation_tag, "correlation_id");
        assert_eq!(config.deploy.max_attempts, 3);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = OverlayConfig::from_toml_str(
            r#"
            [scope]
            tenant = "contoso"

            [deploy]
            max_attempts = 5

            [roles]
            "azurerm_linux_virtual_machine.web" = "target"
            "#,
        )
        .unwrap();
        assert_eq!(config.scope.tenant.as_deref(), Some("contoso"));
        assert_eq!(config.scope.layer, "default");
        assert_eq!(config.deploy.max_attempts, 5);
        assert_eq!(config.deploy.terraform_binary, "terraform");
        assert_eq!(config.role_table().unwrap().len(), 1);
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = OverlayConfig::from_toml_str("[graph\nuri = 1").unwrap_err();
        assert!(matches!(err, OverlayError::Config(_)));
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = OverlayConfig::load(Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert!(matches!(err, OverlayError::Config(_)));
    }
}
