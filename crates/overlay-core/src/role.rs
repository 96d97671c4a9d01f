//! Role assignment for annotated resources.

use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{OverlayError, OverlayResult};
use crate::model::{OverlayRole, ParsedResource};

/// Naming conventions checked in order when no explicit role is given.
const ROLE_HINTS: &[(&[&str], OverlayRole)] = &[
    (&["attacker", "exploit"], OverlayRole::Target),
    (&["decoy", "honeypot"], OverlayRole::Decoy),
    (&["infra", "network"], OverlayRole::Infrastructure),
];

/// Caller-supplied name → role assignments.
///
/// Keys may be a resource address (`kind.localName`), a local name, or the
/// declared `name` attribute; the address wins when several apply.
#[derive(Debug, Clone, Default)]
pub struct RoleTable {
    entries: BTreeMap<String, OverlayRole>,
}

impl RoleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, role: OverlayRole) {
        self.entries.insert(key.into(), role);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add every entry of `other`, overriding duplicates.
    pub fn extend(&mut self, other: RoleTable) {
        self.entries.extend(other.entries);
    }

    /// Build from raw `name = "role"` pairs, rejecting unknown roles.
    pub fn from_pairs<I, K, V>(pairs: I) -> OverlayResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: AsRef<str>,
    {
        let mut table = Self::new();
        for (key, value) in pairs {
            let key = key.into();
            let role = OverlayRole::parse(value.as_ref()).ok_or_else(|| {
                OverlayError::Config(format!(
                    "unknown role '{}' for '{}' (expected target, decoy or infrastructure)",
                    value.as_ref(),
                    key
                ))
            })?;
            table.insert(key, role);
        }
        Ok(table)
    }

    /// Load a TOML file of `name = "role"` pairs.
    pub fn load(path: &Path) -> OverlayResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let raw: BTreeMap<String, String> = toml::from_str(&text)
            .map_err(|e| OverlayError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_pairs(raw)
    }

    /// Resolve a resource's role: explicit table first, then naming hints.
    pub fn resolve(&self, resource: &ParsedResource) -> Option<OverlayRole> {
        [resource.address(), resource.local_name(), resource.resource_name()]
            .iter()
            .find_map(|key| self.entries.get(*key).copied())
            .or_else(|| infer_role(resource.local_name()))
            .or_else(|| infer_role(resource.resource_name()))
    }
}

/// Infer a role from naming conventions alone.
pub fn infer_role(name: &str) -> Option<OverlayRole> {
    let lowered = name.to_lowercase();
    ROLE_HINTS
        .iter()
        .find(|(needles, _)| needles.iter().any(|n| lowered.contains(n)))
        .map(|(_, role)| *role)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Attributes;

    fn resource(local_name: &str) -> ParsedResource {
        ParsedResource::new(
            "azurerm_linux_virtual_machine",
            local_name,
            Attributes::new(),
            "main.tf",
            1,
        )
    }

    #[test]
    fn test_naming_hints() {
        assert_eq!(infer_role("kali-attacker"), Some(OverlayRole::Target));
        assert_eq!(infer_role("ExploitBox"), Some(OverlayRole::Target));
        assert_eq!(infer_role("ssh_honeypot"), Some(OverlayRole::Decoy));
        assert_eq!(infer_role("core-network"), Some(OverlayRole::Infrastructure));
        assert_eq!(infer_role("web01"), None);
    }

    #[test]
    fn test_explicit_table_wins_over_hints() {
        let mut table = RoleTable::new();
        table.insert("azurerm_linux_virtual_machine.honeypot", OverlayRole::Target);
        assert_eq!(table.resolve(&resource("honeypot")), Some(OverlayRole::Target));
        assert_eq!(table.resolve(&resource("decoy_db")), Some(OverlayRole::Decoy));
        assert_eq!(table.resolve(&resource("app")), None);
    }

    #[test]
    fn test_from_pairs_rejects_unknown_role() {
        let err = RoleTable::from_pairs([("web", "bystander")]).unwrap_err();
        assert!(err.to_string().contains("unknown role 'bystander'"));
    }

    #[test]
    fn test_load_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roles.toml");
        let table = "web = \"decoy\"\n\"azurerm_subnet.dmz\" = \"infrastructure\"\n";
        std::fs::write(&path, table).unwrap();
        let table = RoleTable::load(&path).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.resolve(&resource("web")), Some(OverlayRole::Decoy));
    }
}
