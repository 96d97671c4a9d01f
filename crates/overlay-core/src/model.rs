//! Overlay domain models.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Free-form declared attributes of a resource block.
pub type Attributes = BTreeMap<String, Value>;

/// One declared infrastructure unit extracted from a config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedResource {
    kind: String,
    local_name: String,
    address: String,
    properties: Attributes,
    source_file: String,
    source_line: usize,
}

impl ParsedResource {
    pub fn new(
        kind: impl Into<String>,
        local_name: impl Into<String>,
        properties: Attributes,
        source_file: impl Into<String>,
        source_line: usize,
    ) -> Self {
        let kind = kind.into();
        let local_name = local_name.into();
        let address = format!("{}.{}", kind, local_name);
        Self {
            kind,
            local_name,
            address,
            properties,
            source_file: source_file.into(),
            source_line,
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn local_name(&self) -> &str {
        &self.local_name
    }

    /// Stable external identifier, `kind.localName`.
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn properties(&self) -> &Attributes {
        &self.properties
    }

    pub fn source_file(&self) -> &str {
        &self.source_file
    }

    pub fn source_line(&self) -> usize {
        self.source_line
    }

    /// `file:line` of the block header.
    pub fn source_location(&self) -> String {
        format!("{}:{}", self.source_file, self.source_line)
    }

    /// A declared attribute holding a plain string.
    pub fn string_attribute(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(Value::as_str)
    }

    /// The declared resource name: the `name` attribute when it is a literal,
    /// otherwise the block's local name.
    pub fn resource_name(&self) -> &str {
        match self.string_attribute("name") {
            Some(name) if !is_expression(name) => name,
            _ => &self.local_name,
        }
    }

    /// Value of `tags.<key>` when declared as a literal string.
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.properties
            .get("tags")
            .and_then(|tags| tags.get(key))
            .and_then(Value::as_str)
            .filter(|v| !is_expression(v))
    }
}

/// Whether a string holds an unevaluated `${...}` expression.
pub fn is_expression(value: &str) -> bool {
    value.starts_with("${") && value.ends_with('}')
}

/// Ranked matching strategy that produced a mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConfidenceTier {
    Exact,
    Fuzzy,
    Tag,
    None,
}

impl ConfidenceTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exact => "EXACT",
            Self::Fuzzy => "FUZZY",
            Self::Tag => "TAG",
            Self::None => "NONE",
        }
    }
}

impl std::fmt::Display for ConfidenceTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The graph node a resource was resolved to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchedNode {
    pub node_id: String,
    pub resource_id: String,
    pub native_type: String,
    pub name: String,
}

/// Result of resolving a [`ParsedResource`] against the graph.
///
/// A target node is present exactly when the tier is not [`ConfidenceTier::None`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceMapping {
    resource: ParsedResource,
    target: Option<MatchedNode>,
    tier: ConfidenceTier,
    reason: String,
    candidates: Vec<String>,
}

impl ResourceMapping {
    /// A successful match. `tier` must not be `None`.
    pub fn matched(
        resource: ParsedResource,
        target: MatchedNode,
        tier: ConfidenceTier,
        reason: impl Into<String>,
    ) -> Self {
        debug_assert_ne!(tier, ConfidenceTier::None);
        Self {
            resource,
            target: Some(target),
            tier,
            reason: reason.into(),
            candidates: Vec::new(),
        }
    }

    /// No node was chosen; `candidates` is non-empty for ambiguous results.
    pub fn unmatched(
        resource: ParsedResource,
        reason: impl Into<String>,
        candidates: Vec<String>,
    ) -> Self {
        Self {
            resource,
            target: None,
            tier: ConfidenceTier::None,
            reason: reason.into(),
            candidates,
        }
    }

    pub fn resource(&self) -> &ParsedResource {
        &self.resource
    }

    pub fn target(&self) -> Option<&MatchedNode> {
        self.target.as_ref()
    }

    pub fn graph_node_id(&self) -> Option<&str> {
        self.target.as_ref().map(|t| t.node_id.as_str())
    }

    pub fn tier(&self) -> ConfidenceTier {
        self.tier
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn candidates(&self) -> &[String] {
        &self.candidates
    }

    pub fn is_matched(&self) -> bool {
        self.target.is_some()
    }

    pub fn is_ambiguous(&self) -> bool {
        self.target.is_none() && !self.candidates.is_empty()
    }
}

/// Role a resource plays within a scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlayRole {
    Target,
    Decoy,
    Infrastructure,
}

impl OverlayRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Target => "target",
            Self::Decoy => "decoy",
            Self::Infrastructure => "infrastructure",
        }
    }

    /// Parse from string (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "target" => Some(Self::Target),
            "decoy" => Some(Self::Decoy),
            "infrastructure" | "infra" => Some(Self::Infrastructure),
            _ => None,
        }
    }
}

impl std::fmt::Display for OverlayRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The (exercise, scenario, layer) namespace of one overlay.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OverlayKey {
    pub exercise: String,
    pub scenario: String,
    pub layer: String,
}

impl OverlayKey {
    pub fn new(
        exercise: impl Into<String>,
        scenario: impl Into<String>,
        layer: impl Into<String>,
    ) -> Self {
        Self {
            exercise: exercise.into(),
            scenario: scenario.into(),
            layer: layer.into(),
        }
    }
}

impl std::fmt::Display for OverlayKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}@{}", self.exercise, self.scenario, self.layer)
    }
}

/// Overlay metadata attached to one graph node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayAnnotation {
    pub node_id: String,
    pub resource_id: String,
    pub resource_kind: String,
    pub resource_name: String,
    pub exercise: String,
    pub scenario: String,
    pub layer: String,
    pub role: Option<OverlayRole>,
    pub source_address: String,
    pub source_location: String,
}

impl OverlayAnnotation {
    pub fn key(&self) -> OverlayKey {
        OverlayKey::new(&self.exercise, &self.scenario, &self.layer)
    }
}

/// A graph node carrying an overlay annotation, as returned by queries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnnotatedResource {
    pub annotation: OverlayAnnotation,
    pub annotated_at: Option<String>,
    /// Properties of the underlying resource, overlay keys excluded.
    pub properties: Attributes,
}

/// Summary of one import run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportResult {
    pub parsed_count: usize,
    pub mapped_count: usize,
    pub annotated_count: usize,
    pub skipped_count: usize,
    pub mappings: Vec<ResourceMapping>,
    pub warnings: Vec<String>,
}

/// Summary of one deploy run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeploymentResult {
    pub resources_deployed: usize,
    pub resources_preexisting: usize,
    pub resources_newly_created: usize,
    pub success: bool,
    pub error_message: Option<String>,
    pub dry_run: bool,
    pub warnings: Vec<String>,
}

/// Aggregate counts over overlay annotations.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OverlayStatistics {
    pub total_resources: usize,
    pub by_exercise: BTreeMap<String, usize>,
    pub by_scenario: BTreeMap<String, usize>,
    pub by_kind: BTreeMap<String, usize>,
    pub by_role: BTreeMap<String, usize>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vm(props: Attributes) -> ParsedResource {
        ParsedResource::new("azurerm_linux_virtual_machine", "web", props, "main.tf", 4)
    }

    #[test]
    fn test_address_and_location() {
        let res = vm(Attributes::new());
        assert_eq!(res.address(), "azurerm_linux_virtual_machine.web");
        assert_eq!(res.source_location(), "main.tf:4");
    }

    #[test]
    fn test_resource_name_prefers_literal_name_attribute() {
        let mut props = Attributes::new();
        props.insert("name".into(), json!("vm-web-01"));
        assert_eq!(vm(props).resource_name(), "vm-web-01");

        let mut props = Attributes::new();
        props.insert("name".into(), json!("${var.vm_name}"));
        assert_eq!(vm(props).resource_name(), "web");
    }

    #[test]
    fn test_tag_lookup() {
        let mut props = Attributes::new();
        props.insert("tags".into(), json!({"correlation_id": "abc-1", "env": "${var.env}"}));
        let res = vm(props);
        assert_eq!(res.tag("correlation_id"), Some("abc-1"));
        assert_eq!(res.tag("env"), None);
        assert_eq!(res.tag("missing"), None);
    }

    #[test]
    fn test_mapping_invariant() {
        let node = MatchedNode {
            node_id: "4:abc:1".into(),
            resource_id: "/subscriptions/s/vm".into(),
            native_type: "Microsoft.Compute/virtualMachines".into(),
            name: "web".into(),
        };
        let hit = ResourceMapping::matched(
            vm(Attributes::new()),
            node,
            ConfidenceTier::Exact,
            "exact: kind+name+group",
        );
        assert_eq!(hit.graph_node_id(), Some("4:abc:1"));
        assert!(hit.is_matched());

        let miss = ResourceMapping::unmatched(
            vm(Attributes::new()),
            "ambiguous: 2 candidates",
            vec!["a".into(), "b".into()],
        );
        assert_eq!(miss.tier(), ConfidenceTier::None);
        assert!(miss.graph_node_id().is_none());
        assert!(miss.is_ambiguous());
    }

    #[test]
    fn test_role_parse() {
        assert_eq!(OverlayRole::parse("Decoy"), Some(OverlayRole::Decoy));
        assert_eq!(OverlayRole::parse("infra"), Some(OverlayRole::Infrastructure));
        assert_eq!(OverlayRole::parse("attacker"), None);
    }
}
