//! The contract this crate needs from a property graph.
//!
//! Resource nodes are expected to carry the properties named by the
//! `*_PROPERTY` constants. Overlay writes only ever go through a
//! [`GraphTransaction`], so a batch is either fully visible or not at all.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use overlay_core::OverlayResult;

/// Node properties as JSON values.
pub type PropertyMap = BTreeMap<String, Value>;

/// Stable resource identifier.
pub const ID_PROPERTY: &str = "id";
/// Graph-native type name, e.g. `Microsoft.Compute/virtualMachines`.
pub const TYPE_PROPERTY: &str = "type";
pub const NAME_PROPERTY: &str = "name";
/// Containing group (resource group).
pub const GROUP_PROPERTY: &str = "resource_group";
pub const TENANT_PROPERTY: &str = "tenant_id";
pub const LAYER_PROPERTY: &str = "layer_id";
/// Tag map, stored either as a map or as a JSON-encoded string.
pub const TAGS_PROPERTY: &str = "tags";

/// Isolation scope for matching.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Scope {
    pub tenant: String,
    pub layer: String,
}

impl Scope {
    pub fn new(tenant: impl Into<String>, layer: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            layer: layer.into(),
        }
    }
}

/// A resource node as seen by the matcher and the annotation store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeRef {
    pub node_id: String,
    pub resource_id: String,
    pub native_type: String,
    pub name: String,
    pub group: Option<String>,
    pub properties: PropertyMap,
}

impl NodeRef {
    /// Build from a node's full property map.
    pub fn from_properties(node_id: impl Into<String>, properties: PropertyMap) -> Self {
        let text = |key: &str| {
            properties
                .get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
        };
        Self {
            node_id: node_id.into(),
            resource_id: text(ID_PROPERTY).unwrap_or_default(),
            native_type: text(TYPE_PROPERTY).unwrap_or_default(),
            name: text(NAME_PROPERTY).unwrap_or_default(),
            group: text(GROUP_PROPERTY).filter(|g| !g.is_empty()),
            properties,
        }
    }

    /// Value of tag `key`, falling back to a top-level property of that name.
    pub fn tag(&self, key: &str) -> Option<String> {
        let from_tags = match self.properties.get(TAGS_PROPERTY) {
            Some(Value::Object(tags)) => {
                tags.get(key).and_then(Value::as_str).map(str::to_string)
            }
            Some(Value::String(encoded)) => serde_json::from_str::<Value>(encoded)
                .ok()
                .and_then(|tags| tags.get(key).and_then(Value::as_str).map(str::to_string)),
            _ => None,
        };
        from_tags.or_else(|| {
            self.properties
                .get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
        })
    }
}

/// Batched candidate lookup for one native type.
#[derive(Debug, Clone, Default)]
pub struct CandidateQuery {
    pub native_type: String,
    /// Nodes whose name is in this list are returned.
    pub names: Vec<String>,
    pub correlation_tag: String,
    /// Nodes whose correlation tag holds one of these values are returned too.
    pub correlation_values: Vec<String>,
}

/// Read access plus transactional writes against the graph.
#[async_trait]
pub trait GraphQueryPort: Send + Sync {
    /// Nodes in scope with the given type and name, optionally restricted to a group.
    async fn find_nodes(
        &self,
        native_type: &str,
        name: &str,
        group: Option<&str>,
        scope: &Scope,
    ) -> OverlayResult<Vec<NodeRef>>;

    /// One round trip for every candidate of a native type.
    async fn find_candidates(
        &self,
        query: &CandidateQuery,
        scope: &Scope,
    ) -> OverlayResult<Vec<NodeRef>>;

    /// Resource nodes in `layer` with at least one property key starting with `prefix`.
    async fn find_by_key_prefix(&self, layer: &str, prefix: &str) -> OverlayResult<Vec<NodeRef>>;

    /// All properties of a node, `None` if it does not exist.
    async fn get_properties(&self, node_id: &str) -> OverlayResult<Option<PropertyMap>>;

    /// Start a write transaction.
    async fn begin(&self) -> OverlayResult<Box<dyn GraphTransaction>>;

    /// Single-node write in its own transaction. Returns false if the node is missing.
    async fn set_properties(
        &self,
        node_id: &str,
        properties: &PropertyMap,
    ) -> OverlayResult<bool> {
        let mut txn = self.begin().await?;
        let found = txn.set_properties(node_id, properties).await?;
        txn.commit().await?;
        Ok(found)
    }

    /// Single-node removal in its own transaction. Returns false if the node is missing.
    async fn remove_properties(&self, node_id: &str, keys: &[String]) -> OverlayResult<bool> {
        let mut txn = self.begin().await?;
        let found = txn.remove_properties(node_id, keys).await?;
        txn.commit().await?;
        Ok(found)
    }
}

/// A unit of writes spanning many nodes.
///
/// Dropping a transaction without committing discards its writes.
#[async_trait]
pub trait GraphTransaction: Send {
    /// Properties as seen inside this transaction.
    async fn get_properties(&mut self, node_id: &str) -> OverlayResult<Option<PropertyMap>>;

    /// Merge properties into a node; `Value::Null` removes a key.
    async fn set_properties(
        &mut self,
        node_id: &str,
        properties: &PropertyMap,
    ) -> OverlayResult<bool>;

    async fn remove_properties(&mut self, node_id: &str, keys: &[String]) -> OverlayResult<bool>;

    async fn commit(self: Box<Self>) -> OverlayResult<()>;

    async fn rollback(self: Box<Self>) -> OverlayResult<()>;
}
