//! In-process graph implementing [`GraphQueryPort`].
//!
//! Used for tests and offline runs. Transactions stage their writes on
//! copies of the touched nodes and publish them under one write lock at
//! commit, so readers never observe part of a batch.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use serde_json::Value;

use overlay_core::{OverlayError, OverlayResult};

use crate::port::{
    CandidateQuery, GraphQueryPort, GraphTransaction, NodeRef, PropertyMap, Scope, GROUP_PROPERTY,
    ID_PROPERTY, LAYER_PROPERTY, NAME_PROPERTY, TAGS_PROPERTY, TENANT_PROPERTY, TYPE_PROPERTY,
};

type NodeTable = BTreeMap<String, PropertyMap>;

/// Description of a node to insert.
#[derive(Debug, Clone)]
pub struct NodeSeed {
    properties: PropertyMap,
}

impl NodeSeed {
    pub fn new(native_type: &str, name: &str, tenant: &str, layer: &str) -> Self {
        let mut properties = PropertyMap::new();
        properties.insert(ID_PROPERTY.into(), Value::String(format!("/{}/{}", native_type, name)));
        properties.insert(TYPE_PROPERTY.into(), Value::String(native_type.into()));
        properties.insert(NAME_PROPERTY.into(), Value::String(name.into()));
        properties.insert(TENANT_PROPERTY.into(), Value::String(tenant.into()));
        properties.insert(LAYER_PROPERTY.into(), Value::String(layer.into()));
        Self { properties }
    }

    pub fn group(self, group: &str) -> Self {
        self.property(GROUP_PROPERTY, Value::String(group.into()))
    }

    pub fn tag(mut self, key: &str, value: &str) -> Self {
        let tags = self
            .properties
            .entry(TAGS_PROPERTY.into())
            .or_insert_with(|| Value::Object(Default::default()));
        if let Value::Object(map) = tags {
            map.insert(key.into(), Value::String(value.into()));
        }
        self
    }

    pub fn property(mut self, key: &str, value: Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }
}

/// Shared in-memory property graph.
#[derive(Debug, Clone, Default)]
pub struct MemoryGraph {
    nodes: Arc<RwLock<NodeTable>>,
    next_id: Arc<AtomicU64>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node and return its id.
    pub fn add_node(&self, seed: NodeSeed) -> String {
        let id = format!("n{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        write_lock(&self.nodes).insert(id.clone(), seed.properties);
        id
    }

    /// Simulate an unreachable graph: every call fails with a transport error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Snapshot of one node's properties.
    pub fn node(&self, node_id: &str) -> Option<PropertyMap> {
        read_lock(&self.nodes).get(node_id).cloned()
    }

    fn check_available(&self) -> OverlayResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(OverlayError::transport("graph unreachable"));
        }
        Ok(())
    }

    fn select<F>(&self, predicate: F) -> Vec<NodeRef>
    where
        F: Fn(&NodeRef) -> bool,
    {
        read_lock(&self.nodes)
            .iter()
            .map(|(id, props)| NodeRef::from_properties(id.clone(), props.clone()))
            .filter(|node| predicate(node))
            .collect()
    }
}

fn read_lock(nodes: &RwLock<NodeTable>) -> RwLockReadGuard<'_, NodeTable> {
    nodes.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_lock(nodes: &RwLock<NodeTable>) -> RwLockWriteGuard<'_, NodeTable> {
    nodes.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn in_scope(node: &NodeRef, scope: &Scope) -> bool {
    let text = |key: &str| node.properties.get(key).and_then(Value::as_str);
    text(TENANT_PROPERTY) == Some(scope.tenant.as_str())
        && text(LAYER_PROPERTY) == Some(scope.layer.as_str())
}

#[async_trait]
impl GraphQueryPort for MemoryGraph {
    async fn find_nodes(
        &self,
        native_type: &str,
        name: &str,
        group: Option<&str>,
        scope: &Scope,
    ) -> OverlayResult<Vec<NodeRef>> {
        self.check_available()?;
        Ok(self.select(|node| {
            in_scope(node, scope)
                && node.native_type == native_type
                && node.name == name
                && group.map_or(true, |g| node.group.as_deref() == Some(g))
        }))
    }

    async fn find_candidates(
        &self,
        query: &CandidateQuery,
        scope: &Scope,
    ) -> OverlayResult<Vec<NodeRef>> {
        self.check_available()?;
        Ok(self.select(|node| {
            in_scope(node, scope)
                && node.native_type == query.native_type
                && (query.names.contains(&node.name)
                    || node
                        .tag(&query.correlation_tag)
                        .is_some_and(|v| query.correlation_values.contains(&v)))
        }))
    }

    async fn find_by_key_prefix(&self, layer: &str, prefix: &str) -> OverlayResult<Vec<NodeRef>> {
        self.check_available()?;
        Ok(self.select(|node| {
            node.properties.get(LAYER_PROPERTY).and_then(Value::as_str) == Some(layer)
                && node.properties.keys().any(|key| key.starts_with(prefix))
        }))
    }

    async fn get_properties(&self, node_id: &str) -> OverlayResult<Option<PropertyMap>> {
        self.check_available()?;
        Ok(self.node(node_id))
    }

    async fn begin(&self) -> OverlayResult<Box<dyn GraphTransaction>> {
        self.check_available()?;
        Ok(Box::new(MemoryTransaction {
            graph: self.clone(),
            staged: BTreeMap::new(),
        }))
    }
}

/// Staged writes against a [`MemoryGraph`].
struct MemoryTransaction {
    graph: MemoryGraph,
    staged: NodeTable,
}

impl MemoryTransaction {
    /// Working copy of a node, loaded on first touch.
    fn working_copy(&mut self, node_id: &str) -> Option<&mut PropertyMap> {
        if !self.staged.contains_key(node_id) {
            let current = self.graph.node(node_id)?;
            self.staged.insert(node_id.to_string(), current);
        }
        self.staged.get_mut(node_id)
    }
}

#[async_trait]
impl GraphTransaction for MemoryTransaction {
    async fn get_properties(&mut self, node_id: &str) -> OverlayResult<Option<PropertyMap>> {
        self.graph.check_available()?;
        Ok(self.working_copy(node_id).map(|props| props.clone()))
    }

    async fn set_properties(
        &mut self,
        node_id: &str,
        properties: &PropertyMap,
    ) -> OverlayResult<bool> {
        self.graph.check_available()?;
        let Some(node) = self.working_copy(node_id) else {
            return Ok(false);
        };
        for (key, value) in properties {
            if value.is_null() {
                node.remove(key);
            } else {
                node.insert(key.clone(), value.clone());
            }
        }
        Ok(true)
    }

    async fn remove_properties(&mut self, node_id: &str, keys: &[String]) -> OverlayResult<bool> {
        self.graph.check_available()?;
        let Some(node) = self.working_copy(node_id) else {
            return Ok(false);
        };
        for key in keys {
            node.remove(key);
        }
        Ok(true)
    }

    async fn commit(self: Box<Self>) -> OverlayResult<()> {
        self.graph.check_available()?;
        let MemoryTransaction { graph, staged } = *self;
        let mut nodes = write_lock(&graph.nodes);
        for (id, props) in staged {
            if let Some(slot) = nodes.get_mut(&id) {
                *slot = props;
            }
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> OverlayResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn graph_with_vm() -> (MemoryGraph, String) {
        let graph = MemoryGraph::new();
        let id = graph.add_node(
            NodeSeed::new("Microsoft.Compute/virtualMachines", "web", "t1", "base")
                .group("rg-a")
                .tag("correlation_id", "c-web"),
        );
        (graph, id)
    }

    #[tokio::test]
    async fn test_find_nodes_respects_scope_and_group() {
        let (graph, id) = graph_with_vm();
        let scope = Scope::new("t1", "base");
        let vm = "Microsoft.Compute/virtualMachines";

        let other = Scope::new("t1", "other");

        let any_group = graph.find_nodes(vm, "web", None, &scope).await.unwrap();
        assert_eq!(any_group[0].node_id, id);
        let in_group = graph.find_nodes(vm, "web", Some("rg-a"), &scope).await.unwrap();
        assert_eq!(in_group.len(), 1);
        assert!(graph.find_nodes(vm, "web", Some("rg-b"), &scope).await.unwrap().is_empty());
        assert!(graph.find_nodes(vm, "web", None, &other).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_candidates_by_name_or_tag() {
        let (graph, _) = graph_with_vm();
        let query = CandidateQuery {
            native_type: "Microsoft.Compute/virtualMachines".into(),
            names: vec![],
            correlation_tag: "correlation_id".into(),
            correlation_values: vec!["c-web".into()],
        };
        let found = graph.find_candidates(&query, &Scope::new("t1", "base")).await.unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn test_uncommitted_writes_are_invisible() {
        let (graph, id) = graph_with_vm();
        let mut txn = graph.begin().await.unwrap();
        let mut props = PropertyMap::new();
        props.insert("overlay_exercise".into(), json!("ex1"));
        assert!(txn.set_properties(&id, &props).await.unwrap());
        let staged = txn.get_properties(&id).await.unwrap().unwrap();
        assert_eq!(staged["overlay_exercise"], json!("ex1"));
        assert!(graph.node(&id).unwrap().get("overlay_exercise").is_none());

        txn.rollback().await.unwrap();
        assert!(graph.node(&id).unwrap().get("overlay_exercise").is_none());

        let mut txn = graph.begin().await.unwrap();
        txn.set_properties(&id, &props).await.unwrap();
        txn.commit().await.unwrap();
        assert_eq!(graph.node(&id).unwrap()["overlay_exercise"], json!("ex1"));
    }

    #[tokio::test]
    async fn test_missing_node_and_null_removal() {
        let (graph, id) = graph_with_vm();
        let mut props = PropertyMap::new();
        props.insert("overlay_role".into(), json!("decoy"));
        assert!(!graph.set_properties("missing", &props).await.unwrap());
        assert!(graph.set_properties(&id, &props).await.unwrap());

        props.insert("overlay_role".into(), Value::Null);
        graph.set_properties(&id, &props).await.unwrap();
        assert!(graph.node(&id).unwrap().get("overlay_role").is_none());
    }

    #[tokio::test]
    async fn test_key_prefix_lookup_is_layer_scoped() {
        let (graph, id) = graph_with_vm();
        graph.add_node(NodeSeed::new("Microsoft.Network/subnets", "dmz", "t1", "scratch"));
        let mut props = PropertyMap::new();
        props.insert("overlay_6578_726564_role".into(), json!("decoy"));
        graph.set_properties(&id, &props).await.unwrap();

        let found = graph.find_by_key_prefix("base", "overlay_6578_").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].node_id, id);
        assert!(graph.find_by_key_prefix("base", "overlay_79_").await.unwrap().is_empty());
        assert!(graph.find_by_key_prefix("scratch", "overlay_").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_graph_fails_with_transport_error() {
        let (graph, _) = graph_with_vm();
        graph.set_unavailable(true);
        let err = graph.get_properties("n1").await.unwrap_err();
        assert!(matches!(err, OverlayError::GraphTransport(_)));
    }
}
