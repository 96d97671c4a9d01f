//! [`GraphQueryPort`] over Neo4j.
//!
//! Resource nodes carry the `:Resource` label; see the property constants
//! in [`crate::port`] for the layout the queries rely on.

use async_trait::async_trait;
use neo4rs::{Query, Row, Txn};
use serde_json::Value;
use tracing::debug;

use overlay_core::{OverlayError, OverlayResult};

use crate::port::{
    CandidateQuery, GraphQueryPort, GraphTransaction, NodeRef, PropertyMap, Scope, GROUP_PROPERTY,
    LAYER_PROPERTY, NAME_PROPERTY, TAGS_PROPERTY, TENANT_PROPERTY, TYPE_PROPERTY,
};
use crate::GraphClient;

/// Node label of scanned resources.
pub const RESOURCE_LABEL: &str = "Resource";

const RETURN_NODE: &str = "RETURN elementId(n) AS node_id, properties(n) AS props";
const PROPS_BY_ID: &str = "MATCH (n) WHERE elementId(n) = $id RETURN properties(n) AS props";

/// Neo4j-backed graph port.
#[derive(Clone)]
pub struct Neo4jGraph {
    client: GraphClient,
}

impl Neo4jGraph {
    pub fn new(client: GraphClient) -> Self {
        Self { client }
    }

    async fn fetch_nodes(&self, query: Query) -> OverlayResult<Vec<NodeRef>> {
        let rows = self
            .client
            .query(query)
            .await
            .map_err(|e| OverlayError::transport(format!("{:#}", e)))?;
        Ok(rows.iter().filter_map(node_from_row).collect())
    }
}

/// Only plain identifiers may be spliced into Cypher as property keys.
fn property_key(key: &str) -> OverlayResult<&str> {
    let valid = !key.is_empty()
        && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !key.starts_with(|c: char| c.is_ascii_digit());
    if valid {
        Ok(key)
    } else {
        Err(OverlayError::validation(format!("invalid property key '{}'", key)))
    }
}

fn node_from_row(row: &Row) -> Option<NodeRef> {
    let node_id: String = row.get("node_id").unwrap_or_default();
    if node_id.is_empty() {
        return None;
    }
    let props = match row.get::<Value>("props") {
        Ok(Value::Object(map)) => map.into_iter().collect(),
        _ => PropertyMap::new(),
    };
    Some(NodeRef::from_properties(node_id, props))
}

fn props_from_row(row: &Row) -> PropertyMap {
    match row.get::<Value>("props") {
        Ok(Value::Object(map)) => map.into_iter().collect(),
        _ => PropertyMap::new(),
    }
}

fn transport(err: neo4rs::Error) -> OverlayError {
    OverlayError::transport(err)
}

#[async_trait]
impl GraphQueryPort for Neo4jGraph {
    async fn find_nodes(
        &self,
        native_type: &str,
        name: &str,
        group: Option<&str>,
        scope: &Scope,
    ) -> OverlayResult<Vec<NodeRef>> {
        let query = Query::new(format!(
            "MATCH (n:{label})
             WHERE n.{ty} = $type AND n.{name} = $name
               AND n.{tenant} = $tenant AND n.{layer} = $layer
               AND ($group = '' OR n.{group} = $group)
             {ret}",
            label = RESOURCE_LABEL,
            ty = TYPE_PROPERTY,
            name = NAME_PROPERTY,
            tenant = TENANT_PROPERTY,
            layer = LAYER_PROPERTY,
            group = GROUP_PROPERTY,
            ret = RETURN_NODE,
        ))
        .param("type", native_type)
        .param("name", name)
        .param("group", group.unwrap_or(""))
        .param("tenant", scope.tenant.as_str())
        .param("layer", scope.layer.as_str());

        self.fetch_nodes(query).await
    }

    async fn find_candidates(
        &self,
        query: &CandidateQuery,
        scope: &Scope,
    ) -> OverlayResult<Vec<NodeRef>> {
        // Tags are usually stored as JSON text, so the tag clause is a coarse
        // CONTAINS filter; NodeRef::tag makes the exact comparison afterwards.
        let correlation_key = property_key(&query.correlation_tag)?;
        let cypher = format!(
            "MATCH (n:{label})
             WHERE n.{ty} = $type AND n.{tenant} = $tenant AND n.{layer} = $layer
               AND (n.{name} IN $names
                    OR n.{key} IN $values
                    OR any(v IN $values WHERE toString(n.{tags}) CONTAINS v))
             {ret}",
            label = RESOURCE_LABEL,
            ty = TYPE_PROPERTY,
            tenant = TENANT_PROPERTY,
            layer = LAYER_PROPERTY,
            name = NAME_PROPERTY,
            key = correlation_key,
            tags = TAGS_PROPERTY,
            ret = RETURN_NODE,
        );
        let cypher_query = Query::new(cypher)
            .param("type", query.native_type.as_str())
            .param("tenant", scope.tenant.as_str())
            .param("layer", scope.layer.as_str())
            .param("names", query.names.clone())
            .param("values", query.correlation_values.clone());

        let nodes = self.fetch_nodes(cypher_query).await?;
        debug!(
            native_type = %query.native_type,
            fetched = nodes.len(),
            "Fetched match candidates"
        );
        Ok(nodes
            .into_iter()
            .filter(|node| {
                query.names.contains(&node.name)
                    || node
                        .tag(&query.correlation_tag)
                        .is_some_and(|v| query.correlation_values.contains(&v))
            })
            .collect())
    }

    async fn find_by_key_prefix(
        &self,
        layer: &str,
        prefix: &str,
    ) -> OverlayResult<Vec<NodeRef>> {
        let query = Query::new(format!(
            "MATCH (n:{label})
             WHERE n.{layer} = $layer AND any(k IN keys(n) WHERE k STARTS WITH $prefix)
             {ret}",
            label = RESOURCE_LABEL,
            layer = LAYER_PROPERTY,
            ret = RETURN_NODE,
        ))
        .param("layer", layer)
        .param("prefix", prefix);

        self.fetch_nodes(query).await
    }

    async fn get_properties(&self, node_id: &str) -> OverlayResult<Option<PropertyMap>> {
        let query = Query::new(PROPS_BY_ID.to_string()).param("id", node_id);
        let rows = self
            .client
            .query(query)
            .await
            .map_err(|e| OverlayError::transport(format!("{:#}", e)))?;
        Ok(rows.first().map(props_from_row))
    }

    async fn begin(&self) -> OverlayResult<Box<dyn GraphTransaction>> {
        let txn = self
            .client
            .start_txn()
            .await
            .map_err(|e| OverlayError::transport(format!("{:#}", e)))?;
        Ok(Box::new(Neo4jTransaction { txn }))
    }
}

/// A Neo4j explicit transaction.
pub struct Neo4jTransaction {
    txn: Txn,
}

impl Neo4jTransaction {
    async fn first_row(&mut self, query: Query) -> OverlayResult<Option<Row>> {
        let mut stream = self.txn.execute(query).await.map_err(transport)?;
        let first = stream.next(self.txn.handle()).await.map_err(transport)?;
        // Drain so the connection is ready for the next statement.
        while stream.next(self.txn.handle()).await.map_err(transport)?.is_some() {}
        Ok(first)
    }
}

/// Bind a JSON value as a query parameter; nested values are stored as JSON text.
fn bind(query: Query, name: &str, value: &Value) -> Query {
    match value {
        Value::Bool(b) => query.param(name, *b),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => query.param(name, i),
            (None, Some(f)) => query.param(name, f),
            _ => query.param(name, n.to_string()),
        },
        Value::String(s) => query.param(name, s.as_str()),
        other => query.param(name, other.to_string()),
    }
}

#[async_trait]
impl GraphTransaction for Neo4jTransaction {
    async fn get_properties(&mut self, node_id: &str) -> OverlayResult<Option<PropertyMap>> {
        let query = Query::new(PROPS_BY_ID.to_string()).param("id", node_id);
        Ok(self.first_row(query).await?.as_ref().map(props_from_row))
    }

    async fn set_properties(
        &mut self,
        node_id: &str,
        properties: &PropertyMap,
    ) -> OverlayResult<bool> {
        let mut sets = Vec::new();
        let mut removes = Vec::new();
        for (i, (key, value)) in properties.iter().enumerate() {
            let key = property_key(key)?;
            if value.is_null() {
                removes.push(format!("n.{}", key));
            } else {
                sets.push(format!("n.{} = $v{}", key, i));
            }
        }

        let mut cypher = String::from("MATCH (n) WHERE elementId(n) = $id ");
        if !sets.is_empty() {
            cypher.push_str(&format!("SET {} ", sets.join(", ")));
        }
        if !removes.is_empty() {
            cypher.push_str(&format!("REMOVE {} ", removes.join(", ")));
        }
        cypher.push_str("RETURN count(n) AS matched");

        let mut query = Query::new(cypher).param("id", node_id);
        for (i, (_, value)) in properties.iter().enumerate() {
            if !value.is_null() {
                query = bind(query, &format!("v{}", i), value);
            }
        }

        let matched: i64 = self
            .first_row(query)
            .await?
            .and_then(|row| row.get("matched").ok())
            .unwrap_or(0);
        Ok(matched > 0)
    }

    async fn remove_properties(&mut self, node_id: &str, keys: &[String]) -> OverlayResult<bool> {
        let mut targets = Vec::with_capacity(keys.len());
        for key in keys {
            targets.push(format!("n.{}", property_key(key)?));
        }
        let remove = if targets.is_empty() {
            String::new()
        } else {
            format!("REMOVE {}", targets.join(", "))
        };
        let query = Query::new(format!(
            "MATCH (n) WHERE elementId(n) = $id {} RETURN count(n) AS matched",
            remove
        ))
        .param("id", node_id);

        let matched: i64 = self
            .first_row(query)
            .await?
            .and_then(|row| row.get("matched").ok())
            .unwrap_or(0);
        Ok(matched > 0)
    }

    async fn commit(self: Box<Self>) -> OverlayResult<()> {
        self.txn.commit().await.map_err(transport)
    }

    async fn rollback(self: Box<Self>) -> OverlayResult<()> {
        self.txn.rollback().await.map_err(transport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_key_validation() {
        assert!(property_key("overlay_exercise").is_ok());
        assert!(property_key("correlation_id").is_ok());
        assert!(property_key("bad key").is_err());
        assert!(property_key("x}) DETACH DELETE n //").is_err());
        assert!(property_key("1abc").is_err());
        assert!(property_key("").is_err());
    }
}
