//! Neo4j schema initialization (overlay and matching indexes).

use anyhow::Result;
use neo4rs::Query;
use tracing::info;

use crate::GraphClient;

/// Cypher statements for schema initialization.
const SCHEMA_STATEMENTS: &[&str] = &[
    // Overlay lookups start from the layer, then scan property keys
    "CREATE INDEX resource_layer IF NOT EXISTS FOR (n:Resource) ON (n.layer_id)",
    // Matcher candidate queries
    "CREATE INDEX resource_scope IF NOT EXISTS \
     FOR (n:Resource) ON (n.tenant_id, n.layer_id, n.type)",
    "CREATE INDEX resource_name IF NOT EXISTS FOR (n:Resource) ON (n.name)",
];

/// Initialize Neo4j schema with the indexes the overlay queries use.
///
/// Safe to run multiple times - uses IF NOT EXISTS clauses.
pub async fn initialize_schema(client: &GraphClient) -> Result<()> {
    info!("Initializing Neo4j overlay schema...");

    for statement in SCHEMA_STATEMENTS {
        client.execute(Query::new(statement.to_string())).await?;
    }

    info!("Neo4j overlay schema initialized ({} statements)", SCHEMA_STATEMENTS.len());
    Ok(())
}
