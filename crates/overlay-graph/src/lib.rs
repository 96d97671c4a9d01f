//! # Overlay Graph
//!
//! Resource graph integration for overlays.
//!
//! Provides the graph port and its Neo4j and in-memory adapters, tiered
//! resource matching, transactional overlay annotation, and the import
//! pipeline that ties them together.

pub mod annotation;
pub mod client;
pub mod import;
pub mod matcher;
pub mod memory;
pub mod neo4j;
pub mod port;
pub mod schema;

pub use annotation::{AnnotationStore, BulkWriteOutcome};
pub use client::GraphClient;
pub use import::{ImportPipeline, ImportRequest};
pub use matcher::{MatchSummary, ResourceMatcher};
pub use memory::{MemoryGraph, NodeSeed};
pub use neo4j::Neo4jGraph;
pub use port::{GraphQueryPort, GraphTransaction, NodeRef, PropertyMap, Scope};
pub use schema::initialize_schema;
