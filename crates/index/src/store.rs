use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use extract::{Embedding, Entity, EntityType, Modality, Triple};

/// Per-store failure. Recorded and surfaced; never allowed to block a
/// sibling store's write or sub-query.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store query failed: {0}")]
    Query(String),

    #[error("malformed store response: {0}")]
    Malformed(String),
}

/// Which backing store produced a hit
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum StoreTag {
    Vector,
    Graph,
    Structured,
}

impl fmt::Display for StoreTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StoreTag::Vector => "vector",
            StoreTag::Graph => "graph",
            StoreTag::Structured => "structured",
        };
        f.write_str(s)
    }
}

/// Display metadata kept in the relational store and attached to search
/// results during enrichment
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub title: String,
    pub authors: Vec<String>,
    pub summary: String,
    pub categories: Vec<String>,
    pub language: String,
    pub status: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Graph sub-query: type and strength predicates plus traversal depth
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphFilter {
    pub entity_type: Option<EntityType>,
    pub min_strength: Option<f64>,
    /// Hops to expand beyond the seed entities
    pub depth: u32,
    pub limit: usize,
}

impl Default for GraphFilter {
    fn default() -> Self {
        Self {
            entity_type: None,
            min_strength: None,
            depth: 1,
            limit: 10,
        }
    }
}

/// One entity hit from the graph store, already mapped to a document.
/// Score is store-local: the strongest matched relationship, or 1.0 for a
/// bare type match.
#[derive(Debug, Clone)]
pub struct GraphMatch {
    pub doc_key: String,
    pub entity_key: String,
    pub score: f64,
}

/// One similarity hit from the vector store
#[derive(Debug, Clone)]
pub struct SimilarityMatch {
    pub doc_key: String,
    pub owner_key: String,
    pub score: f32,
    pub modality: Option<Modality>,
}

/// One structured predicate: exact match on a whitelisted metadata field
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldFilter {
    pub field: String,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct StructuredRow {
    pub doc_key: String,
    pub metadata: DocumentMetadata,
}

/// Write/query contract the graph store must expose
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Upsert keyed by canonical (name, type) identity; repeat writes merge
    async fn upsert_entity(&self, doc_key: &str, entity: &Entity) -> Result<(), StoreError>;

    async fn upsert_relationship(&self, triple: &Triple) -> Result<(), StoreError>;

    async fn query(&self, filter: &GraphFilter) -> Result<Vec<GraphMatch>, StoreError>;
}

/// Write/query contract the vector store must expose
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn upsert_embedding(
        &self,
        doc_key: &str,
        embedding: &Embedding,
    ) -> Result<(), StoreError>;

    async fn query_similar(
        &self,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<SimilarityMatch>, StoreError>;
}

/// Write/query contract the relational store must expose. Also serves the
/// combined search's single batched enrichment pass.
#[async_trait]
pub trait RelationalStore: Send + Sync {
    async fn upsert_metadata(
        &self,
        doc_key: &str,
        metadata: &DocumentMetadata,
    ) -> Result<(), StoreError>;

    async fn query(
        &self,
        filters: &[FieldFilter],
        limit: usize,
    ) -> Result<Vec<StructuredRow>, StoreError>;

    async fn fetch_metadata(
        &self,
        doc_keys: &[String],
    ) -> Result<HashMap<String, DocumentMetadata>, StoreError>;
}
