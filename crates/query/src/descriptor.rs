use serde::{Deserialize, Serialize};

use extract::{EntityType, Modality};
use index::FieldFilter;

/// Embedding-similarity sub-query: free text plus how many neighbours to pull
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarityQuery {
    pub text: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

/// Graph sub-query: entity type, strength threshold, traversal depth
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphQuery {
    #[serde(default)]
    pub entity_type: Option<EntityType>,
    #[serde(default)]
    pub min_strength: Option<f64>,
    #[serde(default = "default_depth")]
    pub depth: u32,
}

impl Default for GraphQuery {
    fn default() -> Self {
        Self {
            entity_type: None,
            min_strength: None,
            depth: default_depth(),
        }
    }
}

/// Structured sub-query: exact-match predicates over relational metadata
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StructuredQuery {
    pub filters: Vec<FieldFilter>,
}

/// Selects which stores a combined search touches. At least one sub-query
/// must be present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryDescriptor {
    #[serde(default)]
    pub similarity: Option<SimilarityQuery>,
    #[serde(default)]
    pub graph: Option<GraphQuery>,
    #[serde(default)]
    pub structured: Option<StructuredQuery>,
    /// Restrict results to one content modality, applied before ranking
    #[serde(default)]
    pub modality: Option<Modality>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

impl Default for QueryDescriptor {
    fn default() -> Self {
        Self {
            similarity: None,
            graph: None,
            structured: None,
            modality: None,
            limit: default_limit(),
        }
    }
}

fn default_top_k() -> usize {
    10
}

fn default_depth() -> u32 {
    1
}

fn default_limit() -> usize {
    10
}
