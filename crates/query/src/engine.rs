use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

use extract::Embedder;
use index::{
    DocumentMetadata, GraphFilter, GraphStore, RelationalStore, StoreTag, VectorStore,
};

use crate::descriptor::QueryDescriptor;

/// One merged, deduplicated hit. When several stores surface the same
/// document the score is the maximum of the per-store raw scores; the
/// scores are store-local and never blended.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub doc_key: String,
    pub score: f64,
    pub stores: BTreeSet<StoreTag>,
    pub metadata: Option<DocumentMetadata>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    /// Set when a sub-query or the enrichment pass failed; the remaining
    /// stores' contributions are still returned
    pub partial: bool,
    pub failed_stores: Vec<StoreTag>,
}

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("query descriptor selects no sub-queries")]
    EmptyDescriptor,
}

/// Fans a query descriptor out across the requested stores, merges and
/// deduplicates the hits, and enriches them with relational metadata in a
/// single batched pass.
pub struct SearchEngine {
    embedder: Arc<dyn Embedder>,
    vector: Arc<dyn VectorStore>,
    graph: Arc<dyn GraphStore>,
    relational: Arc<dyn RelationalStore>,
}

impl SearchEngine {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        vector: Arc<dyn VectorStore>,
        graph: Arc<dyn GraphStore>,
        relational: Arc<dyn RelationalStore>,
    ) -> Self {
        Self {
            embedder,
            vector,
            graph,
            relational,
        }
    }

    pub async fn search(&self, descriptor: &QueryDescriptor) -> Result<SearchResponse, QueryError> {
        if descriptor.similarity.is_none()
            && descriptor.graph.is_none()
            && descriptor.structured.is_none()
        {
            return Err(QueryError::EmptyDescriptor);
        }

        // Sub-queries run concurrently; the merge below is the single
        // synchronization point and waits for all of them.
        let (vector_outcome, graph_outcome, structured_outcome) = tokio::join!(
            self.run_similarity(descriptor),
            self.run_graph(descriptor),
            self.run_structured(descriptor),
        );

        let mut partial = false;
        let mut failed_stores = Vec::new();
        let mut merged: HashMap<String, (f64, BTreeSet<StoreTag>)> = HashMap::new();

        for (outcome, tag) in [
            (vector_outcome, StoreTag::Vector),
            (graph_outcome, StoreTag::Graph),
            (structured_outcome, StoreTag::Structured),
        ] {
            match outcome {
                None => {}
                Some(Ok(hits)) => {
                    for (doc_key, score) in hits {
                        let entry = merged
                            .entry(doc_key)
                            .or_insert_with(|| (score, BTreeSet::new()));
                        entry.0 = entry.0.max(score);
                        entry.1.insert(tag);
                    }
                }
                Some(Err(error)) => {
                    warn!(store = %tag, %error, "sub-query failed, continuing without it");
                    partial = true;
                    failed_stores.push(tag);
                }
            }
        }

        // Single batched enrichment pass over the deduplicated key set
        let doc_keys: Vec<String> = merged.keys().cloned().collect();
        let mut metadata_map = match self.relational.fetch_metadata(&doc_keys).await {
            Ok(map) => map,
            Err(error) => {
                warn!(%error, "enrichment pass failed, returning bare results");
                partial = true;
                if !failed_stores.contains(&StoreTag::Structured) {
                    failed_stores.push(StoreTag::Structured);
                }
                HashMap::new()
            }
        };

        let mut results: Vec<SearchResult> = merged
            .into_iter()
            .map(|(doc_key, (score, stores))| SearchResult {
                metadata: metadata_map.remove(&doc_key),
                doc_key,
                score,
                stores,
            })
            .collect();

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.doc_key.cmp(&b.doc_key))
        });
        results.truncate(descriptor.limit);

        debug!(
            results = results.len(),
            partial,
            "combined search complete"
        );
        Ok(SearchResponse {
            results,
            partial,
            failed_stores,
        })
    }

    /// Embed the query text and search the vector store. An embedding
    /// failure counts as a failed vector sub-query. The modality filter
    /// applies here, before ranking.
    async fn run_similarity(
        &self,
        descriptor: &QueryDescriptor,
    ) -> Option<Result<Vec<(String, f64)>, String>> {
        let similarity = descriptor.similarity.as_ref()?;
        let wanted_modality = descriptor.modality;

        let outcome = async {
            let vector = self
                .embedder
                .embed_query(&similarity.text)
                .await
                .map_err(|e| e.to_string())?;
            let matches = self
                .vector
                .query_similar(&vector, similarity.top_k)
                .await
                .map_err(|e| e.to_string())?;

            Ok(matches
                .into_iter()
                .filter(|m| match (wanted_modality, m.modality) {
                    (Some(wanted), Some(tagged)) => wanted == tagged,
                    _ => true,
                })
                .map(|m| (m.doc_key, m.score as f64))
                .collect())
        }
        .await;

        Some(outcome)
    }

    async fn run_graph(
        &self,
        descriptor: &QueryDescriptor,
    ) -> Option<Result<Vec<(String, f64)>, String>> {
        let graph = descriptor.graph.as_ref()?;

        let filter = GraphFilter {
            entity_type: graph.entity_type,
            min_strength: graph.min_strength,
            depth: graph.depth,
            limit: descriptor.limit,
        };

        let outcome = self
            .graph
            .query(&filter)
            .await
            .map(|matches| {
                matches
                    .into_iter()
                    .map(|m| (m.doc_key, m.score))
                    .collect()
            })
            .map_err(|e| e.to_string());

        Some(outcome)
    }

    /// Structured hits carry no ranking semantics; every match scores 1.0
    async fn run_structured(
        &self,
        descriptor: &QueryDescriptor,
    ) -> Option<Result<Vec<(String, f64)>, String>> {
        let structured = descriptor.structured.as_ref()?;

        let outcome = self
            .relational
            .query(&structured.filters, descriptor.limit)
            .await
            .map(|rows| rows.into_iter().map(|row| (row.doc_key, 1.0)).collect())
            .map_err(|e| e.to_string());

        Some(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{GraphQuery, SimilarityQuery, StructuredQuery};
    use async_trait::async_trait;
    use extract::{Embedding, ExtractionError, Modality};
    use index::{
        FieldFilter, GraphMatch, SimilarityMatch, StoreError, StructuredRow,
    };
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering};

    #[derive(Default)]
    struct FakeEmbedder {
        fail: AtomicBool,
    }

    #[async_trait]
    impl Embedder for FakeEmbedder {
        async fn embed_query(&self, _text: &str) -> Result<Vec<f32>, ExtractionError> {
            if self.fail.load(AtomicOrdering::SeqCst) {
                return Err(ExtractionError::UpstreamUnavailable("model down".into()));
            }
            Ok(vec![0.5; 8])
        }
    }

    #[derive(Default)]
    struct FakeVectorStore {
        fail: AtomicBool,
        matches: Vec<SimilarityMatch>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl VectorStore for FakeVectorStore {
        async fn upsert_embedding(
            &self,
            _doc_key: &str,
            _embedding: &Embedding,
        ) -> Result<(), StoreError> {
            Ok(())
        }

        async fn query_similar(
            &self,
            _vector: &[f32],
            _top_k: usize,
        ) -> Result<Vec<SimilarityMatch>, StoreError> {
            self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            if self.fail.load(AtomicOrdering::SeqCst) {
                return Err(StoreError::Unavailable("vector down".into()));
            }
            Ok(self.matches.clone())
        }
    }

    #[derive(Default)]
    struct FakeGraphStore {
        fail: AtomicBool,
        matches: Vec<GraphMatch>,
    }

    #[async_trait]
    impl GraphStore for FakeGraphStore {
        async fn upsert_entity(
            &self,
            _doc_key: &str,
            _entity: &extract::Entity,
        ) -> Result<(), StoreError> {
            Ok(())
        }

        async fn upsert_relationship(&self, _triple: &extract::Triple) -> Result<(), StoreError> {
            Ok(())
        }

        async fn query(&self, _filter: &GraphFilter) -> Result<Vec<GraphMatch>, StoreError> {
            if self.fail.load(AtomicOrdering::SeqCst) {
                return Err(StoreError::Unavailable("graph down".into()));
            }
            Ok(self.matches.clone())
        }
    }

    #[derive(Default)]
    struct FakeRelationalStore {
        rows: Vec<StructuredRow>,
        metadata: HashMap<String, DocumentMetadata>,
        fail_enrichment: AtomicBool,
    }

    #[async_trait]
    impl RelationalStore for FakeRelationalStore {
        async fn upsert_metadata(
            &self,
            _doc_key: &str,
            _metadata: &DocumentMetadata,
        ) -> Result<(), StoreError> {
            Ok(())
        }

        async fn query(
            &self,
            _filters: &[FieldFilter],
            _limit: usize,
        ) -> Result<Vec<StructuredRow>, StoreError> {
            Ok(self.rows.clone())
        }

        async fn fetch_metadata(
            &self,
            doc_keys: &[String],
        ) -> Result<HashMap<String, DocumentMetadata>, StoreError> {
            if self.fail_enrichment.load(AtomicOrdering::SeqCst) {
                return Err(StoreError::Unavailable("relational down".into()));
            }
            Ok(doc_keys
                .iter()
                .filter_map(|k| self.metadata.get(k).map(|m| (k.clone(), m.clone())))
                .collect())
        }
    }

    fn similarity_match(doc_key: &str, score: f32, modality: Modality) -> SimilarityMatch {
        SimilarityMatch {
            doc_key: doc_key.to_string(),
            owner_key: format!("chunk_{doc_key}"),
            score,
            modality: Some(modality),
        }
    }

    fn graph_match(doc_key: &str, score: f64) -> GraphMatch {
        GraphMatch {
            doc_key: doc_key.to_string(),
            entity_key: "SOME ENTITY::CONCEPT".to_string(),
            score,
        }
    }

    fn engine(
        embedder: FakeEmbedder,
        vector: FakeVectorStore,
        graph: FakeGraphStore,
        relational: FakeRelationalStore,
    ) -> (
        SearchEngine,
        Arc<FakeVectorStore>,
    ) {
        let vector = Arc::new(vector);
        let engine = SearchEngine::new(
            Arc::new(embedder),
            vector.clone(),
            Arc::new(graph),
            Arc::new(relational),
        );
        (engine, vector)
    }

    fn all_stores_descriptor() -> QueryDescriptor {
        QueryDescriptor {
            similarity: Some(SimilarityQuery {
                text: "quantum computing".into(),
                top_k: 10,
            }),
            graph: Some(GraphQuery::default()),
            structured: Some(StructuredQuery { filters: vec![] }),
            ..QueryDescriptor::default()
        }
    }

    #[tokio::test]
    async fn empty_descriptor_is_rejected() {
        let (engine, _) = engine(
            FakeEmbedder::default(),
            FakeVectorStore::default(),
            FakeGraphStore::default(),
            FakeRelationalStore::default(),
        );
        let err = engine.search(&QueryDescriptor::default()).await.unwrap_err();
        assert!(matches!(err, QueryError::EmptyDescriptor));
    }

    #[tokio::test]
    async fn merge_takes_max_score_and_unions_store_tags() {
        let vector = FakeVectorStore {
            matches: vec![similarity_match("doc-1", 0.8, Modality::Text)],
            ..FakeVectorStore::default()
        };
        let graph = FakeGraphStore {
            matches: vec![graph_match("doc-1", 7.0)],
            ..FakeGraphStore::default()
        };
        let (engine, _) = engine(
            FakeEmbedder::default(),
            vector,
            graph,
            FakeRelationalStore::default(),
        );

        let response = engine.search(&all_stores_descriptor()).await.unwrap();
        assert!(!response.partial);
        assert_eq!(response.results.len(), 1);

        let result = &response.results[0];
        assert_eq!(result.doc_key, "doc-1");
        assert_eq!(result.score, 7.0);
        assert!(result.stores.contains(&StoreTag::Vector));
        assert!(result.stores.contains(&StoreTag::Graph));
    }

    #[tokio::test]
    async fn failed_vector_sub_query_yields_partial_results() {
        let vector = FakeVectorStore {
            fail: AtomicBool::new(true),
            ..FakeVectorStore::default()
        };
        let graph = FakeGraphStore {
            matches: vec![graph_match("doc-2", 5.0)],
            ..FakeGraphStore::default()
        };
        let relational = FakeRelationalStore {
            rows: vec![StructuredRow {
                doc_key: "doc-3".into(),
                metadata: DocumentMetadata::default(),
            }],
            ..FakeRelationalStore::default()
        };
        let (engine, _) = engine(FakeEmbedder::default(), vector, graph, relational);

        let response = engine.search(&all_stores_descriptor()).await.unwrap();
        assert!(response.partial);
        assert_eq!(response.failed_stores, vec![StoreTag::Vector]);
        assert_eq!(response.results.len(), 2);
    }

    #[tokio::test]
    async fn embedding_failure_counts_as_vector_failure() {
        let embedder = FakeEmbedder {
            fail: AtomicBool::new(true),
        };
        let graph = FakeGraphStore {
            matches: vec![graph_match("doc-2", 5.0)],
            ..FakeGraphStore::default()
        };
        let (engine, vector) = engine(
            embedder,
            FakeVectorStore::default(),
            graph,
            FakeRelationalStore::default(),
        );

        let response = engine.search(&all_stores_descriptor()).await.unwrap();
        assert!(response.partial);
        assert_eq!(response.failed_stores, vec![StoreTag::Vector]);
        // The vector store itself was never queried
        assert_eq!(vector.calls.load(AtomicOrdering::SeqCst), 0);
    }

    #[tokio::test]
    async fn modality_filter_excludes_before_ranking() {
        let vector = FakeVectorStore {
            matches: vec![
                similarity_match("doc-math", 0.9, Modality::Math),
                similarity_match("doc-text", 0.4, Modality::Text),
            ],
            ..FakeVectorStore::default()
        };
        let (engine, _) = engine(
            FakeEmbedder::default(),
            vector,
            FakeGraphStore::default(),
            FakeRelationalStore::default(),
        );

        let descriptor = QueryDescriptor {
            similarity: Some(SimilarityQuery {
                text: "anything".into(),
                top_k: 10,
            }),
            modality: Some(Modality::Text),
            limit: 1,
            ..QueryDescriptor::default()
        };

        let response = engine.search(&descriptor).await.unwrap();
        assert_eq!(response.results.len(), 1);
        // The higher-scoring math hit must not consume the only rank position
        assert_eq!(response.results[0].doc_key, "doc-text");
    }

    #[tokio::test]
    async fn results_order_by_score_then_key() {
        let vector = FakeVectorStore {
            matches: vec![
                similarity_match("doc-b", 0.7, Modality::Text),
                similarity_match("doc-a", 0.7, Modality::Text),
                similarity_match("doc-c", 0.9, Modality::Text),
            ],
            ..FakeVectorStore::default()
        };
        let (engine, _) = engine(
            FakeEmbedder::default(),
            vector,
            FakeGraphStore::default(),
            FakeRelationalStore::default(),
        );

        let descriptor = QueryDescriptor {
            similarity: Some(SimilarityQuery {
                text: "anything".into(),
                top_k: 10,
            }),
            ..QueryDescriptor::default()
        };

        let response = engine.search(&descriptor).await.unwrap();
        let keys: Vec<&str> = response.results.iter().map(|r| r.doc_key.as_str()).collect();
        assert_eq!(keys, vec!["doc-c", "doc-a", "doc-b"]);
    }

    #[tokio::test]
    async fn enrichment_attaches_metadata_in_one_pass() {
        let vector = FakeVectorStore {
            matches: vec![similarity_match("doc-1", 0.8, Modality::Text)],
            ..FakeVectorStore::default()
        };
        let mut metadata = HashMap::new();
        metadata.insert(
            "doc-1".to_string(),
            DocumentMetadata {
                title: "A Paper".into(),
                ..DocumentMetadata::default()
            },
        );
        let relational = FakeRelationalStore {
            metadata,
            ..FakeRelationalStore::default()
        };
        let (engine, _) = engine(
            FakeEmbedder::default(),
            vector,
            FakeGraphStore::default(),
            relational,
        );

        let descriptor = QueryDescriptor {
            similarity: Some(SimilarityQuery {
                text: "anything".into(),
                top_k: 10,
            }),
            ..QueryDescriptor::default()
        };

        let response = engine.search(&descriptor).await.unwrap();
        let result = &response.results[0];
        assert_eq!(result.metadata.as_ref().unwrap().title, "A Paper");
    }

    #[tokio::test]
    async fn enrichment_failure_flags_partial_but_keeps_results() {
        let vector = FakeVectorStore {
            matches: vec![similarity_match("doc-1", 0.8, Modality::Text)],
            ..FakeVectorStore::default()
        };
        let relational = FakeRelationalStore {
            fail_enrichment: AtomicBool::new(true),
            ..FakeRelationalStore::default()
        };
        let (engine, _) = engine(
            FakeEmbedder::default(),
            vector,
            FakeGraphStore::default(),
            relational,
        );

        let descriptor = QueryDescriptor {
            similarity: Some(SimilarityQuery {
                text: "anything".into(),
                top_k: 10,
            }),
            ..QueryDescriptor::default()
        };

        let response = engine.search(&descriptor).await.unwrap();
        assert!(response.partial);
        assert_eq!(response.results.len(), 1);
        assert!(response.results[0].metadata.is_none());
    }

    #[tokio::test]
    async fn unrequested_stores_are_not_dispatched() {
        let relational = FakeRelationalStore {
            rows: vec![StructuredRow {
                doc_key: "doc-9".into(),
                metadata: DocumentMetadata::default(),
            }],
            ..FakeRelationalStore::default()
        };
        let (engine, vector) = engine(
            FakeEmbedder::default(),
            FakeVectorStore::default(),
            FakeGraphStore::default(),
            relational,
        );

        let descriptor = QueryDescriptor {
            structured: Some(StructuredQuery { filters: vec![] }),
            ..QueryDescriptor::default()
        };

        let response = engine.search(&descriptor).await.unwrap();
        assert!(!response.partial);
        assert_eq!(response.results.len(), 1);
        assert_eq!(vector.calls.load(AtomicOrdering::SeqCst), 0);
    }
}
