use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use extract::{DocumentGraph, Embedding};
use ingest::{Document, DocumentStatus, StatusError};

use crate::store::{
    DocumentMetadata, GraphStore, RelationalStore, StoreError, StoreTag, VectorStore,
};

/// Outcome of one store's write pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreStatus {
    Ok,
    Failed(String),
}

impl StoreStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, StoreStatus::Ok)
    }
}

/// Per-store persistence outcome for one document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistResult {
    pub graph: StoreStatus,
    pub vector: StoreStatus,
    pub relational: StoreStatus,
}

impl PersistResult {
    pub fn all_ok(&self) -> bool {
        self.graph.is_ok() && self.vector.is_ok() && self.relational.is_ok()
    }

    pub fn failed_stores(&self) -> Vec<StoreTag> {
        let mut failed = Vec::new();
        if !self.graph.is_ok() {
            failed.push(StoreTag::Graph);
        }
        if !self.vector.is_ok() {
            failed.push(StoreTag::Vector);
        }
        if !self.relational.is_ok() {
            failed.push(StoreTag::Structured);
        }
        failed
    }
}

/// Persists a document's derived objects across the three stores. Each
/// store is written independently; a failure in one never blocks the
/// others, and failed stores can be retried in isolation.
pub struct WriteCoordinator {
    graph: Arc<dyn GraphStore>,
    vector: Arc<dyn VectorStore>,
    relational: Arc<dyn RelationalStore>,
}

impl WriteCoordinator {
    pub fn new(
        graph: Arc<dyn GraphStore>,
        vector: Arc<dyn VectorStore>,
        relational: Arc<dyn RelationalStore>,
    ) -> Self {
        Self {
            graph,
            vector,
            relational,
        }
    }

    /// Persist everything. The document moves to `Done` only when all
    /// three stores report ok, otherwise to `Failed` with the failed
    /// stores recorded.
    pub async fn persist(
        &self,
        document: &mut Document,
        metadata: &DocumentMetadata,
        graph: &DocumentGraph,
        embeddings: &[Embedding],
    ) -> Result<PersistResult, StatusError> {
        self.persist_stores(document, metadata, graph, embeddings, None)
            .await
    }

    /// Re-run persistence against only the stores a previous attempt
    /// marked failed, skipping the ones that already succeeded
    pub async fn persist_partial(
        &self,
        document: &mut Document,
        metadata: &DocumentMetadata,
        graph: &DocumentGraph,
        embeddings: &[Embedding],
        previous: &PersistResult,
    ) -> Result<PersistResult, StatusError> {
        self.persist_stores(document, metadata, graph, embeddings, Some(previous))
            .await
    }

    async fn persist_stores(
        &self,
        document: &mut Document,
        metadata: &DocumentMetadata,
        graph: &DocumentGraph,
        embeddings: &[Embedding],
        previous: Option<&PersistResult>,
    ) -> Result<PersistResult, StatusError> {
        document.advance(DocumentStatus::Processing)?;
        let doc_key = document.doc_id.clone();

        let run_graph = previous.is_none_or(|p| !p.graph.is_ok());
        let run_vector = previous.is_none_or(|p| !p.vector.is_ok());
        let run_relational = previous.is_none_or(|p| !p.relational.is_ok());

        let (graph_status, vector_status, relational_status) = tokio::join!(
            async {
                if run_graph {
                    self.write_graph(&doc_key, graph).await
                } else {
                    StoreStatus::Ok
                }
            },
            async {
                if run_vector {
                    self.write_vector(&doc_key, embeddings).await
                } else {
                    StoreStatus::Ok
                }
            },
            async {
                if run_relational {
                    self.write_relational(&doc_key, metadata).await
                } else {
                    StoreStatus::Ok
                }
            },
        );

        let result = PersistResult {
            graph: graph_status,
            vector: vector_status,
            relational: relational_status,
        };

        if result.all_ok() {
            document.advance(DocumentStatus::Done)?;
        } else {
            let failed = result
                .failed_stores()
                .iter()
                .map(|tag| tag.to_string())
                .collect();
            document.mark_failed("persist", failed)?;
        }

        Ok(result)
    }

    async fn write_graph(&self, doc_key: &str, graph: &DocumentGraph) -> StoreStatus {
        for entity in &graph.entities {
            if let Err(e) = self.graph.upsert_entity(doc_key, entity).await {
                return failed(StoreTag::Graph, doc_key, e);
            }
        }
        for triple in &graph.triples {
            if let Err(e) = self.graph.upsert_relationship(triple).await {
                return failed(StoreTag::Graph, doc_key, e);
            }
        }
        StoreStatus::Ok
    }

    async fn write_vector(&self, doc_key: &str, embeddings: &[Embedding]) -> StoreStatus {
        for embedding in embeddings {
            if let Err(e) = self.vector.upsert_embedding(doc_key, embedding).await {
                return failed(StoreTag::Vector, doc_key, e);
            }
        }
        StoreStatus::Ok
    }

    async fn write_relational(&self, doc_key: &str, metadata: &DocumentMetadata) -> StoreStatus {
        if let Err(e) = self.relational.upsert_metadata(doc_key, metadata).await {
            return failed(StoreTag::Structured, doc_key, e);
        }
        StoreStatus::Ok
    }
}

fn failed(store: StoreTag, doc_key: &str, error: StoreError) -> StoreStatus {
    warn!(%store, doc_key, %error, "store write failed");
    StoreStatus::Failed(error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{
        FieldFilter, GraphFilter, GraphMatch, SimilarityMatch, StructuredRow,
    };
    use async_trait::async_trait;
    use extract::{EntityType, ExtractedEntity, ExtractedRelationship, GraphBuilder};
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct FakeGraphStore {
        fail: AtomicBool,
        entity_upserts: StdMutex<HashMap<String, usize>>,
        relationship_upserts: StdMutex<HashMap<String, usize>>,
    }

    #[async_trait]
    impl GraphStore for FakeGraphStore {
        async fn upsert_entity(
            &self,
            _doc_key: &str,
            entity: &extract::Entity,
        ) -> Result<(), StoreError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("graph down".into()));
            }
            *self
                .entity_upserts
                .lock()
                .unwrap()
                .entry(entity.key.to_string())
                .or_insert(0) += 1;
            Ok(())
        }

        async fn upsert_relationship(&self, triple: &extract::Triple) -> Result<(), StoreError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("graph down".into()));
            }
            let key = format!("{}->{}:{}", triple.source, triple.target, triple.description);
            *self
                .relationship_upserts
                .lock()
                .unwrap()
                .entry(key)
                .or_insert(0) += 1;
            Ok(())
        }

        async fn query(&self, _filter: &GraphFilter) -> Result<Vec<GraphMatch>, StoreError> {
            Ok(Vec::new())
        }
    }

    #[derive(Default)]
    struct FakeVectorStore {
        fail: AtomicBool,
        upserts: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl VectorStore for FakeVectorStore {
        async fn upsert_embedding(
            &self,
            _doc_key: &str,
            embedding: &Embedding,
        ) -> Result<(), StoreError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("vector down".into()));
            }
            self.upserts.lock().unwrap().push(embedding.owner.key());
            Ok(())
        }

        async fn query_similar(
            &self,
            _vector: &[f32],
            _top_k: usize,
        ) -> Result<Vec<SimilarityMatch>, StoreError> {
            Ok(Vec::new())
        }
    }

    #[derive(Default)]
    struct FakeRelationalStore {
        fail: AtomicBool,
        rows: StdMutex<HashMap<String, DocumentMetadata>>,
    }

    #[async_trait]
    impl RelationalStore for FakeRelationalStore {
        async fn upsert_metadata(
            &self,
            doc_key: &str,
            metadata: &DocumentMetadata,
        ) -> Result<(), StoreError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("relational down".into()));
            }
            self.rows
                .lock()
                .unwrap()
                .insert(doc_key.to_string(), metadata.clone());
            Ok(())
        }

        async fn query(
            &self,
            _filters: &[FieldFilter],
            _limit: usize,
        ) -> Result<Vec<StructuredRow>, StoreError> {
            Ok(Vec::new())
        }

        async fn fetch_metadata(
            &self,
            _doc_keys: &[String],
        ) -> Result<HashMap<String, DocumentMetadata>, StoreError> {
            Ok(HashMap::new())
        }
    }

    struct Fixture {
        graph_store: Arc<FakeGraphStore>,
        vector_store: Arc<FakeVectorStore>,
        relational_store: Arc<FakeRelationalStore>,
        coordinator: WriteCoordinator,
    }

    fn fixture() -> Fixture {
        let graph_store = Arc::new(FakeGraphStore::default());
        let vector_store = Arc::new(FakeVectorStore::default());
        let relational_store = Arc::new(FakeRelationalStore::default());
        let coordinator = WriteCoordinator::new(
            graph_store.clone(),
            vector_store.clone(),
            relational_store.clone(),
        );
        Fixture {
            graph_store,
            vector_store,
            relational_store,
            coordinator,
        }
    }

    fn sample_document() -> Document {
        Document::new("doc-1".into(), "memo.txt".into(), "en".into())
    }

    /// "Martin Smith is the Chair of the Central Institution."
    fn sample_graph() -> DocumentGraph {
        let mut builder = GraphBuilder::new();
        builder.add_entities(
            "chunk-1",
            vec![
                ExtractedEntity {
                    name: "Martin Smith".into(),
                    entity_type: EntityType::Person,
                    description: "Chair of the Central Institution".into(),
                },
                ExtractedEntity {
                    name: "Central Institution".into(),
                    entity_type: EntityType::Organization,
                    description: "An institution".into(),
                },
            ],
        );
        builder.add_relationships(vec![ExtractedRelationship {
            source: "Martin Smith".into(),
            target: "Central Institution".into(),
            description: "is the Chair of".into(),
            strength: 9.0,
        }]);
        builder.finish()
    }

    fn sample_embedding() -> Embedding {
        Embedding {
            owner: extract::EmbeddingOwner::Chunk("chunk-1".into()),
            vector: vec![0.1; 8],
            sparse: None,
            model: "llama3".into(),
            model_version: "latest".into(),
            modality: extract::Modality::Text,
        }
    }

    #[tokio::test]
    async fn persist_marks_document_done_when_all_stores_succeed() {
        let f = fixture();
        let mut document = sample_document();

        let result = f
            .coordinator
            .persist(
                &mut document,
                &DocumentMetadata::default(),
                &sample_graph(),
                &[sample_embedding()],
            )
            .await
            .unwrap();

        assert!(result.all_ok());
        assert_eq!(document.status, DocumentStatus::Done);
        assert!(f.relational_store.rows.lock().unwrap().contains_key("doc-1"));
    }

    #[tokio::test]
    async fn double_persist_never_doubles_graph_counts() {
        let f = fixture();
        let graph = sample_graph();
        let embeddings = [sample_embedding()];

        // At-least-once redelivery rebuilds document state from scratch
        for _ in 0..2 {
            let mut document = sample_document();
            let result = f
                .coordinator
                .persist(&mut document, &DocumentMetadata::default(), &graph, &embeddings)
                .await
                .unwrap();
            assert!(result.all_ok());
        }

        let entities = f.graph_store.entity_upserts.lock().unwrap();
        assert_eq!(entities.len(), 2, "one entity per canonical key");
        assert!(entities.contains_key("MARTIN SMITH::PERSON"));
        assert!(entities.contains_key("CENTRAL INSTITUTION::ORGANIZATION"));

        let relationships = f.graph_store.relationship_upserts.lock().unwrap();
        assert_eq!(relationships.len(), 1, "one triple per identity");
    }

    #[tokio::test]
    async fn one_store_failure_does_not_block_the_others() {
        let f = fixture();
        f.graph_store.fail.store(true, Ordering::SeqCst);
        let mut document = sample_document();

        let result = f
            .coordinator
            .persist(
                &mut document,
                &DocumentMetadata::default(),
                &sample_graph(),
                &[sample_embedding()],
            )
            .await
            .unwrap();

        assert!(!result.graph.is_ok());
        assert!(result.vector.is_ok());
        assert!(result.relational.is_ok());
        assert_eq!(result.failed_stores(), vec![StoreTag::Graph]);

        assert_eq!(document.status, DocumentStatus::Failed);
        assert_eq!(document.failed_stage.as_deref(), Some("persist"));
        assert_eq!(document.failed_stores, vec!["graph".to_string()]);

        // Siblings still wrote
        assert_eq!(f.vector_store.upserts.lock().unwrap().len(), 1);
        assert!(f.relational_store.rows.lock().unwrap().contains_key("doc-1"));
    }

    #[tokio::test]
    async fn partial_retry_skips_already_successful_stores() {
        let f = fixture();
        f.graph_store.fail.store(true, Ordering::SeqCst);
        let mut document = sample_document();
        let graph = sample_graph();
        let embeddings = [sample_embedding()];

        let first = f
            .coordinator
            .persist(&mut document, &DocumentMetadata::default(), &graph, &embeddings)
            .await
            .unwrap();
        assert!(!first.all_ok());

        // Graph store recovers; retry only the failed store
        f.graph_store.fail.store(false, Ordering::SeqCst);
        let second = f
            .coordinator
            .persist_partial(
                &mut document,
                &DocumentMetadata::default(),
                &graph,
                &embeddings,
                &first,
            )
            .await
            .unwrap();

        assert!(second.all_ok());
        assert_eq!(document.status, DocumentStatus::Done);

        // Vector store saw exactly the one write from the first attempt
        assert_eq!(f.vector_store.upserts.lock().unwrap().len(), 1);
        assert_eq!(f.graph_store.entity_upserts.lock().unwrap().len(), 2);
    }
}
