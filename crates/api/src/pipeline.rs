use anyhow::anyhow;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use extract::{DocumentGraph, Embedding, EmbeddingOwner, Extractor, GraphBuilder, Modality};
use index::{
    DocumentMetadata, PersistResult, RelationalStore, WriteCoordinator,
};
use ingest::{Chunk, Document, DocumentStatus};

use crate::cache::EmbeddingCache;
use crate::metrics::Metrics;

/// Everything the service tracks for one document: the document record,
/// its chunks, and the derived objects kept around so a failed persist can
/// be retried against only the failed stores.
#[derive(Clone)]
pub struct DocEntry {
    pub document: Document,
    pub chunks: Vec<Chunk>,
    pub metadata: DocumentMetadata,
    pub graph: Option<DocumentGraph>,
    pub embeddings: Vec<Embedding>,
    pub last_result: Option<PersistResult>,
}

/// Runs Extract -> Build -> Persist for one document. Strictly sequential
/// within a document; documents are independent of each other.
pub struct Pipeline {
    pub extractor: Extractor,
    pub coordinator: WriteCoordinator,
    pub relational: Arc<dyn RelationalStore>,
    pub cache: EmbeddingCache,
    pub metrics: Arc<Metrics>,
    pub documents: Arc<DashMap<String, DocEntry>>,
}

impl Pipeline {
    pub async fn process_document(&self, doc_id: &str) -> anyhow::Result<()> {
        // Work on a snapshot; holding a map guard across awaits would
        // block every other worker touching the registry
        let mut entry = self
            .documents
            .get(doc_id)
            .map(|e| e.clone())
            .ok_or_else(|| anyhow!("unknown document: {doc_id}"))?;

        // Task delivery is at-least-once; a completed document re-delivered
        // by the queue is a no-op
        if entry.document.status == DocumentStatus::Done {
            return Ok(());
        }

        // A failed persist with derived objects on hand only needs the
        // failed stores re-run, not a fresh extraction
        if entry.document.status == DocumentStatus::Failed {
            if let (Some(graph), Some(previous)) =
                (entry.graph.clone(), entry.last_result.clone())
            {
                return self.retry_persist(doc_id, entry, graph, previous).await;
            }
        }

        entry.document.advance(DocumentStatus::Processing)?;
        self.store(doc_id, &entry);

        // Extract
        let started = Instant::now();
        let mut builder = GraphBuilder::new();
        for chunk in &entry.chunks {
            if let Err(e) = self
                .extractor
                .extract_chunk(&mut builder, &chunk.chunk_id, &chunk.text)
                .await
            {
                entry.document.mark_failed("extract", Vec::new())?;
                self.store(doc_id, &entry);
                self.metrics.record_document(false);
                return Err(anyhow::Error::new(e).context("knowledge extraction failed"));
            }
        }
        let graph = builder.finish();
        self.metrics.record_extract(
            started.elapsed(),
            entry.chunks.len(),
            graph.entities.len(),
            graph.triples.len(),
        );
        info!(
            doc_id,
            entities = graph.entities.len(),
            triples = graph.triples.len(),
            "extraction complete"
        );

        // Embed chunk by chunk plus one document-level vector. A failed
        // item is skipped; the batch continues.
        let mut embeddings = Vec::new();
        for chunk in &entry.chunks {
            match self
                .embed_cached(&chunk.text, EmbeddingOwner::Chunk(chunk.chunk_id.clone()))
                .await
            {
                Ok(embedding) => embeddings.push(embedding),
                Err(e) => {
                    warn!(chunk_id = %chunk.chunk_id, error = %e, "chunk embedding failed, skipping")
                }
            }
        }
        let full_text = entry
            .chunks
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        if !full_text.trim().is_empty() {
            match self
                .embed_cached(&full_text, EmbeddingOwner::Document(doc_id.to_string()))
                .await
            {
                Ok(embedding) => embeddings.push(embedding),
                Err(e) => warn!(doc_id, error = %e, "document embedding failed, skipping"),
            }
        }
        self.metrics.record_embeddings(embeddings.len());

        // Persist across the three stores
        let started = Instant::now();
        entry.metadata.status = "processing".to_string();
        let result = self
            .coordinator
            .persist(&mut entry.document, &entry.metadata, &graph, &embeddings)
            .await?;
        self.metrics.record_persist(started.elapsed());

        entry.graph = Some(graph);
        entry.embeddings = embeddings;
        entry.last_result = Some(result.clone());
        self.finish(doc_id, entry, result).await
    }

    async fn retry_persist(
        &self,
        doc_id: &str,
        mut entry: DocEntry,
        graph: DocumentGraph,
        previous: PersistResult,
    ) -> anyhow::Result<()> {
        info!(
            doc_id,
            stores = ?previous.failed_stores(),
            "retrying persistence against failed stores"
        );

        let started = Instant::now();
        let embeddings = entry.embeddings.clone();
        let result = self
            .coordinator
            .persist_partial(
                &mut entry.document,
                &entry.metadata,
                &graph,
                &embeddings,
                &previous,
            )
            .await?;
        self.metrics.record_persist(started.elapsed());

        entry.last_result = Some(result.clone());
        self.finish(doc_id, entry, result).await
    }

    /// Record the outcome, mirror the terminal status into the relational
    /// row, and turn a partial failure into a job error
    async fn finish(
        &self,
        doc_id: &str,
        mut entry: DocEntry,
        result: PersistResult,
    ) -> anyhow::Result<()> {
        entry.metadata.status = match entry.document.status {
            DocumentStatus::Done => "done".to_string(),
            _ => "failed".to_string(),
        };

        if result.all_ok() {
            if let Err(e) = self
                .relational
                .upsert_metadata(doc_id, &entry.metadata)
                .await
            {
                warn!(doc_id, error = %e, "failed to record terminal status");
            }
        }

        self.store(doc_id, &entry);
        self.metrics.record_document(result.all_ok());

        if result.all_ok() {
            info!(doc_id, "document persisted");
            Ok(())
        } else {
            Err(anyhow!(
                "persistence failed for stores: {:?}",
                result.failed_stores()
            ))
        }
    }

    async fn embed_cached(
        &self,
        text: &str,
        owner: EmbeddingOwner,
    ) -> Result<Embedding, extract::ExtractionError> {
        let client = self.extractor.client();
        if let Some(vector) = self.cache.get(text) {
            let config = client.config();
            return Ok(Embedding {
                owner,
                vector,
                sparse: None,
                model: config.embedding_model.clone(),
                model_version: config.embedding_model_version.clone(),
                modality: Modality::Text,
            });
        }

        let embedding = client.embed(text, owner, Modality::Text).await?;
        self.cache.set(text, embedding.vector.clone());
        Ok(embedding)
    }

    fn store(&self, doc_id: &str, entry: &DocEntry) {
        self.documents.insert(doc_id.to_string(), entry.clone());
    }
}
