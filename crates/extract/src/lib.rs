pub mod builder;
pub mod client;
pub mod error;
pub mod prompt;
pub mod schema;

pub use builder::GraphBuilder;
pub use client::{
    ClientConfig, Embedder, EmbeddingPayload, ExtractionClient, HttpModelTransport,
    ModelTransport, RetryPolicy,
};
pub use error::{BuildError, ExtractionError};
pub use schema::{
    CanonicalKey, DocumentGraph, Embedding, EmbeddingOwner, Entity, EntityType,
    ExtractedEntity, ExtractedRelationship, Modality, SparseComponent, Triple,
};

use std::sync::Arc;

/// Ties the client and builder together for one document's chunks
pub struct Extractor {
    client: Arc<ExtractionClient>,
}

impl Extractor {
    pub fn new(client: Arc<ExtractionClient>) -> Self {
        Self { client }
    }

    /// Extract one chunk and feed the results into the builder
    pub async fn extract_chunk(
        &self,
        builder: &mut GraphBuilder,
        chunk_id: &str,
        text: &str,
    ) -> Result<(), ExtractionError> {
        let (entities, relationships) = self.client.extract_entities_relationships(text).await?;
        builder.add_entities(chunk_id, entities);
        builder.add_relationships(relationships);
        Ok(())
    }

    pub fn client(&self) -> &ExtractionClient {
        &self.client
    }
}
