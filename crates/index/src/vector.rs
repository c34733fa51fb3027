use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

use extract::{Embedding, Modality};

use crate::store::{SimilarityMatch, StoreError, VectorStore};

/// Qdrant-backed vector store, spoken to over its REST API
pub struct QdrantVectorStore {
    base_url: String,
    collection_name: String,
    dimension: usize,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct CreateCollection {
    vectors: VectorParams,
}

#[derive(Serialize)]
struct VectorParams {
    size: usize,
    distance: String,
}

#[derive(Serialize)]
struct UpsertPoints {
    points: Vec<Point>,
}

#[derive(Serialize)]
struct Point {
    id: u64,
    vector: Vec<f32>,
    payload: HashMap<String, serde_json::Value>,
}

#[derive(Deserialize)]
struct CollectionInfo {
    result: CollectionResult,
}

#[derive(Deserialize)]
struct CollectionResult {
    collections: Vec<Collection>,
}

#[derive(Deserialize)]
struct Collection {
    name: String,
}

impl QdrantVectorStore {
    pub fn new(base_url: String, collection_name: String, dimension: usize) -> Self {
        Self {
            base_url,
            collection_name,
            dimension,
            client: reqwest::Client::new(),
        }
    }

    /// Create the collection if it does not exist yet
    pub async fn init_collection(&self) -> Result<(), StoreError> {
        let url = format!("{}/collections", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(StoreError::Query(format!(
                "failed to list collections: {}",
                response.status()
            )));
        }

        let info: CollectionInfo = response
            .json()
            .await
            .map_err(|e| StoreError::Malformed(e.to_string()))?;
        let exists = info
            .result
            .collections
            .iter()
            .any(|c| c.name == self.collection_name);
        if exists {
            return Ok(());
        }

        let url = format!("{}/collections/{}", self.base_url, self.collection_name);
        let create_req = CreateCollection {
            vectors: VectorParams {
                size: self.dimension,
                distance: "Cosine".to_string(),
            },
        };

        let response = self
            .client
            .put(&url)
            .json(&create_req)
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(StoreError::Query(format!(
                "failed to create collection: {error_text}"
            )));
        }

        Ok(())
    }

    /// Cheap connectivity check for health reporting
    pub async fn ping(&self) -> Result<(), StoreError> {
        let url = format!("{}/collections", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(StoreError::Unavailable(format!(
                "status {}",
                response.status()
            )));
        }
        Ok(())
    }

    /// Point IDs are derived from the owner key so re-writes overwrite
    fn hash_to_u64(s: &str) -> u64 {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        s.hash(&mut hasher);
        hasher.finish()
    }
}

#[async_trait]
impl VectorStore for QdrantVectorStore {
    async fn upsert_embedding(
        &self,
        doc_key: &str,
        embedding: &Embedding,
    ) -> Result<(), StoreError> {
        let owner_key = embedding.owner.key();

        let mut payload = HashMap::new();
        payload.insert("doc_key".to_string(), serde_json::json!(doc_key));
        payload.insert("owner_key".to_string(), serde_json::json!(owner_key));
        payload.insert(
            "modality".to_string(),
            serde_json::json!(embedding.modality.to_string()),
        );
        payload.insert("model".to_string(), serde_json::json!(embedding.model));
        payload.insert(
            "model_version".to_string(),
            serde_json::json!(embedding.model_version),
        );

        let point = Point {
            id: Self::hash_to_u64(&owner_key),
            vector: embedding.vector.clone(),
            payload,
        };

        let url = format!(
            "{}/collections/{}/points",
            self.base_url, self.collection_name
        );
        let upsert_req = UpsertPoints {
            points: vec![point],
        };

        let response = self
            .client
            .put(&url)
            .json(&upsert_req)
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(StoreError::Query(format!(
                "failed to upsert point: {error_text}"
            )));
        }

        Ok(())
    }

    async fn query_similar(
        &self,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<SimilarityMatch>, StoreError> {
        let url = format!(
            "{}/collections/{}/points/search",
            self.base_url, self.collection_name
        );
        let body = serde_json::json!({
            "vector": vector,
            "limit": top_k,
            "with_payload": true,
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(StoreError::Query(format!("search failed: {error_text}")));
        }

        let result: serde_json::Value = response
            .json()
            .await
            .map_err(|e| StoreError::Malformed(e.to_string()))?;

        let points = result["result"]
            .as_array()
            .ok_or_else(|| StoreError::Malformed("missing result array".to_string()))?;

        let mut matches = Vec::new();
        for point in points {
            let score = point["score"].as_f64().unwrap_or(0.0) as f32;
            let payload = match point["payload"].as_object() {
                Some(p) => p,
                None => continue,
            };

            let doc_key = payload
                .get("doc_key")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            if doc_key.is_empty() {
                continue;
            }

            let owner_key = payload
                .get("owner_key")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            let modality = payload
                .get("modality")
                .and_then(|v| v.as_str())
                .and_then(|s| Modality::from_str(s).ok());

            matches.push(SimilarityMatch {
                doc_key,
                owner_key,
                score,
                modality,
            });
        }

        Ok(matches)
    }
}
