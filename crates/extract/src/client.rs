use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep};
use tracing::{debug, warn};

use crate::error::ExtractionError;
use crate::prompt;
use crate::schema::{
    Embedding, EmbeddingOwner, EntityType, ExtractedEntity, ExtractedRelationship,
    MAX_STRENGTH, MIN_STRENGTH, Modality, SparseComponent,
};

/// Wire-level access to the model service. One logical request per call;
/// retry, pacing and validation all live above this seam.
#[async_trait]
pub trait ModelTransport: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, ExtractionError>;

    async fn embed(
        &self,
        text: &str,
        dimension: usize,
    ) -> Result<EmbeddingPayload, ExtractionError>;
}

/// Raw embedding output of the model service
#[derive(Debug, Clone)]
pub struct EmbeddingPayload {
    pub dense: Vec<f32>,
    pub sparse: Option<Vec<SparseComponent>>,
}

/// Embeds free text for query-time similarity search
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, ExtractionError>;
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// First call plus retries; 4 means 3 retries
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_secs(1),
        }
    }
}

/// Verdict for one failed attempt
enum Verdict {
    Retry { delay: Duration },
    Permanent,
}

impl RetryPolicy {
    /// Exponential backoff: base, 2x, 4x, ... per attempt
    fn classify(&self, attempt: u32, error: &ExtractionError, retry_invalid: bool) -> Verdict {
        if attempt >= self.max_attempts {
            return Verdict::Permanent;
        }
        let retryable = match error {
            ExtractionError::RateLimited | ExtractionError::UpstreamUnavailable(_) => true,
            ExtractionError::InvalidResponse(_) => retry_invalid,
            ExtractionError::EmptyInput => false,
        };
        if !retryable {
            return Verdict::Permanent;
        }
        Verdict::Retry {
            delay: self.base_delay * 2u32.pow(attempt - 1),
        }
    }
}

#[derive(Debug, Default)]
struct RateState {
    last_call: Option<Instant>,
    consecutive_failures: u32,
}

/// Per-client rate bookkeeping. The state sits behind a mutex so a single
/// client instance can be shared across workers.
struct RateLimiter {
    min_gap: Duration,
    state: Mutex<RateState>,
}

impl RateLimiter {
    fn new(min_gap: Duration) -> Self {
        Self {
            min_gap,
            state: Mutex::new(RateState::default()),
        }
    }

    /// Wait out the minimum gap since the previous call, then stamp this one
    async fn pace(&self) {
        if !self.min_gap.is_zero() {
            let wait = {
                let state = self.state.lock().await;
                state
                    .last_call
                    .map(|last| (last + self.min_gap).saturating_duration_since(Instant::now()))
                    .unwrap_or_default()
            };
            if !wait.is_zero() {
                sleep(wait).await;
            }
        }
        self.state.lock().await.last_call = Some(Instant::now());
    }

    async fn record(&self, success: bool) {
        let mut state = self.state.lock().await;
        if success {
            state.consecutive_failures = 0;
        } else {
            state.consecutive_failures += 1;
        }
    }

    async fn consecutive_failures(&self) -> u32 {
        self.state.lock().await.consecutive_failures
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub embedding_dimension: usize,
    pub embedding_model: String,
    pub embedding_model_version: String,
    pub min_call_gap: Duration,
    pub retry: RetryPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            embedding_dimension: 1024,
            embedding_model: "llama3".to_string(),
            embedding_model_version: "latest".to_string(),
            min_call_gap: Duration::from_millis(100),
            retry: RetryPolicy::default(),
        }
    }
}

/// Client for the external model service: turns text into entity and
/// relationship records and into embeddings, with retry and validation.
pub struct ExtractionClient {
    transport: Box<dyn ModelTransport>,
    config: ClientConfig,
    limiter: RateLimiter,
}

impl ExtractionClient {
    pub fn new(transport: Box<dyn ModelTransport>, config: ClientConfig) -> Self {
        let limiter = RateLimiter::new(config.min_call_gap);
        Self {
            transport,
            config,
            limiter,
        }
    }

    /// Run the two-call extraction protocol: one request for entities, one
    /// for relationships. Malformed records are dropped, not fatal.
    pub async fn extract_entities_relationships(
        &self,
        text: &str,
    ) -> Result<(Vec<ExtractedEntity>, Vec<ExtractedRelationship>), ExtractionError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ExtractionError::EmptyInput);
        }

        let entity_records = self.generate_records(&prompt::entity_prompt(text)).await?;
        let entities = parse_entities(&entity_records);

        let relationship_records = self
            .generate_records(&prompt::relationship_prompt(text))
            .await?;
        let relationships = parse_relationships(&relationship_records);

        debug!(
            entities = entities.len(),
            relationships = relationships.len(),
            "extraction call complete"
        );
        Ok((entities, relationships))
    }

    /// Embed text for the given owner. The returned dense vector must match
    /// the configured model dimension.
    pub async fn embed(
        &self,
        text: &str,
        owner: EmbeddingOwner,
        modality: Modality,
    ) -> Result<Embedding, ExtractionError> {
        let payload = self.embed_dense(text).await?;
        Ok(Embedding {
            owner,
            vector: payload.dense,
            sparse: payload.sparse,
            model: self.config.embedding_model.clone(),
            model_version: self.config.embedding_model_version.clone(),
            modality,
        })
    }

    /// Embed many texts; a failed item yields `None` without stopping the batch
    pub async fn embed_batch(
        &self,
        items: Vec<(String, EmbeddingOwner, Modality)>,
    ) -> Vec<Option<Embedding>> {
        let mut results = Vec::with_capacity(items.len());
        for (text, owner, modality) in items {
            match self.embed(&text, owner, modality).await {
                Ok(embedding) => results.push(Some(embedding)),
                Err(e) => {
                    warn!(error = %e, "embedding failed, leaving empty slot");
                    results.push(None);
                }
            }
        }
        results
    }

    /// Consecutive failed calls since the last success
    pub async fn consecutive_failures(&self) -> u32 {
        self.limiter.consecutive_failures().await
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Issue a generation request and parse the JSON array it must return.
    /// Parse failures are terminal here: they indicate a contract problem
    /// with the model, not a transient fault.
    async fn generate_records(
        &self,
        prompt: &str,
    ) -> Result<Vec<serde_json::Value>, ExtractionError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.limiter.pace().await;

            let result = self.transport.generate(prompt).await.and_then(|raw| {
                serde_json::from_str::<Vec<serde_json::Value>>(&raw).map_err(|e| {
                    ExtractionError::InvalidResponse(format!("expected JSON array: {e}"))
                })
            });

            match result {
                Ok(records) => {
                    self.limiter.record(true).await;
                    return Ok(records);
                }
                Err(error) => {
                    self.limiter.record(false).await;
                    match self.config.retry.classify(attempt, &error, false) {
                        Verdict::Retry { delay } => {
                            warn!(
                                attempt,
                                delay_ms = delay.as_millis() as u64,
                                error = %error,
                                "extraction call failed, retrying"
                            );
                            sleep(delay).await;
                        }
                        Verdict::Permanent => return Err(error),
                    }
                }
            }
        }
    }

    /// Embedding request with dimension validation. A dimension mismatch is
    /// `InvalidResponse` and retried here: it may be a transient upstream
    /// schema glitch.
    async fn embed_dense(&self, text: &str) -> Result<EmbeddingPayload, ExtractionError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ExtractionError::EmptyInput);
        }

        let dimension = self.config.embedding_dimension;
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.limiter.pace().await;

            let result = self
                .transport
                .embed(text, dimension)
                .await
                .and_then(|payload| {
                    if payload.dense.len() != dimension {
                        Err(ExtractionError::InvalidResponse(format!(
                            "embedding dimension {} does not match configured {}",
                            payload.dense.len(),
                            dimension
                        )))
                    } else {
                        Ok(payload)
                    }
                });

            match result {
                Ok(payload) => {
                    self.limiter.record(true).await;
                    return Ok(payload);
                }
                Err(error) => {
                    self.limiter.record(false).await;
                    match self.config.retry.classify(attempt, &error, true) {
                        Verdict::Retry { delay } => {
                            warn!(
                                attempt,
                                delay_ms = delay.as_millis() as u64,
                                error = %error,
                                "embedding call failed, retrying"
                            );
                            sleep(delay).await;
                        }
                        Verdict::Permanent => return Err(error),
                    }
                }
            }
        }
    }
}

#[async_trait]
impl Embedder for ExtractionClient {
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, ExtractionError> {
        self.embed_dense(text).await.map(|payload| payload.dense)
    }
}

#[derive(Deserialize)]
struct RawEntity {
    name: String,
    #[serde(rename = "type")]
    entity_type: String,
    #[serde(default)]
    description: String,
}

#[derive(Deserialize)]
struct RawRelationship {
    source: String,
    target: String,
    #[serde(rename = "relationship")]
    description: String,
    relationship_strength: f64,
}

fn parse_entities(records: &[serde_json::Value]) -> Vec<ExtractedEntity> {
    let mut entities = Vec::new();
    for record in records {
        let raw: RawEntity = match serde_json::from_value(record.clone()) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "dropping malformed entity record");
                continue;
            }
        };
        if raw.name.trim().is_empty() {
            warn!("dropping entity record with blank name");
            continue;
        }
        let entity_type = match EntityType::from_str(&raw.entity_type) {
            Ok(t) => t,
            Err(e) => {
                warn!(name = %raw.name, error = %e, "dropping entity record");
                continue;
            }
        };
        entities.push(ExtractedEntity {
            name: raw.name,
            entity_type,
            description: raw.description,
        });
    }
    entities
}

fn parse_relationships(records: &[serde_json::Value]) -> Vec<ExtractedRelationship> {
    let mut relationships = Vec::new();
    for record in records {
        let raw: RawRelationship = match serde_json::from_value(record.clone()) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "dropping malformed relationship record");
                continue;
            }
        };
        if raw.source.trim().is_empty() || raw.target.trim().is_empty() {
            warn!("dropping relationship record with blank endpoint");
            continue;
        }
        if !raw.relationship_strength.is_finite()
            || !(MIN_STRENGTH..=MAX_STRENGTH).contains(&raw.relationship_strength)
        {
            warn!(
                source = %raw.source,
                target = %raw.target,
                strength = raw.relationship_strength,
                "dropping relationship record with out-of-range strength"
            );
            continue;
        }
        relationships.push(ExtractedRelationship {
            source: raw.source,
            target: raw.target,
            description: raw.description,
            strength: raw.relationship_strength,
        });
    }
    relationships
}

/// HTTP transport speaking the model service's JSON protocol. The two
/// endpoints carry the extraction-mode flag implicitly: `/api/generate`
/// for entity/relationship extraction, `/api/embeddings` for vectors.
pub struct HttpModelTransport {
    base_url: String,
    model: String,
    embedding_model: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct GenerateRequest {
    model: String,
    prompt: String,
    stream: bool,
    format: String, // "json" for structured output
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Serialize)]
struct EmbeddingRequest {
    model: String,
    prompt: String,
    dimension: usize,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
    #[serde(default)]
    sparse: Option<Vec<SparseComponent>>,
}

impl HttpModelTransport {
    pub fn new(
        base_url: String,
        model: String,
        embedding_model: String,
        timeout: Duration,
    ) -> Result<Self, ExtractionError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ExtractionError::UpstreamUnavailable(e.to_string()))?;
        Ok(Self {
            base_url,
            model,
            embedding_model,
            client,
        })
    }

    fn map_status(status: reqwest::StatusCode) -> ExtractionError {
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            ExtractionError::RateLimited
        } else {
            ExtractionError::UpstreamUnavailable(format!("status {status}"))
        }
    }

    // Timeouts and connection failures are indistinguishable to the caller
    fn map_send_error(e: reqwest::Error) -> ExtractionError {
        ExtractionError::UpstreamUnavailable(e.to_string())
    }
}

#[async_trait]
impl ModelTransport for HttpModelTransport {
    async fn generate(&self, prompt: &str) -> Result<String, ExtractionError> {
        let url = format!("{}/api/generate", self.base_url);
        let request = GenerateRequest {
            model: self.model.clone(),
            prompt: prompt.to_string(),
            stream: false,
            format: "json".to_string(),
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(Self::map_send_error)?;

        if !response.status().is_success() {
            return Err(Self::map_status(response.status()));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ExtractionError::InvalidResponse(e.to_string()))?;
        Ok(parsed.response)
    }

    async fn embed(
        &self,
        text: &str,
        dimension: usize,
    ) -> Result<EmbeddingPayload, ExtractionError> {
        let url = format!("{}/api/embeddings", self.base_url);
        let request = EmbeddingRequest {
            model: self.embedding_model.clone(),
            prompt: text.to_string(),
            dimension,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(Self::map_send_error)?;

        if !response.status().is_success() {
            return Err(Self::map_status(response.status()));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| ExtractionError::InvalidResponse(e.to_string()))?;
        Ok(EmbeddingPayload {
            dense: parsed.embedding,
            sparse: parsed.sparse,
        })
    }
}
