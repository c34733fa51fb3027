mod cache;
mod config;
mod jobs;
mod metrics;
mod pipeline;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::trace::TraceLayer;

use extract::{ClientConfig, ExtractionClient, Extractor, HttpModelTransport, RetryPolicy};
use index::{
    DocumentMetadata, MySqlRelationalStore, Neo4jGraphStore, QdrantVectorStore, WriteCoordinator,
};
use ingest::DocumentStatus;
use query::{QueryDescriptor, QueryError, SearchEngine, SearchResponse};

use crate::cache::EmbeddingCache;
use crate::config::AppConfig;
use crate::jobs::{JobQueue, JobStatus};
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::pipeline::{DocEntry, Pipeline};

#[derive(Clone)]
struct AppState {
    graph_store: Arc<Neo4jGraphStore>,
    vector_store: Arc<QdrantVectorStore>,
    relational_store: Arc<MySqlRelationalStore>,
    engine: Arc<SearchEngine>,
    pipeline: Arc<Pipeline>,
    jobs: Arc<JobQueue>,
    metrics: Arc<Metrics>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = AppConfig::from_env();

    // Connect the three stores
    let graph_store = Arc::new(
        Neo4jGraphStore::connect(
            &config.stores.neo4j_uri,
            &config.stores.neo4j_user,
            &config.stores.neo4j_password,
        )
        .await
        .expect("Failed to connect to Neo4j"),
    );
    graph_store
        .init_schema()
        .await
        .expect("Failed to initialize Neo4j schema");

    let vector_store = Arc::new(QdrantVectorStore::new(
        config.stores.qdrant_url.clone(),
        config.stores.qdrant_collection.clone(),
        config.model.embedding_dimension,
    ));
    vector_store
        .init_collection()
        .await
        .expect("Failed to initialize Qdrant collection");

    let relational_store = Arc::new(
        MySqlRelationalStore::connect(&config.stores.mysql_url)
            .await
            .expect("Failed to connect to MySQL"),
    );
    relational_store
        .init_schema()
        .await
        .expect("Failed to initialize MySQL schema");

    // Model-service client shared by the pipeline and the search engine
    let transport = HttpModelTransport::new(
        config.model.base_url.clone(),
        config.model.model.clone(),
        config.model.embedding_model.clone(),
        Duration::from_secs(config.model.request_timeout_secs),
    )
    .expect("Failed to build model transport");

    let client = Arc::new(ExtractionClient::new(
        Box::new(transport),
        ClientConfig {
            embedding_dimension: config.model.embedding_dimension,
            embedding_model: config.model.embedding_model.clone(),
            embedding_model_version: config.model.embedding_model_version.clone(),
            min_call_gap: Duration::from_millis(config.model.min_call_gap_ms),
            retry: RetryPolicy::default(),
        },
    ));

    let coordinator = WriteCoordinator::new(
        graph_store.clone(),
        vector_store.clone(),
        relational_store.clone(),
    );
    let engine = Arc::new(SearchEngine::new(
        client.clone(),
        vector_store.clone(),
        graph_store.clone(),
        relational_store.clone(),
    ));

    let metrics = Metrics::new();
    let pipeline = Arc::new(Pipeline {
        extractor: Extractor::new(client),
        coordinator,
        relational: relational_store.clone(),
        cache: EmbeddingCache::new(config.cache_max_entries),
        metrics: metrics.clone(),
        documents: Arc::new(DashMap::new()),
    });
    let jobs = JobQueue::start(pipeline.clone(), config.workers, config.queue_capacity);

    let state = AppState {
        graph_store,
        vector_store,
        relational_store,
        engine,
        pipeline,
        jobs,
        metrics,
    };

    let app = Router::new()
        .route("/health", get(health))
        .route("/documents", post(ingest_document))
        .route("/documents/:doc_id", get(document_status))
        .route("/documents/:doc_id/retry", post(retry_document))
        .route("/jobs/:job_id", get(job_status))
        .route("/search", post(search))
        .route("/stats", get(stats))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind");

    tracing::info!(addr = %config.bind_addr, "server listening");
    axum::serve(listener, app).await.expect("Server failed");
}

#[derive(Serialize)]
struct HealthResponse {
    graph: String,
    vector: String,
    relational: String,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let (graph, vector, relational) = tokio::join!(
        state.graph_store.ping(),
        state.vector_store.ping(),
        state.relational_store.ping(),
    );

    Json(HealthResponse {
        graph: status_text(graph),
        vector: status_text(vector),
        relational: status_text(relational),
    })
}

fn status_text(result: Result<(), index::StoreError>) -> String {
    match result {
        Ok(()) => "ok".to_string(),
        Err(e) => format!("error: {e}"),
    }
}

#[derive(Deserialize)]
struct IngestRequest {
    source: String,
    text: String,
    language: Option<String>,
    title: Option<String>,
    authors: Option<Vec<String>>,
    summary: Option<String>,
    categories: Option<Vec<String>>,
}

#[derive(Serialize)]
struct IngestResponse {
    doc_id: String,
    job_id: String,
    chunks_created: usize,
}

async fn ingest_document(
    State(state): State<AppState>,
    Json(req): Json<IngestRequest>,
) -> Result<Json<IngestResponse>, StatusCode> {
    if req.text.trim().is_empty() || req.source.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let language = req.language.unwrap_or_else(|| "en".to_string());
    let (document, chunks) = ingest::ingest_text(&req.source, &language, &req.text);
    let doc_id = document.doc_id.clone();

    let metadata = DocumentMetadata {
        title: req.title.unwrap_or_else(|| req.source.clone()),
        authors: req.authors.unwrap_or_default(),
        summary: req.summary.unwrap_or_default(),
        categories: req.categories.unwrap_or_default(),
        language,
        status: "pending".to_string(),
        created_at: None,
        updated_at: None,
    };

    let chunks_created = chunks.len();
    state.pipeline.documents.insert(
        doc_id.clone(),
        DocEntry {
            document,
            chunks,
            metadata,
            graph: None,
            embeddings: Vec::new(),
            last_result: None,
        },
    );

    let job_id = state
        .jobs
        .enqueue(doc_id.clone())
        .await
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;

    Ok(Json(IngestResponse {
        doc_id,
        job_id,
        chunks_created,
    }))
}

#[derive(Serialize)]
struct DocumentStatusResponse {
    doc_id: String,
    status: DocumentStatus,
    chunks: usize,
    failed_stage: Option<String>,
    failed_stores: Vec<String>,
}

async fn document_status(
    State(state): State<AppState>,
    Path(doc_id): Path<String>,
) -> Result<Json<DocumentStatusResponse>, StatusCode> {
    let entry = state
        .pipeline
        .documents
        .get(&doc_id)
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(DocumentStatusResponse {
        doc_id: entry.document.doc_id.clone(),
        status: entry.document.status,
        chunks: entry.document.chunk_ids.len(),
        failed_stage: entry.document.failed_stage.clone(),
        failed_stores: entry.document.failed_stores.clone(),
    }))
}

#[derive(Serialize)]
struct RetryResponse {
    doc_id: String,
    job_id: String,
}

/// Re-enqueue a failed document; persistence retries only the stores
/// recorded as failed
async fn retry_document(
    State(state): State<AppState>,
    Path(doc_id): Path<String>,
) -> Result<Json<RetryResponse>, StatusCode> {
    let status = state
        .pipeline
        .documents
        .get(&doc_id)
        .map(|entry| entry.document.status)
        .ok_or(StatusCode::NOT_FOUND)?;

    if status != DocumentStatus::Failed {
        return Err(StatusCode::CONFLICT);
    }

    let job_id = state
        .jobs
        .enqueue(doc_id.clone())
        .await
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;

    Ok(Json(RetryResponse { doc_id, job_id }))
}

async fn job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobStatus>, StatusCode> {
    state
        .jobs
        .status(&job_id)
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn search(
    State(state): State<AppState>,
    Json(descriptor): Json<QueryDescriptor>,
) -> Result<Json<SearchResponse>, StatusCode> {
    let started = Instant::now();
    match state.engine.search(&descriptor).await {
        Ok(response) => {
            state.metrics.record_search(started.elapsed(), response.partial);
            Ok(Json(response))
        }
        Err(QueryError::EmptyDescriptor) => Err(StatusCode::BAD_REQUEST),
    }
}

#[derive(Serialize)]
struct StatsResponse {
    #[serde(flatten)]
    metrics: MetricsSnapshot,
    cached_embeddings: usize,
}

async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        metrics: state.metrics.snapshot(),
        cached_embeddings: state.pipeline.cache.len(),
    })
}
