use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

pub struct Metrics {
    documents_done: AtomicUsize,
    documents_failed: AtomicUsize,
    chunks_processed: AtomicUsize,
    entities_extracted: AtomicUsize,
    triples_built: AtomicUsize,
    embeddings_generated: AtomicUsize,
    searches_total: AtomicUsize,
    searches_partial: AtomicUsize,

    // Timing (in microseconds)
    total_extract_time_us: AtomicU64,
    total_persist_time_us: AtomicU64,
    total_search_time_us: AtomicU64,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            documents_done: AtomicUsize::new(0),
            documents_failed: AtomicUsize::new(0),
            chunks_processed: AtomicUsize::new(0),
            entities_extracted: AtomicUsize::new(0),
            triples_built: AtomicUsize::new(0),
            embeddings_generated: AtomicUsize::new(0),
            searches_total: AtomicUsize::new(0),
            searches_partial: AtomicUsize::new(0),
            total_extract_time_us: AtomicU64::new(0),
            total_persist_time_us: AtomicU64::new(0),
            total_search_time_us: AtomicU64::new(0),
        })
    }

    pub fn record_document(&self, success: bool) {
        if success {
            self.documents_done.fetch_add(1, Ordering::Relaxed);
        } else {
            self.documents_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_extract(
        &self,
        duration: std::time::Duration,
        chunks: usize,
        entities: usize,
        triples: usize,
    ) {
        self.total_extract_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        self.chunks_processed.fetch_add(chunks, Ordering::Relaxed);
        self.entities_extracted.fetch_add(entities, Ordering::Relaxed);
        self.triples_built.fetch_add(triples, Ordering::Relaxed);
    }

    pub fn record_embeddings(&self, count: usize) {
        self.embeddings_generated.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_persist(&self, duration: std::time::Duration) {
        self.total_persist_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn record_search(&self, duration: std::time::Duration, partial: bool) {
        self.total_search_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        self.searches_total.fetch_add(1, Ordering::Relaxed);
        if partial {
            self.searches_partial.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let documents_done = self.documents_done.load(Ordering::Relaxed);
        let documents_failed = self.documents_failed.load(Ordering::Relaxed);
        let searches_total = self.searches_total.load(Ordering::Relaxed);

        MetricsSnapshot {
            documents_done,
            documents_failed,
            chunks_processed: self.chunks_processed.load(Ordering::Relaxed),
            entities_extracted: self.entities_extracted.load(Ordering::Relaxed),
            triples_built: self.triples_built.load(Ordering::Relaxed),
            embeddings_generated: self.embeddings_generated.load(Ordering::Relaxed),
            searches_total,
            searches_partial: self.searches_partial.load(Ordering::Relaxed),
            avg_extract_time_ms: avg_ms(
                self.total_extract_time_us.load(Ordering::Relaxed),
                documents_done + documents_failed,
            ),
            avg_persist_time_ms: avg_ms(
                self.total_persist_time_us.load(Ordering::Relaxed),
                documents_done + documents_failed,
            ),
            avg_search_time_ms: avg_ms(
                self.total_search_time_us.load(Ordering::Relaxed),
                searches_total,
            ),
        }
    }
}

fn avg_ms(total_us: u64, count: usize) -> f64 {
    if count > 0 {
        total_us as f64 / count as f64 / 1000.0
    } else {
        0.0
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub documents_done: usize,
    pub documents_failed: usize,
    pub chunks_processed: usize,
    pub entities_extracted: usize,
    pub triples_built: usize,
    pub embeddings_generated: usize,
    pub searches_total: usize,
    pub searches_partial: usize,
    pub avg_extract_time_ms: f64,
    pub avg_persist_time_ms: f64,
    pub avg_search_time_ms: f64,
}
