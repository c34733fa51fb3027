pub mod chunk;
pub mod chunker;
pub mod document;
pub mod reader;

pub use chunk::Chunk;
pub use chunker::{Chunker, ChunkerConfig};
pub use document::{Document, DocumentStatus, StatusError};
pub use reader::{FileReader, IntakeError};

use sha2::{Digest, Sha256};
use std::path::Path;

/// Generate a stable document ID from its source path or URI
pub fn generate_doc_id(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..16])
}

/// Register a document from already-loaded text and split it into chunks
pub fn ingest_text(source: &str, language: &str, text: &str) -> (Document, Vec<Chunk>) {
    let doc_id = generate_doc_id(source);
    let mut document = Document::new(doc_id.clone(), source.to_string(), language.to_string());

    let chunker = Chunker::new(ChunkerConfig::default());
    let chunks = chunker.chunk_text(&doc_id, text, language);

    document.chunk_ids = chunks.iter().map(|c| c.chunk_id.clone()).collect();
    (document, chunks)
}

/// Read a file from disk and ingest it
pub async fn ingest_file(
    file_path: &Path,
    language: &str,
) -> Result<(Document, Vec<Chunk>), IntakeError> {
    let content = FileReader::read_file(file_path).await?;
    let source = file_path.to_string_lossy().to_string();
    Ok(ingest_text(&source, language, &content))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doc_id_is_stable() {
        assert_eq!(generate_doc_id("papers/one.md"), generate_doc_id("papers/one.md"));
        assert_ne!(generate_doc_id("papers/one.md"), generate_doc_id("papers/two.md"));
    }

    #[test]
    fn ingest_text_links_chunks() {
        let (doc, chunks) = ingest_text("memo.txt", "en", "First paragraph.\n\nSecond paragraph.");
        assert!(!chunks.is_empty());
        assert_eq!(doc.chunk_ids.len(), chunks.len());
        assert_eq!(doc.status, DocumentStatus::Pending);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.ordinal, i);
            assert_eq!(chunk.doc_id, doc.doc_id);
        }
    }
}
