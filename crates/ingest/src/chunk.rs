use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One contiguous slice of a document. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub doc_id: String,
    pub ordinal: usize,
    pub text: String,
    pub language: String,
}

impl Chunk {
    pub fn new(doc_id: String, ordinal: usize, text: String, language: String) -> Self {
        let chunk_id = Self::generate_chunk_id(&doc_id, ordinal, &text);
        Self {
            chunk_id,
            doc_id,
            ordinal,
            text,
            language,
        }
    }

    fn generate_chunk_id(doc_id: &str, ordinal: usize, text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(doc_id.as_bytes());
        hasher.update(ordinal.to_string().as_bytes());
        hasher.update(text.as_bytes());
        let result = hasher.finalize();
        hex::encode(&result[..16])
    }

    /// Estimate token count (rough: 1.3 tokens per word)
    pub fn estimated_tokens(&self) -> usize {
        let word_count = self.text.split_whitespace().count();
        (word_count as f64 * 1.3) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_id_is_content_addressed() {
        let a = Chunk::new("d1".into(), 0, "same text".into(), "en".into());
        let b = Chunk::new("d1".into(), 0, "same text".into(), "en".into());
        let c = Chunk::new("d1".into(), 1, "same text".into(), "en".into());
        assert_eq!(a.chunk_id, b.chunk_id);
        assert_ne!(a.chunk_id, c.chunk_id);
    }
}
