use dashmap::DashMap;
use sha2::{Digest, Sha256};

/// Content-keyed embedding cache. Re-running a document's pipeline hits
/// the cache instead of paying for a second model call.
pub struct EmbeddingCache {
    entries: DashMap<String, Vec<f32>>,
    max_entries: usize,
}

impl EmbeddingCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries,
        }
    }

    pub fn get(&self, text: &str) -> Option<Vec<f32>> {
        let key = hash_text(text);
        self.entries.get(&key).map(|r| r.value().clone())
    }

    pub fn set(&self, text: &str, vector: Vec<f32>) {
        if self.entries.len() >= self.max_entries {
            // Simple eviction: clear 25% when full
            let to_remove: Vec<_> = self
                .entries
                .iter()
                .take(self.max_entries / 4)
                .map(|r| r.key().clone())
                .collect();
            for key in to_remove {
                self.entries.remove(&key);
            }
        }
        self.entries.insert(hash_text(text), vector);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_round_trip() {
        let cache = EmbeddingCache::new(16);
        assert!(cache.get("hello").is_none());
        cache.set("hello", vec![1.0, 2.0]);
        assert_eq!(cache.get("hello"), Some(vec![1.0, 2.0]));
    }

    #[test]
    fn eviction_keeps_cache_bounded() {
        let cache = EmbeddingCache::new(8);
        for i in 0..32 {
            cache.set(&format!("text-{i}"), vec![i as f32]);
        }
        assert!(cache.len() <= 8);
    }
}
