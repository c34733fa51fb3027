use unicode_segmentation::UnicodeSegmentation;

use crate::chunk::Chunk;

pub struct ChunkerConfig {
    pub target_tokens_max: usize,
    pub overlap_tokens: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            target_tokens_max: 900,
            overlap_tokens: 100,
        }
    }
}

pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    /// Split text into chunks with stable IDs and sequential ordinals.
    /// Sections are cut at markdown headings first, then packed paragraph by
    /// paragraph; a single oversized paragraph is further split at sentence
    /// boundaries.
    pub fn chunk_text(&self, doc_id: &str, text: &str, language: &str) -> Vec<Chunk> {
        let mut texts = Vec::new();

        for section in self.split_by_headings(text) {
            if estimate_tokens(&section) <= self.config.target_tokens_max {
                if !section.trim().is_empty() {
                    texts.push(section.trim().to_string());
                }
                continue;
            }

            let mut buffer = String::new();
            for para in self.split_by_paragraphs(&section) {
                let pieces = if estimate_tokens(&para) > self.config.target_tokens_max {
                    self.split_by_sentences(&para)
                } else {
                    vec![para]
                };

                for piece in pieces {
                    if estimate_tokens(&buffer) + estimate_tokens(&piece)
                        > self.config.target_tokens_max
                        && !buffer.is_empty()
                    {
                        texts.push(buffer.trim().to_string());
                        // Start the next chunk with trailing overlap for context
                        buffer = self.get_overlap(&buffer, self.config.overlap_tokens);
                    }
                    buffer.push_str(&piece);
                    buffer.push_str("\n\n");
                }
            }

            if !buffer.trim().is_empty() {
                texts.push(buffer.trim().to_string());
            }
        }

        texts
            .into_iter()
            .enumerate()
            .map(|(ordinal, body)| {
                Chunk::new(doc_id.to_string(), ordinal, body, language.to_string())
            })
            .collect()
    }

    fn split_by_headings(&self, text: &str) -> Vec<String> {
        let mut sections = Vec::new();
        let mut current_section = String::new();

        for line in text.lines() {
            if line.trim_start().starts_with('#') && !current_section.is_empty() {
                sections.push(current_section);
                current_section = String::new();
            }
            current_section.push_str(line);
            current_section.push('\n');
        }

        if !current_section.is_empty() {
            sections.push(current_section);
        }

        if sections.is_empty() {
            sections.push(text.to_string());
        }

        sections
    }

    fn split_by_paragraphs(&self, text: &str) -> Vec<String> {
        text.split("\n\n")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    fn split_by_sentences(&self, text: &str) -> Vec<String> {
        let mut pieces = Vec::new();
        let mut buffer = String::new();

        for sentence in text.unicode_sentences() {
            if estimate_tokens(&buffer) + estimate_tokens(sentence)
                > self.config.target_tokens_max
                && !buffer.is_empty()
            {
                pieces.push(buffer.trim().to_string());
                buffer.clear();
            }
            buffer.push_str(sentence);
        }

        if !buffer.trim().is_empty() {
            pieces.push(buffer.trim().to_string());
        }

        pieces
    }

    fn get_overlap(&self, text: &str, target_tokens: usize) -> String {
        let words: Vec<&str> = text.split_whitespace().collect();
        let target_words = (target_tokens as f64 / 1.3) as usize;

        if words.len() <= target_words {
            return text.to_string();
        }

        words[words.len().saturating_sub(target_words)..].join(" ")
    }
}

fn estimate_tokens(text: &str) -> usize {
    let word_count = text.split_whitespace().count();
    (word_count as f64 * 1.3) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_chunking() {
        let chunker = Chunker::new(ChunkerConfig::default());
        let text = "This is a test paragraph.\n\nThis is another paragraph.";
        let chunks = chunker.chunk_text("test-doc", text, "en");

        assert!(!chunks.is_empty());
        assert_eq!(chunks[0].doc_id, "test-doc");
        assert_eq!(chunks[0].ordinal, 0);
    }

    #[test]
    fn long_text_splits_into_multiple_chunks() {
        let chunker = Chunker::new(ChunkerConfig {
            target_tokens_max: 20,
            overlap_tokens: 4,
        });
        let para = "one two three four five six seven eight nine ten.";
        let text = format!("{para}\n\n{para}\n\n{para}\n\n{para}");
        let chunks = chunker.chunk_text("test-doc", &text, "en");

        assert!(chunks.len() > 1);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.ordinal, i);
        }
    }

    #[test]
    fn oversized_paragraph_splits_at_sentences() {
        let chunker = Chunker::new(ChunkerConfig {
            target_tokens_max: 12,
            overlap_tokens: 0,
        });
        let text = "First sentence about one thing here. Second sentence about another thing. \
                    Third sentence closes the paragraph out.";
        let chunks = chunker.chunk_text("test-doc", text, "en");

        assert!(chunks.len() > 1);
    }

    #[test]
    fn headings_start_new_sections() {
        let chunker = Chunker::new(ChunkerConfig::default());
        let text = "# Intro\nsome text\n\n# Methods\nmore text";
        let chunks = chunker.chunk_text("test-doc", text, "en");

        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].text.contains("Intro"));
        assert!(chunks[1].text.contains("Methods"));
    }
}
