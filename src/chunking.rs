//! Text chunking: the external collaborator Cognify hands raw document text
//! to before extraction. Word-boundary-aware, overlap-preserving, grounded
//! in the teacher's document ingestion chunker.

pub trait Chunker: Send + Sync {
    fn chunk(&self, text: &str) -> Vec<String>;
}

/// Default chunker: fixed character budget per chunk, breaking at the
/// nearest preceding whitespace when the cut would otherwise land
/// mid-word, with a configurable character overlap between chunks.
pub struct WordBoundaryChunker {
    chunk_size: usize,
    overlap: usize,
}

impl WordBoundaryChunker {
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        Self { chunk_size, overlap }
    }
}

impl Default for WordBoundaryChunker {
    fn default() -> Self {
        Self::new(1000, 100)
    }
}

impl Chunker for WordBoundaryChunker {
    fn chunk(&self, text: &str) -> Vec<String> {
        if text.is_empty() {
            return Vec::new();
        }
        if text.chars().count() <= self.chunk_size {
            return vec![text.to_string()];
        }

        let mut chunks = Vec::new();
        let chars: Vec<char> = text.chars().collect();
        let mut start = 0;

        while start < chars.len() {
            let end = (start + self.chunk_size).min(chars.len());
            let candidate: String = chars[start..end].iter().collect();

            let chunk = if end < chars.len() {
                match candidate.rfind(|c: char| c.is_whitespace()) {
                    Some(last_space) if last_space > self.chunk_size / 2 => candidate[..last_space].to_string(),
                    _ => candidate,
                }
            } else {
                candidate
            };

            let chunk_char_count = chunk.chars().count();
            chunks.push(chunk);

            if start + chunk_char_count >= chars.len() {
                break;
            }
            start += chunk_char_count.saturating_sub(self.overlap).max(1);
        }

        chunks
    }
}
