//! In-memory vector index with exact cosine search.
use super::{IndexError, SearchHit, VectorIndex, check_dimensions, check_lengths};
use crate::config::IndexBackend;
use crate::indexer::Chunk;

struct Entry {
    content: String,
    position: usize,
    embedding: Vec<f32>,
}

/// Brute-force index held entirely in process memory.
pub struct MemoryIndex {
    dimensions: usize,
    entries: Vec<Entry>,
}

impl MemoryIndex {
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            entries: Vec::new(),
        }
    }
}

impl VectorIndex for MemoryIndex {
    fn backend(&self) -> IndexBackend {
        IndexBackend::Memory
    }

    fn rebuild(&mut self, chunks: &[Chunk], embeddings: &[Vec<f32>]) -> Result<(), IndexError> {
        check_lengths(chunks, embeddings)?;
        for embedding in embeddings {
            check_dimensions(self.dimensions, embedding)?;
        }

        self.entries = chunks
            .iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| Entry {
                content: chunk.content.clone(),
                position: chunk.position,
                embedding: embedding.clone(),
            })
            .collect();
        Ok(())
    }

    fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<SearchHit>, IndexError> {
        check_dimensions(self.dimensions, query)?;

        let mut scored: Vec<(f64, &Entry)> = self
            .entries
            .iter()
            .map(|e| (cosine_similarity(query, &e.embedding), e))
            .collect();

        scored.sort_by(|(sa, ea), (sb, eb)| {
            sb.total_cmp(sa)
                .then_with(|| ea.position.cmp(&eb.position))
        });

        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(similarity, e)| SearchHit {
                content: e.content.clone(),
                position: e.position,
                similarity,
            })
            .collect())
    }

    fn len(&self) -> Result<usize, IndexError> {
        Ok(self.entries.len())
    }
}

/// Cosine similarity; zero when either vector has no magnitude.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(position: usize, content: &str) -> Chunk {
        Chunk {
            content: content.to_string(),
            position,
            start: 0,
            end: content.len(),
        }
    }

    fn axis(dims: usize, i: usize) -> Vec<f32> {
        let mut v = vec![0.0; dims];
        v[i] = 1.0;
        v
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-9);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-9);
        assert!((cosine_similarity(&[1.0, 0.0], &[-2.0, 0.0]) + 1.0).abs() < 1e-9);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_search_orders_by_similarity() {
        let mut index = MemoryIndex::new(4);
        let chunks = vec![chunk(0, "zero"), chunk(1, "one"), chunk(2, "two")];
        let embeddings = vec![axis(4, 0), axis(4, 1), vec![0.7, 0.7, 0.0, 0.0]];
        index.rebuild(&chunks, &embeddings).unwrap();

        let hits = index.search(&axis(4, 1), 3).unwrap();
        let order: Vec<usize> = hits.iter().map(|h| h.position).collect();
        assert_eq!(order, vec![1, 2, 0]);
        assert!((hits[0].similarity - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_search_returns_min_of_k_and_len() {
        let mut index = MemoryIndex::new(4);
        index
            .rebuild(&[chunk(0, "a"), chunk(1, "b")], &[axis(4, 0), axis(4, 1)])
            .unwrap();
        assert_eq!(index.search(&axis(4, 0), 3).unwrap().len(), 2);
        assert_eq!(index.search(&axis(4, 0), 1).unwrap().len(), 1);
    }

    #[test]
    fn test_ties_break_by_position() {
        let mut index = MemoryIndex::new(2);
        let chunks = vec![chunk(0, "a"), chunk(1, "b"), chunk(2, "c")];
        let same = vec![1.0, 0.0];
        index
            .rebuild(&chunks, &[same.clone(), same.clone(), same.clone()])
            .unwrap();
        let hits = index.search(&same, 2).unwrap();
        assert_eq!(hits[0].position, 0);
        assert_eq!(hits[1].position, 1);
    }

    #[test]
    fn test_rebuild_replaces_entries() {
        let mut index = MemoryIndex::new(2);
        index
            .rebuild(&[chunk(0, "a"), chunk(1, "b")], &[vec![1.0, 0.0], vec![0.0, 1.0]])
            .unwrap();
        index.rebuild(&[chunk(0, "c")], &[vec![1.0, 0.0]]).unwrap();
        assert_eq!(index.len().unwrap(), 1);
        assert_eq!(index.search(&[1.0, 0.0], 3).unwrap()[0].content, "c");
    }

    #[test]
    fn test_dimension_mismatch() {
        let mut index = MemoryIndex::new(3);
        let err = index.rebuild(&[chunk(0, "a")], &[vec![1.0]]).unwrap_err();
        assert!(matches!(
            err,
            IndexError::DimensionMismatch {
                expected: 3,
                actual: 1
            }
        ));
        assert!(index.search(&[1.0, 0.0], 1).is_err());
    }

    #[test]
    fn test_empty_index() {
        let index = MemoryIndex::new(2);
        assert!(index.is_empty().unwrap());
        assert!(index.search(&[1.0, 0.0], 3).unwrap().is_empty());
    }
}
