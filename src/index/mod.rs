//! Vector index over document chunks.
//!
//! Two interchangeable backends implement [`VectorIndex`]: a persistent
//! SQLite + sqlite-vec store and an in-memory brute-force store. Both rank by
//! cosine similarity and break ties by chunk position, so they return the same
//! hits for the same corpus.
pub mod memory;
pub mod sqlite;

use std::path::Path;

use thiserror::Error;
use tracing::{info, warn};

use crate::config::IndexBackend;
use crate::indexer::Chunk;

pub use memory::MemoryIndex;
pub use sqlite::SqliteIndex;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{chunks} chunks but {embeddings} embeddings")]
    LengthMismatch { chunks: usize, embeddings: usize },

    #[error("expected {expected}-dim vector, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("index lock poisoned")]
    LockPoisoned,
}

/// One retrieved chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub content: String,
    pub position: usize,
    /// Cosine similarity in `[-1, 1]`.
    pub similarity: f64,
}

/// Nearest-neighbour storage for chunk embeddings.
pub trait VectorIndex: Send + Sync {
    /// Which backend this is; never [`IndexBackend::Auto`].
    fn backend(&self) -> IndexBackend;

    /// Replace the whole contents with `chunks` and their `embeddings`.
    fn rebuild(&mut self, chunks: &[Chunk], embeddings: &[Vec<f32>]) -> Result<(), IndexError>;

    /// The `top_k` most similar entries, best first. Returns fewer when the
    /// index holds fewer entries.
    fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<SearchHit>, IndexError>;

    /// Number of stored entries.
    fn len(&self) -> Result<usize, IndexError>;

    fn is_empty(&self) -> Result<bool, IndexError> {
        Ok(self.len()? == 0)
    }
}

fn check_lengths(chunks: &[Chunk], embeddings: &[Vec<f32>]) -> Result<(), IndexError> {
    if chunks.len() != embeddings.len() {
        return Err(IndexError::LengthMismatch {
            chunks: chunks.len(),
            embeddings: embeddings.len(),
        });
    }
    Ok(())
}

fn check_dimensions(expected: usize, vector: &[f32]) -> Result<(), IndexError> {
    if vector.len() != expected {
        return Err(IndexError::DimensionMismatch {
            expected,
            actual: vector.len(),
        });
    }
    Ok(())
}

/// Build an index of the requested kind holding `chunks`.
///
/// `Persistent` writes to `persist_path`; if that store cannot be opened or
/// written, the failure is logged and an in-memory index is returned instead.
/// `Auto` must be resolved by the caller and is treated as `Persistent`.
pub fn build_index(
    backend: IndexBackend,
    persist_path: &Path,
    dimensions: usize,
    chunks: &[Chunk],
    embeddings: &[Vec<f32>],
) -> Result<Box<dyn VectorIndex>, IndexError> {
    check_lengths(chunks, embeddings)?;

    if backend != IndexBackend::Memory {
        match SqliteIndex::create(persist_path, dimensions, chunks, embeddings) {
            Ok(index) => {
                info!(
                    "Built persistent vector index at {} ({} chunks)",
                    persist_path.display(),
                    chunks.len()
                );
                return Ok(Box::new(index));
            }
            Err(e) => warn!("Persistent vector index unavailable ({e}), using in-memory index"),
        }
    }

    let mut index = MemoryIndex::new(dimensions);
    index.rebuild(chunks, embeddings)?;
    info!("Built in-memory vector index ({} chunks)", chunks.len());
    Ok(Box::new(index))
}
