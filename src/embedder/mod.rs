/// Embedder trait and shared types for text embedding.
pub mod download;
pub mod mock;
pub mod onnx;
pub mod tokenizer;

use anyhow::{Context, Result};
use thiserror::Error;
use tracing::info;

use crate::config::ModelConfig;

/// Errors that can occur during embedding operations.
#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("inference failed: {0}")]
    InferenceFailed(String),

    #[error("model load failed: {0}")]
    ModelLoadFailed(String),

    #[error("tokenizer error: {0}")]
    TokenizerError(String),
}

/// Trait for text embedding implementations.
///
/// All implementations must be `Send + Sync` to allow concurrent use
/// behind `Arc`. The same text must always map to the same vector.
pub trait Embedder: Send + Sync {
    /// Embed a single text string into a vector.
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError>;

    /// Embed multiple text strings into vectors.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError>;

    /// Return the dimensionality of the embedding vectors.
    fn dimensions(&self) -> usize;
}

/// Load the local ONNX embedder described by `model`, downloading the model
/// files first when `auto_download` is enabled.
///
/// Blocking: call from `spawn_blocking` inside the runtime.
pub fn load_local(model: &ModelConfig) -> Result<onnx::OnnxEmbedder> {
    let model_dir = std::path::PathBuf::from(&model.dir);

    if model.auto_download {
        download::download_model_files(&model_dir)
            .with_context(|| format!("failed to fetch model files for {}", model.name))?;
    }

    let embedder = onnx::OnnxEmbedder::new(&model_dir, model.dimensions)
        .with_context(|| format!("failed to load embedding model {}", model.name))?;
    info!(
        "Embedding model {} ready ({} dimensions)",
        model.name,
        embedder.dimensions()
    );
    Ok(embedder)
}
