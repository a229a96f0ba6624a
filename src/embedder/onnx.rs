/// ONNX Runtime embedder using the `ort` crate.
///
/// Runs the sentence-transformers `all-MiniLM-L6-v2` export, applies mean
/// pooling with the attention mask, and L2-normalizes the result.
use std::path::Path;
use std::sync::Mutex;

use ort::session::Session;
use ort::value::Tensor;
use tracing::{debug, info};

use super::tokenizer::{BertTokenizer, TokenizerOutput};
use super::{Embedder, EmbedderError};

/// MiniLM was trained on sequences of at most 256 word pieces.
const MAX_SEQ_LEN: usize = 256;

/// Texts per inference call when embedding a whole document.
const BATCH_SIZE: usize = 32;

/// ONNX-backed embedder implementing the `Embedder` trait.
pub struct OnnxEmbedder {
    session: Mutex<Session>,
    tokenizer: BertTokenizer,
    dimensions: usize,
}

impl OnnxEmbedder {
    /// Load `model.onnx` and `tokenizer.json` from `model_dir`.
    ///
    /// `dimensions` is the hidden size the model is expected to produce;
    /// inference fails if the model disagrees.
    pub fn new(model_dir: &Path, dimensions: usize) -> Result<Self, EmbedderError> {
        let model_path = model_dir.join("model.onnx");

        if !model_path.exists() {
            return Err(EmbedderError::ModelLoadFailed(format!(
                "model.onnx not found in {}",
                model_dir.display()
            )));
        }

        info!("Initializing ONNX Runtime...");

        let session = Session::builder()
            .map_err(|e| EmbedderError::ModelLoadFailed(format!("session builder error: {e}")))?
            .with_intra_threads(4)
            .map_err(|e| EmbedderError::ModelLoadFailed(format!("thread config error: {e}")))?
            .commit_from_file(&model_path)
            .map_err(|e| EmbedderError::ModelLoadFailed(format!("model load error: {e}")))?;

        let tokenizer = BertTokenizer::from_model_dir(model_dir, MAX_SEQ_LEN)
            .map_err(|e| EmbedderError::TokenizerError(e.to_string()))?;

        info!(
            "ONNX model loaded from {} (vocab size: {})",
            model_dir.display(),
            tokenizer.vocab_size()
        );

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
            dimensions,
        })
    }

    /// Run one padded batch through the model.
    fn infer(&self, batch: &[TokenizerOutput]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        let batch_size = batch.len();
        let seq_len = batch.iter().map(|t| t.input_ids.len()).max().unwrap_or(0);
        if batch_size == 0 || seq_len == 0 {
            return Ok(Vec::new());
        }

        let mut input_ids = Vec::with_capacity(batch_size * seq_len);
        let mut attention_mask = Vec::with_capacity(batch_size * seq_len);
        for tokens in batch {
            let pad = seq_len - tokens.input_ids.len();
            input_ids.extend_from_slice(&tokens.input_ids);
            input_ids.extend(std::iter::repeat_n(0i64, pad));
            attention_mask.extend_from_slice(&tokens.attention_mask);
            attention_mask.extend(std::iter::repeat_n(0i64, pad));
        }

        let shape = [batch_size, seq_len];
        let input_ids_val = Tensor::from_array((shape, input_ids))
            .map_err(|e| EmbedderError::InferenceFailed(format!("input_ids error: {e}")))?;
        let attention_mask_val = Tensor::from_array((shape, attention_mask.clone()))
            .map_err(|e| EmbedderError::InferenceFailed(format!("attention_mask error: {e}")))?;
        let token_type_ids_val = Tensor::from_array((shape, vec![0i64; batch_size * seq_len]))
            .map_err(|e| EmbedderError::InferenceFailed(format!("token_type_ids error: {e}")))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| EmbedderError::InferenceFailed(format!("lock poisoned: {e}")))?;
        let outputs = session
            .run(ort::inputs![
                "input_ids" => input_ids_val,
                "attention_mask" => attention_mask_val,
                "token_type_ids" => token_type_ids_val,
            ])
            .map_err(|e| EmbedderError::InferenceFailed(format!("inference failed: {e}")))?;

        // last_hidden_state: [batch, seq, hidden]
        let (out_shape, hidden_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedderError::InferenceFailed(format!("output extraction: {e}")))?;

        let hidden_size = out_shape.get(2).copied().unwrap_or_default() as usize;
        if hidden_size != self.dimensions {
            return Err(EmbedderError::InferenceFailed(format!(
                "model produced {hidden_size}-dim states, expected {}",
                self.dimensions
            )));
        }

        let row_len = seq_len * hidden_size;
        let vectors = (0..batch_size)
            .map(|b| {
                let hidden = &hidden_data[b * row_len..(b + 1) * row_len];
                let mask = &attention_mask[b * seq_len..(b + 1) * seq_len];
                l2_normalize(&mean_pooling(hidden, mask, seq_len, hidden_size))
            })
            .collect();

        Ok(vectors)
    }
}

impl Embedder for OnnxEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        let mut vectors = self.embed_batch(&[text])?;
        vectors
            .pop()
            .ok_or_else(|| EmbedderError::InferenceFailed("empty model output".to_string()))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(BATCH_SIZE) {
            let tokens = self
                .tokenizer
                .tokenize_batch(batch)
                .map_err(|e| EmbedderError::TokenizerError(e.to_string()))?;
            vectors.extend(self.infer(&tokens)?);
            debug!("Embedded {}/{} texts", vectors.len(), texts.len());
        }
        Ok(vectors)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// Mean pooling over hidden states weighted by attention mask.
///
/// `hidden_data` is a flat array with shape `[seq_len, hidden_size]`.
fn mean_pooling(
    hidden_data: &[f32],
    attention_mask: &[i64],
    seq_len: usize,
    hidden_size: usize,
) -> Vec<f32> {
    let mut result = vec![0.0f32; hidden_size];
    let mut mask_sum: f32 = 0.0;

    for t in 0..seq_len {
        let mask = attention_mask[t] as f32;
        if mask == 0.0 {
            continue;
        }
        mask_sum += mask;

        let row = &hidden_data[t * hidden_size..(t + 1) * hidden_size];
        for (acc, h) in result.iter_mut().zip(row) {
            *acc += h * mask;
        }
    }

    if mask_sum > 0.0 {
        for v in &mut result {
            *v /= mask_sum;
        }
    }

    result
}

/// L2-normalize a vector, returning the normalized copy.
fn l2_normalize(vec: &[f32]) -> Vec<f32> {
    let norm_sq: f32 = vec.iter().map(|v| v * v).sum();
    if norm_sq == 0.0 {
        return vec.to_vec();
    }

    let inv_norm = 1.0 / norm_sq.sqrt();
    vec.iter().map(|v| v * inv_norm).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_l2_normalize() {
        let normed = l2_normalize(&[3.0, 4.0]);
        assert!((normed[0] - 0.6).abs() < 1e-6);
        assert!((normed[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_l2_normalize_zero() {
        assert_eq!(l2_normalize(&[0.0, 0.0, 0.0]), vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_mean_pooling_with_padding() {
        // 3 tokens, hidden_size=2, last token is padding
        let hidden = vec![1.0, 2.0, 3.0, 4.0, 100.0, 100.0];
        let mask = vec![1i64, 1, 0];
        let result = mean_pooling(&hidden, &mask, 3, 2);
        assert_eq!(result, vec![2.0, 3.0]);
    }

    #[test]
    fn test_mean_pooling_all_masked() {
        let result = mean_pooling(&[5.0, 5.0], &[0], 1, 2);
        assert_eq!(result, vec![0.0, 0.0]);
    }

    #[test]
    fn test_missing_model_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = OnnxEmbedder::new(dir.path(), 384).err().unwrap();
        assert!(matches!(err, EmbedderError::ModelLoadFailed(_)));
    }

    /// Requires downloaded model files and the ONNX Runtime shared library.
    #[test]
    #[ignore]
    fn test_onnx_embed_batch_matches_single() {
        let model_dir = Path::new("models/all-MiniLM-L6-v2");
        if !model_dir.join("model.onnx").exists() {
            eprintln!("Skipping: model files not downloaded");
            return;
        }

        let embedder = OnnxEmbedder::new(model_dir, 384).unwrap();
        let single = embedder.embed("Alice is a software engineer").unwrap();
        let batch = embedder
            .embed_batch(&["Alice is a software engineer", "a much longer second sentence to force padding"])
            .unwrap();

        assert_eq!(single.len(), 384);
        assert_eq!(batch.len(), 2);
        for (a, b) in single.iter().zip(&batch[0]) {
            assert!((a - b).abs() < 1e-4, "padding changed the embedding");
        }
    }
}
