//! Retrieval-augmented answering.
//!
//! [`PipelineBuilder`] turns configuration into a [`PipelineState`]: either a
//! ready [`AnswerPipeline`] or the reason none could be built. Construction
//! loads the source document, chunks it, embeds every chunk and builds the
//! vector index from scratch; nothing carries over from a previous build.
pub mod prompt;

use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::{Config, IndexBackend, process_env};
use crate::embedder::{Embedder, EmbedderError};
use crate::index::{IndexError, SearchHit, VectorIndex, build_index};
use crate::indexer::split_into_chunks;
use crate::llm::{ChatModel, GroqClient, LlmError};
use crate::loader::load_document;

pub use prompt::{PromptTemplate, format_context};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("failed to read source document")]
    Io(#[from] std::io::Error),

    #[error("embedding failed")]
    Embedding(#[from] EmbedderError),

    #[error("vector index failure")]
    Index(#[from] IndexError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("failed to load embedding model")]
    ModelLoad(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("background task failed: {0}")]
    Task(String),
}

impl PipelineError {
    /// The LLM error behind this failure, if any.
    #[must_use]
    pub fn as_llm(&self) -> Option<&LlmError> {
        match self {
            Self::Llm(e) => Some(e),
            _ => None,
        }
    }

    /// One-line description including every cause, outermost first.
    #[must_use]
    pub fn detail(&self) -> String {
        let mut detail = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            detail.push_str(": ");
            detail.push_str(&cause.to_string());
            source = cause.source();
        }
        detail
    }
}

/// Why no pipeline exists. These are expected conditions, not failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnavailableReason {
    MissingDocument { path: PathBuf },
    MissingCredential { var: String },
}

impl fmt::Display for UnavailableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingDocument { path } => {
                write!(f, "Source document not found: {}", path.display())
            }
            Self::MissingCredential { var } => write!(f, "{var} not set."),
        }
    }
}

/// Outcome of building the pipeline.
#[derive(Clone)]
pub enum PipelineState {
    Ready(Arc<AnswerPipeline>),
    Unavailable(UnavailableReason),
    /// Construction hit an unexpected error.
    Failed { detail: String, traceback: String },
}

impl PipelineState {
    #[must_use]
    pub fn pipeline(&self) -> Option<Arc<AnswerPipeline>> {
        match self {
            Self::Ready(p) => Some(Arc::clone(p)),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }
}

impl fmt::Debug for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready(p) => f
                .debug_struct("Ready")
                .field("backend", &p.backend())
                .field("chunks", &p.chunk_count())
                .finish(),
            Self::Unavailable(reason) => f.debug_tuple("Unavailable").field(reason).finish(),
            Self::Failed { detail, .. } => f.debug_struct("Failed").field("detail", detail).finish(),
        }
    }
}

pub type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

type EmbedderLoader = dyn Fn() -> anyhow::Result<Arc<dyn Embedder>> + Send + Sync;

/// Everything needed to (re)build an [`AnswerPipeline`].
///
/// Cheap to clone. The embedder is loaded by the first build that gets past
/// the document and credential checks, then shared by every later build.
#[derive(Clone)]
pub struct PipelineBuilder {
    config: Arc<Config>,
    embedder: Arc<OnceLock<Arc<dyn Embedder>>>,
    load_embedder: Arc<EmbedderLoader>,
    chat_model: Option<Arc<dyn ChatModel>>,
    env: EnvLookup,
}

impl PipelineBuilder {
    /// Builder around an embedder that is already loaded.
    pub fn new(config: Arc<Config>, embedder: Arc<dyn Embedder>) -> Self {
        let loaded = Arc::clone(&embedder);
        let mut builder = Self::with_loader(config, move || Ok(Arc::clone(&loaded)));
        builder.embedder = Arc::new(OnceLock::from(embedder));
        builder
    }

    /// Builder that calls `loader` for the embedder on first use. A failed
    /// load is retried by the next build.
    pub fn with_loader<F>(config: Arc<Config>, loader: F) -> Self
    where
        F: Fn() -> anyhow::Result<Arc<dyn Embedder>> + Send + Sync + 'static,
    {
        Self {
            config,
            embedder: Arc::new(OnceLock::new()),
            load_embedder: Arc::new(loader),
            chat_model: None,
            env: Arc::new(process_env),
        }
    }

    /// Read environment variables through `lookup` instead of the process
    /// environment.
    #[must_use]
    pub fn with_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.env = Arc::new(lookup);
        self
    }

    /// Use `model` instead of a Groq client built from the configuration.
    /// The credential check still applies.
    #[must_use]
    pub fn with_chat_model(mut self, model: Arc<dyn ChatModel>) -> Self {
        self.chat_model = Some(model);
        self
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The API key, if set to a non-empty value.
    #[must_use]
    pub fn credential(&self) -> Option<String> {
        (self.env)(&self.config.llm.api_key_env).filter(|k| !k.trim().is_empty())
    }

    fn embedder(&self) -> Result<Arc<dyn Embedder>, PipelineError> {
        if let Some(embedder) = self.embedder.get() {
            return Ok(Arc::clone(embedder));
        }
        let loaded = (self.load_embedder)().map_err(|e| PipelineError::ModelLoad(e.into()))?;
        Ok(Arc::clone(self.embedder.get_or_init(|| loaded)))
    }

    /// Build a fresh pipeline.
    ///
    /// A missing document or credential yields [`PipelineState::Unavailable`];
    /// only unexpected failures are returned as errors. Blocking: may load
    /// the embedding model, embeds the whole document and writes the index.
    pub fn build(&self) -> Result<PipelineState, PipelineError> {
        self.build_with(None)
    }

    /// Run every construction step the way [`build`](Self::build) does, but
    /// keep the index in memory so the persistent file is left untouched.
    pub fn build_in_memory(&self) -> Result<PipelineState, PipelineError> {
        self.build_with(Some(IndexBackend::Memory))
    }

    fn build_with(&self, backend: Option<IndexBackend>) -> Result<PipelineState, PipelineError> {
        let config = &self.config;

        let Some(document) = load_document(config.document_path())? else {
            return Ok(PipelineState::Unavailable(
                UnavailableReason::MissingDocument {
                    path: config.document_path(),
                },
            ));
        };

        let Some(api_key) = self.credential() else {
            warn!("{} is not set", config.llm.api_key_env);
            return Ok(PipelineState::Unavailable(
                UnavailableReason::MissingCredential {
                    var: config.llm.api_key_env.clone(),
                },
            ));
        };

        let chunks = split_into_chunks(&document.content, config.chunk_size, config.chunk_overlap);
        info!(
            "Split {} into {} chunks",
            document.path.display(),
            chunks.len()
        );

        let embedder = self.embedder()?;
        let texts: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
        let embeddings = embedder.embed_batch(&texts)?;

        let backend = backend.unwrap_or_else(|| config.resolve_backend(|var| (self.env)(var)));
        let index = build_index(
            backend,
            &config.persist_path(),
            embedder.dimensions(),
            &chunks,
            &embeddings,
        )?;

        let chat_model = match &self.chat_model {
            Some(model) => Arc::clone(model),
            None => Arc::new(GroqClient::new(&config.llm, api_key)),
        };

        let pipeline = AnswerPipeline {
            index: Arc::from(index),
            embedder,
            chat_model,
            template: PromptTemplate::default(),
            top_k: config.search_top_k,
            chunk_count: chunks.len(),
            built_at: Utc::now(),
        };
        info!(
            "RAG pipeline ready ({:?} index, {} chunks, model {})",
            pipeline.backend(),
            pipeline.chunk_count,
            pipeline.chat_model.model_name()
        );
        Ok(PipelineState::Ready(Arc::new(pipeline)))
    }

    /// Like [`build`](Self::build), but never fails: unexpected errors are
    /// logged and reported as [`PipelineState::Failed`].
    pub fn initialize(&self) -> PipelineState {
        settle(self.build())
    }

    /// A throwaway in-memory build reporting whether construction would
    /// succeed right now. Never fails.
    pub fn diagnose(&self) -> PipelineState {
        settle(self.build_in_memory())
    }
}

fn settle(result: Result<PipelineState, PipelineError>) -> PipelineState {
    match result {
        Ok(state) => {
            if let PipelineState::Unavailable(reason) = &state {
                warn!("RAG pipeline unavailable: {reason}");
            }
            state
        }
        Err(e) => {
            let traceback = format!("{:?}", anyhow::Error::new(e));
            let detail = traceback.lines().next().unwrap_or_default().to_string();
            error!("RAG pipeline construction failed: {traceback}");
            PipelineState::Failed {
                detail,
                traceback,
            }
        }
    }
}

/// A built index plus the model that answers from it.
pub struct AnswerPipeline {
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    chat_model: Arc<dyn ChatModel>,
    template: PromptTemplate,
    top_k: usize,
    chunk_count: usize,
    built_at: DateTime<Utc>,
}

impl AnswerPipeline {
    /// The `top_k` chunks most similar to `question`, best first.
    ///
    /// Blocking: runs the embedding model.
    pub fn retrieve(&self, question: &str) -> Result<Vec<SearchHit>, PipelineError> {
        search(self.embedder.as_ref(), self.index.as_ref(), question, self.top_k)
    }

    /// Retrieve context for `question`, fill the prompt and ask the model.
    pub async fn answer(&self, question: &str) -> Result<String, PipelineError> {
        let embedder = Arc::clone(&self.embedder);
        let index = Arc::clone(&self.index);
        let query = question.to_string();
        let top_k = self.top_k;
        let hits = tokio::task::spawn_blocking(move || {
            search(embedder.as_ref(), index.as_ref(), &query, top_k)
        })
        .await
        .map_err(|e| PipelineError::Task(e.to_string()))??;

        let context = format_context(&hits);
        let prompt = self.template.render(&context, question);
        Ok(self.chat_model.complete(&prompt).await?)
    }

    #[must_use]
    pub fn backend(&self) -> IndexBackend {
        self.index.backend()
    }

    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.chunk_count
    }

    #[must_use]
    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }
}

fn search(
    embedder: &dyn Embedder,
    index: &dyn VectorIndex,
    question: &str,
    top_k: usize,
) -> Result<Vec<SearchHit>, PipelineError> {
    let query = embedder.embed(question)?;
    Ok(index.search(&query, top_k)?)
}
