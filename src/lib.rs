//! # portfolio-rag — Portfolio RAG Chatbot Backend
//!
//! Indexes a single markdown knowledge document for semantic search and
//! answers questions about it by retrieving the most relevant passages and
//! forwarding them, with the question, to a hosted LLM.
//!
//! ## Architecture
//!
//! - **[`config`]** — Configuration loading, validation, and index backend resolution
//! - **[`loader`]** — Reads the source document
//! - **[`indexer`]** — Markdown-aware recursive chunking
//! - **[`embedder`]** — Text embedding via ONNX Runtime (all-MiniLM-L6-v2)
//! - **[`index`]** — Vector index: SQLite + sqlite-vec on disk, or in memory
//! - **[`llm`]** — Chat-completion client for Groq's OpenAI-compatible API
//! - **[`pipeline`]** — Builds the index and answers questions from it
//! - **[`server`]** — axum HTTP surface (`/`, `/diagnose`, `/chat`, `/reload`)

pub mod config;
pub mod embedder;
pub mod index;
pub mod indexer;
pub mod llm;
pub mod loader;
pub mod pipeline;
pub mod server;
