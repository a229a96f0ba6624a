//! Document chunking.
pub mod markdown;

pub use markdown::{Chunk, MarkdownSplitter, split_into_chunks};
