//! Source document loading.
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

/// The knowledge document as read from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDocument {
    pub path: PathBuf,
    pub content: String,
}

/// Read the document at `path`.
///
/// A missing file is not an error: it yields `Ok(None)` so callers can report
/// the pipeline as unavailable. Other I/O failures (permissions, invalid
/// UTF-8) are propagated.
pub fn load_document<P: AsRef<Path>>(path: P) -> io::Result<Option<SourceDocument>> {
    let path = path.as_ref();
    match fs::read_to_string(path) {
        Ok(content) => {
            info!(
                "Loaded source document {} ({} bytes)",
                path.display(),
                content.len()
            );
            Ok(Some(SourceDocument {
                path: path.to_path_buf(),
                content,
            }))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            warn!("Source document not found: {}", path.display());
            Ok(None)
        }
        Err(e) => Err(e),
    }
}
