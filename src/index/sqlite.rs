//! Persistent vector index using SQLite and sqlite-vec.
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, Once};

use chrono::Utc;
use rusqlite::{Connection, params};
use sqlite_vec::sqlite3_vec_init;
use tracing::{debug, info};

use super::{IndexError, SearchHit, VectorIndex, check_dimensions, check_lengths};
use crate::config::IndexBackend;
use crate::indexer::Chunk;

/// Staging files are always written from scratch: the index is rebuilt from
/// the source document, so there is nothing to migrate.
const RESET_SQL: &str = r#"
DROP TABLE IF EXISTS vec_chunks;
DROP TABLE IF EXISTS chunks;
DROP TABLE IF EXISTS index_meta;
"#;

fn schema_sql(dimensions: usize) -> String {
    format!(
        r#"
CREATE TABLE index_meta (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    dimensions INTEGER NOT NULL,
    chunk_count INTEGER NOT NULL,
    built_at DATETIME NOT NULL
);

CREATE TABLE chunks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    position INTEGER NOT NULL UNIQUE,
    start_offset INTEGER NOT NULL,
    end_offset INTEGER NOT NULL,
    content TEXT NOT NULL
);

CREATE VIRTUAL TABLE vec_chunks USING vec0(
    embedding FLOAT[{dimensions}]
);
"#
    )
}

static INIT_VEC: Once = Once::new();

/// Initialize the sqlite-vec extension. Safe to call multiple times.
fn init_sqlite_vec() {
    INIT_VEC.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite3_vec_init as *const (),
        )));
    });
}

/// Serialize a float32 vector into the little-endian blob vec0 expects.
fn serialize_vector(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Where a new index is written before it replaces `path`.
fn staging_path(path: &Path) -> PathBuf {
    let mut name: OsString = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| OsString::from("index.sqlite3"));
    name.push(".building");
    path.with_file_name(name)
}

fn remove_if_present(path: &Path) -> Result<(), IndexError> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}

/// On-disk index. The connection sits behind a mutex so the index can be
/// shared across request handlers.
pub struct SqliteIndex {
    conn: Mutex<Connection>,
    dimensions: usize,
}

impl SqliteIndex {
    /// Write `chunks` into a fresh database and move it into place at `path`
    /// (creating parent directories).
    ///
    /// The new file is filled and committed under a staging name and only
    /// then renamed over `path`, so an index already open on the old file
    /// keeps answering from its complete contents while this runs.
    pub fn create<P: AsRef<Path>>(
        path: P,
        dimensions: usize,
        chunks: &[Chunk],
        embeddings: &[Vec<f32>],
    ) -> Result<Self, IndexError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let staging = staging_path(path);
        remove_if_present(&staging)?;
        init_sqlite_vec();

        let written = Connection::open(&staging)
            .map_err(IndexError::from)
            .and_then(|conn| Self::init(conn, dimensions))
            .and_then(|mut index| index.rebuild(chunks, embeddings));
        if let Err(e) = written {
            let _ = remove_if_present(&staging);
            return Err(e);
        }

        fs::rename(&staging, path)?;
        info!(
            "Wrote vector database: {} ({} chunks)",
            path.display(),
            chunks.len()
        );
        Self::open(path, dimensions)
    }

    /// Open an index previously written by [`create`](Self::create) without
    /// modifying it.
    pub fn open<P: AsRef<Path>>(path: P, dimensions: usize) -> Result<Self, IndexError> {
        let path = path.as_ref();
        info!("Opening vector database: {}", path.display());

        init_sqlite_vec();
        let conn = Connection::open(path)?;
        let vec_version: String = conn.query_row("SELECT vec_version()", [], |row| row.get(0))?;
        debug!("sqlite-vec version: {vec_version}");

        Ok(Self {
            conn: Mutex::new(conn),
            dimensions,
        })
    }

    /// Open an in-memory database (useful for testing).
    pub fn open_in_memory(dimensions: usize) -> Result<Self, IndexError> {
        init_sqlite_vec();
        let conn = Connection::open_in_memory()?;
        Self::init(conn, dimensions)
    }

    /// Reset the schema of a freshly opened connection.
    fn init(conn: Connection, dimensions: usize) -> Result<Self, IndexError> {
        let vec_version: String = conn.query_row("SELECT vec_version()", [], |row| row.get(0))?;
        debug!("sqlite-vec version: {vec_version}");

        conn.execute_batch(RESET_SQL)?;
        conn.execute_batch(&schema_sql(dimensions))?;

        Ok(Self {
            conn: Mutex::new(conn),
            dimensions,
        })
    }

    #[cfg(test)]
    fn built_at(&self) -> Result<Option<chrono::DateTime<Utc>>, IndexError> {
        let conn = self.conn.lock().map_err(|_| IndexError::LockPoisoned)?;
        let mut stmt = conn.prepare("SELECT built_at FROM index_meta WHERE id = 1")?;
        let mut rows = stmt.query_map([], |row| row.get(0))?;
        Ok(rows.next().transpose()?)
    }
}

impl VectorIndex for SqliteIndex {
    fn backend(&self) -> IndexBackend {
        IndexBackend::Persistent
    }

    fn rebuild(&mut self, chunks: &[Chunk], embeddings: &[Vec<f32>]) -> Result<(), IndexError> {
        check_lengths(chunks, embeddings)?;
        for embedding in embeddings {
            check_dimensions(self.dimensions, embedding)?;
        }

        let conn = self.conn.get_mut().map_err(|_| IndexError::LockPoisoned)?;
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM vec_chunks", [])?;
        tx.execute("DELETE FROM chunks", [])?;
        tx.execute("DELETE FROM index_meta", [])?;

        for (chunk, embedding) in chunks.iter().zip(embeddings) {
            tx.execute(
                "INSERT INTO chunks (position, start_offset, end_offset, content) VALUES (?, ?, ?, ?)",
                params![
                    chunk.position as i64,
                    chunk.start as i64,
                    chunk.end as i64,
                    chunk.content
                ],
            )?;
            let chunk_id = tx.last_insert_rowid();

            tx.execute(
                "INSERT INTO vec_chunks (rowid, embedding) VALUES (?, ?)",
                params![chunk_id, serialize_vector(embedding)],
            )?;
        }

        tx.execute(
            "INSERT INTO index_meta (id, dimensions, chunk_count, built_at) VALUES (1, ?, ?, ?)",
            params![self.dimensions as i64, chunks.len() as i64, Utc::now()],
        )?;

        tx.commit()?;
        Ok(())
    }

    fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<SearchHit>, IndexError> {
        check_dimensions(self.dimensions, query)?;

        let conn = self.conn.lock().map_err(|_| IndexError::LockPoisoned)?;
        let mut stmt = conn.prepare(
            r#"
            SELECT
                c.content,
                c.position,
                vec_distance_cosine(v.embedding, ?) AS distance
            FROM vec_chunks v
            JOIN chunks c ON v.rowid = c.id
            ORDER BY distance ASC, c.position ASC
            LIMIT ?
            "#,
        )?;

        let rows = stmt.query_map(
            params![serialize_vector(query), top_k as i64],
            |row| {
                let distance: f64 = row.get(2)?;
                Ok(SearchHit {
                    content: row.get(0)?,
                    position: row.get::<_, i64>(1)? as usize,
                    similarity: 1.0 - distance,
                })
            },
        )?;

        let mut hits = Vec::new();
        for row in rows {
            hits.push(row?);
        }
        Ok(hits)
    }

    fn len(&self) -> Result<usize, IndexError> {
        let conn = self.conn.lock().map_err(|_| IndexError::LockPoisoned)?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(position: usize, content: &str) -> Chunk {
        Chunk {
            content: content.to_string(),
            position,
            start: position * 100,
            end: position * 100 + content.len(),
        }
    }

    fn padded(values: &[f32]) -> Vec<f32> {
        let mut v = vec![0.0f32; 384];
        v[..values.len()].copy_from_slice(values);
        v
    }

    #[test]
    fn test_schema_created() {
        let index = SqliteIndex::open_in_memory(384).unwrap();
        let conn = index.conn.lock().unwrap();
        let tables: i64 = conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type='table' AND name IN ('index_meta', 'chunks', 'vec_chunks')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 3);
    }

    #[test]
    fn test_serialize_vector() {
        let bytes = serialize_vector(&[1.0, 2.0, -3.5]);
        assert_eq!(bytes.len(), 12);
        // 1.0f32 = 0x3f800000, little endian
        assert_eq!(&bytes[0..4], &[0x00, 0x00, 0x80, 0x3f]);
        assert_eq!(&bytes[4..8], &[0x00, 0x00, 0x00, 0x40]);
        assert_eq!(&bytes[8..12], &[0x00, 0x00, 0x60, 0xc0]);
    }

    #[test]
    fn test_rebuild_and_search() {
        let mut index = SqliteIndex::open_in_memory(384).unwrap();
        let chunks = vec![chunk(0, "Rust programming"), chunk(1, "Gardening tips")];
        let embeddings = vec![padded(&[0.1, 0.2, 0.3]), padded(&[0.9, -0.8, 0.0])];
        index.rebuild(&chunks, &embeddings).unwrap();
        assert_eq!(index.len().unwrap(), 2);
        assert!(index.built_at().unwrap().is_some());

        let hits = index.search(&padded(&[0.1, 0.2, 0.3]), 3).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].content, "Rust programming");
        assert!(hits[0].similarity > 0.99);
        assert!(hits[1].similarity < hits[0].similarity);
    }

    #[test]
    fn test_rebuild_replaces_previous_contents() {
        let mut index = SqliteIndex::open_in_memory(384).unwrap();
        index
            .rebuild(
                &[chunk(0, "Hello"), chunk(1, "World")],
                &[padded(&[1.0]), padded(&[0.0, 1.0])],
            )
            .unwrap();
        index
            .rebuild(&[chunk(0, "Replaced")], &[padded(&[1.0])])
            .unwrap();

        assert_eq!(index.len().unwrap(), 1);
        let conn = index.conn.lock().unwrap();
        let vectors: i64 = conn
            .query_row("SELECT COUNT(*) FROM vec_chunks", [], |row| row.get(0))
            .unwrap();
        assert_eq!(vectors, 1);
    }

    #[test]
    fn test_create_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("index.sqlite3");
        let created = SqliteIndex::create(
            &path,
            384,
            &[chunk(0, "kept"), chunk(1, "also kept")],
            &[padded(&[1.0]), padded(&[0.0, 1.0])],
        )
        .unwrap();
        assert_eq!(created.len().unwrap(), 2);
        drop(created);

        let reopened = SqliteIndex::open(&path, 384).unwrap();
        assert_eq!(reopened.len().unwrap(), 2);
        assert!(reopened.built_at().unwrap().is_some());
        assert!(!staging_path(&path).exists());
    }

    #[test]
    fn test_open_index_survives_rebuild_of_same_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.sqlite3");
        let old_chunks = [chunk(0, "old a"), chunk(1, "old b"), chunk(2, "old c"), chunk(3, "old d")];
        let old_vectors: Vec<Vec<f32>> = (0..4).map(|i| padded(&[1.0, i as f32])).collect();
        let live = SqliteIndex::create(&path, 384, &old_chunks, &old_vectors).unwrap();
        let query = padded(&[1.0, 0.0]);
        assert_eq!(live.search(&query, 3).unwrap().len(), 3);

        let rebuilt = SqliteIndex::create(&path, 384, &[chunk(0, "new")], &[padded(&[1.0])]).unwrap();

        let hits = live.search(&query, 3).unwrap();
        assert_eq!(hits.len(), 3);
        assert!(hits.iter().all(|h| h.content.starts_with("old")));
        assert_eq!(rebuilt.search(&query, 3).unwrap()[0].content, "new");
        assert_eq!(SqliteIndex::open(&path, 384).unwrap().len().unwrap(), 1);
    }

    #[test]
    fn test_failed_create_keeps_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.sqlite3");
        drop(SqliteIndex::create(&path, 384, &[chunk(0, "good")], &[padded(&[1.0])]).unwrap());

        let err = SqliteIndex::create(&path, 384, &[chunk(0, "bad")], &[vec![1.0]]);
        assert!(matches!(err, Err(IndexError::DimensionMismatch { .. })));
        assert!(!staging_path(&path).exists());
        assert_eq!(SqliteIndex::open(&path, 384).unwrap().len().unwrap(), 1);
    }

    #[test]
    fn test_create_with_new_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.sqlite3");
        drop(SqliteIndex::create(&path, 384, &[], &[]).unwrap());

        let index = SqliteIndex::create(
            &path,
            8,
            &[chunk(0, "small")],
            &[vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]],
        )
        .unwrap();
        assert_eq!(index.len().unwrap(), 1);
    }

    #[test]
    fn test_search_rejects_wrong_dimensions() {
        let index = SqliteIndex::open_in_memory(384).unwrap();
        assert!(matches!(
            index.search(&[1.0, 2.0], 3),
            Err(IndexError::DimensionMismatch { .. })
        ));
    }
}
