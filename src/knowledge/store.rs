//! SQLite-backed vector store.
//!
//! One table holds the chunks of every collection. Vectors are stored as
//! little-endian f32 blobs and searched with a brute-force cosine scan,
//! which is plenty for a single team's document set.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection, Transaction};
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::splitter::CHUNK_INDEX_KEY;
use crate::domain::Document;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Failed to create store directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode chunk metadata: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("Store lock poisoned")]
    Poisoned,

    #[error("Store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// A stored chunk and its similarity to the query
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub document: Document,
    pub score: f64,
}

/// Named collection inside a SQLite vector file
#[derive(Clone)]
pub struct VectorStore {
    conn: Arc<Mutex<Connection>>,
    collection: String,
    path: PathBuf,
}

impl VectorStore {
    /// Open (creating if needed) the store at `path`
    pub async fn open(path: &Path, collection: &str) -> Result<Self, StoreError> {
        let db_path = path.to_path_buf();
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection, StoreError> {
            if let Some(parent) = db_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let conn = Connection::open(&db_path)?;
            init_schema(&conn)?;
            Ok(conn)
        })
        .await??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            collection: collection.to_string(),
            path: path.to_path_buf(),
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run blocking SQLite work off the async runtime
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection, &str) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let collection = self.collection.clone();

        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| StoreError::Poisoned)?;
            f(&mut guard, &collection)
        })
        .await?
    }

    /// Remove every chunk of this collection; returns how many were removed
    pub async fn clear(&self) -> Result<usize, StoreError> {
        self.with_conn(|conn, collection| {
            Ok(conn.execute("DELETE FROM chunks WHERE collection = ?1", params![collection])?)
        })
        .await
    }

    /// Insert or replace chunks with their embeddings
    pub async fn upsert(
        &self,
        model: &str,
        chunks: Vec<(Document, Vec<f32>)>,
    ) -> Result<usize, StoreError> {
        let model = model.to_string();

        self.with_conn(move |conn, collection| {
            let tx = conn.transaction()?;
            let stored = insert_chunks(&tx, collection, &model, &chunks)?;
            tx.commit()?;
            Ok(stored)
        })
        .await
    }

    /// Swap the whole collection for `chunks` in one transaction.
    ///
    /// Readers see either the old collection or the new one; a failed
    /// insert rolls the delete back.
    pub async fn replace(
        &self,
        model: &str,
        chunks: Vec<(Document, Vec<f32>)>,
    ) -> Result<usize, StoreError> {
        let model = model.to_string();

        self.with_conn(move |conn, collection| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM chunks WHERE collection = ?1", params![collection])?;
            let stored = insert_chunks(&tx, collection, &model, &chunks)?;
            tx.commit()?;
            Ok(stored)
        })
        .await
    }

    /// Number of chunks in this collection
    pub async fn count(&self) -> Result<usize, StoreError> {
        self.with_conn(|conn, collection| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM chunks WHERE collection = ?1",
                params![collection],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
        .await
    }

    /// Top `k` chunks by cosine similarity to `query`, best first.
    ///
    /// Chunks embedded with a different dimensionality are skipped.
    pub async fn search(&self, query: Vec<f32>, k: usize) -> Result<Vec<ScoredChunk>, StoreError> {
        self.with_conn(move |conn, collection| {
            let query_norm: f64 = query.iter().map(|x| (*x as f64) * (*x as f64)).sum();
            if query_norm == 0.0 || k == 0 {
                return Ok(Vec::new());
            }

            let mut stmt = conn.prepare(
                "SELECT content, metadata, embedding, dimensions
                 FROM chunks WHERE collection = ?1 ORDER BY rowid",
            )?;
            let rows = stmt.query_map(params![collection], |row| {
                let content: String = row.get(0)?;
                let metadata: String = row.get(1)?;
                let blob: Vec<u8> = row.get(2)?;
                let dimensions: i64 = row.get(3)?;
                Ok((content, metadata, blob, dimensions))
            })?;

            let mut scored = Vec::new();
            for row in rows {
                let (content, metadata, blob, dimensions) = row?;
                if dimensions as usize != query.len() {
                    continue;
                }

                let stored = bytes_to_f32_vec(&blob);
                let metadata: BTreeMap<String, String> = serde_json::from_str(&metadata)?;
                scored.push(ScoredChunk {
                    document: Document { content, metadata },
                    score: cosine_similarity(&query, &stored),
                });
            }

            scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
            scored.truncate(k);

            Ok(scored)
        })
        .await
    }
}

fn insert_chunks(
    tx: &Transaction<'_>,
    collection: &str,
    model: &str,
    chunks: &[(Document, Vec<f32>)],
) -> Result<usize, StoreError> {
    let mut stmt = tx.prepare(
        "INSERT OR REPLACE INTO chunks
         (id, collection, source, chunk_index, content, metadata, embedding, dimensions, model)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    )?;

    for (document, embedding) in chunks {
        let source = document.source().unwrap_or("");
        let index: i64 = document
            .metadata
            .get(CHUNK_INDEX_KEY)
            .and_then(|i| i.parse().ok())
            .unwrap_or(0);

        stmt.execute(params![
            chunk_id(collection, source, index, &document.content),
            collection,
            source,
            index,
            document.content,
            serde_json::to_string(&document.metadata)?,
            f32_vec_to_bytes(embedding),
            embedding.len() as i64,
            model,
        ])?;
    }

    Ok(chunks.len())
}

fn init_schema(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            collection TEXT NOT NULL,
            source TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            content TEXT NOT NULL,
            metadata TEXT NOT NULL,
            embedding BLOB NOT NULL,
            dimensions INTEGER NOT NULL,
            model TEXT NOT NULL,
            created_at INTEGER DEFAULT (strftime('%s', 'now'))
        );
        CREATE INDEX IF NOT EXISTS idx_chunks_collection ON chunks(collection);",
    )
}

/// Stable id: SHA-256 over collection, source, position and content
pub fn chunk_id(collection: &str, source: &str, index: i64, content: &str) -> String {
    let index = index.to_string();
    let mut hasher = Sha256::new();
    for part in [collection, source, index.as_str(), content] {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

fn f32_vec_to_bytes(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn bytes_to_f32_vec(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let dot: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| (*x as f64) * (*y as f64))
        .sum();
    let norm_a = a.iter().map(|x| (*x as f64) * (*x as f64)).sum::<f64>().sqrt();
    let norm_b = b.iter().map(|x| (*x as f64) * (*x as f64)).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn chunk(content: &str, source: &str, index: usize) -> Document {
        Document::new(content)
            .with_metadata("source", source)
            .with_metadata(CHUNK_INDEX_KEY, index.to_string())
    }

    #[test]
    fn test_blob_roundtrip_preserves_values() {
        let v = vec![0.5_f32, -1.25, 3.0];
        assert_eq!(bytes_to_f32_vec(&f32_vec_to_bytes(&v)), v);
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-9);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-9);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_chunk_id_is_stable_and_distinct() {
        let a = chunk_id("docs", "a.md", 0, "text");
        assert_eq!(a, chunk_id("docs", "a.md", 0, "text"));
        assert_ne!(a, chunk_id("docs", "a.md", 1, "text"));
        assert_ne!(a, chunk_id("other", "a.md", 0, "text"));
        assert_eq!(a.len(), 64);
    }

    #[tokio::test]
    async fn test_search_ranks_and_skips_mismatched_dimensions() {
        let temp = TempDir::new().unwrap();
        let store = VectorStore::open(&temp.path().join("kb.db"), "docs").await.unwrap();

        store
            .upsert(
                "test-embed",
                vec![
                    (chunk("north", "a.md", 0), vec![0.0, 1.0]),
                    (chunk("east", "a.md", 1), vec![1.0, 0.0]),
                    (chunk("north-east", "b.md", 0), vec![1.0, 1.0]),
                    (chunk("odd", "c.md", 0), vec![1.0, 0.0, 0.0]),
                ],
            )
            .await
            .unwrap();
        assert_eq!(store.count().await.unwrap(), 4);

        let results = store.search(vec![1.0, 0.1], 2).await.unwrap();
        let contents: Vec<&str> = results.iter().map(|r| r.document.content.as_str()).collect();
        assert_eq!(contents, vec!["east", "north-east"]);
        assert_eq!(results[0].document.source(), Some("a.md"));
    }

    #[tokio::test]
    async fn test_replace_swaps_collection_contents() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("kb.db");
        let docs = VectorStore::open(&path, "docs").await.unwrap();
        let other = VectorStore::open(&path, "other").await.unwrap();

        docs.upsert(
            "m",
            vec![
                (chunk("old one", "a.md", 0), vec![1.0, 0.0]),
                (chunk("old two", "a.md", 1), vec![0.0, 1.0]),
            ],
        )
        .await
        .unwrap();
        other
            .upsert("m", vec![(chunk("kept", "b.md", 0), vec![1.0, 0.0])])
            .await
            .unwrap();

        let stored = docs
            .replace("m", vec![(chunk("new", "c.md", 0), vec![1.0, 1.0])])
            .await
            .unwrap();

        assert_eq!(stored, 1);
        assert_eq!(docs.count().await.unwrap(), 1);
        assert_eq!(other.count().await.unwrap(), 1);
        let results = docs.search(vec![1.0, 0.0], 3).await.unwrap();
        assert_eq!(results[0].document.content, "new");
    }

    #[tokio::test]
    async fn test_upsert_replaces_identical_chunks_and_clear_scopes_to_collection() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("kb.db");
        let docs = VectorStore::open(&path, "docs").await.unwrap();
        let other = VectorStore::open(&path, "other").await.unwrap();

        let item = || vec![(chunk("same", "a.md", 0), vec![1.0, 0.0])];
        docs.upsert("m", item()).await.unwrap();
        docs.upsert("m", item()).await.unwrap();
        other.upsert("m", item()).await.unwrap();
        assert_eq!(docs.count().await.unwrap(), 1);

        assert_eq!(docs.clear().await.unwrap(), 1);
        assert_eq!(docs.count().await.unwrap(), 0);
        assert_eq!(other.count().await.unwrap(), 1);
    }
}
