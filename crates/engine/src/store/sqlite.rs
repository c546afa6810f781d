//! SQLite-backed vector store.
//!
//! One `fragments` table keyed by (scan_root, id); metadata columns are plain
//! columns so index state can be paged with a keyset cursor, and embeddings
//! are little-endian f32 BLOBs. rusqlite is synchronous, so every call runs on
//! the blocking pool.

use super::{StoreStats, VectorStore};
use crate::types::{FragmentMetadata, IndexEntry, IndexPage, StoredFragment};
use docsync_core::{AppError, AppResult};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS fragments (
    scan_root TEXT NOT NULL,
    id TEXT NOT NULL,
    source_path TEXT NOT NULL,
    file_fingerprint TEXT NOT NULL,
    ordinal INTEGER NOT NULL,
    config_version TEXT NOT NULL,
    fragment_count INTEGER NOT NULL,
    text TEXT NOT NULL,
    embedding BLOB NOT NULL,
    PRIMARY KEY (scan_root, id)
);

CREATE INDEX IF NOT EXISTS idx_fragments_source ON fragments(scan_root, source_path);
"#;

fn store_err(context: &str, e: rusqlite::Error) -> AppError {
    AppError::Store(format!("{}: {}", context, e))
}

/// SQLite vector store sharing one connection across workers.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `db_path`.
    pub fn open(db_path: &Path) -> AppResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AppError::Store(format!("Failed to create index directory: {}", e))
            })?;
        }

        let conn = Connection::open(db_path)
            .map_err(|e| store_err("Failed to open SQLite index", e))?;

        conn.execute_batch(SCHEMA)
            .map_err(|e| store_err("Failed to create tables", e))?;

        tracing::debug!("Opened SQLite index at {:?}", db_path);
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: db_path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` against the connection on the blocking pool.
    ///
    /// A caller that gives up under `with_timeout` does not stop `f`: an
    /// upsert may still commit after the orchestrator rolled the file back.
    /// Every row carries its file's `fragment_count`, so a partial leftover
    /// reads as incomplete and the file is rewritten on the next run.
    async fn with_conn<T, F>(&self, f: F) -> AppResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> AppResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| AppError::Store("SQLite connection lock poisoned".to_string()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| AppError::Store(format!("SQLite task failed: {}", e)))?
    }

    /// Fetch one stored fragment, vector included.
    pub async fn get(&self, scan_root: &str, id: &str) -> AppResult<Option<StoredFragment>> {
        let scan_root = scan_root.to_string();
        let id = id.to_string();

        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT id, source_path, file_fingerprint, ordinal, config_version,
                            fragment_count, text, embedding
                     FROM fragments WHERE scan_root = ?1 AND id = ?2",
                    params![scan_root, id],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, i64>(3)?,
                            row.get::<_, String>(4)?,
                            row.get::<_, i64>(5)?,
                            row.get::<_, String>(6)?,
                            row.get::<_, Vec<u8>>(7)?,
                        ))
                    },
                )
                .optional()
                .map_err(|e| store_err("Failed to read fragment", e))?;

            row.map(
                |(id, source_path, file_fingerprint, ordinal, config_version, count, text, blob)| {
                    Ok(StoredFragment {
                        id,
                        text,
                        vector: bytes_to_embedding(&blob)?,
                        metadata: FragmentMetadata {
                            scan_root: scan_root.clone(),
                            source_path,
                            file_fingerprint,
                            ordinal: ordinal as u32,
                            config_version,
                            fragment_count: count as u32,
                        },
                    })
                },
            )
            .transpose()
        })
        .await
    }
}

#[async_trait::async_trait]
impl VectorStore for SqliteStore {
    fn backend_name(&self) -> &str {
        "sqlite"
    }

    async fn ping(&self) -> AppResult<()> {
        self.with_conn(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .map_err(|e| store_err("SQLite ping failed", e))?;
            Ok(())
        })
        .await
    }

    async fn upsert(&self, fragments: &[StoredFragment]) -> AppResult<()> {
        if fragments.is_empty() {
            return Ok(());
        }

        let fragments = fragments.to_vec();
        self.with_conn(move |conn| {
            let tx = conn
                .transaction()
                .map_err(|e| store_err("Failed to begin transaction", e))?;
            {
                let mut stmt = tx
                    .prepare_cached(
                        "INSERT OR REPLACE INTO fragments
                         (scan_root, id, source_path, file_fingerprint, ordinal,
                          config_version, fragment_count, text, embedding)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    )
                    .map_err(|e| store_err("Failed to prepare upsert", e))?;

                for fragment in &fragments {
                    let meta = &fragment.metadata;
                    stmt.execute(params![
                        meta.scan_root,
                        fragment.id,
                        meta.source_path,
                        meta.file_fingerprint,
                        meta.ordinal as i64,
                        meta.config_version,
                        meta.fragment_count as i64,
                        fragment.text,
                        embedding_to_bytes(&fragment.vector),
                    ])
                    .map_err(|e| store_err("Failed to upsert fragment", e))?;
                }
            }
            tx.commit()
                .map_err(|e| store_err("Failed to commit upsert", e))
        })
        .await
    }

    async fn delete_by_ids(&self, scan_root: &str, ids: &[String]) -> AppResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let scan_root = scan_root.to_string();
        let ids = ids.to_vec();
        self.with_conn(move |conn| {
            let tx = conn
                .transaction()
                .map_err(|e| store_err("Failed to begin transaction", e))?;
            let mut removed = 0;
            {
                let mut stmt = tx
                    .prepare_cached("DELETE FROM fragments WHERE scan_root = ?1 AND id = ?2")
                    .map_err(|e| store_err("Failed to prepare delete", e))?;
                for id in &ids {
                    removed += stmt
                        .execute(params![scan_root, id])
                        .map_err(|e| store_err("Failed to delete fragment", e))?;
                }
            }
            tx.commit()
                .map_err(|e| store_err("Failed to commit delete", e))?;
            Ok(removed)
        })
        .await
    }

    async fn delete_by_source(&self, scan_root: &str, source_path: &str) -> AppResult<usize> {
        let scan_root = scan_root.to_string();
        let source_path = source_path.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM fragments WHERE scan_root = ?1 AND source_path = ?2",
                params![scan_root, source_path],
            )
            .map_err(|e| store_err("Failed to delete source", e))
        })
        .await
    }

    async fn read_index_page(
        &self,
        scan_root: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> AppResult<IndexPage> {
        let scan_root = scan_root.to_string();
        let cursor = cursor.unwrap_or_default().to_string();

        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare_cached(
                    "SELECT id, source_path, file_fingerprint, ordinal, config_version, fragment_count
                     FROM fragments
                     WHERE scan_root = ?1 AND id > ?2
                     ORDER BY id
                     LIMIT ?3",
                )
                .map_err(|e| store_err("Failed to prepare page query", e))?;

            let rows = stmt
                .query_map(params![scan_root, cursor, limit as i64], |row| {
                    Ok(IndexEntry {
                        id: row.get(0)?,
                        metadata: FragmentMetadata {
                            scan_root: scan_root.clone(),
                            source_path: row.get(1)?,
                            file_fingerprint: row.get(2)?,
                            ordinal: row.get::<_, i64>(3)? as u32,
                            config_version: row.get(4)?,
                            fragment_count: row.get::<_, i64>(5)? as u32,
                        },
                    })
                })
                .map_err(|e| store_err("Failed to query index page", e))?;

            let entries = rows
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| store_err("Failed to read index row", e))?;

            let next_cursor = if entries.len() == limit {
                entries.last().map(|entry: &IndexEntry| entry.id.clone())
            } else {
                None
            };

            Ok(IndexPage {
                entries,
                next_cursor,
            })
        })
        .await
    }

    async fn stats(&self, scan_root: &str) -> AppResult<StoreStats> {
        let scan_root = scan_root.to_string();
        self.with_conn(move |conn| {
            let (files, fragments) = conn
                .query_row(
                    "SELECT COUNT(DISTINCT source_path), COUNT(*) FROM fragments WHERE scan_root = ?1",
                    params![scan_root],
                    |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
                )
                .map_err(|e| store_err("Failed to count fragments", e))?;

            Ok(StoreStats {
                files: files as usize,
                fragments: fragments as usize,
            })
        })
        .await
    }

    async fn reset(&self, scan_root: &str) -> AppResult<usize> {
        let scan_root = scan_root.to_string();
        let removed = self
            .with_conn(move |conn| {
                conn.execute("DELETE FROM fragments WHERE scan_root = ?1", params![scan_root])
                    .map_err(|e| store_err("Failed to reset index", e))
            })
            .await?;

        tracing::info!("Removed {} fragments from {:?}", removed, self.path);
        Ok(removed)
    }
}

/// Convert embedding vector to bytes for storage.
fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|value| value.to_le_bytes()).collect()
}

/// Convert bytes back to embedding vector.
fn bytes_to_embedding(bytes: &[u8]) -> AppResult<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(AppError::Store(format!(
            "Invalid embedding blob length {}",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}
