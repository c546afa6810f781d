//! Vector store abstraction.
//!
//! The store is the only durable record of what has been indexed: every
//! fragment carries its [`FragmentMetadata`], and the index state is rebuilt
//! from that metadata on every run.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::config::StoreConfig;
use crate::types::{IndexPage, StoredFragment};
use docsync_core::{AppError, AppResult};
use serde::Serialize;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Aggregate counts for one scan root.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub files: usize,
    pub fragments: usize,
}

/// Trait for vector store backends.
///
/// All operations are scoped to a scan root so several trees can share one
/// store without seeing each other's fragments.
#[async_trait::async_trait]
pub trait VectorStore: Send + Sync + std::fmt::Debug {
    /// Backend name (e.g., "sqlite", "memory")
    fn backend_name(&self) -> &str;

    /// Check that the store is reachable.
    async fn ping(&self) -> AppResult<()>;

    /// Insert or replace fragments keyed by (scan root, id).
    async fn upsert(&self, fragments: &[StoredFragment]) -> AppResult<()>;

    /// Delete fragments by id; returns how many existed.
    async fn delete_by_ids(&self, scan_root: &str, ids: &[String]) -> AppResult<usize>;

    /// Delete every fragment of one source path; returns how many existed.
    async fn delete_by_source(&self, scan_root: &str, source_path: &str) -> AppResult<usize>;

    /// Read up to `limit` metadata entries with ids strictly after `cursor`,
    /// in ascending id order.
    async fn read_index_page(
        &self,
        scan_root: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> AppResult<IndexPage>;

    /// Count indexed files and fragments.
    async fn stats(&self, scan_root: &str) -> AppResult<StoreStats>;

    /// Remove every fragment of a scan root; returns how many existed.
    async fn reset(&self, scan_root: &str) -> AppResult<usize>;
}

/// Run one store call under a time limit.
pub async fn with_timeout<T, F>(limit: Duration, operation: &str, call: F) -> AppResult<T>
where
    F: Future<Output = AppResult<T>>,
{
    tokio::time::timeout(limit, call).await.map_err(|_| {
        AppError::Timeout(format!("store {} exceeded {:?}", operation, limit))
    })?
}

/// Open the configured store backend.
pub fn create_store(config: &StoreConfig, workspace: &Path) -> AppResult<Arc<dyn VectorStore>> {
    config.validate()?;

    match config.backend.as_str() {
        "memory" => Ok(Arc::new(MemoryStore::new())),
        "sqlite" => Ok(Arc::new(SqliteStore::open(&config.resolve_path(workspace))?)),
        other => Err(AppError::Config(format!(
            "Unknown store backend: '{}'",
            other
        ))),
    }
}
