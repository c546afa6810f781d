//! Fixtures shared by the sync scenarios.

use crate::config::SyncConfig;
use crate::embeddings::providers::MockProvider;
use crate::embeddings::EmbeddingProvider;
use crate::extract::PlainTextExtractor;
use crate::orchestrator::SyncOrchestrator;
use crate::scan::root_key;
use crate::store::{MemoryStore, StoreStats, VectorStore};
use crate::types::{IndexPage, StoredFragment, SyncSummary};
use docsync_core::{AppError, AppResult};
use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

pub const DIMENSIONS: usize = 384;

/// Small fragments and pages so a handful of files exercises batching and
/// paging.
pub fn test_config() -> SyncConfig {
    let mut config = SyncConfig::default();
    config.fragmenter.target_length = 40;
    config.fragmenter.overlap = 5;
    config.fragmenter.boundary_window = 10;
    config.embedding.batch_size = 2;
    config.embedding.max_attempts = 2;
    config.embedding.base_delay_ms = 1;
    config.embedding.max_delay_ms = 2;
    config.store.write_batch_size = 2;
    config.store.page_size = 3;
    config.concurrency = 2;
    config
}

/// Text long enough to produce several fragments under [`test_config`].
pub fn long_text(topic: &str) -> String {
    (1..=5)
        .map(|n| format!("Sentence {} about {} goes here.", n, topic))
        .collect::<Vec<_>>()
        .join(" ")
}

/// A scan root and lock directory inside one temporary directory.
pub struct Fixture {
    _temp: TempDir,
    pub root: PathBuf,
    pub lock_dir: PathBuf,
    pub store: Arc<MemoryStore>,
}

impl Fixture {
    pub fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("docs");
        let lock_dir = temp.path().join("locks");
        fs::create_dir_all(&root).unwrap();

        Self {
            _temp: temp,
            root,
            lock_dir,
            store: Arc::new(MemoryStore::new()),
        }
    }

    pub fn write(&self, path: &str, content: &str) {
        let full = self.root.join(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(full, content).unwrap();
    }

    pub fn remove(&self, path: &str) {
        fs::remove_file(self.root.join(path)).unwrap();
    }

    pub fn root_key(&self) -> String {
        root_key(&self.root).unwrap()
    }

    /// Orchestrator over the fixture's memory store and the mock provider.
    pub fn orchestrator(&self, config: SyncConfig) -> SyncOrchestrator {
        self.orchestrator_with(
            self.store.clone(),
            Arc::new(MockProvider::new(DIMENSIONS)),
            config,
        )
    }

    pub fn orchestrator_with(
        &self,
        store: Arc<dyn VectorStore>,
        provider: Arc<dyn EmbeddingProvider>,
        config: SyncConfig,
    ) -> SyncOrchestrator {
        SyncOrchestrator::new(
            store,
            provider,
            Arc::new(PlainTextExtractor::new()),
            config,
            self.lock_dir.clone(),
        )
        .unwrap()
    }

    pub async fn sync(&self, orchestrator: &SyncOrchestrator) -> SyncSummary {
        orchestrator
            .run(&self.root, &CancellationToken::new())
            .await
            .unwrap()
    }

    /// Source paths present in the memory store.
    pub async fn indexed_paths(&self) -> BTreeSet<String> {
        self.store
            .fragments(&self.root_key())
            .await
            .into_iter()
            .map(|f| f.metadata.source_path)
            .collect()
    }

    /// Stored fragments of one source path, in ordinal order.
    pub async fn fragments_of(&self, path: &str) -> Vec<StoredFragment> {
        let mut fragments: Vec<StoredFragment> = self
            .store
            .fragments(&self.root_key())
            .await
            .into_iter()
            .filter(|f| f.metadata.source_path == path)
            .collect();
        fragments.sort_by_key(|f| f.metadata.ordinal);
        fragments
    }
}

/// Mock provider that permanently rejects any batch containing a marker.
#[derive(Debug)]
pub struct RejectingProvider {
    inner: MockProvider,
    marker: String,
    pub calls: AtomicUsize,
}

impl RejectingProvider {
    pub fn new(marker: &str) -> Self {
        Self {
            inner: MockProvider::new(DIMENSIONS),
            marker: marker.to_string(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for RejectingProvider {
    fn provider_name(&self) -> &str {
        "rejecting"
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn dimensions(&self) -> usize {
        DIMENSIONS
    }

    async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if texts.iter().any(|t| t.contains(&self.marker)) {
            return Err(AppError::EmbeddingRejected(
                "input rejected by provider".to_string(),
            ));
        }
        self.inner.embed_batch(texts).await
    }
}

/// Memory store wrapper with switchable failures.
#[derive(Debug, Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    pub unreachable: AtomicBool,
    pub fail_deletes: AtomicBool,
    /// Source path whose upserts start failing after `upserts_allowed` calls
    pub fail_upsert_path: Mutex<Option<String>>,
    pub upserts_allowed: AtomicUsize,
    pub upsert_calls: AtomicUsize,
    pub writes: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unreachable() -> Self {
        let store = Self::new();
        store.unreachable.store(true, Ordering::SeqCst);
        store
    }

    pub fn fail_upserts_of(&self, path: &str, allowed: usize) {
        *self.fail_upsert_path.lock().unwrap() = Some(path.to_string());
        self.upserts_allowed.store(allowed, Ordering::SeqCst);
    }

    fn check_reachable(&self) -> AppResult<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(AppError::Store("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl VectorStore for FlakyStore {
    fn backend_name(&self) -> &str {
        "flaky"
    }

    async fn ping(&self) -> AppResult<()> {
        self.check_reachable()
    }

    async fn upsert(&self, fragments: &[StoredFragment]) -> AppResult<()> {
        self.check_reachable()?;

        let target = self.fail_upsert_path.lock().unwrap().clone();
        if let Some(path) = target {
            if fragments.iter().any(|f| f.metadata.source_path == path) {
                let call = self.upsert_calls.fetch_add(1, Ordering::SeqCst);
                if call >= self.upserts_allowed.load(Ordering::SeqCst) {
                    return Err(AppError::Store(format!("write of {} failed", path)));
                }
            }
        }

        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.upsert(fragments).await
    }

    async fn delete_by_ids(&self, scan_root: &str, ids: &[String]) -> AppResult<usize> {
        self.check_reachable()?;
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(AppError::Store("delete failed".to_string()));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete_by_ids(scan_root, ids).await
    }

    async fn delete_by_source(&self, scan_root: &str, source_path: &str) -> AppResult<usize> {
        self.check_reachable()?;
        self.inner.delete_by_source(scan_root, source_path).await
    }

    async fn read_index_page(
        &self,
        scan_root: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> AppResult<IndexPage> {
        self.check_reachable()?;
        self.inner.read_index_page(scan_root, cursor, limit).await
    }

    async fn stats(&self, scan_root: &str) -> AppResult<StoreStats> {
        self.check_reachable()?;
        self.inner.stats(scan_root).await
    }

    async fn reset(&self, scan_root: &str) -> AppResult<usize> {
        self.check_reachable()?;
        self.inner.reset(scan_root).await
    }
}
