//! Sync orchestration: scan, diff, delete stale fragments, reprocess changed
//! files and report.
//!
//! A run moves through [`SyncPhase`]s in order. Everything up to and including
//! the diff is read-only, and any error there aborts the run before the index
//! is touched. From the delete phase on, failures are isolated per file and
//! collected into the [`SyncSummary`].

use crate::config::SyncConfig;
use crate::embeddings::{BatchPolicy, EmbeddingBatcher, EmbeddingProvider};
use crate::extract::TextExtractor;
use crate::fingerprint::fingerprint_file;
use crate::fragment::{empty_marker_id, Fragmenter};
use crate::lock::RunLock;
use crate::plan::plan;
use crate::progress::{ProgressReporter, SyncPhase};
use crate::scan::{root_key, scan_tree};
use crate::state::read_index_state;
use crate::store::{with_timeout, StoreStats, VectorStore};
use crate::types::{
    ChangePlan, FailureKind, FileFailure, FragmentMetadata, IndexState, SourceFileRecord,
    StoredFragment, SyncSummary,
};
use docsync_core::{AppError, AppResult};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Result of a dry run.
#[derive(Debug, Clone, Serialize)]
pub struct PlanReport {
    pub scan_root: String,
    pub plan: ChangePlan,
    /// Files that exist but could not be read; excluded from the plan
    pub failures: Vec<FileFailure>,
}

/// What the index holds for a scan root.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub scan_root: String,
    pub backend: String,
    #[serde(flatten)]
    pub stats: StoreStats,
}

/// Live tree and index state compared for one run.
struct Diff {
    records: BTreeMap<String, SourceFileRecord>,
    indexed: IndexState,
    plan: ChangePlan,
    scan_failures: Vec<FileFailure>,
}

/// How one file fared in the reprocess phase.
enum FileOutcome {
    Written { updated: bool, fragments: usize },
    Failed(FileFailure),
    Pending(String),
}

/// Drives sync runs against one vector store with one embedding provider.
///
/// Collaborators are constructed once by the caller and shared by every run
/// and every concurrent file worker.
#[derive(Debug)]
pub struct SyncOrchestrator {
    store: Arc<dyn VectorStore>,
    extractor: Arc<dyn TextExtractor>,
    fragmenter: Fragmenter,
    batcher: EmbeddingBatcher,
    config: SyncConfig,
    lock_dir: PathBuf,
    progress: ProgressReporter,
}

impl SyncOrchestrator {
    /// Validate the configuration and wire the collaborators together.
    pub fn new(
        store: Arc<dyn VectorStore>,
        provider: Arc<dyn EmbeddingProvider>,
        extractor: Arc<dyn TextExtractor>,
        config: SyncConfig,
        lock_dir: PathBuf,
    ) -> AppResult<Self> {
        config.validate()?;
        config
            .embedding
            .validate_consistency(provider.provider_name(), provider.dimensions())?;

        let fragmenter = Fragmenter::new(config.fragmenter.clone())?;
        let batcher = EmbeddingBatcher::new(provider, BatchPolicy::from_config(&config.embedding));

        Ok(Self {
            store,
            extractor,
            fragmenter,
            batcher,
            config,
            lock_dir,
            progress: ProgressReporter::noop(),
        })
    }

    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    /// Version tag of the active fragmenter configuration.
    pub fn config_version(&self) -> &str {
        self.fragmenter.version()
    }

    fn store_timeout(&self) -> Duration {
        self.config.store.call_timeout()
    }

    fn stale_after(&self) -> Duration {
        Duration::from_secs(self.config.lock.stale_after_secs)
    }

    /// Compute the change plan without writing anything.
    pub async fn plan(&self, scan_root: &Path) -> AppResult<PlanReport> {
        let root = root_key(scan_root)?;
        let diff = self.scan_and_diff(&root).await?;

        Ok(PlanReport {
            scan_root: root,
            plan: diff.plan,
            failures: diff.scan_failures,
        })
    }

    /// Indexed file and fragment counts.
    pub async fn status(&self, scan_root: &Path) -> AppResult<StatusReport> {
        let root = root_key(scan_root)?;
        let stats = with_timeout(self.store_timeout(), "stats", self.store.stats(&root)).await?;

        Ok(StatusReport {
            scan_root: root,
            backend: self.store.backend_name().to_string(),
            stats,
        })
    }

    /// Remove every fragment of a scan root, holding the run lock meanwhile.
    pub async fn reset(&self, scan_root: &Path) -> AppResult<usize> {
        let root = root_key(scan_root)?;
        let run_id = Uuid::new_v4().to_string();
        let _lock = RunLock::acquire(&self.lock_dir, &root, &run_id, self.stale_after()).await?;

        let removed = with_timeout(self.store_timeout(), "reset", self.store.reset(&root)).await?;
        info!("Reset index for {}: {} fragments removed", root, removed);
        Ok(removed)
    }

    /// Execute one sync run.
    ///
    /// Returns an error only for fatal conditions (lock held, scan root
    /// missing, store unreachable, index unreadable), all of which are raised
    /// before anything is deleted. Per-file problems end up in the summary.
    pub async fn run(&self, scan_root: &Path, cancel: &CancellationToken) -> AppResult<SyncSummary> {
        let started = Instant::now();
        let root = root_key(scan_root)?;
        let run_id = Uuid::new_v4().to_string();
        let _lock = RunLock::acquire(&self.lock_dir, &root, &run_id, self.stale_after()).await?;

        info!("Sync run {} started for {}", run_id, root);

        let diff = self.scan_and_diff(&root).await?;
        let mut summary = SyncSummary {
            run_id,
            scan_root: root.clone(),
            planned: diff.plan.counts(),
            ..Default::default()
        };
        summary.failures.extend(diff.scan_failures.iter().cloned());

        let delete_failed = self.delete_phase(&root, &diff, cancel, &mut summary).await;
        self.reprocess_phase(&root, &diff, &delete_failed, cancel, &mut summary)
            .await;

        self.progress.phase(SyncPhase::Reporting, None, "building summary");
        summary.failures.sort_by(|a, b| a.path.cmp(&b.path));
        summary.pending.sort();
        summary.pending.dedup();
        summary.cancelled = cancel.is_cancelled();
        summary.duration_secs = started.elapsed().as_secs_f64();

        info!(
            phase = %SyncPhase::Reporting,
            "Sync run {} finished in {:.2}s: {} added, {} updated, {} deleted files; \
             {} fragments written, {} removed; {} failures, {} pending",
            summary.run_id,
            summary.duration_secs,
            summary.files_added,
            summary.files_updated,
            summary.files_deleted,
            summary.fragments_added,
            summary.fragments_removed,
            summary.failures.len(),
            summary.pending.len()
        );
        debug!(phase = %SyncPhase::Done, "Releasing run lock for {}", root);
        self.progress.phase(SyncPhase::Done, None, "sync complete");

        Ok(summary)
    }

    /// SCANNING and DIFFING. Errors here are fatal.
    async fn scan_and_diff(&self, root: &str) -> AppResult<Diff> {
        info!(phase = %SyncPhase::Scanning, "Scanning {}", root);
        self.progress
            .phase(SyncPhase::Scanning, None, format!("scanning {}", root));

        let scan_root = PathBuf::from(root);
        let scan_config = self.config.scan.clone();
        let scan = tokio::task::spawn_blocking(move || scan_tree(&scan_root, &scan_config))
            .await
            .map_err(|e| AppError::Sync(format!("Scan task failed: {}", e)))??;

        info!(phase = %SyncPhase::Diffing, "Diffing {} live files against the index", scan.records.len());
        self.progress.phase(
            SyncPhase::Diffing,
            Some(scan.records.len() as u64),
            "reading index state",
        );

        with_timeout(self.store_timeout(), "ping", self.store.ping())
            .await
            .map_err(|e| AppError::Store(format!("Vector store unreachable: {}", e)))?;

        let mut indexed = read_index_state(
            self.store.as_ref(),
            root,
            self.config.store.page_size,
            self.store_timeout(),
            self.config.scan.case_insensitive,
        )
        .await?;

        // Unreadable files keep whatever the index holds for them. A path that
        // also names a live record (a normalization collision) is diffed as usual.
        let live: BTreeSet<&str> = scan.records.iter().map(|r| r.path.as_str()).collect();
        for path in scan.failed_paths() {
            if !live.contains(path) {
                indexed.remove(path);
            }
        }

        let change_plan = plan(&scan.records, &indexed, self.fragmenter.version());
        debug_assert!(change_plan.is_partition_of(&scan.records, &indexed));

        let counts = change_plan.counts();
        info!(
            "Plan for {}: {} unchanged, {} added, {} updated, {} deleted",
            root, counts.unchanged, counts.added, counts.updated, counts.deleted
        );

        Ok(Diff {
            records: scan
                .records
                .into_iter()
                .map(|record| (record.path.clone(), record))
                .collect(),
            indexed,
            plan: change_plan,
            scan_failures: scan.failures,
        })
    }

    /// DELETING: remove old fragment ids of updated and deleted files.
    ///
    /// Returns the paths whose delete failed.
    async fn delete_phase(
        &self,
        root: &str,
        diff: &Diff,
        cancel: &CancellationToken,
        summary: &mut SyncSummary,
    ) -> BTreeSet<String> {
        let targets: Vec<&String> = diff.plan.paths_to_delete().collect();
        let total = targets.len() as u64;
        let mut failed = BTreeSet::new();

        info!(phase = %SyncPhase::Deleting, "Deleting fragments of {} files", total);
        self.progress
            .phase(SyncPhase::Deleting, Some(total), "removing stale fragments");

        for (done, path) in targets.iter().enumerate() {
            if cancel.is_cancelled() {
                info!("Cancellation requested, {} deletes left pending", targets.len() - done);
                summary
                    .pending
                    .extend(targets[done..].iter().map(|p| p.to_string()));
                break;
            }

            let ids: Vec<String> = diff
                .indexed
                .get(*path)
                .map(|state| state.fragment_ids.iter().cloned().collect())
                .unwrap_or_default();

            match self.delete_ids(root, &ids).await {
                Ok(removed) => {
                    debug!("Removed {} fragments of {}", removed, path);
                    summary.fragments_removed += removed;
                    if diff.plan.deleted.contains(*path) {
                        summary.files_deleted += 1;
                    }
                }
                Err(e) => {
                    warn!("Failed to delete fragments of {}: {}", path, e);
                    summary
                        .failures
                        .push(FileFailure::new(path.as_str(), FailureKind::Store, e.to_string()));
                    failed.insert(path.to_string());
                }
            }

            self.progress
                .file(SyncPhase::Deleting, done as u64 + 1, total, path);
        }

        failed
    }

    /// Delete ids in write-sized batches.
    async fn delete_ids(&self, root: &str, ids: &[String]) -> AppResult<usize> {
        let mut removed = 0;
        for batch in ids.chunks(self.config.store.write_batch_size) {
            removed += with_timeout(
                self.store_timeout(),
                "delete",
                self.store.delete_by_ids(root, batch),
            )
            .await?;
        }
        Ok(removed)
    }

    /// REPROCESSING: fragment, embed and write added and updated files.
    async fn reprocess_phase(
        &self,
        root: &str,
        diff: &Diff,
        delete_failed: &BTreeSet<String>,
        cancel: &CancellationToken,
        summary: &mut SyncSummary,
    ) {
        // An update whose old fragments could not be deleted is not rewritten
        let work: Vec<(&SourceFileRecord, bool)> = diff
            .plan
            .paths_to_process()
            .filter(|path| !delete_failed.contains(*path))
            .filter_map(|path| {
                let updated = diff.plan.updated.contains(path);
                diff.records.get(path).map(|record| (record, updated))
            })
            .collect();
        let total = work.len() as u64;

        info!(
            phase = %SyncPhase::Reprocessing,
            "Reprocessing {} files with concurrency {}",
            total,
            self.config.concurrency
        );
        self.progress
            .phase(SyncPhase::Reprocessing, Some(total), "embedding changed files");

        let mut outcomes = stream::iter(work)
            .map(|(record, updated)| async move {
                if cancel.is_cancelled() {
                    return (record.path.as_str(), FileOutcome::Pending(record.path.clone()));
                }
                let outcome = match self.reprocess_file(root, record).await {
                    Ok(fragments) => FileOutcome::Written { updated, fragments },
                    Err(failure) => FileOutcome::Failed(failure),
                };
                (record.path.as_str(), outcome)
            })
            .buffer_unordered(self.config.concurrency);

        let mut done = 0u64;
        while let Some((path, outcome)) = outcomes.next().await {
            done += 1;
            match outcome {
                FileOutcome::Written { updated, fragments } => {
                    if updated {
                        summary.files_updated += 1;
                    } else {
                        summary.files_added += 1;
                    }
                    summary.fragments_added += fragments;
                }
                FileOutcome::Failed(failure) => {
                    warn!(
                        "Failed to sync {} ({}): {}",
                        failure.path,
                        failure.kind.as_str(),
                        failure.reason
                    );
                    summary.failures.push(failure);
                }
                FileOutcome::Pending(path) => summary.pending.push(path),
            }
            self.progress.file(SyncPhase::Reprocessing, done, total, path);
        }
    }

    /// Extract, fragment, embed and write one file.
    ///
    /// Nothing is left in the store for this file unless every fragment was
    /// written.
    async fn reprocess_file(&self, root: &str, record: &SourceFileRecord) -> Result<usize, FileFailure> {
        let path = record.path.as_str();
        let text = self.extract_checked(record).await?;

        let fragments = self.fragmenter.fragment(path, &text, &record.fingerprint);
        let fragment_count = fragments.len();
        if fragments.is_empty() {
            // The marker makes the file look current next run; it holds no text
            let marker = StoredFragment {
                id: empty_marker_id(self.fragmenter.version(), path),
                text: String::new(),
                vector: Vec::new(),
                metadata: FragmentMetadata {
                    scan_root: root.to_string(),
                    source_path: path.to_string(),
                    file_fingerprint: record.fingerprint.clone(),
                    ordinal: 0,
                    config_version: self.fragmenter.version().to_string(),
                    fragment_count: 0,
                },
            };
            if let Err(e) = self.write_fragments(std::slice::from_ref(&marker)).await {
                self.rollback(root, path).await;
                return Err(FileFailure::new(path, FailureKind::Store, e.to_string()));
            }
            debug!("{} has no text to index", path);
            return Ok(0);
        }

        let outcome = self.batcher.embed(fragments).await;
        if !outcome.is_complete() {
            let failed: usize = outcome.failures.iter().map(|f| f.fragment_ids.len()).sum();
            let reasons: Vec<String> = outcome
                .failures
                .iter()
                .map(|f| {
                    format!(
                        "batch {} ({} fragments, {} attempts): {}",
                        f.batch_index,
                        f.fragment_ids.len(),
                        f.attempts,
                        f.reason
                    )
                })
                .collect();
            return Err(FileFailure::new(
                path,
                FailureKind::Embedding,
                format!(
                    "{} of {} fragments not embedded; {}",
                    failed,
                    fragment_count,
                    reasons.join("; ")
                ),
            ));
        }

        let stored: Vec<StoredFragment> = outcome
            .embedded
            .into_iter()
            .map(|embedded| StoredFragment {
                id: embedded.fragment.id,
                text: embedded.fragment.text,
                vector: embedded.vector,
                metadata: FragmentMetadata {
                    scan_root: root.to_string(),
                    source_path: embedded.fragment.source_path,
                    file_fingerprint: embedded.fragment.file_fingerprint,
                    ordinal: embedded.fragment.ordinal,
                    config_version: embedded.fragment.config_version,
                    fragment_count: fragment_count as u32,
                },
            })
            .collect();

        if let Err(e) = self.write_fragments(&stored).await {
            self.rollback(root, path).await;
            return Err(FileFailure::new(path, FailureKind::Store, e.to_string()));
        }

        debug!("Indexed {} ({} fragments)", path, fragment_count);
        Ok(fragment_count)
    }

    /// Extract text and confirm the file still matches its scanned fingerprint.
    async fn extract_checked(&self, record: &SourceFileRecord) -> Result<String, FileFailure> {
        let extractor = Arc::clone(&self.extractor);
        let absolute = record.absolute_path.clone();

        let result = tokio::task::spawn_blocking(move || {
            let text = extractor.extract(&absolute)?;
            let fingerprint = fingerprint_file(&absolute)?;
            Ok::<_, AppError>((text, fingerprint))
        })
        .await
        .map_err(|e| AppError::Sync(format!("Extraction task failed: {}", e)));

        match result {
            Ok(Ok((text, fingerprint))) => {
                if fingerprint != record.fingerprint {
                    return Err(FileFailure::new(
                        record.path.as_str(),
                        FailureKind::Changed,
                        "file changed after it was scanned",
                    ));
                }
                Ok(text)
            }
            Ok(Err(e)) | Err(e) => {
                let kind = match &e {
                    AppError::Io(_) => FailureKind::Io,
                    _ => FailureKind::Parse,
                };
                Err(FileFailure::new(record.path.as_str(), kind, e.to_string()))
            }
        }
    }

    /// Upsert in write-sized batches.
    async fn write_fragments(&self, fragments: &[StoredFragment]) -> AppResult<()> {
        for batch in fragments.chunks(self.config.store.write_batch_size) {
            with_timeout(self.store_timeout(), "upsert", self.store.upsert(batch)).await?;
        }
        Ok(())
    }

    /// Best-effort removal of a partially written file.
    async fn rollback(&self, root: &str, path: &str) {
        match with_timeout(
            self.store_timeout(),
            "delete",
            self.store.delete_by_source(root, path),
        )
        .await
        {
            Ok(removed) => debug!("Rolled back {} fragments of {}", removed, path),
            Err(e) => warn!(
                "Rollback of {} failed, it will be re-synced next run: {}",
                path, e
            ),
        }
    }
}
