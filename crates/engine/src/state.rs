//! Rebuilding per-file index state from the store's metadata.

use crate::scan::normalize_path;
use crate::store::{with_timeout, VectorStore};
use crate::types::{IndexState, IndexedFileState};
use docsync_core::{AppError, AppResult};
use std::time::Duration;

/// Read the complete indexed state of a scan root.
///
/// Pages through the store with a keyset cursor until it is exhausted; there
/// is no size cap, since a missing entry would make a still-indexed file look
/// new. Paths are normalized, and entries that normalize to the same path are
/// merged into one state.
pub async fn read_index_state(
    store: &dyn VectorStore,
    scan_root: &str,
    page_size: usize,
    call_timeout: Duration,
    case_insensitive: bool,
) -> AppResult<IndexState> {
    if page_size == 0 {
        return Err(AppError::Config(
            "index state page size must be greater than 0".to_string(),
        ));
    }

    let mut state = IndexState::new();
    let mut cursor: Option<String> = None;
    let mut pages = 0usize;
    let mut entries = 0usize;

    loop {
        let page = with_timeout(
            call_timeout,
            "index read",
            store.read_index_page(scan_root, cursor.as_deref(), page_size),
        )
        .await?;
        pages += 1;
        entries += page.entries.len();

        for entry in page.entries {
            let path = normalize_path(&entry.metadata.source_path, case_insensitive);
            state
                .entry(path.clone())
                .or_insert_with(|| IndexedFileState::new(path))
                .absorb(entry.id, &entry.metadata);
        }

        match page.next_cursor {
            Some(next) => {
                if cursor.as_deref().is_some_and(|previous| next.as_str() <= previous) {
                    return Err(AppError::Store(format!(
                        "index paging did not advance past cursor {:?}",
                        next
                    )));
                }
                cursor = Some(next);
            }
            None => break,
        }
    }

    tracing::debug!(
        "Read index state for {}: {} files, {} fragments in {} page(s)",
        scan_root,
        state.len(),
        entries,
        pages
    );

    Ok(state)
}
