//! In-process vector store, used for tests and throwaway runs.

use super::{StoreStats, VectorStore};
use crate::types::{IndexEntry, IndexPage, StoredFragment};
use docsync_core::AppResult;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use tokio::sync::RwLock;

type Key = (String, String);

/// Vector store holding everything in a sorted map keyed by (scan root, id).
#[derive(Debug, Default)]
pub struct MemoryStore {
    fragments: RwLock<BTreeMap<Key, StoredFragment>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch one stored fragment.
    pub async fn get(&self, scan_root: &str, id: &str) -> Option<StoredFragment> {
        self.fragments
            .read()
            .await
            .get(&(scan_root.to_string(), id.to_string()))
            .cloned()
    }

    /// Every stored fragment of a scan root, in id order.
    pub async fn fragments(&self, scan_root: &str) -> Vec<StoredFragment> {
        self.fragments
            .read()
            .await
            .iter()
            .filter(|((root, _), _)| root == scan_root)
            .map(|(_, fragment)| fragment.clone())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.fragments.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.fragments.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl VectorStore for MemoryStore {
    fn backend_name(&self) -> &str {
        "memory"
    }

    async fn ping(&self) -> AppResult<()> {
        Ok(())
    }

    async fn upsert(&self, fragments: &[StoredFragment]) -> AppResult<()> {
        let mut map = self.fragments.write().await;
        for fragment in fragments {
            map.insert(
                (fragment.metadata.scan_root.clone(), fragment.id.clone()),
                fragment.clone(),
            );
        }
        Ok(())
    }

    async fn delete_by_ids(&self, scan_root: &str, ids: &[String]) -> AppResult<usize> {
        let mut map = self.fragments.write().await;
        let removed = ids
            .iter()
            .filter(|id| map.remove(&(scan_root.to_string(), (*id).clone())).is_some())
            .count();
        Ok(removed)
    }

    async fn delete_by_source(&self, scan_root: &str, source_path: &str) -> AppResult<usize> {
        let mut map = self.fragments.write().await;
        let before = map.len();
        map.retain(|(root, _), fragment| {
            root != scan_root || fragment.metadata.source_path != source_path
        });
        Ok(before - map.len())
    }

    async fn read_index_page(
        &self,
        scan_root: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> AppResult<IndexPage> {
        let map = self.fragments.read().await;
        let start = match cursor {
            Some(id) => Bound::Excluded((scan_root.to_string(), id.to_string())),
            None => Bound::Included((scan_root.to_string(), String::new())),
        };

        let entries: Vec<IndexEntry> = map
            .range((start, Bound::Unbounded))
            .take_while(|((root, _), _)| root == scan_root)
            .take(limit)
            .map(|((_, id), fragment)| IndexEntry {
                id: id.clone(),
                metadata: fragment.metadata.clone(),
            })
            .collect();

        let next_cursor = if entries.len() == limit {
            entries.last().map(|entry| entry.id.clone())
        } else {
            None
        };

        Ok(IndexPage {
            entries,
            next_cursor,
        })
    }

    async fn stats(&self, scan_root: &str) -> AppResult<StoreStats> {
        let map = self.fragments.read().await;
        let mut files = BTreeSet::new();
        let mut fragments = 0;
        for ((root, _), fragment) in map.iter() {
            if root == scan_root {
                files.insert(fragment.metadata.source_path.as_str());
                fragments += 1;
            }
        }

        Ok(StoreStats {
            files: files.len(),
            fragments,
        })
    }

    async fn reset(&self, scan_root: &str) -> AppResult<usize> {
        let mut map = self.fragments.write().await;
        let before = map.len();
        map.retain(|(root, _), _| root != scan_root);
        Ok(before - map.len())
    }
}
