//! Sync engine type definitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

/// A file observed in the live tree during one scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFileRecord {
    /// Normalized path relative to the scan root
    pub path: String,

    /// Location on disk
    pub absolute_path: PathBuf,

    /// Content fingerprint of the raw bytes
    pub fingerprint: String,

    /// Size in bytes
    pub size: u64,

    /// Last modification time, when the platform reports one
    pub modified_at: Option<DateTime<Utc>>,
}

/// A bounded slice of a source file's text, the unit that gets embedded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    /// Deterministic identifier (path, ordinal, fragmenter config version)
    pub id: String,

    /// Normalized source path
    pub source_path: String,

    /// Position within the source (0-indexed, dense)
    pub ordinal: u32,

    /// Fragment text
    pub text: String,

    /// Fingerprint of the owning file when the fragment was produced
    pub file_fingerprint: String,

    /// Fragmenter configuration version
    pub config_version: String,

    /// Byte range of the untrimmed slice in the source text
    pub byte_range: (usize, usize),
}

/// Metadata persisted alongside every vector in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentMetadata {
    /// Scan root the source path is relative to
    pub scan_root: String,

    /// Normalized source path
    pub source_path: String,

    /// Fingerprint of the owning file version
    pub file_fingerprint: String,

    /// Position within the source
    pub ordinal: u32,

    /// Fragmenter configuration version
    pub config_version: String,

    /// Number of fragments the owning file version produced
    pub fragment_count: u32,
}

/// A fragment ready to be written: text, vector and metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredFragment {
    pub id: String,
    pub text: String,
    pub vector: Vec<f32>,
    pub metadata: FragmentMetadata,
}

/// One row of the store's metadata channel, as returned by paging reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub id: String,
    pub metadata: FragmentMetadata,
}

/// One page of index metadata.
#[derive(Debug, Clone, Default)]
pub struct IndexPage {
    pub entries: Vec<IndexEntry>,

    /// Cursor for the next page; `None` once the index is exhausted
    pub next_cursor: Option<String>,
}

/// What the index currently holds for one source path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexedFileState {
    /// Normalized source path
    pub path: String,

    /// Every distinct file fingerprint seen under this path
    pub fingerprints: BTreeSet<String>,

    /// Every distinct fragmenter config version seen under this path
    pub config_versions: BTreeSet<String>,

    /// Every distinct declared fragment count seen under this path
    pub declared_counts: BTreeSet<u32>,

    /// Fragment ids stored under this path
    pub fragment_ids: BTreeSet<String>,
}

impl IndexedFileState {
    /// Create an empty state for a path.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Fold one stored fragment into the state.
    pub fn absorb(&mut self, id: String, metadata: &FragmentMetadata) {
        self.fingerprints.insert(metadata.file_fingerprint.clone());
        self.config_versions.insert(metadata.config_version.clone());
        self.declared_counts.insert(metadata.fragment_count);
        self.fragment_ids.insert(id);
    }

    /// The single fingerprint last embedded under this path, if unambiguous.
    pub fn fingerprint(&self) -> Option<&str> {
        if self.fingerprints.len() == 1 {
            self.fingerprints.iter().next().map(String::as_str)
        } else {
            None
        }
    }

    /// Whether every fragment of the declared version is present.
    ///
    /// A file without text declares zero fragments and is recorded by a
    /// single marker entry.
    pub fn is_complete(&self) -> bool {
        self.declared_counts.len() == 1
            && self
                .declared_counts
                .iter()
                .all(|&count| (count as usize).max(1) == self.fragment_ids.len())
    }

    /// Whether this state exactly reflects a file with the given fingerprint
    /// fragmented under the given config version.
    pub fn is_current(&self, fingerprint: &str, config_version: &str) -> bool {
        self.fingerprint() == Some(fingerprint)
            && self.config_versions.len() == 1
            && self.config_versions.contains(config_version)
            && self.is_complete()
    }
}

/// Indexed state for one scan root, keyed by normalized path.
pub type IndexState = BTreeMap<String, IndexedFileState>;

/// File-level changes between the live tree and the index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChangePlan {
    pub unchanged: BTreeSet<String>,
    pub added: BTreeSet<String>,
    pub updated: BTreeSet<String>,
    pub deleted: BTreeSet<String>,
}

impl ChangePlan {
    /// True when nothing needs to be written.
    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    /// Per-category counts.
    pub fn counts(&self) -> PlanCounts {
        PlanCounts {
            unchanged: self.unchanged.len(),
            added: self.added.len(),
            updated: self.updated.len(),
            deleted: self.deleted.len(),
        }
    }

    /// Paths whose old fragments must be removed (updated ∪ deleted).
    pub fn paths_to_delete(&self) -> impl Iterator<Item = &String> {
        self.updated.iter().chain(self.deleted.iter())
    }

    /// Paths that must be fragmented and embedded (added ∪ updated).
    pub fn paths_to_process(&self) -> impl Iterator<Item = &String> {
        self.added.iter().chain(self.updated.iter())
    }
}

/// Number of paths in each plan category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanCounts {
    pub unchanged: usize,
    pub added: usize,
    pub updated: usize,
    pub deleted: usize,
}

/// Why a file could not be synced in this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// File could not be read
    Io,
    /// Text extraction rejected the file
    Parse,
    /// Embedding retries were exhausted
    Embedding,
    /// A vector store write or delete failed
    Store,
    /// File content changed between scan and extraction
    Changed,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Io => "io",
            Self::Parse => "parse",
            Self::Embedding => "embedding",
            Self::Store => "store",
            Self::Changed => "changed",
        }
    }
}

/// A per-file failure recorded in the run summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFailure {
    pub path: String,
    pub kind: FailureKind,
    pub reason: String,
}

impl FileFailure {
    pub fn new(path: impl Into<String>, kind: FailureKind, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind,
            reason: reason.into(),
        }
    }
}

/// Result of one sync run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncSummary {
    /// Identifier of this run (also written to the run lock)
    pub run_id: String,

    /// Scan root the run applied to
    pub scan_root: String,

    /// What the diff planner decided
    pub planned: PlanCounts,

    /// Files successfully indexed for the first time
    pub files_added: usize,

    /// Files successfully re-indexed
    pub files_updated: usize,

    /// Files whose fragments were removed
    pub files_deleted: usize,

    /// Fragments written
    pub fragments_added: usize,

    /// Fragments removed
    pub fragments_removed: usize,

    /// Per-file failures, sorted by path
    pub failures: Vec<FileFailure>,

    /// Files left untouched because the run was cancelled
    pub pending: Vec<String>,

    /// Whether cancellation was requested during the run
    pub cancelled: bool,

    /// Wall-clock duration
    pub duration_secs: f64,
}

impl SyncSummary {
    /// True when every planned change was applied.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(fingerprint: &str, version: &str, count: u32) -> FragmentMetadata {
        FragmentMetadata {
            scan_root: "/root".to_string(),
            source_path: "a.txt".to_string(),
            file_fingerprint: fingerprint.to_string(),
            ordinal: 0,
            config_version: version.to_string(),
            fragment_count: count,
        }
    }

    #[test]
    fn test_indexed_state_current() {
        let mut state = IndexedFileState::new("a.txt");
        state.absorb("a#0".to_string(), &meta("h1", "v1", 2));
        state.absorb("a#1".to_string(), &meta("h1", "v1", 2));

        assert_eq!(state.fingerprint(), Some("h1"));
        assert!(state.is_complete());
        assert!(state.is_current("h1", "v1"));
        assert!(!state.is_current("h2", "v1"));
        assert!(!state.is_current("h1", "v2"));
    }

    #[test]
    fn test_indexed_state_incomplete() {
        let mut state = IndexedFileState::new("a.txt");
        state.absorb("a#0".to_string(), &meta("h1", "v1", 3));

        assert!(!state.is_complete());
        assert!(!state.is_current("h1", "v1"));
    }

    #[test]
    fn test_indexed_state_empty_file_marker() {
        let mut state = IndexedFileState::new("blank.txt");
        state.absorb("marker".to_string(), &meta("h1", "v1", 0));

        assert!(state.is_complete());
        assert!(state.is_current("h1", "v1"));

        // A stray fragment next to the marker is not a complete record
        state.absorb("a#0".to_string(), &meta("h1", "v1", 0));
        assert!(!state.is_complete());
    }

    #[test]
    fn test_indexed_state_mixed_versions() {
        let mut state = IndexedFileState::new("a.txt");
        state.absorb("a#0".to_string(), &meta("h1", "v1", 2));
        state.absorb("a#1".to_string(), &meta("h2", "v1", 2));

        assert_eq!(state.fingerprint(), None);
        assert!(!state.is_current("h1", "v1"));
        assert!(!state.is_current("h2", "v1"));
    }

    #[test]
    fn test_plan_iterators() {
        let mut plan = ChangePlan::default();
        plan.added.insert("b".to_string());
        plan.updated.insert("a".to_string());
        plan.deleted.insert("c".to_string());

        let to_delete: Vec<_> = plan.paths_to_delete().cloned().collect();
        let to_process: Vec<_> = plan.paths_to_process().cloned().collect();
        assert_eq!(to_delete, vec!["a", "c"]);
        assert_eq!(to_process, vec!["b", "a"]);
        assert!(!plan.is_noop());
        assert_eq!(plan.counts().deleted, 1);
    }
}
