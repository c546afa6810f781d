//! Diffing the live tree against the index.

use crate::types::{ChangePlan, IndexState, SourceFileRecord};
use std::collections::BTreeSet;

/// Classify every live and indexed path.
///
/// - live only: added
/// - both, and the indexed state is current for the live fingerprint and
///   `config_version`: unchanged
/// - both, otherwise: updated
/// - indexed only: deleted
///
/// Paths must already be normalized the same way on both sides.
pub fn plan(live: &[SourceFileRecord], indexed: &IndexState, config_version: &str) -> ChangePlan {
    let mut change_plan = ChangePlan::default();

    for record in live {
        match indexed.get(&record.path) {
            None => {
                change_plan.added.insert(record.path.clone());
            }
            Some(state) if state.is_current(&record.fingerprint, config_version) => {
                change_plan.unchanged.insert(record.path.clone());
            }
            Some(state) => {
                tracing::debug!(
                    "{} changed (indexed fingerprints {:?}, versions {:?}, {} of {:?} fragments)",
                    record.path,
                    state.fingerprints,
                    state.config_versions,
                    state.fragment_ids.len(),
                    state.declared_counts
                );
                change_plan.updated.insert(record.path.clone());
            }
        }
    }

    let live_paths: BTreeSet<&str> = live.iter().map(|r| r.path.as_str()).collect();
    change_plan.deleted = indexed
        .keys()
        .filter(|path| !live_paths.contains(path.as_str()))
        .cloned()
        .collect();

    change_plan
}

impl ChangePlan {
    /// Whether the four sets are pairwise disjoint and together cover exactly
    /// the live and indexed paths.
    pub fn is_partition_of(&self, live: &[SourceFileRecord], indexed: &IndexState) -> bool {
        let sets = [&self.unchanged, &self.added, &self.updated, &self.deleted];
        let total: usize = sets.iter().map(|s| s.len()).sum();

        let union: BTreeSet<&String> = sets.iter().flat_map(|s| s.iter()).collect();
        let expected: BTreeSet<&String> = live
            .iter()
            .map(|r| &r.path)
            .chain(indexed.keys())
            .collect();

        total == union.len() && union == expected
    }
}
