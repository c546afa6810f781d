//! Successful sync runs: planning, idempotence and index contents.

use super::support::{long_text, test_config, Fixture, DIMENSIONS};
use crate::embeddings::providers::MockProvider;
use crate::progress::{ProgressReporter, SyncPhase};
use crate::store::{SqliteStore, VectorStore};
use crate::types::StoredFragment;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

fn set(paths: &[&str]) -> BTreeSet<String> {
    paths.iter().map(|p| p.to_string()).collect()
}

#[tokio::test]
async fn test_first_run_indexes_everything() {
    let fixture = Fixture::new();
    fixture.write("a.txt", &long_text("alpha"));
    fixture.write("b.md", "# Beta\n\nShort note.");
    fixture.write("nested/c.txt", &long_text("gamma"));
    fixture.write("image.png", "not a document");

    let orchestrator = fixture.orchestrator(test_config());
    let summary = fixture.sync(&orchestrator).await;

    assert!(summary.is_clean(), "unexpected failures: {:?}", summary.failures);
    assert_eq!(summary.planned.added, 3);
    assert_eq!(summary.files_added, 3);
    assert_eq!(
        fixture.indexed_paths().await,
        set(&["a.txt", "b.md", "nested/c.txt"])
    );

    let stored = fixture.store.fragments(&fixture.root_key()).await;
    assert_eq!(summary.fragments_added, stored.len());
    assert!(stored.iter().all(|f| f.vector.len() == DIMENSIONS));
    assert!(stored
        .iter()
        .all(|f| f.metadata.config_version == orchestrator.config_version()));
}

#[tokio::test]
async fn test_second_run_is_noop() {
    let fixture = Fixture::new();
    fixture.write("a.txt", &long_text("alpha"));
    fixture.write("b.txt", &long_text("beta"));

    let orchestrator = fixture.orchestrator(test_config());
    fixture.sync(&orchestrator).await;
    let before = fixture.store.fragments(&fixture.root_key()).await;

    let summary = fixture.sync(&orchestrator).await;

    assert!(summary.is_clean());
    assert_eq!(summary.planned.unchanged, 2);
    assert_eq!(summary.planned.added + summary.planned.updated + summary.planned.deleted, 0);
    assert_eq!(summary.fragments_added, 0);
    assert_eq!(summary.fragments_removed, 0);
    assert_eq!(fixture.store.fragments(&fixture.root_key()).await, before);
}

#[tokio::test]
async fn test_file_without_text_is_not_readded() {
    let fixture = Fixture::new();
    fixture.write("a.txt", &long_text("alpha"));
    fixture.write("blank.txt", "   \n\n  \t\n");

    let orchestrator = fixture.orchestrator(test_config());
    let first = fixture.sync(&orchestrator).await;

    assert!(first.is_clean(), "unexpected failures: {:?}", first.failures);
    assert_eq!(first.files_added, 2);
    assert_eq!(first.fragments_added, fixture.fragments_of("a.txt").await.len());
    let marker = fixture.fragments_of("blank.txt").await;
    assert_eq!(marker.len(), 1);
    assert!(marker[0].text.is_empty());
    assert_eq!(marker[0].metadata.fragment_count, 0);
    let before = fixture.store.fragments(&fixture.root_key()).await;

    let second = fixture.sync(&orchestrator).await;

    assert!(second.is_clean());
    assert_eq!(second.planned.unchanged, 2);
    assert_eq!(second.planned.added, 0);
    assert_eq!(second.files_added, 0);
    assert_eq!(second.fragments_added, 0);
    assert_eq!(fixture.store.fragments(&fixture.root_key()).await, before);

    // Gaining text replaces the marker with real fragments
    fixture.write("blank.txt", &long_text("no longer blank"));
    let third = fixture.sync(&orchestrator).await;

    assert_eq!(third.planned.updated, 1);
    let fragments = fixture.fragments_of("blank.txt").await;
    assert!(fragments.len() > 1);
    assert!(fragments.iter().all(|f| !f.text.is_empty() && f.vector.len() == DIMENSIONS));
}

#[tokio::test]
async fn test_normalization_collision_is_stable_across_runs() {
    let fixture = Fixture::new();
    fixture.write("A.txt", &long_text("upper"));
    fixture.write("a.txt", &long_text("lower"));
    if std::fs::read_dir(&fixture.root).unwrap().count() < 2 {
        // Case-insensitive filesystem: both names are the same file
        return;
    }

    let mut config = test_config();
    config.scan.case_insensitive = true;
    let orchestrator = fixture.orchestrator(config);

    let first = fixture.sync(&orchestrator).await;
    assert_eq!(first.files_added, 1);
    assert_eq!(first.failures.len(), 1);
    assert_eq!(first.failures[0].path, "a.txt");
    let indexed = fixture.fragments_of("a.txt").await;
    assert!(!indexed.is_empty());

    for _ in 0..2 {
        let again = fixture.sync(&orchestrator).await;

        assert_eq!(again.planned.unchanged, 1);
        assert_eq!(again.planned.added + again.planned.updated + again.planned.deleted, 0);
        assert_eq!(again.fragments_added, 0);
        assert_eq!(again.fragments_removed, 0);
        assert_eq!(again.failures.len(), 1);
        assert_eq!(fixture.fragments_of("a.txt").await, indexed);
    }
}

#[tokio::test]
async fn test_modified_and_new_files() {
    let fixture = Fixture::new();
    fixture.write("a.txt", &long_text("alpha"));

    let orchestrator = fixture.orchestrator(test_config());
    fixture.sync(&orchestrator).await;
    let old_fingerprint = fixture.fragments_of("a.txt").await[0]
        .metadata
        .file_fingerprint
        .clone();

    fixture.write("a.txt", &long_text("alpha, revised"));
    fixture.write("b.txt", &long_text("beta"));
    let summary = fixture.sync(&orchestrator).await;

    assert!(summary.is_clean());
    assert_eq!(summary.planned.updated, 1);
    assert_eq!(summary.planned.added, 1);
    assert_eq!(summary.files_updated, 1);
    assert_eq!(summary.files_added, 1);

    let fragments = fixture.fragments_of("a.txt").await;
    assert!(fragments
        .iter()
        .all(|f| f.metadata.file_fingerprint != old_fingerprint));
    assert!(fragments.iter().any(|f| f.text.contains("revised")));
    assert!(fragments
        .iter()
        .all(|f| f.metadata.fragment_count as usize == fragments.len()));
    assert!(!fixture.fragments_of("b.txt").await.is_empty());
}

#[tokio::test]
async fn test_shrinking_file_leaves_no_stale_ordinals() {
    let fixture = Fixture::new();
    fixture.write("a.txt", &long_text("alpha"));

    let orchestrator = fixture.orchestrator(test_config());
    fixture.sync(&orchestrator).await;
    assert!(fixture.fragments_of("a.txt").await.len() > 1);

    fixture.write("a.txt", "Now short.");
    let summary = fixture.sync(&orchestrator).await;

    let fragments = fixture.fragments_of("a.txt").await;
    assert_eq!(fragments.len(), 1);
    assert_eq!(fragments[0].text, "Now short.");
    assert_eq!(fragments[0].metadata.fragment_count, 1);
    assert_eq!(summary.fragments_added, 1);
    assert!(summary.fragments_removed > 1);
}

#[tokio::test]
async fn test_deleted_file_is_removed() {
    let fixture = Fixture::new();
    fixture.write("a.txt", &long_text("alpha"));
    fixture.write("b.txt", &long_text("beta"));

    let orchestrator = fixture.orchestrator(test_config());
    fixture.sync(&orchestrator).await;
    let b_fragments = fixture.fragments_of("b.txt").await.len();

    fixture.remove("b.txt");
    let summary = fixture.sync(&orchestrator).await;

    assert!(summary.is_clean());
    assert_eq!(summary.planned.deleted, 1);
    assert_eq!(summary.files_deleted, 1);
    assert_eq!(summary.fragments_removed, b_fragments);
    assert_eq!(fixture.indexed_paths().await, set(&["a.txt"]));
}

#[tokio::test]
async fn test_rename_is_delete_plus_add() {
    let fixture = Fixture::new();
    fixture.write("old.txt", &long_text("alpha"));

    let orchestrator = fixture.orchestrator(test_config());
    fixture.sync(&orchestrator).await;

    std::fs::rename(fixture.root.join("old.txt"), fixture.root.join("new.txt")).unwrap();
    let summary = fixture.sync(&orchestrator).await;

    assert_eq!(summary.planned.deleted, 1);
    assert_eq!(summary.planned.added, 1);
    assert_eq!(fixture.indexed_paths().await, set(&["new.txt"]));
}

#[tokio::test]
async fn test_fragmenter_change_reembeds_everything() {
    let fixture = Fixture::new();
    fixture.write("a.txt", &long_text("alpha"));
    fixture.write("b.txt", &long_text("beta"));

    let first = fixture.orchestrator(test_config());
    fixture.sync(&first).await;
    let old_ids: BTreeSet<String> = fixture
        .store
        .fragments(&fixture.root_key())
        .await
        .into_iter()
        .map(|f| f.id)
        .collect();

    let mut config = test_config();
    config.fragmenter.target_length = 60;
    let second = fixture.orchestrator(config);
    assert_ne!(first.config_version(), second.config_version());

    let summary = fixture.sync(&second).await;

    assert!(summary.is_clean());
    assert_eq!(summary.planned.updated, 2);
    assert_eq!(summary.fragments_removed, old_ids.len());

    let stored = fixture.store.fragments(&fixture.root_key()).await;
    assert!(stored.iter().all(|f| !old_ids.contains(&f.id)));
    assert!(stored
        .iter()
        .all(|f| f.metadata.config_version == second.config_version()));
}

#[tokio::test]
async fn test_index_larger_than_one_page() {
    let fixture = Fixture::new();
    for n in 0..6 {
        fixture.write(&format!("doc{}.txt", n), &long_text(&format!("topic {}", n)));
    }

    let orchestrator = fixture.orchestrator(test_config());
    fixture.sync(&orchestrator).await;
    let stored = fixture.store.fragments(&fixture.root_key()).await;
    assert!(stored.len() > orchestrator.config().store.page_size * 3);

    let summary = fixture.sync(&orchestrator).await;
    assert_eq!(summary.planned.unchanged, 6);
    assert_eq!(summary.fragments_added, 0);
}

#[tokio::test]
async fn test_dry_run_writes_nothing() {
    let fixture = Fixture::new();
    fixture.write("a.txt", &long_text("alpha"));
    fixture.write("b.txt", &long_text("beta"));

    let orchestrator = fixture.orchestrator(test_config());
    let report = orchestrator.plan(&fixture.root).await.unwrap();

    assert_eq!(report.scan_root, fixture.root_key());
    assert_eq!(report.plan.added, set(&["a.txt", "b.txt"]));
    assert!(report.failures.is_empty());
    assert!(fixture.store.is_empty().await);
}

#[tokio::test]
async fn test_status_and_reset() {
    let fixture = Fixture::new();
    fixture.write("a.txt", &long_text("alpha"));
    fixture.write("b.txt", "tiny");

    let orchestrator = fixture.orchestrator(test_config());
    let summary = fixture.sync(&orchestrator).await;

    let status = orchestrator.status(&fixture.root).await.unwrap();
    assert_eq!(status.backend, "memory");
    assert_eq!(status.stats.files, 2);
    assert_eq!(status.stats.fragments, summary.fragments_added);

    let removed = orchestrator.reset(&fixture.root).await.unwrap();
    assert_eq!(removed, summary.fragments_added);
    assert!(fixture.store.is_empty().await);

    let rerun = fixture.sync(&orchestrator).await;
    assert_eq!(rerun.planned.added, 2);
}

#[tokio::test]
async fn test_progress_phases_in_order() {
    let fixture = Fixture::new();
    fixture.write("a.txt", &long_text("alpha"));

    let phases = Arc::new(Mutex::new(Vec::new()));
    let sink = phases.clone();
    let orchestrator = fixture
        .orchestrator(test_config())
        .with_progress(ProgressReporter::new(Arc::new(move |event| {
            sink.lock().unwrap().push(event.phase);
        })));

    fixture.sync(&orchestrator).await;

    let seen = phases.lock().unwrap().clone();
    assert!(seen.windows(2).all(|pair| pair[0] <= pair[1]));
    for phase in [
        SyncPhase::Scanning,
        SyncPhase::Diffing,
        SyncPhase::Deleting,
        SyncPhase::Reprocessing,
        SyncPhase::Reporting,
        SyncPhase::Done,
    ] {
        assert!(seen.contains(&phase), "missing {}", phase);
    }
}

#[tokio::test]
async fn test_sqlite_store_round_trip() {
    let fixture = Fixture::new();
    fixture.write("a.txt", &long_text("alpha"));
    fixture.write("b.txt", &long_text("beta"));

    let db_dir = TempDir::new().unwrap();
    let store = Arc::new(SqliteStore::open(&db_dir.path().join("index.sqlite")).unwrap());
    let orchestrator = fixture.orchestrator_with(
        store.clone(),
        Arc::new(MockProvider::new(DIMENSIONS)),
        test_config(),
    );

    let first = fixture.sync(&orchestrator).await;
    assert_eq!(first.files_added, 2);

    let page = store
        .read_index_page(&fixture.root_key(), None, 1)
        .await
        .unwrap();
    assert!(page.next_cursor.is_some());
    let fragment: StoredFragment = store
        .get(&fixture.root_key(), &page.entries[0].id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(fragment.vector.len(), DIMENSIONS);

    fixture.remove("b.txt");
    let second = fixture.sync(&orchestrator).await;
    assert_eq!(second.planned.unchanged, 1);
    assert_eq!(second.files_deleted, 1);

    let status = orchestrator.status(&fixture.root).await.unwrap();
    assert_eq!(status.backend, "sqlite");
    assert_eq!(status.stats.files, 1);
}

#[tokio::test]
async fn test_sqlite_store_keeps_file_without_text() {
    let fixture = Fixture::new();
    fixture.write("blank.md", "\n\n");

    let db_dir = TempDir::new().unwrap();
    let store = Arc::new(SqliteStore::open(&db_dir.path().join("index.sqlite")).unwrap());
    let orchestrator = fixture.orchestrator_with(
        store.clone(),
        Arc::new(MockProvider::new(DIMENSIONS)),
        test_config(),
    );

    let first = fixture.sync(&orchestrator).await;
    assert_eq!(first.files_added, 1);

    let second = fixture.sync(&orchestrator).await;
    assert_eq!(second.planned.unchanged, 1);
    assert_eq!(second.files_added, 0);
}
