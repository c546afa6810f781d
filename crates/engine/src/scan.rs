//! Walking the live file tree and fingerprinting what it contains.

use crate::config::ScanConfig;
use crate::fingerprint::fingerprint_file;
use crate::types::{FailureKind, FileFailure, SourceFileRecord};
use chrono::{DateTime, Utc};
use docsync_core::{AppError, AppResult};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Everything one scan observed.
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    /// Readable files, sorted by normalized path
    pub records: Vec<SourceFileRecord>,

    /// Files that were seen but could not be fingerprinted
    pub failures: Vec<FileFailure>,
}

impl ScanResult {
    /// Normalized paths of files that exist but could not be read.
    pub fn failed_paths(&self) -> impl Iterator<Item = &str> {
        self.failures.iter().map(|f| f.path.as_str())
    }
}

/// Canonical key of a path relative to a scan root.
///
/// Separators become `/`, empty and `.` segments are dropped, `..` pops the
/// previous segment, and the result is lowercased when `case_insensitive` is
/// set. Applied identically to scanned and indexed paths so they compare equal.
pub fn normalize_path(raw: &str, case_insensitive: bool) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in raw.split(|c| c == '/' || c == '\\') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }

    let joined = segments.join("/");
    if case_insensitive {
        joined.to_lowercase()
    } else {
        joined
    }
}

/// Stable identifier of a scan root: its canonical absolute path.
pub fn root_key(root: &Path) -> AppResult<String> {
    let canonical = root.canonicalize().map_err(|e| {
        AppError::Sync(format!("Scan root {:?} is not accessible: {}", root, e))
    })?;

    if !canonical.is_dir() {
        return Err(AppError::Sync(format!(
            "Scan root {:?} is not a directory",
            root
        )));
    }

    Ok(canonical.to_string_lossy().to_string())
}

/// Path of `path` relative to `root`, using `/` separators.
fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().to_string()),
            _ => None,
        })
        .collect();
    Some(parts.join("/"))
}

fn is_excluded(entry: &DirEntry, config: &ScanConfig) -> bool {
    // Never filter the root itself
    if entry.depth() == 0 {
        return false;
    }

    let name = entry.file_name().to_string_lossy();
    (config.skip_hidden && name.starts_with('.'))
        || config.exclude.iter().any(|pattern| pattern.as_str() == name)
}

fn has_allowed_extension(path: &Path, config: &ScanConfig) -> bool {
    if config.extensions.is_empty() {
        return true;
    }

    let extension = match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => ext.to_lowercase(),
        None => return false,
    };

    config
        .extensions
        .iter()
        .any(|allowed| allowed.trim_start_matches('.').eq_ignore_ascii_case(&extension))
}

/// Scan `root` and fingerprint every eligible file.
///
/// Unreadable files become `FailureKind::Io` failures; only a missing or
/// unreadable root is an error.
pub fn scan_tree(root: &Path, config: &ScanConfig) -> AppResult<ScanResult> {
    let root = PathBuf::from(root_key(root)?);
    let mut records: BTreeMap<String, SourceFileRecord> = BTreeMap::new();
    let mut failures = Vec::new();

    let walker = WalkDir::new(&root)
        .follow_links(config.follow_links)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !is_excluded(entry, config));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e
                    .path()
                    .and_then(|p| relative_path(&root, p))
                    .map(|p| normalize_path(&p, config.case_insensitive))
                    .unwrap_or_default();
                tracing::warn!("Skipping unreadable entry {:?}: {}", path, e);
                if !path.is_empty() {
                    failures.push(FileFailure::new(path, FailureKind::Io, e.to_string()));
                }
                continue;
            }
        };

        if !entry.file_type().is_file() || !has_allowed_extension(entry.path(), config) {
            continue;
        }

        let path = match relative_path(&root, entry.path()) {
            Some(p) => normalize_path(&p, config.case_insensitive),
            None => continue,
        };

        if records.contains_key(&path) {
            tracing::warn!("{:?} normalizes to an already scanned path, skipping", entry.path());
            failures.push(FileFailure::new(
                path,
                FailureKind::Io,
                format!("{:?} collides with another file after normalization", entry.path()),
            ));
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(e) => {
                tracing::warn!("Failed to stat {:?}: {}", entry.path(), e);
                failures.push(FileFailure::new(path, FailureKind::Io, e.to_string()));
                continue;
            }
        };

        if metadata.len() == 0 {
            tracing::debug!("Skipping empty file {:?}", entry.path());
            continue;
        }

        match fingerprint_file(entry.path()) {
            Ok(fingerprint) => {
                records.insert(
                    path.clone(),
                    SourceFileRecord {
                        path,
                        absolute_path: entry.path().to_path_buf(),
                        fingerprint,
                        size: metadata.len(),
                        modified_at: metadata.modified().ok().map(DateTime::<Utc>::from),
                    },
                );
            }
            Err(e) => {
                tracing::warn!("Failed to fingerprint {:?}: {}", entry.path(), e);
                failures.push(FileFailure::new(path, FailureKind::Io, e.to_string()));
            }
        }
    }

    tracing::debug!(
        "Scanned {:?}: {} files, {} unreadable",
        root,
        records.len(),
        failures.len()
    );

    Ok(ScanResult {
        records: records.into_values().collect(),
        failures,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(root: &Path, relative: &str, content: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn paths(result: &ScanResult) -> Vec<&str> {
        result.records.iter().map(|r| r.path.as_str()).collect()
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("docs/a.txt", false), "docs/a.txt");
        assert_eq!(normalize_path("./docs//a.txt", false), "docs/a.txt");
        assert_eq!(normalize_path("docs\\sub\\a.txt", false), "docs/sub/a.txt");
        assert_eq!(normalize_path("docs/sub/", false), "docs/sub");
        assert_eq!(normalize_path("docs/x/../a.txt", false), "docs/a.txt");
        assert_eq!(normalize_path("Docs/A.TXT", true), "docs/a.txt");
        assert_eq!(normalize_path("Docs/A.TXT", false), "Docs/A.TXT");
    }

    #[test]
    fn test_scan_filters_and_sorts() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "b.md", "bee");
        write(temp.path(), "a.txt", "aye");
        write(temp.path(), "nested/c.txt", "sea");
        write(temp.path(), "image.png", "png");
        write(temp.path(), ".hidden/d.txt", "hidden");
        write(temp.path(), "node_modules/e.txt", "dep");
        write(temp.path(), "empty.txt", "");

        let result = scan_tree(temp.path(), &ScanConfig::default()).unwrap();

        assert_eq!(paths(&result), vec!["a.txt", "b.md", "nested/c.txt"]);
        assert!(result.failures.is_empty());
        let record = &result.records[0];
        assert_eq!(record.size, 3);
        assert_eq!(record.fingerprint, crate::fingerprint::fingerprint_bytes(b"aye"));
        assert!(record.modified_at.is_some());
    }

    #[test]
    fn test_empty_extension_list_accepts_everything() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "a.txt", "a");
        write(temp.path(), "Makefile", "all:");

        let config = ScanConfig {
            extensions: Vec::new(),
            ..Default::default()
        };
        let result = scan_tree(temp.path(), &config).unwrap();
        assert_eq!(paths(&result), vec!["Makefile", "a.txt"]);
    }

    #[test]
    fn test_uppercase_extension_matches() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "README.MD", "# title");

        let result = scan_tree(temp.path(), &ScanConfig::default()).unwrap();
        assert_eq!(paths(&result), vec!["README.MD"]);
    }

    #[test]
    fn test_missing_root_is_error() {
        let temp = TempDir::new().unwrap();
        let result = scan_tree(&temp.path().join("missing"), &ScanConfig::default());
        assert!(matches!(result, Err(AppError::Sync(_))));
    }

    #[test]
    fn test_root_key_is_canonical() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join("sub")).unwrap();

        let direct = root_key(&temp.path().join("sub")).unwrap();
        let indirect = root_key(&temp.path().join("sub").join("..").join("sub")).unwrap();
        assert_eq!(direct, indirect);
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_file_is_failure_not_error() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        write(temp.path(), "ok.txt", "fine");
        write(temp.path(), "locked.txt", "secret");
        let locked = temp.path().join("locked.txt");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        // Root can read anything; nothing to assert in that case
        if fs::read(&locked).is_ok() {
            return;
        }

        let result = scan_tree(temp.path(), &ScanConfig::default()).unwrap();
        assert_eq!(paths(&result), vec!["ok.txt"]);
        assert_eq!(result.failed_paths().collect::<Vec<_>>(), vec!["locked.txt"]);
        assert_eq!(result.failures[0].kind, FailureKind::Io);
    }
}
