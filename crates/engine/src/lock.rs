//! Run lock: at most one sync per scan root at a time.
//!
//! The lock is a JSON file created exclusively under the lock directory. While
//! a [`RunLock`] is held a background task refreshes `last_heartbeat_at`, so a
//! long run keeps its claim. A lock is taken over when its heartbeat is older
//! than the configured stale age, or when its process is gone on this host.
//! The file is removed when the [`RunLock`] is dropped.

use crate::fingerprint::fingerprint_bytes;
use chrono::{DateTime, Utc};
use docsync_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(10);

/// Contents of a lock file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    pub run_id: String,
    pub pid: u32,
    pub hostname: String,
    pub scan_root: String,
    pub started_at: DateTime<Utc>,
    pub last_heartbeat_at: DateTime<Utc>,
}

impl LockRecord {
    fn new(run_id: &str, scan_root: &str) -> Self {
        let now = Utc::now();
        Self {
            run_id: run_id.to_string(),
            pid: std::process::id(),
            hostname: hostname(),
            scan_root: scan_root.to_string(),
            started_at: now,
            last_heartbeat_at: now,
        }
    }
}

/// Held lock for one scan root.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    record: LockRecord,
    // Set under the mutex on drop so the heartbeat never rewrites a released lock
    released: Arc<Mutex<bool>>,
    token: CancellationToken,
    heartbeat: Option<JoinHandle<()>>,
}

impl RunLock {
    /// Location of the lock file for a scan root.
    pub fn lock_path(lock_dir: &Path, scan_root: &str) -> PathBuf {
        let digest = fingerprint_bytes(scan_root.as_bytes());
        lock_dir.join(format!("{}.lock", &digest[..16]))
    }

    /// Acquire the lock or fail with `AppError::Sync` if another run holds it.
    ///
    /// Must be called inside a tokio runtime; the heartbeat runs as a task on it.
    pub async fn acquire(
        lock_dir: &Path,
        scan_root: &str,
        run_id: &str,
        stale_after: Duration,
    ) -> AppResult<Self> {
        fs::create_dir_all(lock_dir).map_err(|e| {
            AppError::Sync(format!("Failed to create lock directory {:?}: {}", lock_dir, e))
        })?;

        let path = Self::lock_path(lock_dir, scan_root);
        let record = LockRecord::new(run_id, scan_root);

        // Second attempt only after removing a stale lock
        for _ in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    let json = serde_json::to_vec_pretty(&record)?;
                    file.write_all(&json)?;
                    file.sync_all()?;
                    tracing::debug!("Acquired run lock {:?} for {}", path, scan_root);
                    return Ok(Self::start_heartbeat(path, record, stale_after));
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    let holder = read_record(&path);
                    if !is_stale(&path, holder.as_ref(), stale_after) {
                        let detail = holder
                            .map(|h| {
                                format!(
                                    " (run {}, pid {}, started {}, last heartbeat {})",
                                    h.run_id,
                                    h.pid,
                                    h.started_at.to_rfc3339(),
                                    h.last_heartbeat_at.to_rfc3339()
                                )
                            })
                            .unwrap_or_default();
                        return Err(AppError::Sync(format!(
                            "A sync is already running for {}{}",
                            scan_root, detail
                        )));
                    }

                    tracing::warn!("Taking over stale run lock {:?}", path);
                    match fs::remove_file(&path) {
                        Ok(()) => {}
                        Err(e) if e.kind() == ErrorKind::NotFound => {}
                        Err(e) => return Err(e.into()),
                    }
                }
                Err(e) => {
                    return Err(AppError::Sync(format!(
                        "Failed to create run lock {:?}: {}",
                        path, e
                    )))
                }
            }
        }

        Err(AppError::Sync(format!(
            "Could not acquire run lock for {}",
            scan_root
        )))
    }

    fn start_heartbeat(path: PathBuf, record: LockRecord, stale_after: Duration) -> Self {
        let released = Arc::new(Mutex::new(false));
        let token = CancellationToken::new();
        let interval = (stale_after / 3).max(MIN_HEARTBEAT_INTERVAL);

        let task_path = path.clone();
        let task_run_id = record.run_id.clone();
        let task_released = Arc::clone(&released);
        let task_token = token.clone();
        let heartbeat = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = task_token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        if !beat(&task_released, &task_path, &task_run_id) {
                            break;
                        }
                    }
                }
            }
        });

        Self {
            path,
            record,
            released,
            token,
            heartbeat: Some(heartbeat),
        }
    }

    pub fn record(&self) -> &LockRecord {
        &self.record
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        self.token.cancel();
        if let Some(handle) = self.heartbeat.take() {
            handle.abort();
        }

        let mut released = lock_flag(&self.released);
        *released = true;

        // Leave the file alone if another run has taken it over
        let ours = read_record(&self.path)
            .map(|holder| holder.run_id == self.record.run_id)
            .unwrap_or(false);

        if ours {
            if let Err(e) = fs::remove_file(&self.path) {
                tracing::warn!("Failed to remove run lock {:?}: {}", self.path, e);
            }
        }
    }
}

fn lock_flag(flag: &Mutex<bool>) -> MutexGuard<'_, bool> {
    flag.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One heartbeat tick; false once the lock is released or lost.
fn beat(released: &Mutex<bool>, path: &Path, run_id: &str) -> bool {
    let released = lock_flag(released);
    if *released {
        return false;
    }
    match heartbeat_once(path, run_id) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!("Run lock heartbeat stopped for {:?}: {}", path, e);
            false
        }
    }
}

/// Refresh `last_heartbeat_at`, failing if the lock is gone or owned by another run.
fn heartbeat_once(path: &Path, run_id: &str) -> AppResult<()> {
    let mut record = read_record(path)
        .ok_or_else(|| AppError::Sync(format!("Run lock {:?} is missing or unreadable", path)))?;
    if record.run_id != run_id {
        return Err(AppError::Sync(format!(
            "Run lock {:?} was taken over by run {}",
            path, record.run_id
        )));
    }

    record.last_heartbeat_at = Utc::now();
    write_record_atomic(path, &record)
}

fn write_record_atomic(path: &Path, record: &LockRecord) -> AppResult<()> {
    let tmp = path.with_extension("lock.tmp");
    fs::write(&tmp, serde_json::to_vec_pretty(record)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn read_record(path: &Path) -> Option<LockRecord> {
    let content = fs::read(path).ok()?;
    serde_json::from_slice(&content).ok()
}

/// Decide whether an existing lock may be taken over.
///
/// A holder on this host whose process is gone is stale at once. Otherwise the
/// lock is stale once its last heartbeat (or, for an unreadable record, the
/// file's modification time) is older than `stale_after`.
fn is_stale(path: &Path, holder: Option<&LockRecord>, stale_after: Duration) -> bool {
    let last_seen = match holder {
        Some(record) => {
            if record.hostname == hostname() && pid_is_alive(record.pid) == Some(false) {
                tracing::debug!("Run lock holder pid {} is gone", record.pid);
                return true;
            }
            SystemTime::from(record.last_heartbeat_at)
        }
        None => match fs::metadata(path).and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(_) => return true,
        },
    };

    SystemTime::now()
        .duration_since(last_seen)
        .map(|age| age > stale_after)
        .unwrap_or(false)
}

/// `None` where liveness cannot be checked.
#[cfg(unix)]
fn pid_is_alive(pid: u32) -> Option<bool> {
    // 0 and values past pid_t's range address process groups, not one process
    if pid == 0 || pid > i32::MAX as u32 {
        return Some(false);
    }
    let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
    Some(rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM))
}

#[cfg(not(unix))]
fn pid_is_alive(_pid: u32) -> Option<bool> {
    None
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string())
}
