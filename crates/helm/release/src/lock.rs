//! Release locks
//!
//! Every mutating section of a pass runs while holding the lock keyed by
//! `"{name}-{namespace}"`. Two holders of the same key never coexist.
//! [`FileReleaseLock`] excludes across processes sharing a directory,
//! [`InProcessReleaseLock`] only within one controller instance.

use async_trait::async_trait;
use dashmap::DashMap;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum LockError {
    #[error("lockfile error: {0}")]
    Io(#[from] std::io::Error),

    #[error("lock task failed: {0}")]
    Task(String),
}

/// Backend-specific part of a held lock
pub trait HeldLock: Send {
    fn unlock(&mut self) -> Result<(), LockError>;
}

/// A held release lock.
///
/// Dropping the handle releases the lock; [`LockHandle::release`] does the
/// same and reports unlock failures.
pub struct LockHandle {
    key: String,
    held: Option<Box<dyn HeldLock>>,
}

impl LockHandle {
    pub fn new(key: &str, held: Box<dyn HeldLock>) -> Self {
        Self {
            key: key.to_string(),
            held: Some(held),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn release(mut self) -> Result<(), LockError> {
        match self.held.take() {
            Some(mut held) => held.unlock(),
            None => Ok(()),
        }
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        if let Some(mut held) = self.held.take() {
            if let Err(e) = held.unlock() {
                warn!(key = %self.key, error = %e, "Failed to release lock");
            }
        }
    }
}

impl std::fmt::Debug for LockHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockHandle")
            .field("key", &self.key)
            .field("held", &self.held.is_some())
            .finish()
    }
}

/// Mutual exclusion by release key
#[async_trait]
pub trait ReleaseLock: Send + Sync {
    /// Block until the lock for `key` is held
    async fn acquire(&self, key: &str) -> Result<LockHandle, LockError>;

    fn name(&self) -> &str;
}

/// Advisory lock on `<dir>/<key>.lock`
#[derive(Debug, Clone)]
pub struct FileReleaseLock {
    dir: PathBuf,
}

impl FileReleaseLock {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.lock", key))
    }

    fn lock_blocking(path: &Path) -> Result<File, LockError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        FileExt::lock_exclusive(&file)?;
        Ok(file)
    }
}

struct FileLockGuard {
    file: File,
}

impl HeldLock for FileLockGuard {
    fn unlock(&mut self) -> Result<(), LockError> {
        FileExt::unlock(&self.file)?;
        Ok(())
    }
}

#[async_trait]
impl ReleaseLock for FileReleaseLock {
    async fn acquire(&self, key: &str) -> Result<LockHandle, LockError> {
        let path = self.path_for(key);
        debug!(path = %path.display(), "Acquiring release lock");

        let file = tokio::task::spawn_blocking(move || Self::lock_blocking(&path))
            .await
            .map_err(|e| LockError::Task(e.to_string()))??;

        Ok(LockHandle::new(key, Box::new(FileLockGuard { file })))
    }

    fn name(&self) -> &str {
        "file"
    }
}

/// Keyed async mutex for a single controller instance
#[derive(Debug, Default)]
pub struct InProcessReleaseLock {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl InProcessReleaseLock {
    pub fn new() -> Self {
        Self::default()
    }
}

struct MutexLockGuard {
    guard: Option<OwnedMutexGuard<()>>,
}

impl HeldLock for MutexLockGuard {
    fn unlock(&mut self) -> Result<(), LockError> {
        self.guard.take();
        Ok(())
    }
}

#[async_trait]
impl ReleaseLock for InProcessReleaseLock {
    async fn acquire(&self, key: &str) -> Result<LockHandle, LockError> {
        // Clone out of the map before awaiting so no shard lock is held
        let mutex = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = mutex.lock_owned().await;

        Ok(LockHandle::new(key, Box::new(MutexLockGuard { guard: Some(guard) })))
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    async fn assert_exclusive(lock: Arc<dyn ReleaseLock>) {
        let holders = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let lock = lock.clone();
            let holders = holders.clone();
            let max_seen = max_seen.clone();
            tasks.push(tokio::spawn(async move {
                let handle = lock.acquire("web_apps").await.unwrap();
                let now = holders.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                holders.fetch_sub(1, Ordering::SeqCst);
                handle.release().unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_in_process_lock_is_exclusive() {
        assert_exclusive(Arc::new(InProcessReleaseLock::new())).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_file_lock_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        assert_exclusive(Arc::new(FileReleaseLock::new(dir.path()))).await;
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_block() {
        let lock = InProcessReleaseLock::new();
        let first = lock.acquire("web_apps").await.unwrap();
        let second = tokio::time::timeout(Duration::from_millis(100), lock.acquire("db-apps"))
            .await
            .expect("distinct key should not block")
            .unwrap();
        assert_eq!(first.key(), "web_apps");
        assert_eq!(second.key(), "db-apps");
    }

    #[tokio::test]
    async fn test_drop_releases_lock() {
        let lock = InProcessReleaseLock::new();
        {
            let _handle = lock.acquire("web_apps").await.unwrap();
            let blocked =
                tokio::time::timeout(Duration::from_millis(50), lock.acquire("web_apps")).await;
            assert!(blocked.is_err());
        }
        let reacquired =
            tokio::time::timeout(Duration::from_millis(100), lock.acquire("web_apps")).await;
        assert!(reacquired.is_ok());
    }

    #[tokio::test]
    async fn test_file_lock_creates_lockfile() {
        let dir = tempfile::tempdir().unwrap();
        let lock = FileReleaseLock::new(dir.path().join("locks"));
        let handle = lock.acquire("web_apps").await.unwrap();
        assert!(dir.path().join("locks").join("web_apps.lock").exists());
        handle.release().unwrap();
    }
}
