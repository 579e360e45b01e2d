//! crates/daemon/src/storage.rs
//!
//! Access to the save directory: stored-file lookup, append-only opening, and
//! the optional per-name lock registry used to serialise uploads of the same
//! file name.
//!
//! File names are joined onto the save directory verbatim. No attempt is made
//! to confine them to the directory.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use protocol::ResumeOffset;
use tokio::fs::{self, File, OpenOptions};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

use crate::error::SessionError;

const STORAGE_TARGET: &str = "upload::storage";

/// State of one stored file at the moment it was inspected.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StoredFile {
    path: PathBuf,
    exists: bool,
    len: u64,
}

impl StoredFile {
    /// Location of the file under the save directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a regular file is present.
    pub const fn exists(&self) -> bool {
        self.exists
    }

    /// Length in bytes, zero when absent.
    pub const fn len(&self) -> u64 {
        self.len
    }

    /// Reports whether the file is absent or empty.
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Offset a resuming client should continue from.
    pub const fn resume_offset(&self) -> ResumeOffset {
        ResumeOffset::new(self.len)
    }
}

/// Directory where uploaded files are stored.
#[derive(Clone, Debug)]
pub struct SaveDirectory {
    root: PathBuf,
}

impl SaveDirectory {
    /// Wraps `root` without touching the filesystem.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root of the save directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates the directory and its parents if missing.
    ///
    /// Returns `true` when the directory had to be created.
    pub async fn ensure_exists(&self) -> io::Result<bool> {
        if fs::try_exists(&self.root).await? {
            return Ok(false);
        }
        fs::create_dir_all(&self.root).await?;
        info!(target: STORAGE_TARGET, path = %self.root.display(), "created save directory");
        Ok(true)
    }

    /// Path a file name maps to.
    pub fn resolve(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Reports whether `name` exists and how many bytes it holds.
    ///
    /// The length is read from the filesystem on every call. Anything that is
    /// not a regular file is treated as absent.
    pub async fn stored_file(&self, name: &str) -> Result<StoredFile, SessionError> {
        let path = self.resolve(name);
        let (exists, len) = match fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => (true, metadata.len()),
            Ok(_) => (false, 0),
            Err(error) if error.kind() == io::ErrorKind::NotFound => (false, 0),
            Err(error) => return Err(SessionError::storage(path, error)),
        };
        debug!(target: STORAGE_TARGET, path = %path.display(), exists, len, "inspected stored file");
        Ok(StoredFile { path, exists, len })
    }

    /// Opens `name` for appending, creating it if absent.
    pub async fn open_for_append(&self, name: &str) -> Result<File, SessionError> {
        let path = self.resolve(name);
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|error| SessionError::storage(path, error))
    }
}

/// Registry of name-keyed async mutexes.
///
/// Entries exist only while some upload holds or waits for the lock.
#[derive(Debug, Default)]
pub struct NameLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl NameLocks {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive use of `name`.
    pub async fn lock(self: &Arc<Self>, name: &str) -> NameGuard {
        let mutex = self
            .locks
            .entry(name.to_owned())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = mutex.lock_owned().await;
        NameGuard {
            guard: Some(guard),
            registry: Arc::clone(self),
            name: name.to_owned(),
        }
    }

    /// Number of names currently locked or awaited.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Reports whether no name is locked.
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Exclusive hold on one file name. Released on drop.
#[derive(Debug)]
pub struct NameGuard {
    guard: Option<OwnedMutexGuard<()>>,
    registry: Arc<NameLocks>,
    name: String,
}

impl NameGuard {
    /// The locked name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for NameGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Waiters hold their own clone, so a count of one means the map is the
        // last owner.
        self.registry
            .locks
            .remove_if(&self.name, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn missing_file_reports_zero_length() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = SaveDirectory::new(dir.path());
        let stored = storage.stored_file("absent.bin").await.expect("inspect");
        assert!(!stored.exists());
        assert_eq!(stored.len(), 0);
        assert_eq!(stored.resume_offset(), ResumeOffset::ZERO);
        assert_eq!(stored.path(), dir.path().join("absent.bin"));
    }

    #[tokio::test]
    async fn existing_file_reports_its_length() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("data.bin"), b"0123456789").expect("seed");
        let storage = SaveDirectory::new(dir.path());
        let stored = storage.stored_file("data.bin").await.expect("inspect");
        assert!(stored.exists());
        assert_eq!(stored.len(), 10);
    }

    #[tokio::test]
    async fn directory_is_treated_as_absent() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir(dir.path().join("nested")).expect("mkdir");
        let storage = SaveDirectory::new(dir.path());
        let stored = storage.stored_file("nested").await.expect("inspect");
        assert!(!stored.exists());
        assert!(stored.is_empty());
    }

    #[tokio::test]
    async fn append_never_truncates() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("log.bin"), b"abc").expect("seed");
        let storage = SaveDirectory::new(dir.path());

        let mut file = storage.open_for_append("log.bin").await.expect("open");
        file.write_all(b"def").await.expect("write");
        file.flush().await.expect("flush");
        drop(file);

        let contents = std::fs::read(dir.path().join("log.bin")).expect("read");
        assert_eq!(contents, b"abcdef");
    }

    #[tokio::test]
    async fn open_in_missing_directory_reports_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = SaveDirectory::new(dir.path().join("gone"));
        let error = storage.open_for_append("x.bin").await.expect_err("no directory");
        assert!(matches!(error, SessionError::Storage { ref path, .. } if path.ends_with("x.bin")));
    }

    #[tokio::test]
    async fn ensure_exists_creates_nested_directories_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = SaveDirectory::new(dir.path().join("a").join("b"));
        assert!(storage.ensure_exists().await.expect("create"));
        assert!(storage.root().is_dir());
        assert!(!storage.ensure_exists().await.expect("exists"));
    }

    #[tokio::test]
    async fn name_lock_serialises_same_name() {
        let locks = Arc::new(NameLocks::new());
        let first = locks.lock("same.bin").await;
        assert_eq!(first.name(), "same.bin");

        let contender = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _guard = locks.lock("same.bin").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!contender.is_finished());

        drop(first);
        contender.await.expect("contender acquires lock");
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn distinct_names_do_not_block() {
        let locks = Arc::new(NameLocks::new());
        let _a = locks.lock("a.bin").await;
        let b = tokio::time::timeout(Duration::from_secs(1), locks.lock("b.bin"))
            .await
            .expect("different name is not blocked");
        assert_eq!(locks.len(), 2);
        drop(b);
        assert_eq!(locks.len(), 1);
    }
}
