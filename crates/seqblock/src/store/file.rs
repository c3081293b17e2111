use core::time::Duration;
use std::{
    collections::BTreeMap,
    ffi::OsString,
    fs::{self, File, OpenOptions},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    thread,
    time::Instant,
};

use serde::{Deserialize, Serialize};
#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{Counter, CounterConnection, CounterStore, Document, StoreError, store::compare_and_set};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Collections {
    collections: BTreeMap<String, BTreeMap<String, Document>>,
}

/// A [`CounterStore`] persisted as a single JSON file.
///
/// Connecting takes an exclusive lock file (`<path>.lock`) created with
/// `create_new`, which is atomic on every mainstream filesystem, so at most
/// one connection exists per data file across all processes. The data file
/// is reloaded when the lock is taken and rewritten through a temporary file
/// and rename after every mutation. Since the lock is held for the whole
/// connection, [`CounterConnection::atomic_update`] is a compare-and-swap
/// across processes.
///
/// If a process dies while holding a connection the lock file stays behind
/// and later connects time out until it is removed; see
/// [`FileStore::clear_lock`].
///
/// ```
/// use seqblock::{BlockAllocator, FileStore};
///
/// let dir = tempfile::tempdir().unwrap();
/// let path = dir.path().join("counters.json");
///
/// let first = BlockAllocator::with_defaults(FileStore::new(&path));
/// assert_eq!(first.allocate("id", 2).unwrap().to_vec(), vec![0, 1]);
///
/// // Another handle on the same file continues where the first left off.
/// let second = BlockAllocator::with_defaults(FileStore::new(&path));
/// assert_eq!(second.allocate("id", 1).unwrap().to_vec(), vec![2]);
/// ```
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
    lock_path: PathBuf,
    lock_timeout: Duration,
    poll_interval: Duration,
}

impl FileStore {
    pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);
    const POLL_INTERVAL: Duration = Duration::from_millis(5);

    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut lock_path = OsString::from(path.as_os_str());
        lock_path.push(".lock");
        Self {
            path,
            lock_path: PathBuf::from(lock_path),
            lock_timeout: Self::DEFAULT_LOCK_TIMEOUT,
            poll_interval: Self::POLL_INTERVAL,
        }
    }

    /// How long [`CounterStore::connect`] waits for another holder to release
    /// the lock before failing with [`StoreError::Interrupted`].
    #[must_use]
    pub const fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Process id recorded in the lock file, or `None` when the store is not
    /// locked or the lock file does not hold a pid.
    pub fn lock_owner(&self) -> Option<u32> {
        fs::read_to_string(&self.lock_path)
            .ok()
            .and_then(|raw| raw.trim().parse().ok())
    }

    /// Removes a lock file left behind by a crashed process.
    ///
    /// Only call this when no live process can be holding a connection.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the lock file exists but cannot
    /// be removed.
    pub fn clear_lock(&self) -> Result<(), StoreError> {
        match fs::remove_file(&self.lock_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::unavailable(format!(
                "cannot remove lock file {}: {e}",
                self.lock_path.display()
            ))),
        }
    }

    fn acquire_lock(&self) -> Result<LockFile, StoreError> {
        let deadline = Instant::now() + self.lock_timeout;
        loop {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&self.lock_path)
            {
                Ok(mut file) => {
                    // Dropping the guard removes the lock again if the pid
                    // cannot be recorded.
                    let lock = LockFile {
                        path: self.lock_path.clone(),
                    };
                    writeln!(file, "{}", std::process::id()).map_err(|e| {
                        StoreError::unavailable(format!(
                            "cannot write lock file {}: {e}",
                            self.lock_path.display()
                        ))
                    })?;
                    return Ok(lock);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if Instant::now() >= deadline {
                        return Err(StoreError::Interrupted {
                            reason: format!(
                                "timed out after {:?} waiting for {}",
                                self.lock_timeout,
                                self.lock_path.display()
                            ),
                        });
                    }
                    thread::sleep(self.poll_interval);
                }
                Err(e) => {
                    return Err(StoreError::unavailable(format!(
                        "cannot create lock file {}: {e}",
                        self.lock_path.display()
                    )));
                }
            }
        }
    }

    fn load(&self) -> Result<Collections, StoreError> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Collections::default()),
            Err(e) => {
                return Err(StoreError::unavailable(format!(
                    "cannot read {}: {e}",
                    self.path.display()
                )));
            }
        };
        serde_json::from_slice(&raw).map_err(|e| {
            StoreError::unavailable(format!("cannot parse {}: {e}", self.path.display()))
        })
    }

    fn tmp_path(&self) -> PathBuf {
        let mut tmp_path = OsString::from(self.path.as_os_str());
        tmp_path.push(".tmp");
        PathBuf::from(tmp_path)
    }

    /// Replaces the data file with `data`. The temp file is flushed to disk
    /// before the rename, and the directory entry after it, so a crash leaves
    /// either the old or the new contents in place.
    fn persist(&self, data: &Collections) -> Result<(), StoreError> {
        let tmp_path = self.tmp_path();
        let raw = serde_json::to_vec_pretty(data)
            .map_err(|e| StoreError::unavailable(format!("cannot encode counters: {e}")))?;

        let written = File::create(&tmp_path)
            .and_then(|mut file| {
                file.write_all(&raw)?;
                file.sync_all()
            })
            .map_err(|e| {
                StoreError::unavailable(format!("cannot write {}: {e}", tmp_path.display()))
            })
            .and_then(|()| {
                fs::rename(&tmp_path, &self.path).map_err(|e| {
                    StoreError::unavailable(format!("cannot replace {}: {e}", self.path.display()))
                })
            });
        if let Err(e) = written {
            if let Err(_cleanup) = fs::remove_file(&tmp_path) {
                #[cfg(feature = "tracing")]
                tracing::warn!("failed to remove {}: {_cleanup}", tmp_path.display());
            }
            return Err(e);
        }

        self.sync_parent()
    }

    #[cfg(unix)]
    fn sync_parent(&self) -> Result<(), StoreError> {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        File::open(parent)
            .and_then(|dir| dir.sync_all())
            .map_err(|e| StoreError::unavailable(format!("cannot sync {}: {e}", parent.display())))
    }

    #[cfg(not(unix))]
    fn sync_parent(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

impl CounterStore for FileStore {
    type Conn<'a> = FileConnection<'a>;

    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self), fields(path = %self.path.display())))]
    fn connect(&self) -> Result<Self::Conn<'_>, StoreError> {
        let lock = self.acquire_lock()?;
        // Reload under the lock; whatever another process wrote is visible.
        let data = self.load()?;
        Ok(FileConnection {
            store: self,
            data,
            _lock: lock,
        })
    }
}

/// Removes the lock file when dropped.
struct LockFile {
    path: PathBuf,
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if let Err(_e) = fs::remove_file(&self.path) {
            #[cfg(feature = "tracing")]
            tracing::warn!("failed to release lock {}: {_e}", self.path.display());
        }
    }
}

/// An exclusive connection to a [`FileStore`]. The file lock is released on
/// drop.
pub struct FileConnection<'a> {
    store: &'a FileStore,
    data: Collections,
    _lock: LockFile,
}

impl FileConnection<'_> {
    /// Applies `mutate` to a copy of the data, persists it, and only then
    /// commits it to this connection's view.
    fn commit<T>(
        &mut self,
        mutate: impl FnOnce(&mut Collections) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut next = self.data.clone();
        let out = mutate(&mut next)?;
        self.store.persist(&next)?;
        self.data = next;
        Ok(out)
    }
}

impl CounterConnection for FileConnection<'_> {
    fn collection_exists(&mut self, collection: &str) -> Result<bool, StoreError> {
        Ok(self.data.collections.contains_key(collection))
    }

    fn ensure_collection(&mut self, collection: &str) -> Result<(), StoreError> {
        if self.data.collections.contains_key(collection) {
            return Ok(());
        }
        self.commit(|data| {
            data.collections.insert(collection.to_owned(), BTreeMap::new());
            Ok(())
        })
    }

    fn find_one(&mut self, collection: &str, name: &str) -> Result<Option<Document>, StoreError> {
        Ok(self
            .data
            .collections
            .get(collection)
            .and_then(|docs| docs.get(name))
            .cloned())
    }

    fn insert(&mut self, collection: &str, counter: &Counter) -> Result<(), StoreError> {
        self.commit(|data| {
            let docs = data.collections.get_mut(collection).ok_or_else(|| {
                StoreError::CollectionNotFound {
                    collection: collection.to_owned(),
                }
            })?;
            if docs.contains_key(&counter.name) {
                return Err(StoreError::DuplicateKey {
                    collection: collection.to_owned(),
                    name: counter.name.clone(),
                });
            }
            docs.insert(counter.name.clone(), counter.to_document());
            Ok(())
        })
    }

    fn atomic_update(
        &mut self,
        collection: &str,
        name: &str,
        expected: i64,
        new_value: i64,
    ) -> Result<bool, StoreError> {
        let docs = self.data.collections.get(collection).ok_or_else(|| {
            StoreError::CollectionNotFound {
                collection: collection.to_owned(),
            }
        })?;
        let matches = docs
            .get(name)
            .and_then(|doc| doc.get(Counter::VALUE_FIELD))
            .and_then(Document::as_i64)
            == Some(expected);
        if !matches {
            return Ok(false);
        }

        self.commit(|data| {
            let swapped = data
                .collections
                .get_mut(collection)
                .and_then(|docs| docs.get_mut(name))
                .is_some_and(|doc| compare_and_set(doc, expected, new_value));
            Ok(swapped)
        })
    }
}
