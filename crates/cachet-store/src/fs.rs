use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{StoreError, StoreResult};
use crate::key::StoreKey;
use crate::traits::{KvStore, WriteOutcome};

/// File suffix for stored values.
const VALUE_SUFFIX: &str = ".val";
/// File suffix for per-key compare-and-swap locks.
const LOCK_SUFFIX: &str = ".lock";

/// Tuning for [`FsKvStore`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FsStoreConfig {
    /// How long `compare_and_swap` waits for a per-key lock.
    pub lock_timeout_ms: u64,
    /// Sleep between lock attempts.
    pub lock_poll_ms: u64,
    /// `fsync` every value file before it becomes visible.
    pub sync_writes: bool,
}

impl Default for FsStoreConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 5_000,
            lock_poll_ms: 2,
            sync_writes: false,
        }
    }
}

/// Directory-backed key-value store shared between processes.
///
/// On-disk layout:
/// ```text
/// <root>/<seg0>/<seg1>/.../<last>.val    value bytes
/// <root>/<seg0>/<seg1>/.../<last>.lock   held during compare-and-swap
/// ```
///
/// Values are written to a temporary file in the target directory and
/// renamed into place, so readers never see a torn value. `write_once` uses
/// a no-clobber rename, and `compare_and_swap` serializes writers through an
/// advisory OS lock on a file next to the value. The OS drops the lock when
/// its holder exits, so a crashed process never leaves a key locked.
pub struct FsKvStore {
    root: PathBuf,
    config: FsStoreConfig,
}

impl FsKvStore {
    /// Open (or create) a store rooted at `root`.
    pub fn open(root: impl AsRef<Path>, config: FsStoreConfig) -> StoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        debug!(root = %root.display(), "opened filesystem store");
        Ok(Self { root, config })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dir_path(&self, key: &StoreKey) -> PathBuf {
        let mut path = self.root.clone();
        for segment in key.segments() {
            path.push(segment);
        }
        path
    }

    fn file_path(&self, key: &StoreKey, suffix: &str) -> PathBuf {
        let mut path = self.root.clone();
        let segments = key.segments();
        for segment in &segments[..segments.len() - 1] {
            path.push(segment);
        }
        path.push(format!("{}{suffix}", key.last()));
        path
    }

    fn value_path(&self, key: &StoreKey) -> PathBuf {
        self.file_path(key, VALUE_SUFFIX)
    }

    /// Write `value` to a temp file beside `path`, ready to be renamed.
    fn stage(&self, path: &Path, value: &[u8]) -> StoreResult<NamedTempFile> {
        let parent = path.parent().unwrap_or(&self.root);
        fs::create_dir_all(parent)?;
        let mut staged = NamedTempFile::new_in(parent)?;
        staged.write_all(value)?;
        if self.config.sync_writes {
            staged.as_file().sync_all()?;
        }
        Ok(staged)
    }

    /// Store `value` unless the file already exists. Returns `false` if it did.
    fn persist_new(&self, path: &Path, value: &[u8]) -> StoreResult<bool> {
        let staged = self.stage(path, value)?;
        match staged.persist_noclobber(path) {
            Ok(_) => Ok(true),
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(StoreError::Io(e.error)),
        }
    }

    fn lock(&self, key: &StoreKey) -> StoreResult<KeyLock> {
        let path = self.file_path(key, LOCK_SUFFIX);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        // Lock files are never removed: unlinking one while another process
        // waits on it would let two holders lock different inodes.
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        let timeout = Duration::from_millis(self.config.lock_timeout_ms);
        let started = Instant::now();
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(KeyLock { file }),
                Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                    if started.elapsed() >= timeout {
                        return Err(StoreError::LockTimeout {
                            key: key.to_string(),
                            waited_ms: u64::try_from(started.elapsed().as_millis())
                                .unwrap_or(u64::MAX),
                        });
                    }
                    thread::sleep(Duration::from_millis(self.config.lock_poll_ms));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Convert a value file path back into its key.
    fn key_for_path(&self, path: &Path) -> Option<StoreKey> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let mut segments: Vec<String> = relative
            .iter()
            .map(|c| c.to_str().map(str::to_string))
            .collect::<Option<_>>()?;
        let last = segments.pop()?;
        segments.push(last.strip_suffix(VALUE_SUFFIX)?.to_string());
        StoreKey::new(segments).ok()
    }
}

impl KvStore for FsKvStore {
    fn read(&self, key: &StoreKey) -> StoreResult<Option<Vec<u8>>> {
        match fs::read(self.value_path(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, key: &StoreKey, value: &[u8]) -> StoreResult<()> {
        let path = self.value_path(key);
        self.stage(&path, value)?
            .persist(&path)
            .map_err(|e| StoreError::Io(e.error))?;
        Ok(())
    }

    fn write_once(&self, key: &StoreKey, value: &[u8]) -> StoreResult<WriteOutcome> {
        let path = self.value_path(key);
        if let Some(existing) = self.read(key)? {
            return Ok(WriteOutcome::Exists(existing));
        }
        if self.persist_new(&path, value)? {
            return Ok(WriteOutcome::Written);
        }
        // The winner's rename is atomic, so the file is complete.
        Ok(WriteOutcome::Exists(fs::read(&path)?))
    }

    fn compare_and_swap(
        &self,
        key: &StoreKey,
        expected: Option<&[u8]>,
        new: Option<&[u8]>,
    ) -> StoreResult<bool> {
        let _lock = self.lock(key)?;
        let current = self.read(key)?;
        if current.as_deref() != expected {
            return Ok(false);
        }
        let path = self.value_path(key);
        match (expected, new) {
            // Claiming an empty key also races with lock-free `write_once`.
            (None, Some(bytes)) => self.persist_new(&path, bytes),
            (Some(_), Some(bytes)) => {
                self.write(key, bytes)?;
                Ok(true)
            }
            (_, None) => {
                self.delete(key)?;
                Ok(true)
            }
        }
    }

    fn delete(&self, key: &StoreKey) -> StoreResult<bool> {
        match fs::remove_file(self.value_path(key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self, prefix: &StoreKey) -> StoreResult<Vec<StoreKey>> {
        let mut keys = Vec::new();
        if self.value_path(prefix).is_file() {
            keys.push(prefix.clone());
        }
        let dir = self.dir_path(prefix);
        if dir.is_dir() {
            for entry in WalkDir::new(&dir).min_depth(1) {
                let entry = match entry {
                    Ok(entry) => entry,
                    // Directories can vanish under concurrent deletes.
                    Err(e) if e.io_error().map(io::Error::kind) == Some(io::ErrorKind::NotFound) => {
                        continue
                    }
                    Err(e) => return Err(io::Error::other(e).into()),
                };
                if !entry.file_type().is_file() {
                    continue;
                }
                if let Some(key) = self.key_for_path(entry.path()) {
                    keys.push(key);
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

impl std::fmt::Debug for FsKvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsKvStore")
            .field("root", &self.root)
            .finish()
    }
}

/// Exclusive per-key lock; released on drop.
struct KeyLock {
    file: File,
}

impl Drop for KeyLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
