//! Rotating data-directory pair with online backup
//!
//! A collection's persistent state lives in one of two sibling roots,
//! `data0` and `data1`. At any time one is *current* (live data) and one is
//! *next* (prepared backup target). Each directory persists a small meta
//! blob (`directory.meta`: parent name, validity, dirty flag) and an
//! append-only `bundle.log` listing the bundle files whose mutations it has
//! durably absorbed.
//!
//! Backup protocol: when thresholds are met, the worker copies *current*
//! into *next* (`Directory::copy_from`); a later `rotate()` swaps the
//! roles. Recovery compares a directory's bundle log against the bundle
//! `backup/` folder to find mutations the directory has not absorbed yet.
//!
//! All write paths hold a [`DirectoryGuard`] on *current* for their full
//! duration. Acquisition fails if the directory is dirty; a guard dropped
//! while the thread is panicking marks the directory dirty, and subsequent
//! acquisitions fail until an external reset.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};
use vireo_core::{EngineError, EngineResult};

/// Magic bytes for the directory meta blob.
const META_MAGIC: &[u8; 4] = b"VDIR";
/// Current meta format version.
const META_VERSION: u32 = 1;
/// Meta file name inside each data directory.
const META_FILE: &str = "directory.meta";
/// Bundle append-log file name inside each data directory.
const BUNDLE_LOG_FILE: &str = "bundle.log";
/// Rotator cookie recording which sibling is current.
const COOKIE_FILE: &str = "current.cookie";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct DirectoryMeta {
    parent_name: Option<String>,
    valid: bool,
    dirty: bool,
}

// ============================================================================
// Directory
// ============================================================================

/// One root of the data-directory pair.
#[derive(Debug)]
pub struct Directory {
    root: PathBuf,
    name: String,
    meta: Mutex<DirectoryMeta>,
    held: AtomicBool,
}

impl Directory {
    /// Open (or create) a data directory, loading its persisted meta.
    pub fn open(root: impl Into<PathBuf>) -> EngineResult<Arc<Self>> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        let name = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| EngineError::invalid_config("data directory has no name"))?;

        let meta = match load_meta(&root.join(META_FILE)) {
            Ok(Some(meta)) => meta,
            Ok(None) => DirectoryMeta::default(),
            Err(e) => {
                warn!(
                    target: "vireo::directory",
                    directory = %name,
                    error = %e,
                    "unreadable directory meta, starting from defaults"
                );
                DirectoryMeta::default()
            }
        };

        Ok(Arc::new(Directory {
            root,
            name,
            meta: Mutex::new(meta),
            held: AtomicBool::new(false),
        }))
    }

    /// Filesystem root of this directory.
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Directory name (last path component, e.g. `data0`).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the sibling this directory was last copied from.
    pub fn parent_name(&self) -> Option<String> {
        self.meta.lock().parent_name.clone()
    }

    /// Whether this directory holds a complete, usable copy.
    pub fn valid(&self) -> bool {
        self.meta.lock().valid
    }

    /// Whether a guard drop during panic has poisoned this directory.
    pub fn dirty(&self) -> bool {
        self.meta.lock().dirty
    }

    /// External reset: clear the dirty flag after manual repair.
    pub fn reset_dirty(&self) -> EngineResult<()> {
        let mut meta = self.meta.lock();
        meta.dirty = false;
        self.write_meta(&meta)
    }

    fn mark_dirty(&self) {
        let mut meta = self.meta.lock();
        meta.dirty = true;
        if let Err(e) = self.write_meta(&meta) {
            warn!(
                target: "vireo::directory",
                directory = %self.name,
                error = %e,
                "failed to persist dirty mark"
            );
        }
    }

    /// Replace this directory's contents with a copy of `other`, then
    /// record `other` as the parent and mark this directory valid.
    ///
    /// The validity flag is cleared before the copy starts and only set
    /// again after it completes, so a half-finished copy is never mistaken
    /// for a valid one.
    pub fn copy_from(&self, other: &Directory) -> EngineResult<()> {
        // Invalidate first: a crash mid-copy must not leave a stale
        // valid flag over partial contents.
        {
            let mut meta = self.meta.lock();
            meta.valid = false;
            self.write_meta(&meta)?;
        }

        clear_dir_contents(&self.root)?;
        copy_dir_recursive(&other.root, &self.root)?;

        let mut meta = self.meta.lock();
        meta.parent_name = Some(other.name.clone());
        meta.valid = true;
        meta.dirty = false;
        self.write_meta(&meta)
    }

    /// Append an absorbed bundle file name to the bundle log.
    pub fn append_bundle(&self, file_name: &str) -> EngineResult<()> {
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.root.join(BUNDLE_LOG_FILE))?;
        writeln!(file, "{}", file_name)?;
        Ok(())
    }

    /// The set of bundle file names this directory has absorbed.
    pub fn bundle_log(&self) -> EngineResult<HashSet<String>> {
        let path = self.root.join(BUNDLE_LOG_FILE);
        if !path.exists() {
            return Ok(HashSet::new());
        }
        let content = fs::read_to_string(path)?;
        Ok(content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn write_meta(&self, meta: &DirectoryMeta) -> EngineResult<()> {
        write_meta(&self.root.join(META_FILE), meta)
    }
}

fn write_meta(path: &Path, meta: &DirectoryMeta) -> EngineResult<()> {
    let payload = rmp_serde::to_vec(meta)
        .map_err(|e| EngineError::store(format!("serialize directory meta: {}", e)))?;
    let mut buf = Vec::with_capacity(8 + payload.len());
    buf.extend_from_slice(META_MAGIC);
    buf.extend_from_slice(&META_VERSION.to_le_bytes());
    buf.extend_from_slice(&payload);

    // Atomic write: temp + rename
    let tmp = path.with_extension("meta.tmp");
    fs::write(&tmp, &buf)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn load_meta(path: &Path) -> EngineResult<Option<DirectoryMeta>> {
    if !path.exists() {
        return Ok(None);
    }
    let buf = fs::read(path)?;
    if buf.len() < 8 || &buf[0..4] != META_MAGIC {
        return Err(EngineError::bad_format("bad directory meta header"));
    }
    let version = u32::from_le_bytes(buf[4..8].try_into().expect("length checked above"));
    if version != META_VERSION {
        return Err(EngineError::bad_format(format!(
            "unsupported directory meta version {}",
            version
        )));
    }
    let meta = rmp_serde::from_slice(&buf[8..])
        .map_err(|e| EngineError::bad_format(format!("decode directory meta: {}", e)))?;
    Ok(Some(meta))
}

fn clear_dir_contents(dir: &Path) -> EngineResult<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

fn copy_dir_recursive(from: &Path, to: &Path) -> EngineResult<()> {
    fs::create_dir_all(to)?;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let source = entry.path();
        let target = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&source, &target)?;
        } else {
            fs::copy(&source, &target)?;
        }
    }
    Ok(())
}

// ============================================================================
// DirectoryGuard
// ============================================================================

/// Scoped write guard on a data directory.
///
/// Acquisition fails if the directory is dirty or already guarded. Dropping
/// the guard releases it; dropping it while the thread is panicking marks
/// the directory dirty instead.
#[derive(Debug)]
pub struct DirectoryGuard {
    directory: Arc<Directory>,
}

impl DirectoryGuard {
    /// Acquire the guard, failing on a dirty or already-guarded directory.
    pub fn acquire(directory: &Arc<Directory>) -> EngineResult<Self> {
        if directory.dirty() {
            return Err(EngineError::dirty(directory.name()));
        }
        if directory
            .held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(EngineError::dirty(directory.name()));
        }
        Ok(DirectoryGuard {
            directory: Arc::clone(directory),
        })
    }
}

impl Drop for DirectoryGuard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.directory.mark_dirty();
        }
        self.directory.held.store(false, Ordering::Release);
    }
}

// ============================================================================
// DirectoryRotator
// ============================================================================

/// The current/next pair of data directories for one collection.
pub struct DirectoryRotator {
    data0: Arc<Directory>,
    data1: Arc<Directory>,
    current_is_data0: AtomicBool,
    cookie_path: PathBuf,
}

impl DirectoryRotator {
    /// Open the rotator under `parent`, creating `data0`/`data1` as needed.
    ///
    /// The previously recorded current directory is restored from the
    /// rotator cookie; a fresh rotator starts on `data0`.
    pub fn open(parent: impl Into<PathBuf>) -> EngineResult<Self> {
        let parent = parent.into();
        fs::create_dir_all(&parent)?;
        let data0 = Directory::open(parent.join("data0"))?;
        let data1 = Directory::open(parent.join("data1"))?;
        let cookie_path = parent.join(COOKIE_FILE);

        let current_is_data0 = match fs::read_to_string(&cookie_path) {
            Ok(content) => content.trim() != data1.name(),
            Err(_) => true,
        };

        Ok(DirectoryRotator {
            data0,
            data1,
            current_is_data0: AtomicBool::new(current_is_data0),
            cookie_path,
        })
    }

    /// The live data directory.
    pub fn current(&self) -> Arc<Directory> {
        if self.current_is_data0.load(Ordering::Acquire) {
            Arc::clone(&self.data0)
        } else {
            Arc::clone(&self.data1)
        }
    }

    /// The prepared backup target.
    pub fn next(&self) -> Arc<Directory> {
        if self.current_is_data0.load(Ordering::Acquire) {
            Arc::clone(&self.data1)
        } else {
            Arc::clone(&self.data0)
        }
    }

    /// Swap the roles of current and next, persisting the choice.
    pub fn rotate(&self) -> EngineResult<()> {
        let now_data0 = !self.current_is_data0.load(Ordering::Acquire);
        self.current_is_data0.store(now_data0, Ordering::Release);
        let current = self.current();
        fs::write(&self.cookie_path, current.name())?;
        info!(
            target: "vireo::directory",
            current = %current.name(),
            "rotated data directories"
        );
        Ok(())
    }

    /// Run the backup protocol: copy current into next when next exists
    /// under a different name and is not already a valid copy of current.
    ///
    /// Returns `Ok(false)` when nothing needed copying.
    pub fn backup_current(&self) -> EngineResult<bool> {
        let current = self.current();
        let next = self.next();

        if current.name() == next.name() {
            return Ok(false);
        }
        if next.valid() && next.parent_name().as_deref() == Some(current.name()) {
            // Already a valid copy of current; re-copying would only burn disk.
            return Ok(false);
        }

        info!(
            target: "vireo::directory",
            from = %current.name(),
            to = %next.name(),
            "copying data directory"
        );
        next.copy_from(&current)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn meta_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("data0");
        {
            let dir = Directory::open(&path).unwrap();
            assert!(!dir.valid());
            dir.append_bundle("B-00-202601010000-00000-I-c.SCD").unwrap();
        }
        let dir = Directory::open(&path).unwrap();
        let log = dir.bundle_log().unwrap();
        assert!(log.contains("B-00-202601010000-00000-I-c.SCD"));
    }

    #[test]
    fn copy_from_records_parent_and_validity() {
        let tmp = TempDir::new().unwrap();
        let rotator = DirectoryRotator::open(tmp.path()).unwrap();
        let current = rotator.current();
        let next = rotator.next();

        fs::write(current.path().join("payload.bin"), b"live data").unwrap();
        assert!(rotator.backup_current().unwrap());

        assert!(next.valid());
        assert_eq!(next.parent_name().as_deref(), Some("data0"));
        assert_eq!(
            fs::read(next.path().join("payload.bin")).unwrap(),
            b"live data"
        );
    }

    #[test]
    fn backup_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let rotator = DirectoryRotator::open(tmp.path()).unwrap();
        fs::write(rotator.current().path().join("payload.bin"), b"x").unwrap();

        assert!(rotator.backup_current().unwrap());
        // No intervening writes: second backup is a no-op.
        assert!(!rotator.backup_current().unwrap());
    }

    #[test]
    fn rotation_swaps_roles_and_persists() {
        let tmp = TempDir::new().unwrap();
        {
            let rotator = DirectoryRotator::open(tmp.path()).unwrap();
            assert_eq!(rotator.current().name(), "data0");
            rotator.rotate().unwrap();
            assert_eq!(rotator.current().name(), "data1");
        }
        let rotator = DirectoryRotator::open(tmp.path()).unwrap();
        assert_eq!(rotator.current().name(), "data1");
    }

    #[test]
    fn guard_fails_on_dirty_directory() {
        let tmp = TempDir::new().unwrap();
        let dir = Directory::open(tmp.path().join("data0")).unwrap();
        dir.mark_dirty();

        let err = DirectoryGuard::acquire(&dir).unwrap_err();
        assert!(matches!(err, EngineError::DirectoryDirty { .. }));

        dir.reset_dirty().unwrap();
        assert!(DirectoryGuard::acquire(&dir).is_ok());
    }

    #[test]
    fn guard_is_exclusive() {
        let tmp = TempDir::new().unwrap();
        let dir = Directory::open(tmp.path().join("data0")).unwrap();
        let _held = DirectoryGuard::acquire(&dir).unwrap();
        assert!(DirectoryGuard::acquire(&dir).is_err());
    }

    #[test]
    fn guard_release_allows_reacquire() {
        let tmp = TempDir::new().unwrap();
        let dir = Directory::open(tmp.path().join("data0")).unwrap();
        {
            let _guard = DirectoryGuard::acquire(&dir).unwrap();
        }
        assert!(DirectoryGuard::acquire(&dir).is_ok());
        assert!(!dir.dirty());
    }

    #[test]
    fn panic_while_guarded_marks_dirty() {
        let tmp = TempDir::new().unwrap();
        let dir = Directory::open(tmp.path().join("data0")).unwrap();

        let dir_clone = Arc::clone(&dir);
        let result = std::thread::spawn(move || {
            let _guard = DirectoryGuard::acquire(&dir_clone).unwrap();
            panic!("write failed mid-pass");
        })
        .join();
        assert!(result.is_err());

        assert!(dir.dirty());
        assert!(DirectoryGuard::acquire(&dir).is_err());

        // Dirty state persists across reopen until externally reset.
        let reopened = Directory::open(dir.path()).unwrap();
        assert!(reopened.dirty());
    }

    #[test]
    fn copy_failure_does_not_mark_valid() {
        let tmp = TempDir::new().unwrap();
        let rotator = DirectoryRotator::open(tmp.path()).unwrap();
        let next = rotator.next();

        // A source directory that vanishes mid-copy
        let ghost_root = tmp.path().join("ghost");
        fs::create_dir_all(&ghost_root).unwrap();
        let ghost = Directory::open(&ghost_root).unwrap();
        fs::remove_dir_all(&ghost_root).unwrap();

        assert!(next.copy_from(&ghost).is_err());
        assert!(!next.valid());
        assert!(next.parent_name().is_none());
    }
}
