//! Working-copy administrative area
//!
//! A working copy records its metadata in `<root>/<admin_dir>/entries.json`:
//! the URL it was checked out from, the repository root and UUID, and one
//! entry per versioned node keyed by its path relative to the root (`""` is
//! the root itself).
//!
//! [`WcAdmin`] is the administrative handle. Opened with a write lock it
//! holds `<admin_dir>/lock` until [`WcAdmin::close`], drop, or destruction of
//! the pool it was opened in, whichever comes first.

use crate::error::{ClientError, Result};
use crate::pool::Pool;
use dsvn_core::{url_join, NodeKind, PropertySet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const ENTRIES_FILE: &str = "entries.json";
const LOCK_FILE: &str = "lock";

/// How far below a target an operation reaches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Depth {
    /// The target only
    Empty,
    /// The target and its file children
    Files,
    /// The target and all its immediate children
    Immediates,
    #[default]
    Infinity,
}

impl Depth {
    /// `Infinity` when recursing, `Files` otherwise
    pub fn from_recurse(recurse: bool) -> Self {
        if recurse { Depth::Infinity } else { Depth::Files }
    }

    /// Whether a node `levels` below the target, of `kind`, is in scope
    pub fn includes(&self, levels: usize, kind: NodeKind) -> bool {
        match self {
            Depth::Empty => levels == 0,
            Depth::Files => levels == 0 || (levels == 1 && kind == NodeKind::File),
            Depth::Immediates => levels <= 1,
            Depth::Infinity => true,
        }
    }
}

/// Scheduled working-copy change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Schedule {
    #[default]
    Normal,
    Add,
    Delete,
    Replace,
}

/// Per-node record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WcEntry {
    pub kind: NodeKind,
    /// Base revision of the node
    pub revision: u64,
    pub last_changed_rev: u64,
    pub last_changed_author: Option<String>,
    /// Unix seconds
    pub last_changed_date: Option<i64>,
    /// Size of the working file when it was last written
    pub working_size: Option<u64>,
    /// Size of the file at `revision`, as checked out
    #[serde(default)]
    pub base_size: Option<u64>,
    #[serde(default)]
    pub schedule: Schedule,
    #[serde(default)]
    pub properties: PropertySet,
}

impl WcEntry {
    /// Entry scheduled for addition, not yet in the repository
    pub fn added(kind: NodeKind) -> Self {
        Self {
            kind,
            revision: 0,
            last_changed_rev: 0,
            last_changed_author: None,
            last_changed_date: None,
            working_size: None,
            base_size: None,
            schedule: Schedule::Add,
            properties: PropertySet::new(),
        }
    }
}

/// Contents of the entries file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WcMetadata {
    pub url: String,
    pub repos_root_url: String,
    pub uuid: String,
    pub revision: u64,
    #[serde(default)]
    pub depth: Depth,
    pub entries: BTreeMap<String, WcEntry>,
}

struct WcLock {
    path: PathBuf,
    released: Arc<AtomicBool>,
}

impl WcLock {
    fn acquire(path: PathBuf, pool: &Pool) -> Result<Self> {
        match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(ClientError::WorkingCopy(format!(
                    "Working copy locked: {}",
                    path.display()
                )));
            }
            Err(e) => return Err(e.into()),
        }

        let released = Arc::new(AtomicBool::new(false));
        let flag = released.clone();
        let lock_path = path.clone();
        let registered = pool.register_cleanup(move || {
            if !flag.swap(true, Ordering::SeqCst) {
                let _ = fs::remove_file(&lock_path);
            }
        });
        if let Err(e) = registered {
            let _ = fs::remove_file(&path);
            return Err(e);
        }
        Ok(Self { path, released })
    }

    fn release(&self) -> Result<()> {
        if self.released.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        match fs::remove_file(&self.path) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

impl Drop for WcLock {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            tracing::warn!("Failed to release working copy lock {}: {}", self.path.display(), e);
        }
    }
}

/// Administrative handle on a working copy
pub struct WcAdmin {
    root: PathBuf,
    admin_dir: String,
    meta: WcMetadata,
    lock: Option<WcLock>,
}

impl WcAdmin {
    /// Find the working-copy root at or above `path`
    ///
    /// Returns the root and `path` relative to it.
    pub fn find_root(path: &Path, admin_dir: &str) -> Option<(PathBuf, String)> {
        path.ancestors()
            .find(|a| a.join(admin_dir).join(ENTRIES_FILE).is_file())
            .map(|root| {
                let rel = relpath(root, path).unwrap_or_default();
                (root.to_path_buf(), rel)
            })
    }

    /// Create the administrative area of a new working copy, write-locked
    pub fn create(root: &Path, admin_dir: &str, meta: WcMetadata, pool: &Pool) -> Result<Self> {
        let adm = root.join(admin_dir);
        fs::create_dir_all(&adm)?;
        let lock = WcLock::acquire(adm.join(LOCK_FILE), pool)?;
        let wc = Self {
            root: root.to_path_buf(),
            admin_dir: admin_dir.to_string(),
            meta,
            lock: Some(lock),
        };
        wc.save()?;
        Ok(wc)
    }

    /// Open the working copy rooted at `root`
    pub fn open(root: &Path, admin_dir: &str, write_lock: bool, pool: &Pool) -> Result<Self> {
        pool.ensure_valid()?;
        let adm = root.join(admin_dir);
        let entries = adm.join(ENTRIES_FILE);
        let data = match fs::read_to_string(&entries) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(ClientError::WorkingCopy(format!(
                    "'{}' is not a working copy",
                    root.display()
                )));
            }
            Err(e) => return Err(e.into()),
        };
        let meta: WcMetadata = serde_json::from_str(&data)?;
        let lock = if write_lock {
            Some(WcLock::acquire(adm.join(LOCK_FILE), pool)?)
        } else {
            None
        };
        tracing::debug!("Opened working copy {} at r{}", root.display(), meta.revision);
        Ok(Self {
            root: root.to_path_buf(),
            admin_dir: admin_dir.to_string(),
            meta,
            lock,
        })
    }

    /// Open the working copy containing `path`; returns the handle and `path`'s relpath
    pub fn open_containing(path: &Path, admin_dir: &str, write_lock: bool, pool: &Pool) -> Result<(Self, String)> {
        let (root, rel) = Self::find_root(path, admin_dir)
            .ok_or_else(|| ClientError::WorkingCopy(format!("'{}' is not a working copy", path.display())))?;
        Ok((Self::open(&root, admin_dir, write_lock, pool)?, rel))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn admin_dir(&self) -> &str {
        &self.admin_dir
    }

    pub fn metadata(&self) -> &WcMetadata {
        &self.meta
    }

    pub fn metadata_mut(&mut self) -> &mut WcMetadata {
        &mut self.meta
    }

    pub fn is_locked(&self) -> bool {
        self.lock.is_some()
    }

    pub fn uuid(&self) -> &str {
        &self.meta.uuid
    }

    pub fn entry(&self, relpath: &str) -> Option<&WcEntry> {
        self.meta.entries.get(relpath)
    }

    pub fn entry_mut(&mut self, relpath: &str) -> Option<&mut WcEntry> {
        self.meta.entries.get_mut(relpath)
    }

    pub fn set_entry(&mut self, relpath: &str, entry: WcEntry) {
        self.meta.entries.insert(relpath.to_string(), entry);
    }

    /// Remove an entry and everything below it
    pub fn remove_entry(&mut self, relpath: &str) {
        let prefix = format!("{}/", relpath);
        self.meta
            .entries
            .retain(|p, _| p != relpath && (relpath.is_empty() || !p.starts_with(&prefix)));
    }

    /// URL of a node in this working copy
    pub fn url_of(&self, relpath: &str) -> String {
        url_join(&self.meta.url, relpath)
    }

    /// Filesystem path of a node
    pub fn abspath(&self, relpath: &str) -> PathBuf {
        relpath
            .split('/')
            .filter(|c| !c.is_empty())
            .fold(self.root.clone(), |p, c| p.join(c))
    }

    /// Path of `path` relative to the root
    pub fn relpath_of(&self, path: &Path) -> Result<String> {
        relpath(&self.root, path).ok_or_else(|| {
            ClientError::WorkingCopy(format!(
                "'{}' is not inside working copy '{}'",
                path.display(),
                self.root.display()
            ))
        })
    }

    /// Write the entries file, replacing it atomically
    pub fn save(&self) -> Result<()> {
        let adm = self.root.join(&self.admin_dir);
        let path = adm.join(ENTRIES_FILE);
        let tmp_path = path.with_extension("tmp");
        let data = serde_json::to_string_pretty(&self.meta)?;
        fs::write(&tmp_path, data)?;
        fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    /// Save the entries after an operation that changed the working copy
    ///
    /// Entries are written whether or not the operation finished, so the
    /// nodes it already put on disk stay versioned. The operation's own
    /// error takes precedence over a failed save.
    pub fn save_after<T>(&self, outcome: Result<T>) -> Result<T> {
        match (outcome, self.save()) {
            (Ok(value), saved) => saved.map(|()| value),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(save_err)) => {
                tracing::warn!("Failed to save entries of {}: {}", self.root.display(), save_err);
                Err(e)
            }
        }
    }

    /// Release the write lock, if held
    pub fn close(mut self) -> Result<()> {
        match self.lock.take() {
            Some(lock) => lock.release(),
            None => Ok(()),
        }
    }
}

fn relpath(root: &Path, path: &Path) -> Option<String> {
    let rest = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rest
        .components()
        .filter_map(|c| match c {
            std::path::Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    Some(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_meta() -> WcMetadata {
        let mut entries = BTreeMap::new();
        let mut root = WcEntry::added(NodeKind::Dir);
        root.schedule = Schedule::Normal;
        root.revision = 4;
        entries.insert(String::new(), root);
        let mut readme = WcEntry::added(NodeKind::File);
        readme.schedule = Schedule::Normal;
        readme.working_size = Some(8);
        entries.insert("README.txt".to_string(), readme);
        WcMetadata {
            url: "dsvn://h/r/trunk".to_string(),
            repos_root_url: "dsvn://h/r".to_string(),
            uuid: "uuid-1".to_string(),
            revision: 4,
            depth: Depth::Infinity,
            entries,
        }
    }

    #[test]
    fn test_create_open_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let pool = Pool::new();
        let wc = WcAdmin::create(dir.path(), ".dsvn", sample_meta(), &pool).unwrap();
        assert!(wc.is_locked());
        wc.close().unwrap();

        let wc = WcAdmin::open(dir.path(), ".dsvn", false, &pool).unwrap();
        assert_eq!(wc.metadata(), &sample_meta());
        assert_eq!(wc.entry("README.txt").unwrap().working_size, Some(8));
        assert_eq!(wc.url_of("README.txt"), "dsvn://h/r/trunk/README.txt");
        assert_eq!(wc.url_of(""), "dsvn://h/r/trunk");
    }

    #[test]
    fn test_not_a_working_copy() {
        let dir = tempfile::tempdir().unwrap();
        let pool = Pool::new();
        assert!(matches!(
            WcAdmin::open(dir.path(), ".dsvn", false, &pool),
            Err(ClientError::WorkingCopy(_))
        ));
        assert!(WcAdmin::find_root(dir.path(), ".dsvn").is_none());
    }

    #[test]
    fn test_write_lock_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let pool = Pool::new();
        let wc = WcAdmin::create(dir.path(), ".dsvn", sample_meta(), &pool).unwrap();
        assert!(matches!(
            WcAdmin::open(dir.path(), ".dsvn", true, &pool),
            Err(ClientError::WorkingCopy(_))
        ));
        // Read-only handles do not need the lock.
        assert!(WcAdmin::open(dir.path(), ".dsvn", false, &pool).is_ok());
        drop(wc);
        assert!(WcAdmin::open(dir.path(), ".dsvn", true, &pool).is_ok());
    }

    #[test]
    fn test_pool_destruction_releases_lock() {
        let dir = tempfile::tempdir().unwrap();
        let root = Pool::new();
        WcAdmin::create(dir.path(), ".dsvn", sample_meta(), &root).unwrap().close().unwrap();

        let scratch = root.create_child().unwrap();
        let wc = WcAdmin::open(dir.path(), ".dsvn", true, &scratch).unwrap();
        let lock_path = dir.path().join(".dsvn").join(LOCK_FILE);
        assert!(lock_path.exists());
        scratch.destroy().unwrap();
        assert!(!lock_path.exists());
        // Dropping the handle afterwards is a no-op.
        drop(wc);
    }

    #[test]
    fn test_find_root_from_subdirectory() {
        let dir = tempfile::tempdir().unwrap();
        let pool = Pool::new();
        WcAdmin::create(dir.path(), ".dsvn", sample_meta(), &pool).unwrap().close().unwrap();
        let sub = dir.path().join("dir1").join("deep");
        fs::create_dir_all(&sub).unwrap();

        let (root, rel) = WcAdmin::find_root(&sub, ".dsvn").unwrap();
        assert_eq!(root, dir.path());
        assert_eq!(rel, "dir1/deep");
    }

    #[test]
    fn test_remove_entry_is_recursive() {
        let dir = tempfile::tempdir().unwrap();
        let pool = Pool::new();
        let mut wc = WcAdmin::create(dir.path(), ".dsvn", sample_meta(), &pool).unwrap();
        wc.set_entry("dir1", WcEntry::added(NodeKind::Dir));
        wc.set_entry("dir1/a", WcEntry::added(NodeKind::File));
        wc.set_entry("dir10", WcEntry::added(NodeKind::Dir));
        wc.remove_entry("dir1");
        assert!(wc.entry("dir1").is_none());
        assert!(wc.entry("dir1/a").is_none());
        assert!(wc.entry("dir10").is_some());
    }

    #[test]
    fn test_save_after_failed_operation() {
        let dir = tempfile::tempdir().unwrap();
        let pool = Pool::new();
        let mut wc = WcAdmin::create(dir.path(), ".dsvn", sample_meta(), &pool).unwrap();
        wc.set_entry("dir1", WcEntry::added(NodeKind::Dir));

        let outcome: Result<()> = Err(ClientError::Cancelled);
        assert!(matches!(wc.save_after(outcome), Err(ClientError::Cancelled)));
        assert_eq!(wc.save_after(Ok(7)).unwrap(), 7);
        wc.close().unwrap();

        let reopened = WcAdmin::open(dir.path(), ".dsvn", true, &pool).unwrap();
        assert_eq!(reopened.entry("dir1").map(|e| e.schedule), Some(Schedule::Add));
    }

    #[test]
    fn test_entries_without_base_size_still_load() {
        let json = r#"{"kind":"File","revision":3,"last_changed_rev":2,"last_changed_author":null,
            "last_changed_date":null,"working_size":8}"#;
        let entry: WcEntry = serde_json::from_str(json).unwrap();
        assert_eq!(entry.base_size, None);
        assert_eq!(entry.schedule, Schedule::Normal);
    }

    #[test]
    fn test_depth_scope() {
        assert!(Depth::Files.includes(1, NodeKind::File));
        assert!(!Depth::Files.includes(1, NodeKind::Dir));
        assert!(Depth::Immediates.includes(1, NodeKind::Dir));
        assert!(!Depth::Immediates.includes(2, NodeKind::File));
        assert!(Depth::Empty.includes(0, NodeKind::Dir));
        assert_eq!(Depth::from_recurse(true), Depth::Infinity);
    }
}
