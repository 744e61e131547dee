//! In-memory versioned repository
//!
//! Every revision keeps an immutable snapshot of its path tree plus the
//! commit record (author, message, changed paths, revision properties).
//! Changes are staged in a [`Transaction`] and become visible atomically
//! when the transaction is committed; a failed commit leaves no trace.

use crate::backend::VersionedBackend;
use crate::error::{RepoError, Result};
use crate::object::{Blob, ChangeAction, ChangedPath, Commit, Node, NodeKind, ObjectId};
use crate::properties::PropertySet;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Path tree of a single revision, keyed by absolute repository path
pub type Snapshot = BTreeMap<String, Node>;

/// Normalize a repository path to `/a/b` form (root is `/`)
pub fn canonical_path(path: &str) -> String {
    let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty() && *p != ".").collect();
    format!("/{}", parts.join("/"))
}

/// Parent of a canonical path; the root has no parent
pub fn parent_path(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Whether `path` is `ancestor` or lies below it
pub fn is_ancestor(ancestor: &str, path: &str) -> bool {
    ancestor == "/"
        || path == ancestor
        || (path.starts_with(ancestor) && path.as_bytes().get(ancestor.len()) == Some(&b'/'))
}

fn descendants<'a>(snapshot: &'a Snapshot, path: &str) -> impl Iterator<Item = (&'a String, &'a Node)> {
    let prefix = path.to_string();
    let root = path.to_string();
    snapshot
        .range(root.clone()..)
        .take_while(move |(p, _)| p.starts_with(prefix.as_str()))
        .filter(move |(p, _)| is_ancestor(&root, p))
}

struct RevisionRecord {
    commit: Commit,
    snapshot: Arc<Snapshot>,
}

/// A set of staged changes against a base revision
pub struct Transaction {
    base_rev: u64,
    snapshot: Snapshot,
    changes: BTreeMap<String, ChangedPath>,
    blobs: HashMap<ObjectId, Bytes>,
    revprops: PropertySet,
}

impl Transaction {
    fn new(base_rev: u64, snapshot: Snapshot) -> Self {
        Self {
            base_rev,
            snapshot,
            changes: BTreeMap::new(),
            blobs: HashMap::new(),
            revprops: PropertySet::new(),
        }
    }

    /// Revision this transaction was started from
    pub fn base_rev(&self) -> u64 {
        self.base_rev
    }

    /// Kind of the node at `path` as staged in this transaction
    pub fn check_path(&self, path: &str) -> NodeKind {
        self.snapshot
            .get(&canonical_path(path))
            .map(|n| n.kind)
            .unwrap_or(NodeKind::None)
    }

    /// Changes staged so far
    pub fn changes(&self) -> &BTreeMap<String, ChangedPath> {
        &self.changes
    }

    /// Attach a custom revision property to the commit
    pub fn set_revprop(&mut self, name: String, value: String) {
        self.revprops.set(name, value);
    }

    fn require_parent_dir(&self, path: &str) -> Result<()> {
        let parent = parent_path(path).ok_or_else(|| RepoError::AlreadyExists(path.to_string()))?;
        match self.snapshot.get(parent).map(|n| n.kind) {
            Some(NodeKind::Dir) => Ok(()),
            Some(_) => Err(RepoError::NotDirectory(parent.to_string())),
            None => Err(RepoError::NotFound(parent.to_string())),
        }
    }

    fn record(&mut self, path: &str, mut change: ChangedPath) {
        let previous = self.changes.get(path).map(|c| c.action);
        match (previous, change.action) {
            (Some(ChangeAction::Deleted), ChangeAction::Added) => {
                change.action = ChangeAction::Replaced;
            }
            (Some(ChangeAction::Added), ChangeAction::Modified)
            | (Some(ChangeAction::Replaced), ChangeAction::Modified) => return,
            (Some(ChangeAction::Added), ChangeAction::Deleted) => {
                self.changes.remove(path);
                return;
            }
            _ => {}
        }
        self.changes.insert(path.to_string(), change);
    }

    /// Create an empty directory; the parent must already exist
    pub fn mkdir(&mut self, path: &str) -> Result<()> {
        let path = canonical_path(path);
        if self.snapshot.contains_key(&path) {
            return Err(RepoError::AlreadyExists(path));
        }
        self.require_parent_dir(&path)?;
        self.snapshot.insert(path.clone(), Node::dir(self.base_rev));
        self.record(&path, ChangedPath::new(ChangeAction::Added, NodeKind::Dir));
        Ok(())
    }

    /// Add a file or replace the content of an existing one
    pub fn put_file(&mut self, path: &str, content: Vec<u8>, executable: bool) -> Result<()> {
        let path = canonical_path(path);
        let action = match self.snapshot.get(&path).map(|n| n.kind) {
            Some(NodeKind::File) => ChangeAction::Modified,
            Some(_) => return Err(RepoError::NotFile(path)),
            None => {
                self.require_parent_dir(&path)?;
                ChangeAction::Added
            }
        };
        let blob = Blob::new(content, executable);
        let node = Node::file(&blob, self.base_rev);
        self.blobs.insert(blob.id(), Bytes::from(blob.to_bytes()?));
        self.snapshot.insert(path.clone(), node);
        self.record(&path, ChangedPath::new(action, NodeKind::File));
        Ok(())
    }

    /// Delete a node and everything below it
    pub fn delete(&mut self, path: &str) -> Result<()> {
        let path = canonical_path(path);
        if path == "/" {
            return Err(RepoError::NotFound(path));
        }
        let kind = self
            .snapshot
            .get(&path)
            .map(|n| n.kind)
            .ok_or_else(|| RepoError::NotFound(path.clone()))?;
        let doomed: Vec<String> = descendants(&self.snapshot, &path).map(|(p, _)| p.clone()).collect();
        for p in &doomed {
            self.snapshot.remove(p);
            if p != &path {
                self.changes.remove(p);
            }
        }
        self.record(&path, ChangedPath::new(ChangeAction::Deleted, kind));
        Ok(())
    }

    fn copy_from(&mut self, source: &Snapshot, from_path: &str, from_rev: u64, to_path: &str) -> Result<()> {
        let node = source
            .get(from_path)
            .ok_or_else(|| RepoError::NotFound(from_path.to_string()))?;
        if self.snapshot.contains_key(to_path) {
            return Err(RepoError::AlreadyExists(to_path.to_string()));
        }
        self.require_parent_dir(to_path)?;
        let kind = node.kind;
        for (p, n) in descendants(source, from_path) {
            let rel = &p[from_path.len()..];
            let target = if from_path == "/" {
                canonical_path(&format!("{}/{}", to_path, p))
            } else {
                format!("{}{}", to_path, rel)
            };
            self.snapshot.insert(target, n.clone());
        }
        let mut change = ChangedPath::new(ChangeAction::Added, kind);
        change.copyfrom_path = Some(from_path.to_string());
        change.copyfrom_rev = Some(from_rev);
        self.record(to_path, change);
        Ok(())
    }
}

/// In-memory repository
pub struct Repository {
    /// Object storage
    objects: Arc<RwLock<HashMap<ObjectId, Bytes>>>,

    /// Revision history, indexed by revision number
    revisions: Arc<RwLock<Vec<RevisionRecord>>>,

    /// Repository UUID
    uuid: String,
}

impl Repository {
    /// Create a new in-memory repository
    pub fn new() -> Self {
        Self {
            objects: Arc::new(RwLock::new(HashMap::new())),
            revisions: Arc::new(RwLock::new(Vec::new())),
            uuid: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Get current revision
    pub async fn current_rev(&self) -> u64 {
        let revisions = self.revisions.read().await;
        revisions.len().saturating_sub(1) as u64
    }

    /// Initialize repository with revision 0 (an empty root directory)
    pub async fn initialize(&self) -> Result<()> {
        let mut revisions = self.revisions.write().await;
        if !revisions.is_empty() {
            return Ok(());
        }
        let mut snapshot = Snapshot::new();
        snapshot.insert("/".to_string(), Node::dir(0));
        let commit = Commit {
            revision: 0,
            author: None,
            message: String::new(),
            timestamp: chrono::Utc::now().timestamp(),
            changed_paths: BTreeMap::new(),
            revprops: PropertySet::new(),
        };
        revisions.push(RevisionRecord {
            commit,
            snapshot: Arc::new(snapshot),
        });
        tracing::debug!("Initialized repository {}", self.uuid);
        Ok(())
    }

    async fn snapshot(&self, rev: u64) -> Result<Arc<Snapshot>> {
        let revisions = self.revisions.read().await;
        revisions
            .get(rev as usize)
            .map(|r| r.snapshot.clone())
            .ok_or(RepoError::NoSuchRevision(rev))
    }
}

impl Default for Repository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VersionedBackend for Repository {
    fn uuid(&self) -> &str {
        &self.uuid
    }

    async fn youngest(&self) -> Result<u64> {
        let revisions = self.revisions.read().await;
        if revisions.is_empty() {
            return Err(RepoError::NoSuchRevision(0));
        }
        Ok(revisions.len() as u64 - 1)
    }

    async fn commit_record(&self, rev: u64) -> Result<Commit> {
        let revisions = self.revisions.read().await;
        revisions
            .get(rev as usize)
            .map(|r| r.commit.clone())
            .ok_or(RepoError::NoSuchRevision(rev))
    }

    async fn stat(&self, path: &str, rev: u64) -> Result<Option<Node>> {
        let snapshot = self.snapshot(rev).await?;
        Ok(snapshot.get(&canonical_path(path)).cloned())
    }

    async fn walk(&self, path: &str, rev: u64) -> Result<Vec<(String, Node)>> {
        let path = canonical_path(path);
        let snapshot = self.snapshot(rev).await?;
        if !snapshot.contains_key(&path) {
            return Err(RepoError::NotFound(path));
        }
        Ok(descendants(&snapshot, &path)
            .map(|(p, n)| (p.clone(), n.clone()))
            .collect())
    }

    async fn list_dir(&self, path: &str, rev: u64) -> Result<Vec<String>> {
        let path = canonical_path(path);
        let snapshot = self.snapshot(rev).await?;
        match snapshot.get(&path).map(|n| n.kind) {
            Some(NodeKind::Dir) => {}
            Some(_) => return Err(RepoError::NotDirectory(path)),
            None => return Err(RepoError::NotFound(path)),
        }
        Ok(descendants(&snapshot, &path)
            .filter(|(p, _)| parent_path(p) == Some(path.as_str()))
            .filter_map(|(p, _)| p.rsplit('/').next().map(str::to_string))
            .collect())
    }

    async fn get_file(&self, path: &str, rev: u64) -> Result<Bytes> {
        let path = canonical_path(path);
        let snapshot = self.snapshot(rev).await?;
        let node = snapshot
            .get(&path)
            .ok_or_else(|| RepoError::NotFound(path.clone()))?;
        let id = node.content.ok_or_else(|| RepoError::NotFile(path.clone()))?;

        let objects = self.objects.read().await;
        let blob_data = objects.get(&id).ok_or(RepoError::ObjectNotFound(id))?;
        let blob = Blob::deserialize(blob_data)?;
        Ok(Bytes::from(blob.data))
    }

    async fn revision_at_date(&self, timestamp: i64) -> Result<u64> {
        let revisions = self.revisions.read().await;
        let idx = revisions.partition_point(|r| r.commit.timestamp <= timestamp);
        Ok(idx.saturating_sub(1) as u64)
    }

    async fn begin_txn(&self) -> Result<Transaction> {
        let youngest = self.youngest().await?;
        let snapshot = self.snapshot(youngest).await?;
        Ok(Transaction::new(youngest, (*snapshot).clone()))
    }

    async fn copy(&self, txn: &mut Transaction, from_path: &str, from_rev: u64, to_path: &str) -> Result<()> {
        let source = self.snapshot(from_rev).await?;
        txn.copy_from(&source, &canonical_path(from_path), from_rev, &canonical_path(to_path))
    }

    async fn commit_txn(
        &self,
        txn: Transaction,
        author: Option<String>,
        message: String,
        timestamp: i64,
    ) -> Result<u64> {
        let Transaction {
            base_rev,
            mut snapshot,
            changes,
            blobs,
            revprops,
        } = txn;

        let mut revisions = self.revisions.write().await;
        let youngest = revisions.len().saturating_sub(1) as u64;
        if revisions.is_empty() || base_rev != youngest {
            return Err(RepoError::TxnOutOfDate { base: base_rev, youngest });
        }
        let new_rev = youngest + 1;

        // Stamp every changed node and its ancestors with the new revision.
        for (path, change) in &changes {
            if change.action != ChangeAction::Deleted {
                if let Some(node) = snapshot.get_mut(path) {
                    node.created_rev = new_rev;
                }
            }
            let mut cursor = parent_path(path);
            while let Some(p) = cursor {
                if let Some(node) = snapshot.get_mut(p) {
                    node.created_rev = new_rev;
                }
                cursor = parent_path(p);
            }
        }

        let mut objects = self.objects.write().await;
        objects.extend(blobs);
        drop(objects);

        let commit = Commit {
            revision: new_rev,
            author,
            message,
            timestamp,
            changed_paths: changes,
            revprops,
        };
        tracing::debug!(
            "Committed r{} ({} changed paths, commit {})",
            new_rev,
            commit.changed_paths.len(),
            commit.id()
        );
        revisions.push(RevisionRecord {
            commit,
            snapshot: Arc::new(snapshot),
        });

        Ok(new_rev)
    }
}
