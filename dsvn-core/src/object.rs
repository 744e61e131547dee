//! Core object model for DSvn
//!
//! Content-addressable blobs plus the per-revision records the client layer
//! consumes: nodes in a revision snapshot, changed-path records and commits.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::properties::PropertySet;

/// Unique identifier for any stored object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectId([u8; 32]);

impl ObjectId {
    /// Create a new ObjectId from raw bytes
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Compute ObjectId from data
    pub fn from_data(data: &[u8]) -> Self {
        let hash = Sha256::digest(data);
        Self(hash.into())
    }

    /// Convert to hexadecimal string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hexadecimal string
    pub fn from_hex(hex_str: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(hex_str)?;
        if bytes.len() != 32 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    /// Get raw bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// File content object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Blob {
    /// Raw content data
    pub data: Vec<u8>,
    /// Executable flag (for Unix permissions)
    pub executable: bool,
}

impl Blob {
    /// Create a new blob from data
    pub fn new(data: Vec<u8>, executable: bool) -> Self {
        Self { data, executable }
    }

    /// Create a new blob from data (non-executable)
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self::new(data, false)
    }

    /// Deserialize from binary format
    pub fn deserialize(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }

    /// Compute the object ID
    pub fn id(&self) -> ObjectId {
        ObjectId::from_data(&self.data)
    }

    /// Content length in bytes
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// Serialize to binary format
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }
}

/// Kind of a versioned node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    None,
    File,
    Dir,
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NodeKind::None => "none",
            NodeKind::File => "file",
            NodeKind::Dir => "dir",
        };
        f.write_str(s)
    }
}

/// A node in a revision snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Blob id for files; `None` for directories
    pub content: Option<ObjectId>,
    /// Entry type
    pub kind: NodeKind,
    /// Content length for files, 0 for directories
    pub size: u64,
    /// Revision in which this node or anything below it last changed
    pub created_rev: u64,
    /// File permissions (Unix mode)
    pub mode: u32,
}

impl Node {
    /// Create a directory node
    pub fn dir(created_rev: u64) -> Self {
        Self {
            content: None,
            kind: NodeKind::Dir,
            size: 0,
            created_rev,
            mode: 0o755,
        }
    }

    /// Create a file node pointing at a stored blob
    pub fn file(blob: &Blob, created_rev: u64) -> Self {
        Self {
            content: Some(blob.id()),
            kind: NodeKind::File,
            size: blob.size(),
            created_rev,
            mode: if blob.executable { 0o755 } else { 0o644 },
        }
    }
}

/// How a path changed in a revision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeAction {
    Added,
    Modified,
    Deleted,
    Replaced,
}

impl ChangeAction {
    /// Single-letter code as printed by `svn log -v`
    pub fn as_char(&self) -> char {
        match self {
            ChangeAction::Added => 'A',
            ChangeAction::Modified => 'M',
            ChangeAction::Deleted => 'D',
            ChangeAction::Replaced => 'R',
        }
    }
}

/// A changed-path record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedPath {
    pub action: ChangeAction,
    pub node_kind: NodeKind,
    pub copyfrom_path: Option<String>,
    pub copyfrom_rev: Option<u64>,
}

impl ChangedPath {
    pub fn new(action: ChangeAction, node_kind: NodeKind) -> Self {
        Self {
            action,
            node_kind,
            copyfrom_path: None,
            copyfrom_rev: None,
        }
    }

    /// Whether this change carries copy history
    pub fn is_copy(&self) -> bool {
        self.copyfrom_path.is_some()
    }
}

/// Commit/Revision object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Commit {
    /// Revision number
    pub revision: u64,
    /// Author name (revision 0 and anonymous commits have none)
    pub author: Option<String>,
    /// Commit message
    pub message: String,
    /// Commit timestamp (Unix seconds)
    pub timestamp: i64,
    /// Paths changed by this revision, keyed by absolute repository path
    pub changed_paths: BTreeMap<String, ChangedPath>,
    /// Custom revision properties supplied at commit time
    pub revprops: PropertySet,
}

impl Commit {
    /// Compute the object ID
    pub fn id(&self) -> ObjectId {
        ObjectId::from_data(&bincode::serialize(self).unwrap_or_default())
    }

    /// Serialize to binary format
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize from binary format
    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }

    /// Commit time as a UTC timestamp
    pub fn date(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        chrono::DateTime::from_timestamp(self.timestamp, 0)
    }
}
