//! Versioned backend interface
//!
//! The narrow surface the client layer drives. All methods are async, the
//! same way the storage tiers are; the client blocks on them from its own
//! runtime.

use crate::error::Result;
use crate::object::{Commit, Node};
use crate::repository::Transaction;
use async_trait::async_trait;
use bytes::Bytes;

#[async_trait]
pub trait VersionedBackend: Send + Sync {
    /// Repository UUID
    fn uuid(&self) -> &str;

    /// Youngest (HEAD) revision
    async fn youngest(&self) -> Result<u64>;

    /// Commit record for a revision
    async fn commit_record(&self, rev: u64) -> Result<Commit>;

    /// Node at `path` in `rev`, if any
    async fn stat(&self, path: &str, rev: u64) -> Result<Option<Node>>;

    /// The node at `path` followed by all of its descendants, in path order
    async fn walk(&self, path: &str, rev: u64) -> Result<Vec<(String, Node)>>;

    /// Names of the immediate children of a directory
    async fn list_dir(&self, path: &str, rev: u64) -> Result<Vec<String>>;

    /// File content
    async fn get_file(&self, path: &str, rev: u64) -> Result<Bytes>;

    /// Youngest revision committed at or before `timestamp`
    async fn revision_at_date(&self, timestamp: i64) -> Result<u64>;

    /// Start a transaction against the youngest revision
    async fn begin_txn(&self) -> Result<Transaction>;

    /// Stage a copy of `from_path@from_rev` to `to_path`
    async fn copy(&self, txn: &mut Transaction, from_path: &str, from_rev: u64, to_path: &str) -> Result<()>;

    /// Atomically commit a transaction, returning the new revision
    async fn commit_txn(
        &self,
        txn: Transaction,
        author: Option<String>,
        message: String,
        timestamp: i64,
    ) -> Result<u64>;
}
