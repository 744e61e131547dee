//! Repository access sessions
//!
//! A session binds a URL to the backend serving it. The backend is async;
//! the session blocks on it from the client's current-thread runtime, so
//! callbacks run on the caller's thread between backend calls.

use crate::error::Result;
use dsvn_core::{canonical_path, url_join, Node, NodeKind, ResolvedUrl, VersionedBackend};
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::Runtime;

pub struct RaSession {
    runtime: Arc<Runtime>,
    backend: Arc<dyn VersionedBackend>,
    root_url: String,
    url: String,
    path: String,
    username: Option<String>,
}

impl RaSession {
    pub(crate) fn new(runtime: Arc<Runtime>, resolved: ResolvedUrl, url: String, username: Option<String>) -> Self {
        Self {
            runtime,
            backend: resolved.backend,
            root_url: resolved.root_url,
            url,
            path: resolved.path,
            username,
        }
    }

    /// Run a backend future to completion
    pub(crate) fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    pub fn backend(&self) -> &Arc<dyn VersionedBackend> {
        &self.backend
    }

    /// Repository root URL
    pub fn repos_root(&self) -> &str {
        &self.root_url
    }

    /// Session URL
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Repository path the session URL points at
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Username the session acts as, if the auth baton produced one
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn uuid(&self) -> &str {
        self.backend.uuid()
    }

    pub fn latest_revnum(&self) -> Result<u64> {
        Ok(self.block_on(self.backend.youngest())?)
    }

    pub fn stat(&self, path: &str, rev: u64) -> Result<Option<Node>> {
        Ok(self.block_on(self.backend.stat(path, rev))?)
    }

    /// Kind of the node at a repository path
    pub fn check_path(&self, path: &str, rev: u64) -> Result<NodeKind> {
        Ok(self.stat(path, rev)?.map(|n| n.kind).unwrap_or(NodeKind::None))
    }

    /// Repository path of a URL inside this repository
    pub fn repos_path_of(&self, url: &str) -> Option<String> {
        let root = self.root_url.as_str();
        if url == root {
            return Some("/".to_string());
        }
        url.strip_prefix(root)
            .filter(|rest| rest.starts_with('/'))
            .map(canonical_path)
    }

    /// URL of a repository path
    pub fn url_of(&self, repos_path: &str) -> String {
        url_join(&self.root_url, repos_path)
    }
}
