//! Repository registry
//!
//! Maps repository root URLs to backends. A URL resolves to the registered
//! root that is its longest prefix on a path-segment boundary.

use crate::backend::VersionedBackend;
use crate::error::{RepoError, Result};
use crate::repository::canonical_path;
use std::collections::HashMap;
use std::sync::Arc;

/// Whether a target string is a URL rather than a local path
pub fn is_url(target: &str) -> bool {
    target
        .split_once("://")
        .map(|(scheme, _)| !scheme.is_empty() && scheme.chars().all(|c| c.is_ascii_alphanumeric() || c == '+'))
        .unwrap_or(false)
}

/// Strip trailing slashes from a URL
pub fn canonical_url(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    if trimmed.ends_with(':') {
        url.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Join a repository-relative path onto a URL
pub fn url_join(base: &str, relpath: &str) -> String {
    let rel = relpath.trim_matches('/');
    if rel.is_empty() {
        canonical_url(base)
    } else {
        format!("{}/{}", canonical_url(base), rel)
    }
}

/// A URL resolved against the registry
#[derive(Clone)]
pub struct ResolvedUrl {
    /// Registered repository root URL
    pub root_url: String,
    /// Absolute repository path (`/` for the root)
    pub path: String,
    pub backend: Arc<dyn VersionedBackend>,
}

/// Repository registry for multi-repository mode
#[derive(Clone, Default)]
pub struct RepositoryRegistry {
    repositories: HashMap<String, Arc<dyn VersionedBackend>>,
}

impl RepositoryRegistry {
    /// Create new registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a repository under its root URL
    pub fn register(&mut self, root_url: &str, repo: Arc<dyn VersionedBackend>) -> Result<()> {
        if !is_url(root_url) {
            return Err(RepoError::IllegalUrl(root_url.to_string()));
        }
        let root_url = canonical_url(root_url);
        if self.repositories.contains_key(&root_url) {
            return Err(RepoError::AlreadyExists(root_url));
        }
        tracing::debug!("Registered repository {} at {}", repo.uuid(), root_url);
        self.repositories.insert(root_url, repo);
        Ok(())
    }

    /// Get repository by root URL
    pub fn get(&self, root_url: &str) -> Option<Arc<dyn VersionedBackend>> {
        self.repositories.get(&canonical_url(root_url)).cloned()
    }

    /// List all registered root URLs
    pub fn list(&self) -> Vec<&str> {
        self.repositories.keys().map(|s| s.as_str()).collect()
    }

    /// Unregister a repository
    pub fn unregister(&mut self, root_url: &str) -> Result<()> {
        self.repositories
            .remove(&canonical_url(root_url))
            .map(|_| ())
            .ok_or_else(|| RepoError::IllegalUrl(root_url.to_string()))
    }

    /// Resolve a URL to its repository and in-repository path
    pub fn resolve(&self, url: &str) -> Result<ResolvedUrl> {
        let url = canonical_url(url);
        let best = self
            .repositories
            .iter()
            .filter(|(root, _)| {
                url == **root || (url.starts_with(root.as_str()) && url.as_bytes().get(root.len()) == Some(&b'/'))
            })
            .max_by_key(|(root, _)| root.len());

        match best {
            Some((root, backend)) => Ok(ResolvedUrl {
                root_url: root.clone(),
                path: canonical_path(&url[root.len()..]),
                backend: backend.clone(),
            }),
            None => Err(RepoError::IllegalUrl(url)),
        }
    }
}
