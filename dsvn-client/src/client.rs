//! Operation dispatcher
//!
//! [`Client`] owns the repository registry, a current-thread runtime to
//! drive the async backend, and the client configuration. The operations
//! themselves live in sibling modules as `impl Client` blocks.

use crate::config::ClientConfig;
use crate::context::ClientContext;
use crate::error::{ClientError, Result};
use crate::ra::RaSession;
use crate::revision::Revision;
use crate::wc::WcEntry;
use dsvn_core::{canonical_url, Commit, Node, RepoError, RepositoryRegistry};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::runtime::Runtime;

pub struct Client {
    registry: Arc<RepositoryRegistry>,
    runtime: Arc<Runtime>,
    config: ClientConfig,
}

impl Client {
    pub fn new(registry: RepositoryRegistry) -> Result<Self> {
        Self::with_config(registry, ClientConfig::default())
    }

    pub fn with_config(registry: RepositoryRegistry, config: ClientConfig) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
        Ok(Self {
            registry: Arc::new(registry),
            runtime: Arc::new(runtime),
            config,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn registry(&self) -> &RepositoryRegistry {
        &self.registry
    }

    /// Open a session to the repository serving `url`
    ///
    /// The auth baton bound in `ctx`, if any, supplies the session username.
    pub fn open_ra_session(&self, url: &str, ctx: &ClientContext) -> Result<RaSession> {
        ctx.ensure_valid()?;
        let url = canonical_url(url);
        let resolved = self.registry.resolve(&url)?;
        let username = ctx.username(&resolved.root_url)?;
        tracing::debug!("Opened session to {} (root {})", url, resolved.root_url);
        Ok(RaSession::new(self.runtime.clone(), resolved, url, username))
    }

    /// Commit author: the session username, else the configured default
    pub(crate) fn author(&self, ra: &RaSession) -> Option<String> {
        ra.username()
            .map(str::to_string)
            .or_else(|| self.config.default_author.clone())
    }
}

/// Resolve a revision specifier to a number
///
/// Working-copy kinds need the entry of the node they refer to.
pub(crate) fn resolve_revnum(ra: &RaSession, rev: Revision, entry: Option<&WcEntry>) -> Result<u64> {
    let need_entry = || {
        entry.ok_or_else(|| ClientError::BadRevision(format!("Revision {} requires a working copy path", rev)))
    };
    match rev {
        Revision::Number(n) => Ok(n),
        Revision::Head => ra.latest_revnum(),
        Revision::Date(date) => Ok(ra.block_on(ra.backend().revision_at_date(date.timestamp()))?),
        Revision::Base | Revision::Working => Ok(need_entry()?.revision),
        Revision::Committed => Ok(need_entry()?.last_changed_rev),
        Revision::Previous => need_entry()?
            .last_changed_rev
            .checked_sub(1)
            .ok_or_else(|| ClientError::BadRevision("PREV of revision 0".to_string())),
        Revision::Unspecified => Err(ClientError::BadRevision("Unspecified revision".to_string())),
    }
}

/// The node at `path@rev`, failing with the backend's not-found error
pub(crate) fn require_node(ra: &RaSession, path: &str, rev: u64) -> Result<Node> {
    ra.stat(path, rev)?
        .ok_or_else(|| RepoError::NotFound(format!("{}@{}", ra.url_of(path), rev)).into())
}

/// Commit records fetched once per operation
pub(crate) struct CommitCache<'a> {
    ra: &'a RaSession,
    commits: HashMap<u64, Commit>,
}

impl<'a> CommitCache<'a> {
    pub(crate) fn new(ra: &'a RaSession) -> Self {
        Self {
            ra,
            commits: HashMap::new(),
        }
    }

    pub(crate) fn get(&mut self, rev: u64) -> Result<&Commit> {
        if !self.commits.contains_key(&rev) {
            let commit = self.ra.block_on(self.ra.backend().commit_record(rev))?;
            self.commits.insert(rev, commit);
        }
        self.commits
            .get(&rev)
            .ok_or_else(|| RepoError::NoSuchRevision(rev).into())
    }

    /// Working-copy entry for a node as of `revision`
    pub(crate) fn entry_for(&mut self, node: &Node, revision: u64) -> Result<WcEntry> {
        let commit = self.get(node.created_rev)?;
        Ok(WcEntry {
            kind: node.kind,
            revision,
            last_changed_rev: node.created_rev,
            last_changed_author: commit.author.clone(),
            last_changed_date: Some(commit.timestamp),
            working_size: (node.kind == dsvn_core::NodeKind::File).then_some(node.size),
            base_size: (node.kind == dsvn_core::NodeKind::File).then_some(node.size),
            schedule: Default::default(),
            properties: Default::default(),
        })
    }
}

/// Join two `/`-separated relative paths
pub(crate) fn join_rel(base: &str, rel: &str) -> String {
    match (base.is_empty(), rel.is_empty()) {
        (true, _) => rel.to_string(),
        (_, true) => base.to_string(),
        _ => format!("{}/{}", base, rel),
    }
}

/// Path of `path` below `root`, both absolute repository paths
pub(crate) fn repos_relpath<'p>(root: &str, path: &'p str) -> &'p str {
    if root == "/" {
        path.trim_start_matches('/')
    } else {
        path.strip_prefix(root).unwrap_or(path).trim_start_matches('/')
    }
}
