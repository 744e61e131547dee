//! Directory creation
//!
//! URL targets are created in a single commit; working-copy targets are
//! created on disk and scheduled for addition.

use crate::callbacks::{CommitItem, CommitState, NotifyAction, NotifyEvent};
use crate::client::Client;
use crate::context::ClientContext;
use crate::error::{ClientError, Result};
use crate::wc::{Schedule, WcAdmin, WcEntry};
use chrono::{DateTime, Utc};
use dsvn_core::{is_url, parent_path, svn_props, NodeKind, PropertySet};
use std::fs;
use std::path::{Path, PathBuf};

/// Metadata of a completed commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    pub revision: u64,
    pub date: Option<DateTime<Utc>>,
    pub author: Option<String>,
}

impl Client {
    /// Create directories
    ///
    /// Returns the commit for URL targets, `None` for working-copy targets or
    /// when the commit-message provider declined to give a message.
    pub fn mkdir(
        &self,
        paths: &[&str],
        make_parents: bool,
        revprops: Option<&PropertySet>,
        ctx: &ClientContext,
    ) -> Result<Option<CommitInfo>> {
        ctx.ensure_valid()?;
        if paths.is_empty() {
            return Err(ClientError::InvalidArgument("No targets given".to_string()));
        }
        if let Some(name) = revprops.and_then(|p| p.list().into_iter().find(|n| svn_props::is_svn_property(n))) {
            return Err(ClientError::InvalidArgument(format!(
                "Standard property '{}' cannot be set explicitly as a revision property",
                name
            )));
        }

        let urls = paths.iter().filter(|p| is_url(p)).count();
        if urls == paths.len() {
            self.mkdir_urls(paths, make_parents, revprops, ctx)
        } else if urls == 0 {
            for path in paths {
                self.mkdir_local(Path::new(path), make_parents, ctx)?;
            }
            Ok(None)
        } else {
            Err(ClientError::InvalidArgument(
                "Cannot mix repository and working copy targets".to_string(),
            ))
        }
    }

    fn mkdir_urls(
        &self,
        urls: &[&str],
        make_parents: bool,
        revprops: Option<&PropertySet>,
        ctx: &ClientContext,
    ) -> Result<Option<CommitInfo>> {
        ctx.require_log_msg()?;

        let ra = self.open_ra_session(urls[0], ctx)?;
        let mut txn = ra.block_on(ra.backend().begin_txn())?;
        let mut items = Vec::new();

        for url in urls {
            let url = dsvn_core::canonical_url(url);
            let path = ra.repos_path_of(&url).ok_or_else(|| {
                ClientError::InvalidArgument(format!("'{}' is not in repository '{}'", url, ra.repos_root()))
            })?;

            let mut missing = Vec::new();
            if make_parents {
                let mut cursor = parent_path(&path);
                while let Some(p) = cursor {
                    if txn.check_path(p) != NodeKind::None {
                        break;
                    }
                    missing.push(p.to_string());
                    cursor = parent_path(p);
                }
            }
            missing.reverse();
            missing.push(path);

            for dir in missing {
                txn.mkdir(&dir)?;
                items.push(CommitItem {
                    path: None,
                    url: ra.url_of(&dir),
                    kind: NodeKind::Dir,
                    state: CommitState::Add,
                });
            }
        }

        ctx.check_cancelled()?;
        let message = match ctx.commit_message(&items)? {
            Some(message) => message,
            None => {
                tracing::debug!("Commit of {} items cancelled by message provider", items.len());
                return Ok(None);
            }
        };
        if let Some(props) = revprops {
            for (name, value) in props.iter() {
                txn.set_revprop(name.clone(), value.clone());
            }
        }

        let author = self.author(&ra);
        let timestamp = Utc::now().timestamp();
        let revision = ra.block_on(ra.backend().commit_txn(txn, author.clone(), message, timestamp))?;
        for item in &items {
            ctx.notify(NotifyEvent::new(item.url.clone(), NotifyAction::CommitAdded, item.kind).with_revision(revision))?;
        }
        tracing::info!("Committed revision {} ({} directories)", revision, items.len());

        Ok(Some(CommitInfo {
            revision,
            date: DateTime::from_timestamp(timestamp, 0),
            author,
        }))
    }

    fn mkdir_local(&self, path: &Path, make_parents: bool, ctx: &ClientContext) -> Result<()> {
        let scratch = ctx.pool().scoped_child()?;
        let admin_dir = &self.config().admin_dir;
        let (mut wc, rel) =
            WcAdmin::open_containing(path, admin_dir, self.config().lock_working_copy, &scratch)?;
        if rel.is_empty() || wc.entry(&rel).is_some() {
            return Err(ClientError::WorkingCopy(format!(
                "'{}' is already under version control",
                path.display()
            )));
        }

        // Unversioned ancestors, outermost first.
        let mut pending: Vec<String> = Vec::new();
        let mut cursor = rel.rsplit_once('/').map(|(parent, _)| parent.to_string());
        while let Some(parent) = cursor {
            match wc.entry(&parent) {
                Some(entry) if entry.kind == NodeKind::Dir && entry.schedule != Schedule::Delete => break,
                Some(_) => {
                    return Err(ClientError::WorkingCopy(format!(
                        "'{}' is not a versioned directory",
                        wc.abspath(&parent).display()
                    )));
                }
                None if make_parents => {
                    cursor = parent.rsplit_once('/').map(|(p, _)| p.to_string());
                    pending.push(parent);
                }
                None => {
                    return Err(ClientError::WorkingCopy(format!(
                        "'{}' is not under version control",
                        wc.abspath(&parent).display()
                    )));
                }
            }
        }
        pending.reverse();
        pending.push(rel);

        let added = pending.iter().try_for_each(|rel| {
            ctx.check_cancelled()?;
            let abs: PathBuf = wc.abspath(rel);
            if make_parents {
                fs::create_dir_all(&abs)?;
            } else {
                fs::create_dir(&abs)?;
            }
            wc.set_entry(rel, WcEntry::added(NodeKind::Dir));
            ctx.notify(NotifyEvent::new(abs.display().to_string(), NotifyAction::Add, NodeKind::Dir))
        });

        wc.save_after(added)?;
        wc.close()
    }
}
