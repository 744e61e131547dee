//! Info queries
//!
//! Working-copy targets queried at WORKING (or with no revision) are
//! answered from the administrative area; everything else goes to the
//! repository. Sizes the answering side does not know are reported as
//! [`INFO_SIZE_UNKNOWN`], never as zero. A working-copy file queried at
//! BASE reports the size recorded when it was checked out.

use crate::callbacks::InfoReceiver;
use crate::client::{join_rel, repos_relpath, require_node, resolve_revnum, Client, CommitCache};
use crate::context::ClientContext;
use crate::error::{ClientError, Result};
use crate::revision::Revision;
use crate::wc::{Depth, Schedule, WcAdmin, WcEntry};
use chrono::{DateTime, Utc};
use dsvn_core::{is_url, NodeKind};
use std::path::Path;

/// Size sentinel for "not known", distinct from an empty file
pub const INFO_SIZE_UNKNOWN: u64 = u64::MAX;

/// Metadata of one path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Info {
    pub url: String,
    pub repos_root_url: String,
    pub repos_uuid: String,
    pub revision: u64,
    pub kind: NodeKind,
    pub last_changed_rev: u64,
    pub last_changed_author: Option<String>,
    pub last_changed_date: Option<DateTime<Utc>>,
    /// Repository size of a file, or [`INFO_SIZE_UNKNOWN`]
    pub size: u64,
    /// Size of the working file as last recorded, or [`INFO_SIZE_UNKNOWN`]
    pub working_size: u64,
    pub has_wc_info: bool,
    pub schedule: Schedule,
    /// Working-copy depth, for working-copy answers only
    pub depth: Option<Depth>,
}

impl Client {
    /// Resolve metadata for `target`, calling `receiver` once per path
    pub fn info(
        &self,
        target: &str,
        peg: Revision,
        revision: Revision,
        recurse: bool,
        receiver: &mut InfoReceiver<'_>,
        ctx: &ClientContext,
    ) -> Result<()> {
        ctx.ensure_valid()?;
        let local = |r: Revision| matches!(r, Revision::Unspecified | Revision::Working);
        if !is_url(target) && local(peg) && local(revision) {
            self.info_local(target, recurse, receiver, ctx)
        } else {
            self.info_remote(target, peg, revision, recurse, receiver, ctx)
        }
    }

    fn info_local(
        &self,
        target: &str,
        recurse: bool,
        receiver: &mut InfoReceiver<'_>,
        ctx: &ClientContext,
    ) -> Result<()> {
        let scratch = ctx.pool().scoped_child()?;
        let (wc, rel) = WcAdmin::open_containing(Path::new(target), &self.config().admin_dir, false, &scratch)?;
        if wc.entry(&rel).is_none() {
            return Err(ClientError::WorkingCopy(format!("'{}' is not under version control", target)));
        }

        let prefix = format!("{}/", rel);
        let meta = wc.metadata();
        for (path, entry) in &meta.entries {
            let sub = if *path == rel {
                ""
            } else if recurse && (rel.is_empty() || path.starts_with(&prefix)) {
                if rel.is_empty() { path.as_str() } else { &path[prefix.len()..] }
            } else {
                continue;
            };
            ctx.check_cancelled()?;

            let info = local_info(&wc, path, entry);
            let reported = if sub.is_empty() {
                target.to_string()
            } else {
                format!("{}/{}", target.trim_end_matches('/'), sub)
            };
            receiver(&reported, &info).map_err(|e| ClientError::callback("info receiver", e))?;
        }
        Ok(())
    }

    fn info_remote(
        &self,
        target: &str,
        peg: Revision,
        revision: Revision,
        recurse: bool,
        receiver: &mut InfoReceiver<'_>,
        ctx: &ClientContext,
    ) -> Result<()> {
        let scratch = ctx.pool().scoped_child()?;
        let (url, entry, wc) = if is_url(target) {
            (target.to_string(), None, None)
        } else {
            let (wc, rel) = WcAdmin::open_containing(Path::new(target), &self.config().admin_dir, false, &scratch)?;
            let entry = wc.entry(&rel).cloned().ok_or_else(|| {
                ClientError::WorkingCopy(format!("'{}' is not under version control", target))
            })?;
            (wc.url_of(&rel), Some(entry), Some((wc, rel)))
        };

        let peg = match peg {
            Revision::Unspecified if entry.is_some() => Revision::Base,
            Revision::Unspecified => Revision::Head,
            other => other,
        };
        let revision = if revision.is_specified() { revision } else { peg };
        let base_sizes = match wc {
            Some(wc) if revision == Revision::Base => Some(wc),
            _ => None,
        };

        let ra = self.open_ra_session(&url, ctx)?;
        let peg_rev = resolve_revnum(&ra, peg, entry.as_ref())?;
        let rev = resolve_revnum(&ra, revision, entry.as_ref())?;
        require_node(&ra, ra.path(), peg_rev)?;
        require_node(&ra, ra.path(), rev)?;

        let nodes = if recurse {
            ra.block_on(ra.backend().walk(ra.path(), rev))?
        } else {
            vec![(ra.path().to_string(), require_node(&ra, ra.path(), rev)?)]
        };

        let base_name = ra
            .url()
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();
        let mut commits = CommitCache::new(&ra);
        for (repos_path, node) in &nodes {
            ctx.check_cancelled()?;
            let commit = commits.get(node.created_rev)?;
            let sub = repos_relpath(ra.path(), repos_path);
            let recorded = base_sizes
                .as_ref()
                .and_then(|(wc, rel)| wc.entry(&join_rel(rel, sub)))
                .and_then(|e| e.base_size);
            let info = Info {
                url: ra.url_of(repos_path),
                repos_root_url: ra.repos_root().to_string(),
                repos_uuid: ra.uuid().to_string(),
                revision: rev,
                kind: node.kind,
                last_changed_rev: node.created_rev,
                last_changed_author: commit.author.clone(),
                last_changed_date: commit.date(),
                size: match node.kind {
                    NodeKind::File => recorded.unwrap_or(node.size),
                    _ => INFO_SIZE_UNKNOWN,
                },
                working_size: INFO_SIZE_UNKNOWN,
                has_wc_info: false,
                schedule: Schedule::Normal,
                depth: None,
            };
            let reported = join_rel(&base_name, sub);
            receiver(&reported, &info).map_err(|e| ClientError::callback("info receiver", e))?;
        }
        Ok(())
    }
}

fn local_info(wc: &WcAdmin, relpath: &str, entry: &WcEntry) -> Info {
    let meta = wc.metadata();
    Info {
        url: wc.url_of(relpath),
        repos_root_url: meta.repos_root_url.clone(),
        repos_uuid: meta.uuid.clone(),
        revision: entry.revision,
        kind: entry.kind,
        last_changed_rev: entry.last_changed_rev,
        last_changed_author: entry.last_changed_author.clone(),
        last_changed_date: entry.last_changed_date.and_then(|t| DateTime::from_timestamp(t, 0)),
        size: INFO_SIZE_UNKNOWN,
        working_size: match entry.kind {
            NodeKind::File => entry.working_size.unwrap_or(INFO_SIZE_UNKNOWN),
            _ => INFO_SIZE_UNKNOWN,
        },
        has_wc_info: true,
        schedule: entry.schedule,
        depth: Some(meta.depth),
    }
}
