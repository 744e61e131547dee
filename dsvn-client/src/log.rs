//! Log traversal
//!
//! Ranges are walked in the order given, each in its own direction. A
//! revision reached by more than one range is reported once, the first
//! time it is reached.

use crate::callbacks::{LogEntryReceiver, LogReceiver};
use crate::client::{require_node, resolve_revnum, Client};
use crate::context::ClientContext;
use crate::error::{ClientError, Result};
use crate::ra::RaSession;
use crate::revision::{Revision, RevisionRange};
use crate::wc::{WcAdmin, WcEntry};
use chrono::{DateTime, Utc};
use dsvn_core::{canonical_url, is_ancestor, is_url, svn_props, ChangedPath, Commit, PropertySet};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// A revision as reported to log receivers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub revision: u64,
    pub author: Option<String>,
    pub date: Option<DateTime<Utc>>,
    pub message: Option<String>,
    /// Present when changed-path discovery was requested
    pub changed_paths: Option<BTreeMap<String, ChangedPath>>,
    /// `svn:author`, `svn:date`, `svn:log` plus any custom revision properties
    pub revprops: PropertySet,
}

impl LogEntry {
    fn from_commit(commit: &Commit, discover_changed_paths: bool) -> Self {
        let author = commit.author.clone();
        let date = commit.date();
        let message = (commit.revision != 0).then(|| commit.message.clone());

        let mut revprops = commit.revprops.clone();
        if let Some(author) = &author {
            revprops.set(svn_props::AUTHOR.to_string(), author.clone());
        }
        if let Some(date) = &date {
            revprops.set(svn_props::DATE.to_string(), date.to_rfc3339());
        }
        if let Some(message) = &message {
            revprops.set(svn_props::LOG.to_string(), message.clone());
        }

        Self {
            revision: commit.revision,
            author,
            date,
            message,
            changed_paths: discover_changed_paths.then(|| commit.changed_paths.clone()),
            revprops,
        }
    }
}

/// Traversal options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogOptions {
    /// Maximum number of receiver invocations, 0 for no limit
    pub limit: usize,
    /// Stop after the first revision in which a target was copied
    pub stop_on_copy: bool,
    pub discover_changed_paths: bool,
}

struct LogTargets {
    ra: RaSession,
    paths: Vec<String>,
    entry: Option<WcEntry>,
}

impl Client {
    /// Report the history of `targets` between `start` and `end`
    pub fn log(
        &self,
        targets: &[&str],
        peg: Revision,
        start: Revision,
        end: Revision,
        options: &LogOptions,
        receiver: &mut LogReceiver<'_>,
        ctx: &ClientContext,
    ) -> Result<()> {
        let mut adapter = |entry: &LogEntry| {
            receiver(
                entry.changed_paths.as_ref(),
                entry.revision,
                entry.author.as_deref(),
                entry.date,
                entry.message.as_deref(),
            )
        };
        self.log_ranges(targets, peg, &[RevisionRange { start, end }], options, &mut adapter, ctx)
    }

    /// Report the history of `targets` over several ranges
    pub fn log_ranges(
        &self,
        targets: &[&str],
        peg: Revision,
        ranges: &[RevisionRange],
        options: &LogOptions,
        receiver: &mut LogEntryReceiver<'_>,
        ctx: &ClientContext,
    ) -> Result<()> {
        ctx.ensure_valid()?;
        if ranges.is_empty() {
            return Err(ClientError::InvalidArgument("No revision ranges given".to_string()));
        }
        let targets = self.log_targets(targets, ctx)?;
        let ra = &targets.ra;
        let entry = targets.entry.as_ref();

        let peg = match peg {
            Revision::Unspecified if entry.is_some() => Revision::Base,
            Revision::Unspecified => Revision::Head,
            other => other,
        };
        let peg_rev = resolve_revnum(ra, peg, entry)?;
        for path in &targets.paths {
            require_node(ra, path, peg_rev)?;
        }

        let mut seen = HashSet::new();
        let mut delivered = 0usize;
        for range in ranges {
            let start = match range.start {
                Revision::Unspecified => peg_rev,
                rev => resolve_revnum(ra, rev, entry)?,
            };
            let end = match (range.start, range.end) {
                (Revision::Unspecified, Revision::Unspecified) => 0,
                (_, Revision::Unspecified) => start,
                (_, rev) => resolve_revnum(ra, rev, entry)?,
            };
            let youngest = ra.latest_revnum()?;
            if let Some(bad) = [start, end].into_iter().find(|r| *r > youngest) {
                return Err(dsvn_core::RepoError::NoSuchRevision(bad).into());
            }
            tracing::debug!("Log {}:{} over {} targets", start, end, targets.paths.len());

            let revs: Box<dyn Iterator<Item = u64>> = if start <= end {
                Box::new(start..=end)
            } else {
                Box::new((end..=start).rev())
            };
            for rev in revs {
                if !seen.insert(rev) {
                    continue;
                }
                ctx.check_cancelled()?;
                let commit = ra.block_on(ra.backend().commit_record(rev))?;
                if !touches(&commit, &targets.paths) {
                    continue;
                }

                let log_entry = LogEntry::from_commit(&commit, options.discover_changed_paths);
                receiver(&log_entry).map_err(|e| ClientError::callback("log receiver", e))?;
                delivered += 1;

                if options.limit > 0 && delivered >= options.limit {
                    return Ok(());
                }
                if options.stop_on_copy && copied(&commit, &targets.paths) {
                    tracing::debug!("Stopping log at copy in r{}", rev);
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    fn log_targets(&self, targets: &[&str], ctx: &ClientContext) -> Result<LogTargets> {
        let first = targets
            .first()
            .ok_or_else(|| ClientError::InvalidArgument("No targets given".to_string()))?;

        let mut entry = None;
        let mut urls = Vec::with_capacity(targets.len());
        if is_url(first) {
            if let Some(bad) = targets.iter().find(|t| !is_url(t)) {
                return Err(ClientError::InvalidArgument(format!(
                    "Cannot mix repository and working copy targets: '{}'",
                    bad
                )));
            }
            urls.extend(targets.iter().map(|t| canonical_url(t)));
        } else {
            let scratch = ctx.pool().scoped_child()?;
            for target in targets {
                if is_url(target) {
                    return Err(ClientError::InvalidArgument(format!(
                        "Cannot mix repository and working copy targets: '{}'",
                        target
                    )));
                }
                let admin_dir = &self.config().admin_dir;
                let (wc, rel) = WcAdmin::open_containing(Path::new(target), admin_dir, false, &scratch)?;
                let target_entry = wc.entry(&rel).cloned().ok_or_else(|| {
                    ClientError::WorkingCopy(format!("'{}' is not under version control", target))
                })?;
                entry.get_or_insert(target_entry);
                urls.push(wc.url_of(&rel));
            }
        }

        let ra = self.open_ra_session(&urls[0], ctx)?;
        let paths = urls
            .iter()
            .map(|url| {
                ra.repos_path_of(url).ok_or_else(|| {
                    ClientError::InvalidArgument(format!("'{}' is not in repository '{}'", url, ra.repos_root()))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(LogTargets { ra, paths, entry })
    }
}

/// Whether a revision changed a target, something below it, or an ancestor
fn touches(commit: &Commit, targets: &[String]) -> bool {
    targets.iter().any(|t| {
        t == "/"
            || commit
                .changed_paths
                .keys()
                .any(|changed| is_ancestor(t, changed) || is_ancestor(changed, t))
    })
}

/// Whether a revision copied a target or one of its ancestors into place
fn copied(commit: &Commit, targets: &[String]) -> bool {
    commit
        .changed_paths
        .iter()
        .any(|(changed, cp)| cp.is_copy() && targets.iter().any(|t| is_ancestor(changed, t)))
}
