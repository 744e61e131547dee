//! Merge
//!
//! Each range is applied as a tree diff of the source between the range's
//! start and end, in the order the ranges are given. A reverse range undoes
//! the changes it spans. The working copy is modified and the merged
//! revisions recorded in the target's `svn:mergeinfo`; nothing is
//! committed.

use crate::callbacks::{NotifyAction, NotifyEvent};
use crate::client::{join_rel, repos_relpath, require_node, resolve_revnum, Client, CommitCache};
use crate::context::ClientContext;
use crate::error::{ClientError, Result};
use crate::ra::RaSession;
use crate::revision::{Revision, RevisionRange};
use crate::wc::{Depth, Schedule, WcAdmin, WcEntry};
use dsvn_core::{canonical_url, is_ancestor, is_url, svn_props, ChangeAction, Node, NodeKind};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs;
use std::path::Path;

/// Merge behaviour switches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOptions {
    /// Treat replaced nodes as modified instead of deleted and re-added
    pub ignore_ancestry: bool,
    /// Overwrite local changes that would otherwise conflict
    pub force: bool,
    /// Only record the merge in `svn:mergeinfo`
    pub record_only: bool,
    /// Report what would happen without touching the working copy
    pub dry_run: bool,
}

/// Revisions merged per source path, as stored in `svn:mergeinfo`
///
/// Each path maps to sorted inclusive spans that neither overlap nor touch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mergeinfo(BTreeMap<String, Vec<(u64, u64)>>);

impl Mergeinfo {
    /// Parse `/path:1-3,7` lines
    pub fn parse(value: &str) -> Result<Self> {
        let mut info = Self::default();
        for line in value.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let (path, ranges) = line
                .rsplit_once(':')
                .ok_or_else(|| ClientError::InvalidArgument(format!("Bad mergeinfo line '{}'", line)))?;
            for part in ranges.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                let bad = || ClientError::InvalidArgument(format!("Bad mergeinfo range '{}'", part));
                let (start, end) = match part.split_once('-') {
                    Some((a, b)) => (a.parse().map_err(|_| bad())?, b.parse().map_err(|_| bad())?),
                    None => {
                        let rev: u64 = part.parse().map_err(|_| bad())?;
                        (rev, rev)
                    }
                };
                if start > end {
                    return Err(bad());
                }
                info.add(path, start, end);
            }
        }
        Ok(info)
    }

    /// Merged spans of `path`, ascending
    pub fn ranges(&self, path: &str) -> Option<&[(u64, u64)]> {
        self.0.get(path).map(Vec::as_slice)
    }

    pub fn contains(&self, path: &str, rev: u64) -> bool {
        self.ranges(path)
            .is_some_and(|spans| spans.iter().any(|&(a, b)| a <= rev && rev <= b))
    }

    /// Record `start..=end` as merged from `path`
    pub fn add(&mut self, path: &str, start: u64, end: u64) {
        let spans = self.0.entry(path.to_string()).or_default();
        spans.push((start.min(end), start.max(end)));
        spans.sort_unstable();

        let mut merged: Vec<(u64, u64)> = Vec::with_capacity(spans.len());
        for &(a, b) in spans.iter() {
            match merged.last_mut() {
                Some((_, last)) if a <= last.saturating_add(1) => *last = (*last).max(b),
                _ => merged.push((a, b)),
            }
        }
        *spans = merged;
    }

    /// Forget `start..=end` for `path`, splitting spans it cuts through
    pub fn remove(&mut self, path: &str, start: u64, end: u64) {
        let (start, end) = (start.min(end), start.max(end));
        let Some(spans) = self.0.get_mut(path) else {
            return;
        };
        let mut kept = Vec::with_capacity(spans.len() + 1);
        for &(a, b) in spans.iter() {
            if b < start || a > end {
                kept.push((a, b));
                continue;
            }
            if a < start {
                kept.push((a, start - 1));
            }
            if b > end {
                kept.push((end + 1, b));
            }
        }
        if kept.is_empty() {
            self.0.remove(path);
        } else {
            *spans = kept;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for Mergeinfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first_line = true;
        for (path, spans) in &self.0 {
            if !first_line {
                writeln!(f)?;
            }
            first_line = false;
            let text: Vec<String> = spans
                .iter()
                .map(|(a, b)| if a == b { a.to_string() } else { format!("{}-{}", a, b) })
                .collect();
            write!(f, "{}:{}", path, text.join(","))?;
        }
        Ok(())
    }
}

fn below(roots: &[String], rel: &str) -> bool {
    roots.iter().any(|r| rel.starts_with(&format!("{}/", r)))
}

/// State shared by the ranges of one merge
struct MergeRun<'a> {
    ctx: &'a ClientContext,
    ra: &'a RaSession,
    wc: WcAdmin,
    target_rel: String,
    depth: Depth,
    options: MergeOptions,
}

impl Client {
    /// Apply the changes in `ranges` of `source` to the working copy at `target`
    pub fn merge(
        &self,
        source: &str,
        ranges: &[RevisionRange],
        peg: Revision,
        target: &Path,
        depth: Depth,
        options: &MergeOptions,
        ctx: &ClientContext,
    ) -> Result<()> {
        ctx.ensure_valid()?;
        if ranges.is_empty() {
            return Err(ClientError::InvalidArgument("No revision ranges to merge".to_string()));
        }
        let scratch = ctx.pool().scoped_child()?;
        let admin_dir = self.config().admin_dir.clone();

        let (source_url, source_entry) = if is_url(source) {
            (canonical_url(source), None)
        } else {
            let (wc, rel) = WcAdmin::open_containing(Path::new(source), &admin_dir, false, &scratch)?;
            let entry = wc.entry(&rel).cloned().ok_or_else(|| {
                ClientError::WorkingCopy(format!("'{}' is not under version control", source))
            })?;
            (wc.url_of(&rel), Some(entry))
        };

        let (wc, target_rel) =
            WcAdmin::open_containing(target, &admin_dir, self.config().lock_working_copy, &scratch)?;
        if wc.entry(&target_rel).is_none() {
            return Err(ClientError::WorkingCopy(format!(
                "'{}' is not under version control",
                target.display()
            )));
        }

        let ra = self.open_ra_session(&source_url, ctx)?;
        if ra.repos_root() != wc.metadata().repos_root_url {
            return Err(ClientError::InvalidArgument(format!(
                "'{}' is not in the repository of '{}'",
                source_url,
                target.display()
            )));
        }
        let peg = match peg {
            Revision::Unspecified if source_entry.is_some() => Revision::Base,
            Revision::Unspecified => Revision::Head,
            other => other,
        };
        let peg_rev = resolve_revnum(&ra, peg, source_entry.as_ref())?;
        require_node(&ra, ra.path(), peg_rev)?;

        let mut run = MergeRun {
            ctx,
            ra: &ra,
            wc,
            target_rel,
            depth,
            options: *options,
        };
        let applied = ranges.iter().try_for_each(|range| {
            let left = resolve_revnum(&ra, range.start, source_entry.as_ref())?;
            let right = resolve_revnum(&ra, range.end, source_entry.as_ref())?;
            if left == right {
                return Ok(());
            }
            run.apply_range(left, right)
        });
        // Changes already on disk keep their entries when a later path fails.
        if options.dry_run {
            applied?;
        } else {
            run.wc.save_after(applied)?;
        }
        tracing::info!("Merged {} into {}", source_url, target.display());
        run.wc.close()
    }
}

impl MergeRun<'_> {
    fn apply_range(&mut self, left: u64, right: u64) -> Result<()> {
        let ra = self.ra;
        let src = ra.path().to_string();
        let target = self.wc.abspath(&self.target_rel).display().to_string();
        self.ctx
            .notify(NotifyEvent::new(target, NotifyAction::MergeBegin, NodeKind::Dir).with_revision(right))?;
        tracing::debug!("Merging {}:{} of {}", left, right, src);

        if !self.options.record_only {
            let left_tree = self.tree(&src, left)?;
            let right_tree = self.tree(&src, right)?;
            let replaced = if self.options.ignore_ancestry {
                HashSet::new()
            } else {
                self.replaced_between(&src, left, right)?
            };

            let paths: BTreeSet<&String> = left_tree.keys().chain(right_tree.keys()).collect();
            // Deleted subtrees are skipped; replaced ones are re-added from the right side.
            let mut removed: Vec<String> = Vec::new();
            let mut recreated: Vec<String> = Vec::new();
            for rel in paths {
                if below(&removed, rel) {
                    continue;
                }
                let levels = if rel.is_empty() { 0 } else { rel.split('/').count() };
                let kind = right_tree.get(rel).or(left_tree.get(rel)).map(|n| n.kind).unwrap_or(NodeKind::None);
                if !self.depth.includes(levels, kind) {
                    continue;
                }
                self.ctx.check_cancelled()?;

                if below(&recreated, rel) {
                    if let Some(r) = right_tree.get(rel) {
                        self.add(&src, rel, r, right)?;
                    }
                    continue;
                }

                match (left_tree.get(rel), right_tree.get(rel)) {
                    (None, Some(r)) => self.add(&src, rel, r, right)?,
                    (Some(l), None) => {
                        if self.delete(&src, rel, l, left)? {
                            removed.push(rel.clone());
                        }
                    }
                    (Some(l), Some(r)) => {
                        let node_replaced = l.kind != r.kind || replaced.contains(rel.as_str());
                        if node_replaced {
                            if self.delete(&src, rel, l, left)? {
                                recreated.push(rel.clone());
                                self.add(&src, rel, r, right)?;
                            }
                        } else if l.kind == NodeKind::File && l.content != r.content {
                            self.modify(&src, rel, l, r, left, right)?;
                        }
                    }
                    (None, None) => {}
                }
            }
        }

        if !self.options.dry_run {
            self.record_mergeinfo(&src, left, right)?;
        }
        Ok(())
    }

    /// Source tree at `rev`, keyed by path relative to the source; empty if absent
    fn tree(&self, src: &str, rev: u64) -> Result<BTreeMap<String, Node>> {
        if self.ra.stat(src, rev)?.is_none() {
            return Ok(BTreeMap::new());
        }
        let nodes = self.ra.block_on(self.ra.backend().walk(src, rev))?;
        Ok(nodes
            .into_iter()
            .map(|(p, n)| (repos_relpath(src, &p).to_string(), n))
            .collect())
    }

    /// Source-relative paths replaced by a revision in the range
    fn replaced_between(&self, src: &str, left: u64, right: u64) -> Result<HashSet<String>> {
        let mut commits = CommitCache::new(self.ra);
        let mut replaced = HashSet::new();
        for rev in left.min(right) + 1..=left.max(right) {
            for (path, change) in &commits.get(rev)?.changed_paths {
                if change.action == ChangeAction::Replaced && is_ancestor(src, path) {
                    replaced.insert(repos_relpath(src, path).to_string());
                }
            }
        }
        Ok(replaced)
    }

    fn notify(&self, rel: &str, action: NotifyAction, kind: NodeKind) -> Result<()> {
        let wc_rel = join_rel(&self.target_rel, rel);
        self.ctx
            .notify(NotifyEvent::new(self.wc.abspath(&wc_rel).display().to_string(), action, kind))
    }

    fn file_content(&self, src: &str, rel: &str, rev: u64) -> Result<Vec<u8>> {
        let path = if rel.is_empty() { src.to_string() } else { format!("{}/{}", src.trim_end_matches('/'), rel) };
        Ok(self.ra.block_on(self.ra.backend().get_file(&path, rev))?.to_vec())
    }

    fn add(&mut self, src: &str, rel: &str, node: &Node, rev: u64) -> Result<()> {
        let wc_rel = join_rel(&self.target_rel, rel);
        let abs = self.wc.abspath(&wc_rel);
        if abs.exists() {
            let identical = node.kind == NodeKind::File
                && abs.is_file()
                && fs::read(&abs)? == self.file_content(src, rel, rev)?;
            if identical {
                return Ok(());
            }
            if !self.options.force {
                return self.notify(rel, NotifyAction::TreeConflict, node.kind);
            }
        }

        if !self.options.dry_run {
            let mut entry = WcEntry::added(node.kind);
            match node.kind {
                NodeKind::Dir => fs::create_dir_all(&abs)?,
                _ => {
                    let content = self.file_content(src, rel, rev)?;
                    fs::write(&abs, &content)?;
                    entry.working_size = Some(content.len() as u64);
                }
            }
            if let Some(old) = self.wc.entry(&wc_rel) {
                if old.schedule == Schedule::Delete {
                    entry.schedule = Schedule::Replace;
                    entry.revision = old.revision;
                }
            }
            self.wc.set_entry(&wc_rel, entry);
        }
        self.notify(rel, NotifyAction::UpdateAdd, node.kind)
    }

    /// Returns whether the node was deleted
    fn delete(&mut self, src: &str, rel: &str, node: &Node, rev: u64) -> Result<bool> {
        let wc_rel = join_rel(&self.target_rel, rel);
        let abs = self.wc.abspath(&wc_rel);
        if !abs.exists() || self.wc.entry(&wc_rel).is_none() {
            self.notify(rel, NotifyAction::Skip, node.kind)?;
            return Ok(false);
        }
        let modified = node.kind == NodeKind::File
            && abs.is_file()
            && fs::read(&abs)? != self.file_content(src, rel, rev)?;
        if modified && !self.options.force {
            self.notify(rel, NotifyAction::TreeConflict, node.kind)?;
            return Ok(false);
        }

        if !self.options.dry_run {
            if abs.is_dir() {
                fs::remove_dir_all(&abs)?;
            } else {
                fs::remove_file(&abs)?;
            }
            let scheduled_add = self.wc.entry(&wc_rel).map(|e| e.schedule == Schedule::Add).unwrap_or(false);
            if scheduled_add {
                self.wc.remove_entry(&wc_rel);
            } else {
                let prefix = format!("{}/", wc_rel);
                for (path, entry) in self.wc.metadata_mut().entries.iter_mut() {
                    if *path == wc_rel || path.starts_with(&prefix) {
                        entry.schedule = Schedule::Delete;
                    }
                }
            }
        }
        self.notify(rel, NotifyAction::UpdateDelete, node.kind)?;
        Ok(true)
    }

    fn modify(&mut self, src: &str, rel: &str, l: &Node, r: &Node, left: u64, right: u64) -> Result<()> {
        let wc_rel = join_rel(&self.target_rel, rel);
        let abs = self.wc.abspath(&wc_rel);
        if !abs.is_file() || self.wc.entry(&wc_rel).is_none() {
            return self.notify(rel, NotifyAction::Skip, l.kind);
        }

        let local = fs::read(&abs)?;
        let theirs = self.file_content(src, rel, right)?;
        if local == theirs {
            return Ok(());
        }
        if local != self.file_content(src, rel, left)? && !self.options.force {
            return self.notify(rel, NotifyAction::TextConflict, r.kind);
        }

        if !self.options.dry_run {
            fs::write(&abs, &theirs)?;
            if let Some(entry) = self.wc.entry_mut(&wc_rel) {
                entry.working_size = Some(theirs.len() as u64);
            }
        }
        self.notify(rel, NotifyAction::UpdateUpdate, r.kind)
    }

    fn record_mergeinfo(&mut self, src: &str, left: u64, right: u64) -> Result<()> {
        let target_rel = self.target_rel.clone();
        let Some(entry) = self.wc.entry_mut(&target_rel) else {
            return Ok(());
        };
        let mut mergeinfo = match entry.properties.get(svn_props::MERGE_INFO) {
            Some(value) => Mergeinfo::parse(value)?,
            None => Mergeinfo::default(),
        };
        if left < right {
            mergeinfo.add(src, left + 1, right);
        } else {
            mergeinfo.remove(src, right + 1, left);
        }

        if mergeinfo.is_empty() {
            entry.properties.remove(svn_props::MERGE_INFO);
        } else {
            entry.properties.set(svn_props::MERGE_INFO.to_string(), mergeinfo.to_string());
        }
        Ok(())
    }
}
