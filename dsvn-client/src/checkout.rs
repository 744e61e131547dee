//! Checkout

use crate::callbacks::{NotifyAction, NotifyEvent};
use crate::client::{repos_relpath, require_node, resolve_revnum, Client, CommitCache};
use crate::context::ClientContext;
use crate::error::{ClientError, Result};
use crate::ra::RaSession;
use crate::revision::Revision;
use crate::wc::{Depth, WcAdmin, WcEntry, WcMetadata};
use dsvn_core::{is_url, svn_props, Node, NodeKind, RepoError};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Check that peg and operative revisions are specified together
///
/// Both unspecified means HEAD for both.
pub(crate) fn revision_pair(peg: Revision, revision: Revision) -> Result<(Revision, Revision)> {
    match (peg.is_specified(), revision.is_specified()) {
        (false, false) => Ok((Revision::Head, Revision::Head)),
        (true, true) => Ok((peg, revision)),
        _ => Err(ClientError::InvalidRevisionPair { peg, revision }),
    }
}

/// Nodes a checkout at `depth` needs, the session root first
///
/// Shallow checkouts list the root directory instead of walking the tree.
fn checkout_nodes(ra: &RaSession, rev: u64, depth: Depth) -> Result<Vec<(String, Node)>> {
    if depth == Depth::Infinity {
        return Ok(ra.block_on(ra.backend().walk(ra.path(), rev))?);
    }
    let mut nodes = vec![(ra.path().to_string(), require_node(ra, ra.path(), rev)?)];
    if depth == Depth::Empty {
        return Ok(nodes);
    }
    for name in ra.block_on(ra.backend().list_dir(ra.path(), rev))? {
        let path = match ra.path() {
            "/" => format!("/{}", name),
            parent => format!("{}/{}", parent, name),
        };
        let node = require_node(ra, &path, rev)?;
        nodes.push((path, node));
    }
    Ok(nodes)
}

/// Write a checked-out file, carrying the executable bit over
fn write_file(abs: &Path, content: &[u8], node: &Node, entry: &mut WcEntry) -> Result<()> {
    fs::write(abs, content)?;
    if node.mode & 0o111 != 0 {
        entry
            .properties
            .set(svn_props::EXECUTABLE.to_string(), svn_props::EXECUTABLE_VALUE.to_string());
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(abs, fs::Permissions::from_mode(node.mode))?;
        }
    }
    Ok(())
}

impl Client {
    /// Materialize a working copy of `url` at `path`
    ///
    /// Returns the revision checked out.
    pub fn checkout(
        &self,
        url: &str,
        path: &Path,
        peg: Revision,
        revision: Revision,
        depth: Depth,
        ctx: &ClientContext,
    ) -> Result<u64> {
        ctx.ensure_valid()?;
        let (peg, revision) = revision_pair(peg, revision)?;
        if !is_url(url) {
            return Err(ClientError::InvalidArgument(format!("'{}' is not a URL", url)));
        }
        if peg.requires_working_copy() || revision.requires_working_copy() {
            return Err(ClientError::BadRevision(format!(
                "Revision {}@{} is not valid for a URL",
                revision, peg
            )));
        }

        let admin_dir = self.config().admin_dir.clone();
        if path.join(&admin_dir).exists() {
            return Err(ClientError::WorkingCopy(format!(
                "'{}' is already a working copy",
                path.display()
            )));
        }

        let scratch = ctx.pool().scoped_child()?;
        let ra = self.open_ra_session(url, ctx)?;
        let peg_rev = resolve_revnum(&ra, peg, None)?;
        let rev = resolve_revnum(&ra, revision, None)?;

        match require_node(&ra, ra.path(), peg_rev)?.kind {
            NodeKind::Dir => {}
            _ => return Err(RepoError::NotDirectory(ra.url().to_string()).into()),
        }
        let nodes = checkout_nodes(&ra, rev, depth)?;
        let mut commits = CommitCache::new(&ra);

        fs::create_dir_all(path)?;
        let mut entries = BTreeMap::new();
        if let Some((_, root)) = nodes.first() {
            entries.insert(String::new(), commits.entry_for(root, rev)?);
        }
        let meta = WcMetadata {
            url: ra.url().to_string(),
            repos_root_url: ra.repos_root().to_string(),
            uuid: ra.uuid().to_string(),
            revision: rev,
            depth,
            entries,
        };
        let mut wc = WcAdmin::create(path, &admin_dir, meta, &scratch)?;

        let populated = nodes.iter().skip(1).try_for_each(|(repos_path, node)| {
            let rel = repos_relpath(ra.path(), repos_path);
            let levels = rel.split('/').count();
            if !depth.includes(levels, node.kind) {
                return Ok(());
            }
            ctx.check_cancelled()?;

            let abs = wc.abspath(rel);
            let mut entry = commits.entry_for(node, rev)?;
            match node.kind {
                NodeKind::Dir => fs::create_dir_all(&abs)?,
                _ => {
                    let content = ra.block_on(ra.backend().get_file(repos_path, rev))?;
                    write_file(&abs, &content, node, &mut entry)?;
                }
            }
            wc.set_entry(rel, entry);
            tracing::debug!("A    {}", abs.display());
            ctx.notify(NotifyEvent::new(abs.display().to_string(), NotifyAction::UpdateAdd, node.kind))
        });

        // A cancelled checkout leaves a usable, partial working copy.
        wc.save_after(populated)?;
        wc.close()?;
        tracing::info!("Checked out {} r{} to {}", ra.url(), rev, path.display());
        ctx.notify(
            NotifyEvent::new(path.display().to_string(), NotifyAction::UpdateCompleted, NodeKind::Dir)
                .with_revision(rev),
        )?;
        Ok(rev)
    }
}
