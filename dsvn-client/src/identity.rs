//! Repository identity lookups

use crate::client::Client;
use crate::context::ClientContext;
use crate::error::{ClientError, Result};
use crate::pool::ScopedPool;
use crate::wc::WcAdmin;
use dsvn_core::{canonical_url, is_url};
use std::path::Path;

impl Client {
    /// UUID of the repository serving `url`
    pub fn uuid_from_url(&self, url: &str, ctx: &ClientContext) -> Result<String> {
        let ra = self.open_ra_session(url, ctx)?;
        Ok(ra.uuid().to_string())
    }

    /// URL of a working-copy path; a URL is returned as is
    ///
    /// `None` when the path is not under version control.
    pub fn url_from_path(&self, target: &str) -> Result<Option<String>> {
        if is_url(target) {
            return Ok(Some(canonical_url(target)));
        }
        let admin_dir = &self.config().admin_dir;
        let Some((root, rel)) = WcAdmin::find_root(Path::new(target), admin_dir) else {
            return Ok(None);
        };
        let scratch = ScopedPool::root();
        let wc = WcAdmin::open(&root, admin_dir, false, &scratch)?;
        Ok(wc.entry(&rel).map(|_| wc.url_of(&rel)))
    }

    /// UUID of the repository a working-copy path belongs to
    ///
    /// Answered from `adm` when it records a UUID, else from the repository.
    pub fn uuid_from_path(&self, path: &Path, adm: &WcAdmin, ctx: &ClientContext) -> Result<String> {
        let rel = adm.relpath_of(path)?;
        if adm.entry(&rel).is_none() {
            return Err(ClientError::WorkingCopy(format!(
                "'{}' is not under version control",
                path.display()
            )));
        }
        if !adm.uuid().is_empty() {
            return Ok(adm.uuid().to_string());
        }
        self.uuid_from_url(&adm.url_of(&rel), ctx)
    }
}
