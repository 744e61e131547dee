//! Host callback interfaces
//!
//! Long-lived callbacks (commit message, notification, cancellation) are
//! bridged into a [`crate::ClientContext`]. Per-call receivers (log, info)
//! are plain closures borrowed for the duration of one operation.
//!
//! Every trait has a blanket implementation for matching closures, so a
//! host can bind either a type of its own or an `Arc::new(|..| ..)`.

use chrono::{DateTime, Utc};
use dsvn_core::{ChangedPath, NodeKind};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::info::Info;
use crate::log::LogEntry;

/// A path about to be committed, as shown to the commit-message provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitItem {
    /// Working-copy path for local targets, `None` for URL targets
    pub path: Option<String>,
    /// URL the item is committed to
    pub url: String,
    pub kind: NodeKind,
    pub state: CommitState,
}

/// What a commit does to an item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitState {
    Add,
    Delete,
    TextMods,
    PropMods,
}

/// Supplies the log message for a commit
pub trait CommitMessageProvider: Send + Sync {
    /// Message for a commit of `items`; `None` cancels the commit
    fn commit_message(&self, items: &[CommitItem]) -> anyhow::Result<Option<String>>;
}

impl<F> CommitMessageProvider for F
where
    F: Fn(&[CommitItem]) -> anyhow::Result<Option<String>> + Send + Sync,
{
    fn commit_message(&self, items: &[CommitItem]) -> anyhow::Result<Option<String>> {
        self(items)
    }
}

/// Kind of change being notified
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotifyAction {
    Add,
    Delete,
    UpdateAdd,
    UpdateDelete,
    UpdateUpdate,
    UpdateCompleted,
    CommitAdded,
    MergeBegin,
    Skip,
    TreeConflict,
    TextConflict,
}

impl fmt::Display for NotifyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NotifyAction::Add | NotifyAction::UpdateAdd | NotifyAction::CommitAdded => "A",
            NotifyAction::Delete | NotifyAction::UpdateDelete => "D",
            NotifyAction::UpdateUpdate => "U",
            NotifyAction::TextConflict | NotifyAction::TreeConflict => "C",
            NotifyAction::Skip => "Skipped",
            NotifyAction::UpdateCompleted => "At revision",
            NotifyAction::MergeBegin => "--- Merging",
        };
        f.write_str(s)
    }
}

/// A change notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyEvent {
    pub path: String,
    pub action: NotifyAction,
    pub kind: NodeKind,
    pub revision: Option<u64>,
}

impl NotifyEvent {
    pub fn new(path: impl Into<String>, action: NotifyAction, kind: NodeKind) -> Self {
        Self {
            path: path.into(),
            action,
            kind,
            revision: None,
        }
    }

    pub fn with_revision(mut self, revision: u64) -> Self {
        self.revision = Some(revision);
        self
    }
}

/// Observes change notifications
pub trait NotifyReceiver: Send + Sync {
    fn notify(&self, event: &NotifyEvent);
}

impl<F> NotifyReceiver for F
where
    F: Fn(&NotifyEvent) + Send + Sync,
{
    fn notify(&self, event: &NotifyEvent) {
        self(event)
    }
}

/// Cooperative cancellation check, polled during long traversals
pub trait CancelCheck: Send + Sync {
    fn cancelled(&self) -> bool;
}

impl<F> CancelCheck for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn cancelled(&self) -> bool {
        self()
    }
}

/// Wrap a closure as a bindable commit-message provider
pub fn commit_message_fn<F>(f: F) -> Arc<dyn CommitMessageProvider>
where
    F: Fn(&[CommitItem]) -> anyhow::Result<Option<String>> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Wrap a closure as a bindable notification receiver
pub fn notify_fn<F>(f: F) -> Arc<dyn NotifyReceiver>
where
    F: Fn(&NotifyEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Wrap a closure as a bindable cancellation check
pub fn cancel_fn<F>(f: F) -> Arc<dyn CancelCheck>
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Log receiver: changed paths, revision, author, date, message
pub type LogReceiver<'a> = dyn FnMut(
        Option<&BTreeMap<String, ChangedPath>>,
        u64,
        Option<&str>,
        Option<DateTime<Utc>>,
        Option<&str>,
    ) -> anyhow::Result<()>
    + 'a;

/// Log-entry receiver
pub type LogEntryReceiver<'a> = dyn FnMut(&LogEntry) -> anyhow::Result<()> + 'a;

/// Info receiver: path as reported, info record
pub type InfoReceiver<'a> = dyn FnMut(&str, &Info) -> anyhow::Result<()> + 'a;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_closures_bind_as_callbacks() {
        let provider = commit_message_fn(|items| Ok(Some(format!("{} items", items.len()))));
        let items = vec![CommitItem {
            path: None,
            url: "dsvn://h/r/D".to_string(),
            kind: NodeKind::Dir,
            state: CommitState::Add,
        }];
        assert_eq!(provider.commit_message(&items).unwrap().as_deref(), Some("1 items"));

        let flag = Arc::new(AtomicBool::new(false));
        let check = {
            let flag = flag.clone();
            cancel_fn(move || flag.load(Ordering::SeqCst))
        };
        assert!(!check.cancelled());
        flag.store(true, Ordering::SeqCst);
        assert!(check.cancelled());
    }

    #[test]
    fn test_notify_event_builder() {
        let event = NotifyEvent::new("wc/trunk", NotifyAction::UpdateAdd, NodeKind::Dir).with_revision(4);
        assert_eq!(event.revision, Some(4));
        assert_eq!(event.action.to_string(), "A");
        assert_eq!(NotifyAction::TextConflict.to_string(), "C");
    }
}
