//! DSvn Client Library
//!
//! The client-side operation layer over a versioned backend:
//! - Scoped pools with deterministic, ordered teardown
//! - Pool-owned bridged slots holding host callbacks
//! - Client contexts aggregating callback slots and the auth baton
//! - Revision specifiers and ranges
//! - Operations: checkout, mkdir, log, info, merge, identity queries
//!
//! Operations are synchronous. Callbacks run on the caller's thread, inside
//! the operation call.

pub mod auth;
pub mod bridge;
pub mod callbacks;
pub mod checkout;
pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod identity;
pub mod info;
pub mod log;
pub mod merge;
pub mod mkdir;
pub mod pool;
pub mod ra;
pub mod revision;
pub mod wc;

pub use auth::{AuthBaton, AuthProvider, CredKind, Credentials, SimpleProvider, UsernameProvider};
pub use bridge::{BridgedSlot, Liveness};
pub use callbacks::{
    cancel_fn, commit_message_fn, notify_fn, CancelCheck, CommitItem, CommitMessageProvider, CommitState,
    InfoReceiver, LogEntryReceiver, LogReceiver, NotifyAction, NotifyEvent, NotifyReceiver,
};
pub use client::Client;
pub use config::ClientConfig;
pub use context::ClientContext;
pub use error::{ClientError, Result};
pub use info::{Info, INFO_SIZE_UNKNOWN};
pub use log::{LogEntry, LogOptions};
pub use merge::{MergeOptions, Mergeinfo};
pub use mkdir::CommitInfo;
pub use pool::{Pool, PoolId, ScopedPool, WeakPool};
pub use ra::RaSession;
pub use revision::{Revision, RevisionRange};
pub use wc::{Depth, Schedule, WcAdmin, WcEntry, WcMetadata};
