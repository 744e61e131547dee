//! DSvn Core Library
//!
//! The versioned backend driven by the client layer:
//! - Object model (Blob, Node, ChangedPath, Commit)
//! - In-memory repository with atomic transactions
//! - The async `VersionedBackend` interface
//! - Repository registry resolving URLs to backends

pub mod backend;
pub mod error;
pub mod object;
pub mod properties;
pub mod registry;
pub mod repository;

pub use backend::VersionedBackend;
pub use error::{RepoError, Result};
pub use object::{Blob, ChangeAction, ChangedPath, Commit, Node, NodeKind, ObjectId};
pub use properties::{svn_props, PropertySet};
pub use registry::{canonical_url, is_url, url_join, RepositoryRegistry, ResolvedUrl};
pub use repository::{canonical_path, is_ancestor, parent_path, Repository, Snapshot, Transaction};
