//! Authentication providers and the auth baton
//!
//! Providers are consulted in order; the first one able to answer a
//! credential request for a realm wins. The client only stores and forwards
//! them, and asks for a username to stamp as commit author.

use crate::pool::{Pool, WeakPool};
use std::fmt;
use std::sync::Arc;

/// Kind of credential a provider produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredKind {
    /// Username and password
    Simple,
    /// Username only
    Username,
}

/// Credentials returned by a provider
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Authentication provider trait
pub trait AuthProvider: Send + Sync {
    /// Credential kind this provider answers
    fn cred_kind(&self) -> CredKind;

    /// First credentials to try for `realm`, if any
    fn first_credentials(&self, realm: &str) -> Option<Credentials>;
}

/// Fixed username/password provider
#[derive(Clone)]
pub struct SimpleProvider {
    username: String,
    password: String,
}

impl SimpleProvider {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl AuthProvider for SimpleProvider {
    fn cred_kind(&self) -> CredKind {
        CredKind::Simple
    }

    fn first_credentials(&self, _realm: &str) -> Option<Credentials> {
        if self.username.is_empty() {
            return None;
        }
        Some(Credentials {
            username: self.username.clone(),
            password: Some(self.password.clone()),
        })
    }
}

/// Username-only provider
#[derive(Clone)]
pub struct UsernameProvider {
    username: String,
}

impl UsernameProvider {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
        }
    }
}

impl AuthProvider for UsernameProvider {
    fn cred_kind(&self) -> CredKind {
        CredKind::Username
    }

    fn first_credentials(&self, _realm: &str) -> Option<Credentials> {
        (!self.username.is_empty()).then(|| Credentials {
            username: self.username.clone(),
            password: None,
        })
    }
}

/// An ordered provider list, allocated in a pool
///
/// The baton is usually bound into a slot of the very pool it records, so
/// it names that pool weakly.
pub struct AuthBaton {
    providers: Vec<Arc<dyn AuthProvider>>,
    parent_pool: WeakPool,
}

impl AuthBaton {
    /// Build a baton from `providers`, recording the pool it lives in
    pub fn open(providers: Vec<Arc<dyn AuthProvider>>, pool: &Pool) -> crate::error::Result<Self> {
        pool.ensure_valid()?;
        Ok(Self {
            providers,
            parent_pool: pool.downgrade(),
        })
    }

    /// Pool the baton was allocated from
    pub fn parent_pool(&self) -> &WeakPool {
        &self.parent_pool
    }

    /// Whether the baton was allocated from `pool`
    pub fn allocated_in(&self, pool: &Pool) -> bool {
        self.parent_pool.is(pool)
    }

    pub fn providers(&self) -> &[Arc<dyn AuthProvider>] {
        &self.providers
    }

    /// First credentials of `kind` any provider offers for `realm`
    pub fn first_credentials(&self, kind: CredKind, realm: &str) -> Option<Credentials> {
        self.providers
            .iter()
            .filter(|p| p.cred_kind() == kind)
            .find_map(|p| p.first_credentials(realm))
    }

    /// Username to act as, from username providers first, then simple ones
    pub fn username(&self, realm: &str) -> Option<String> {
        self.first_credentials(CredKind::Username, realm)
            .or_else(|| self.first_credentials(CredKind::Simple, realm))
            .map(|c| c.username)
    }
}

impl fmt::Debug for AuthBaton {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthBaton")
            .field("providers", &self.providers.len())
            .field("parent_pool", &self.parent_pool.id())
            .finish()
    }
}
