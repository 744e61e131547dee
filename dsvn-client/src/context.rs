//! Client context
//!
//! The set of callback slots an operation consults, owned by one pool.
//! Dropping the context destroys that pool, which releases every bound
//! callback. Binding into a slot is an independent strong reference: the
//! host may drop its own handle and the callback stays callable.
//!
//! The invoker methods here take a temporary strong reference for the
//! duration of one call, so a callback that rebinds its own slot finishes
//! running before it is released.

use crate::auth::{AuthBaton, AuthProvider};
use crate::bridge::BridgedSlot;
use crate::callbacks::{CancelCheck, CommitItem, CommitMessageProvider, NotifyEvent, NotifyReceiver};
use crate::error::{ClientError, Result};
use crate::pool::{Pool, ScopedPool};
use std::fmt;
use std::sync::Arc;

pub struct ClientContext {
    log_msg: BridgedSlot<dyn CommitMessageProvider>,
    notify: BridgedSlot<dyn NotifyReceiver>,
    cancel: BridgedSlot<dyn CancelCheck>,
    auth: BridgedSlot<AuthBaton>,
    // Dropped last; destroying it releases the slots above.
    pool: ScopedPool,
}

impl ClientContext {
    /// Create a context with every slot unbound
    ///
    /// The context lives in a child of `parent` when given, else in a fresh
    /// root pool. Destroying `parent` tears the context down as well.
    pub fn create(parent: Option<&Pool>) -> Result<Self> {
        let pool = match parent {
            Some(parent) => parent.scoped_child()?,
            None => ScopedPool::root(),
        };
        let ctx = Self {
            log_msg: BridgedSlot::new(&pool, "log_msg_baton")?,
            notify: BridgedSlot::new(&pool, "notify_baton")?,
            cancel: BridgedSlot::new(&pool, "cancel_baton")?,
            auth: BridgedSlot::new(&pool, "auth_baton")?,
            pool,
        };
        tracing::debug!("Created client context in {}", ctx.pool.id());
        Ok(ctx)
    }

    /// Pool owning this context
    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Fail with `UseAfterDestroy` if the owning pool is gone
    pub fn ensure_valid(&self) -> Result<()> {
        self.pool.ensure_valid()
    }

    pub fn log_msg_baton(&self) -> &BridgedSlot<dyn CommitMessageProvider> {
        &self.log_msg
    }

    pub fn notify_baton(&self) -> &BridgedSlot<dyn NotifyReceiver> {
        &self.notify
    }

    pub fn cancel_baton(&self) -> &BridgedSlot<dyn CancelCheck> {
        &self.cancel
    }

    pub fn auth_baton(&self) -> &BridgedSlot<AuthBaton> {
        &self.auth
    }

    pub fn set_log_msg(&self, provider: Option<&Arc<dyn CommitMessageProvider>>) -> Result<()> {
        self.log_msg.set(provider)
    }

    pub fn set_notify(&self, receiver: Option<&Arc<dyn NotifyReceiver>>) -> Result<()> {
        self.notify.set(receiver)
    }

    pub fn set_cancel(&self, check: Option<&Arc<dyn CancelCheck>>) -> Result<()> {
        self.cancel.set(check)
    }

    /// Build an auth baton from `providers` in this context's pool and bind it
    pub fn set_auth(&self, providers: Vec<Arc<dyn AuthProvider>>) -> Result<Arc<AuthBaton>> {
        let baton = Arc::new(AuthBaton::open(providers, &self.pool)?);
        self.auth.bind(&baton)?;
        Ok(baton)
    }

    /// Bind a baton opened elsewhere
    pub fn set_auth_baton(&self, baton: Option<&Arc<AuthBaton>>) -> Result<()> {
        self.auth.set(baton)
    }

    /// Ask the bound provider for a commit message
    pub(crate) fn commit_message(&self, items: &[CommitItem]) -> Result<Option<String>> {
        let provider = self
            .log_msg
            .acquire()?
            .ok_or(ClientError::UnboundRequiredCallback("log_msg_baton"))?;
        provider
            .commit_message(items)
            .map_err(|e| ClientError::callback("log_msg_baton", e))
    }

    /// Whether a commit-message provider is bound
    pub(crate) fn require_log_msg(&self) -> Result<()> {
        self.ensure_valid()?;
        if self.log_msg.is_bound() {
            Ok(())
        } else {
            Err(ClientError::UnboundRequiredCallback("log_msg_baton"))
        }
    }

    /// Deliver a notification, if a receiver is bound
    pub(crate) fn notify(&self, event: NotifyEvent) -> Result<()> {
        if let Some(receiver) = self.notify.acquire()? {
            receiver.notify(&event);
        }
        Ok(())
    }

    /// Poll the cancellation check
    pub(crate) fn check_cancelled(&self) -> Result<()> {
        match self.cancel.acquire()? {
            Some(check) if check.cancelled() => Err(ClientError::Cancelled),
            _ => Ok(()),
        }
    }

    /// Username the auth baton yields for `realm`
    pub(crate) fn username(&self, realm: &str) -> Result<Option<String>> {
        Ok(self.auth.acquire()?.and_then(|baton| baton.username(realm)))
    }
}

impl fmt::Debug for ClientContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientContext")
            .field("pool", &self.pool.id())
            .field("log_msg", &self.log_msg.is_bound())
            .field("notify", &self.notify.is_bound())
            .field("cancel", &self.cancel.is_bound())
            .field("auth", &self.auth.is_bound())
            .finish()
    }
}
