//! Scoped pools
//!
//! Pools are nodes in a shared arena. A pool has at most one parent and any
//! number of children; destroying it tears down its children first (most
//! recently created first), then runs its own cleanup actions in reverse
//! registration order, then marks it dead. Any later use of a dead pool
//! fails with [`ClientError::UseAfterDestroy`].
//!
//! Bridged slots (see [`crate::bridge`]) are also entries in the arena.
//! Releasing a slot's occupant is one of the owning pool's cleanup actions,
//! registered when the slot is allocated, so it interleaves with ordinary
//! cleanups by registration order.
//!
//! Teardown work is collected while the arena lock is held and executed
//! after it is dropped: cleanup actions and occupant destructors are free to
//! touch other pools.
//!
//! Entries of destroyed pools and released slots go back on a free list.
//! Every entry carries a generation bumped on reuse, so a handle to a dead
//! pool or slot keeps failing with `UseAfterDestroy` after its index has
//! been handed out again.

use crate::error::{ClientError, Result};
use std::any::Any;
use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// Identity of a pool within its arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoolId {
    index: usize,
    generation: u64,
}

impl PoolId {
    /// Arena entry of the pool; reused once the pool is destroyed
    pub fn index(&self) -> usize {
        self.index
    }
}

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pool#{}", self.index)?;
        if self.generation > 0 {
            write!(f, ".{}", self.generation)?;
        }
        Ok(())
    }
}

/// Identity of a bridged slot within its arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct SlotId {
    index: usize,
    generation: u64,
}

/// Type-erased strong handle held by a slot
pub(crate) type Occupant = Box<dyn Any + Send>;

enum Cleanup {
    Action(Box<dyn FnOnce() + Send>),
    ReleaseSlot(SlotId),
}

enum Teardown {
    Run(Box<dyn FnOnce() + Send>),
    Release(Occupant),
}

struct PoolNode {
    generation: u64,
    parent: Option<PoolId>,
    children: Vec<PoolId>,
    cleanups: Vec<Cleanup>,
    live: bool,
}

impl PoolNode {
    fn new(parent: Option<PoolId>) -> Self {
        Self {
            generation: 0,
            parent,
            children: Vec::new(),
            cleanups: Vec::new(),
            live: true,
        }
    }
}

pub(crate) struct SlotEntry {
    generation: u64,
    owner: PoolId,
    name: &'static str,
    live: bool,
    pub(crate) occupant: Option<Occupant>,
}

/// Pool tree plus the slot table
#[derive(Default)]
pub(crate) struct Arena {
    pools: Vec<PoolNode>,
    slots: Vec<SlotEntry>,
    free_pools: Vec<usize>,
    free_slots: Vec<usize>,
}

impl Arena {
    fn node(&self, id: PoolId) -> Option<&PoolNode> {
        self.pools.get(id.index).filter(|n| n.generation == id.generation)
    }

    fn live_node(&self, id: PoolId) -> Result<&PoolNode> {
        match self.node(id) {
            Some(node) if node.live => Ok(node),
            _ => Err(ClientError::UseAfterDestroy(format!("{} has been destroyed", id))),
        }
    }

    fn live_node_mut(&mut self, id: PoolId) -> Result<&mut PoolNode> {
        match self.pools.get_mut(id.index) {
            Some(node) if node.live && node.generation == id.generation => Ok(node),
            _ => Err(ClientError::UseAfterDestroy(format!("{} has been destroyed", id))),
        }
    }

    fn alloc_pool(&mut self, parent: Option<PoolId>) -> Result<PoolId> {
        if let Some(parent) = parent {
            self.live_node(parent)?;
        }
        let id = match self.free_pools.pop() {
            Some(index) => {
                let node = &mut self.pools[index];
                node.generation += 1;
                node.parent = parent;
                node.live = true;
                PoolId {
                    index,
                    generation: node.generation,
                }
            }
            None => {
                self.pools.push(PoolNode::new(parent));
                PoolId {
                    index: self.pools.len() - 1,
                    generation: 0,
                }
            }
        };
        if let Some(parent) = parent {
            self.live_node_mut(parent)?.children.push(id);
        }
        Ok(id)
    }

    /// Number of pool and slot entries in use, freed ones excluded
    #[cfg(test)]
    fn occupancy(&self) -> (usize, usize) {
        (
            self.pools.len() - self.free_pools.len(),
            self.slots.len() - self.free_slots.len(),
        )
    }

    fn teardown(&mut self, id: PoolId, out: &mut Vec<Teardown>) {
        let (children, cleanups) = match self.pools.get_mut(id.index) {
            Some(node) if node.live && node.generation == id.generation => {
                node.live = false;
                (std::mem::take(&mut node.children), std::mem::take(&mut node.cleanups))
            }
            _ => return,
        };
        // The parent link stays readable until the entry is reused.
        self.free_pools.push(id.index);

        for child in children.into_iter().rev() {
            self.teardown(child, out);
        }

        for cleanup in cleanups.into_iter().rev() {
            match cleanup {
                Cleanup::Action(action) => out.push(Teardown::Run(action)),
                Cleanup::ReleaseSlot(slot) => {
                    let Some(entry) = self
                        .slots
                        .get_mut(slot.index)
                        .filter(|s| s.live && s.generation == slot.generation)
                    else {
                        continue;
                    };
                    entry.live = false;
                    if let Some(occupant) = entry.occupant.take() {
                        out.push(Teardown::Release(occupant));
                    }
                    self.free_slots.push(slot.index);
                }
            }
        }
    }

    pub(crate) fn alloc_slot(&mut self, owner: PoolId, name: &'static str) -> Result<SlotId> {
        self.live_node(owner)?;
        let id = match self.free_slots.pop() {
            Some(index) => {
                let entry = &mut self.slots[index];
                entry.generation += 1;
                entry.owner = owner;
                entry.name = name;
                entry.live = true;
                entry.occupant = None;
                SlotId {
                    index,
                    generation: entry.generation,
                }
            }
            None => {
                self.slots.push(SlotEntry {
                    generation: 0,
                    owner,
                    name,
                    live: true,
                    occupant: None,
                });
                SlotId {
                    index: self.slots.len() - 1,
                    generation: 0,
                }
            }
        };
        self.live_node_mut(owner)?.cleanups.push(Cleanup::ReleaseSlot(id));
        Ok(id)
    }

    pub(crate) fn slot(&self, id: SlotId) -> Result<&SlotEntry> {
        match self.slots.get(id.index) {
            Some(entry) if entry.generation == id.generation && entry.live => Ok(entry),
            Some(entry) if entry.generation == id.generation => Err(ClientError::UseAfterDestroy(format!(
                "slot '{}' belongs to destroyed {}",
                entry.name, entry.owner
            ))),
            _ => Err(ClientError::UseAfterDestroy(format!("slot #{} has been released", id.index))),
        }
    }

    pub(crate) fn slot_mut(&mut self, id: SlotId) -> Result<&mut SlotEntry> {
        self.slot(id)?;
        Ok(&mut self.slots[id.index])
    }
}

fn run_teardown(steps: Vec<Teardown>) {
    for step in steps {
        match step {
            Teardown::Run(action) => action(),
            Teardown::Release(occupant) => drop(occupant),
        }
    }
}

/// Handle to a pool
///
/// Handles are cheap to clone and do not own the pool: a pool lives until it
/// (or an ancestor) is destroyed. Use [`ScopedPool`] for a pool that must be
/// destroyed when a scope exits.
#[derive(Clone)]
pub struct Pool {
    arena: Arc<Mutex<Arena>>,
    id: PoolId,
}

impl Pool {
    /// Create a root pool in a fresh arena
    pub fn new() -> Self {
        let mut arena = Arena::default();
        arena.pools.push(PoolNode::new(None));
        let id = PoolId {
            index: 0,
            generation: 0,
        };
        Self {
            arena: Arc::new(Mutex::new(arena)),
            id,
        }
    }

    /// Create a pool, as a child of `parent` when given
    pub fn create(parent: Option<&Pool>) -> Result<Pool> {
        match parent {
            Some(parent) => parent.create_child(),
            None => Ok(Pool::new()),
        }
    }

    /// Create a child pool, destroyed no later than this one
    pub fn create_child(&self) -> Result<Pool> {
        let id = self.lock().alloc_pool(Some(self.id))?;
        Ok(Pool {
            arena: self.arena.clone(),
            id,
        })
    }

    /// Create a child pool that is destroyed when the returned guard drops
    pub fn scoped_child(&self) -> Result<ScopedPool> {
        self.create_child().map(ScopedPool)
    }

    pub fn id(&self) -> PoolId {
        self.id
    }

    /// Parent pool id, if any (also reported for destroyed pools)
    pub fn parent_id(&self) -> Option<PoolId> {
        self.lock().node(self.id).and_then(|n| n.parent)
    }

    /// Whether the pool has not been destroyed
    pub fn is_valid(&self) -> bool {
        self.lock().live_node(self.id).is_ok()
    }

    /// Fail with `UseAfterDestroy` if the pool is dead
    pub fn ensure_valid(&self) -> Result<()> {
        self.lock().live_node(self.id).map(|_| ())
    }

    /// Append an action to run when the pool is destroyed
    pub fn register_cleanup<F>(&self, action: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.lock()
            .live_node_mut(self.id)?
            .cleanups
            .push(Cleanup::Action(Box::new(action)));
        Ok(())
    }

    /// Destroy the pool: children first, then own cleanups in reverse order
    pub fn destroy(&self) -> Result<()> {
        let mut steps = Vec::new();
        {
            let mut arena = self.lock();
            arena.live_node(self.id)?;
            arena.teardown(self.id, &mut steps);
            if let Some(parent) = arena.node(self.id).and_then(|n| n.parent) {
                if let Ok(node) = arena.live_node_mut(parent) {
                    node.children.retain(|c| *c != self.id);
                }
            }
        }
        tracing::trace!("Destroying {} ({} teardown steps)", self.id, steps.len());
        run_teardown(steps);
        Ok(())
    }

    /// Handle that does not keep the arena alive
    pub fn downgrade(&self) -> WeakPool {
        WeakPool {
            arena: Arc::downgrade(&self.arena),
            id: self.id,
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Arena> {
        self.arena.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Non-owning pool handle, for values stored inside the arena they name
#[derive(Clone)]
pub struct WeakPool {
    arena: Weak<Mutex<Arena>>,
    id: PoolId,
}

impl WeakPool {
    pub fn id(&self) -> PoolId {
        self.id
    }

    /// The pool handle, while any strong handle to its arena remains
    pub fn upgrade(&self) -> Option<Pool> {
        self.arena.upgrade().map(|arena| Pool { arena, id: self.id })
    }

    /// Whether this names `pool`
    pub fn is(&self, pool: &Pool) -> bool {
        std::ptr::eq(self.arena.as_ptr(), Arc::as_ptr(&pool.arena)) && self.id == pool.id
    }
}

impl fmt::Debug for WeakPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakPool").field("id", &self.id).finish()
    }
}

impl Default for Pool {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Pool {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.arena, &other.arena) && self.id == other.id
    }
}

impl Eq for Pool {}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("id", &self.id)
            .field("valid", &self.is_valid())
            .finish()
    }
}

/// A pool destroyed when the guard goes out of scope
///
/// Destruction happens on every exit path, including early returns with an
/// error and unwinding. A pool already destroyed through an ancestor is left
/// alone.
pub struct ScopedPool(Pool);

impl ScopedPool {
    /// A fresh root pool
    pub fn root() -> Self {
        ScopedPool(Pool::new())
    }

    pub fn pool(&self) -> &Pool {
        &self.0
    }
}

impl Deref for ScopedPool {
    type Target = Pool;

    fn deref(&self) -> &Pool {
        &self.0
    }
}

impl Drop for ScopedPool {
    fn drop(&mut self) {
        if self.0.is_valid() {
            if let Err(e) = self.0.destroy() {
                tracing::warn!("Failed to destroy scoped {}: {}", self.0.id, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    fn recorder() -> (Arc<StdMutex<Vec<String>>>, impl Fn(&str) -> Box<dyn FnOnce() + Send>) {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let sink = log.clone();
        let make = move |label: &str| -> Box<dyn FnOnce() + Send> {
            let sink = sink.clone();
            let label = label.to_string();
            Box::new(move || sink.lock().unwrap().push(label))
        };
        (log, make)
    }

    #[test]
    fn test_cleanups_run_in_reverse_registration_order() {
        let (log, make) = recorder();
        let pool = Pool::new();
        pool.register_cleanup(make("first")).unwrap();
        pool.register_cleanup(make("second")).unwrap();
        pool.register_cleanup(make("third")).unwrap();
        pool.destroy().unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["third", "second", "first"]);
    }

    #[test]
    fn test_children_torn_down_before_parent() {
        let (log, make) = recorder();
        let parent = Pool::new();
        parent.register_cleanup(make("parent")).unwrap();
        let older = parent.create_child().unwrap();
        older.register_cleanup(make("older")).unwrap();
        let younger = parent.create_child().unwrap();
        younger.register_cleanup(make("younger")).unwrap();
        let grandchild = older.create_child().unwrap();
        grandchild.register_cleanup(make("grandchild")).unwrap();

        parent.destroy().unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["younger", "grandchild", "older", "parent"]);
        assert!(!older.is_valid());
        assert!(!grandchild.is_valid());
    }

    #[test]
    fn test_use_after_destroy() {
        let pool = Pool::new();
        let child = pool.create_child().unwrap();
        child.destroy().unwrap();

        assert!(matches!(child.destroy(), Err(ClientError::UseAfterDestroy(_))));
        assert!(matches!(child.create_child(), Err(ClientError::UseAfterDestroy(_))));
        assert!(matches!(child.register_cleanup(|| {}), Err(ClientError::UseAfterDestroy(_))));
        // Destroying a child never invalidates its parent.
        assert!(pool.is_valid());
        assert_eq!(child.parent_id(), Some(pool.id()));
    }

    #[test]
    fn test_cleanup_may_touch_other_pools() {
        let pool = Pool::new();
        let sibling = Pool::create(Some(&pool)).unwrap();
        let victim = pool.create_child().unwrap();
        let sibling_handle = sibling.clone();
        victim
            .register_cleanup(move || {
                sibling_handle.register_cleanup(|| {}).unwrap();
            })
            .unwrap();
        victim.destroy().unwrap();
        assert!(sibling.is_valid());
    }

    #[test]
    fn test_scoped_pool_destroys_on_drop() {
        let (log, make) = recorder();
        let parent = Pool::new();
        let handle = {
            let scoped = parent.scoped_child().unwrap();
            scoped.register_cleanup(make("scoped")).unwrap();
            scoped.pool().clone()
        };
        assert!(!handle.is_valid());
        assert_eq!(*log.lock().unwrap(), vec!["scoped"]);
    }

    #[test]
    fn test_scoped_pool_released_on_error_path() {
        let (log, make) = recorder();
        let parent = Pool::new();
        let run = || -> Result<()> {
            let scratch = parent.scoped_child()?;
            scratch.register_cleanup(make("scratch"))?;
            Err(ClientError::Cancelled)
        };
        assert!(matches!(run(), Err(ClientError::Cancelled)));
        assert_eq!(*log.lock().unwrap(), vec!["scratch"]);
        assert!(parent.is_valid());
    }

    #[test]
    fn test_destroyed_entries_are_reused() {
        let root = Pool::new();
        for _ in 0..1000 {
            let scratch = root.scoped_child().unwrap();
            let nested = scratch.create_child().unwrap();
            crate::bridge::BridgedSlot::<String>::new(&nested, "scratch").unwrap();
        }
        assert_eq!(root.lock().occupancy(), (1, 0));
        assert!(root.lock().pools.len() <= 3);
        assert!(root.lock().slots.len() <= 1);
    }

    #[test]
    fn test_stale_handle_after_reuse() {
        let root = Pool::new();
        let stale = root.create_child().unwrap();
        stale.destroy().unwrap();
        let fresh = root.create_child().unwrap();

        assert_eq!(fresh.id().index(), stale.id().index());
        assert_ne!(fresh.id(), stale.id());
        assert_ne!(fresh, stale);
        assert!(matches!(stale.destroy(), Err(ClientError::UseAfterDestroy(_))));
        assert!(matches!(stale.create_child(), Err(ClientError::UseAfterDestroy(_))));
        assert!(stale.parent_id().is_none());
        assert!(fresh.is_valid());
        assert_eq!(fresh.parent_id(), Some(root.id()));
    }

    #[test]
    fn test_weak_pool_does_not_keep_arena() {
        let pool = Pool::new();
        let weak = pool.downgrade();
        assert!(weak.is(&pool));
        assert_eq!(weak.upgrade(), Some(pool.clone()));
        drop(pool);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_scoped_pool_after_parent_destroyed() {
        let parent = Pool::new();
        let scoped = parent.scoped_child().unwrap();
        parent.destroy().unwrap();
        assert!(!scoped.is_valid());
        drop(scoped);
    }
}
