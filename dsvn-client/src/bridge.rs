//! Handle bridge
//!
//! A [`BridgedSlot`] is a named, pool-owned field holding at most one
//! host object. Binding clones the host's `Arc`, so the slot is an
//! independent strong owner; the previous occupant is released before the
//! new one is installed. Destroying the owning pool releases whatever is
//! still installed, exactly once.
//!
//! [`Liveness`] is a non-owning token for a bridged object. It reports dead
//! as soon as the last strong reference, the bridge's included, is gone.

use crate::error::Result;
use crate::pool::{Pool, SlotId};
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};

/// A pool-owned slot holding an optional `Arc<T>`
pub struct BridgedSlot<T: ?Sized + Send + Sync + 'static> {
    pool: Pool,
    id: SlotId,
    name: &'static str,
    _marker: PhantomData<fn() -> Arc<T>>,
}

impl<T: ?Sized + Send + Sync + 'static> BridgedSlot<T> {
    /// Allocate an unbound slot owned by `pool`
    pub fn new(pool: &Pool, name: &'static str) -> Result<Self> {
        let id = pool.lock().alloc_slot(pool.id(), name)?;
        Ok(Self {
            pool: pool.clone(),
            id,
            name,
            _marker: PhantomData,
        })
    }

    /// Field name this slot occupies
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Pool owning this slot's release
    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Install `object`, releasing any previous occupant first
    pub fn bind(&self, object: &Arc<T>) -> Result<()> {
        let previous = self.pool.lock().slot_mut(self.id)?.occupant.take();
        // The old occupant's destructor may re-enter the arena.
        drop(previous);

        let mut arena = self.pool.lock();
        arena.slot_mut(self.id)?.occupant = Some(Box::new(Arc::clone(object)));
        tracing::trace!("Bound slot '{}' in {}", self.name, self.pool.id());
        Ok(())
    }

    /// Bind when `Some`, clear when `None`
    pub fn set(&self, object: Option<&Arc<T>>) -> Result<()> {
        match object {
            Some(object) => self.bind(object),
            None => self.clear(),
        }
    }

    /// Release and remove the occupant
    pub fn clear(&self) -> Result<()> {
        let previous = self.pool.lock().slot_mut(self.id)?.occupant.take();
        drop(previous);
        Ok(())
    }

    /// Whether the slot currently holds an object
    ///
    /// A slot whose pool has been destroyed is never bound.
    pub fn is_bound(&self) -> bool {
        self.pool
            .lock()
            .slot(self.id)
            .map(|s| s.occupant.is_some())
            .unwrap_or(false)
    }

    /// Observe the occupant without taking ownership
    pub fn read(&self) -> Result<Option<Liveness<T>>> {
        let arena = self.pool.lock();
        let entry = arena.slot(self.id)?;
        Ok(entry
            .occupant
            .as_ref()
            .and_then(|o| o.downcast_ref::<Arc<T>>())
            .map(Liveness::of))
    }

    /// Temporary strong reference held for the duration of one invocation
    pub(crate) fn acquire(&self) -> Result<Option<Arc<T>>> {
        let arena = self.pool.lock();
        let entry = arena.slot(self.id)?;
        Ok(entry
            .occupant
            .as_ref()
            .and_then(|o| o.downcast_ref::<Arc<T>>())
            .cloned())
    }
}

impl<T: ?Sized + Send + Sync + 'static> fmt::Debug for BridgedSlot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgedSlot")
            .field("name", &self.name)
            .field("pool", &self.pool.id())
            .field("bound", &self.is_bound())
            .finish()
    }
}

/// Non-owning liveness token for a bridged object
pub struct Liveness<T: ?Sized> {
    weak: Weak<T>,
}

impl<T: ?Sized> Liveness<T> {
    pub fn of(object: &Arc<T>) -> Self {
        Self {
            weak: Arc::downgrade(object),
        }
    }

    /// Whether any strong reference remains
    pub fn is_alive(&self) -> bool {
        self.weak.strong_count() > 0
    }

    /// Strong reference, if the object is still alive
    pub fn upgrade(&self) -> Option<Arc<T>> {
        self.weak.upgrade()
    }

    /// Whether this token observes `object`
    pub fn observes(&self, object: &Arc<T>) -> bool {
        std::ptr::addr_eq(self.weak.as_ptr(), Arc::as_ptr(object))
    }
}

impl<T: ?Sized> Clone for Liveness<T> {
    fn clone(&self) -> Self {
        Self {
            weak: self.weak.clone(),
        }
    }
}

impl<T: ?Sized> fmt::Debug for Liveness<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Liveness").field("alive", &self.is_alive()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Tracked(Arc<AtomicUsize>);

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_rebind_releases_old_occupant() {
        let pool = Pool::new();
        let slot: BridgedSlot<String> = BridgedSlot::new(&pool, "baton").unwrap();
        let a = Arc::new("a".to_string());
        let b = Arc::new("b".to_string());

        slot.bind(&a).unwrap();
        assert_eq!(Arc::strong_count(&a), 2);

        slot.bind(&b).unwrap();
        assert_eq!(Arc::strong_count(&a), 1);
        assert_eq!(Arc::strong_count(&b), 2);

        slot.clear().unwrap();
        assert_eq!(Arc::strong_count(&b), 1);
        assert!(!slot.is_bound());
    }

    #[test]
    fn test_rebinding_same_object_keeps_one_edge() {
        let pool = Pool::new();
        let slot: BridgedSlot<String> = BridgedSlot::new(&pool, "baton").unwrap();
        let a = Arc::new("a".to_string());
        slot.bind(&a).unwrap();
        slot.bind(&a).unwrap();
        assert_eq!(Arc::strong_count(&a), 2);
    }

    #[test]
    fn test_read_does_not_own() {
        let pool = Pool::new();
        let slot: BridgedSlot<String> = BridgedSlot::new(&pool, "baton").unwrap();
        assert!(slot.read().unwrap().is_none());

        let a = Arc::new("a".to_string());
        slot.bind(&a).unwrap();
        let token = slot.read().unwrap().unwrap();
        assert!(token.observes(&a));
        assert_eq!(Arc::strong_count(&a), 2);

        drop(a);
        assert!(token.is_alive());
        pool.destroy().unwrap();
        assert!(!token.is_alive());
        assert!(token.upgrade().is_none());
    }

    #[test]
    fn test_pool_teardown_releases_every_slot_once() {
        let drops = Arc::new(AtomicUsize::new(0));
        let pool = Pool::new();
        let slots: Vec<BridgedSlot<Tracked>> = (0..3)
            .map(|_| BridgedSlot::new(&pool, "tracked").unwrap())
            .collect();
        for slot in &slots {
            slot.bind(&Arc::new(Tracked(drops.clone()))).unwrap();
        }
        assert_eq!(drops.load(Ordering::SeqCst), 0);

        pool.destroy().unwrap();
        assert_eq!(drops.load(Ordering::SeqCst), 3);
        assert!(slots.iter().all(|s| !s.is_bound()));
        assert!(matches!(slots[0].bind(&Arc::new(Tracked(drops.clone()))), Err(ClientError::UseAfterDestroy(_))));
        // The rejected object was dropped on return, not stored.
        assert_eq!(drops.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_stale_slot_does_not_reach_reused_entry() {
        let root = Pool::new();
        let old_pool = root.create_child().unwrap();
        let stale: BridgedSlot<String> = BridgedSlot::new(&old_pool, "baton").unwrap();
        old_pool.destroy().unwrap();

        let new_pool = root.create_child().unwrap();
        let fresh: BridgedSlot<String> = BridgedSlot::new(&new_pool, "baton").unwrap();
        let a = Arc::new("a".to_string());
        fresh.bind(&a).unwrap();

        assert!(matches!(stale.bind(&a), Err(ClientError::UseAfterDestroy(_))));
        assert!(matches!(stale.clear(), Err(ClientError::UseAfterDestroy(_))));
        assert!(!stale.is_bound());
        assert!(fresh.read().unwrap().unwrap().observes(&a));
        assert_eq!(Arc::strong_count(&a), 2);
    }

    #[test]
    fn test_slot_release_interleaves_with_cleanups() {
        let pool = Pool::new();
        let early = Arc::new("early".to_string());
        let token = Liveness::of(&early);

        let before = token.clone();
        pool.register_cleanup(move || assert!(!before.is_alive())).unwrap();
        let slot: BridgedSlot<String> = BridgedSlot::new(&pool, "baton").unwrap();
        slot.bind(&early).unwrap();
        let after = token.clone();
        pool.register_cleanup(move || assert!(after.is_alive())).unwrap();

        drop(early);
        pool.destroy().unwrap();
        assert!(!token.is_alive());
    }

    #[test]
    fn test_trait_object_slot() {
        trait Greeter: Send + Sync {
            fn greet(&self) -> String;
        }
        struct Hello;
        impl Greeter for Hello {
            fn greet(&self) -> String {
                "hello".to_string()
            }
        }

        let pool = Pool::new();
        let slot: BridgedSlot<dyn Greeter> = BridgedSlot::new(&pool, "greeter").unwrap();
        let greeter: Arc<dyn Greeter> = Arc::new(Hello);
        slot.bind(&greeter).unwrap();
        let acquired = slot.acquire().unwrap().unwrap();
        assert_eq!(acquired.greet(), "hello");
        assert_eq!(Arc::strong_count(&greeter), 3);
    }
}
