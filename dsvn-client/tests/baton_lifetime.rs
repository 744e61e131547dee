//! Callback lifetime across pools, slots and contexts

mod common;

use common::*;
use dsvn_client::{
    commit_message_fn, notify_fn, AuthBaton, BridgedSlot, ClientContext, ClientError, CommitMessageProvider,
    Liveness, NotifyReceiver, Pool, UsernameProvider,
};
use proptest::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[test]
fn test_rebind_releases_exactly_once() {
    let ctx = ClientContext::create(None).unwrap();
    let a = commit_message_fn(|_| Ok(Some("a".to_string())));
    let b = commit_message_fn(|_| Ok(Some("b".to_string())));
    let (a_before, b_before) = (Arc::strong_count(&a), Arc::strong_count(&b));

    ctx.set_log_msg(Some(&a)).unwrap();
    assert_eq!(Arc::strong_count(&a), a_before + 1);
    ctx.set_log_msg(Some(&b)).unwrap();
    assert_eq!(Arc::strong_count(&a), a_before);
    assert_eq!(Arc::strong_count(&b), b_before + 1);

    ctx.set_log_msg(None).unwrap();
    assert_eq!(Arc::strong_count(&b), b_before);
    assert!(ctx.log_msg_baton().read().unwrap().is_none());
}

#[test]
fn test_bridge_keeps_callback_alive_without_host_reference() {
    let fx = fixture();
    let ctx = ClientContext::create(None).unwrap();
    let token: Liveness<dyn CommitMessageProvider> = {
        let provider = commit_message_fn(|_| Ok(Some("Still here.".to_string())));
        ctx.set_log_msg(Some(&provider)).unwrap();
        Liveness::of(&provider)
    };
    assert!(token.is_alive());

    let commit = fx.client.mkdir(&[&url("kept")], false, None, &ctx).unwrap();
    assert_eq!(commit.unwrap().revision, HEAD_REV + 1);

    drop(ctx);
    assert!(!token.is_alive());
}

#[test]
fn test_pool_teardown_releases_all_context_slots() {
    let parent = Pool::new();
    let ctx = ClientContext::create(Some(&parent)).unwrap();

    let provider = commit_message_fn(|_| Ok(None));
    let receiver = notify_fn(|_| {});
    ctx.set_log_msg(Some(&provider)).unwrap();
    ctx.set_notify(Some(&receiver)).unwrap();
    let baton = ctx.set_auth(vec![Arc::new(UsernameProvider::new("jrandom"))]).unwrap();

    let tokens = (Liveness::of(&provider), Liveness::of(&receiver), Liveness::of(&baton));
    drop((provider, receiver, baton));
    assert!(tokens.0.is_alive() && tokens.1.is_alive() && tokens.2.is_alive());

    parent.destroy().unwrap();
    assert!(!tokens.0.is_alive());
    assert!(!tokens.1.is_alive());
    assert!(!tokens.2.is_alive());
    assert!(matches!(ctx.ensure_valid(), Err(ClientError::UseAfterDestroy(_))));
    assert!(parent.create_child().is_err());
}

#[test]
fn test_weak_observer_does_not_own() {
    let pool = Pool::new();
    let slot: BridgedSlot<dyn NotifyReceiver> = BridgedSlot::new(&pool, "notify_baton").unwrap();
    slot.bind(&notify_fn(|_| {})).unwrap();

    let observed = slot.read().unwrap().unwrap();
    let observed_again = slot.read().unwrap().unwrap();
    assert!(observed.is_alive());

    slot.clear().unwrap();
    assert!(!observed.is_alive());
    assert!(!observed_again.is_alive());
    assert!(observed.upgrade().is_none());
}

#[test]
fn test_host_reference_outlives_pool() {
    let pool = Pool::new();
    let slot: BridgedSlot<dyn NotifyReceiver> = BridgedSlot::new(&pool, "notify_baton").unwrap();
    let receiver = notify_fn(|_| {});
    slot.bind(&receiver).unwrap();
    let token = Liveness::of(&receiver);

    pool.destroy().unwrap();
    assert!(token.is_alive());
    assert_eq!(Arc::strong_count(&receiver), 1);
    drop(receiver);
    assert!(!token.is_alive());
}

#[test]
fn test_auth_baton_from_other_pool() {
    let ctx = ClientContext::create(None).unwrap();
    let other = Pool::new();
    let baton = Arc::new(AuthBaton::open(vec![Arc::new(UsernameProvider::new("jane"))], &other).unwrap());
    ctx.set_auth_baton(Some(&baton)).unwrap();

    assert!(baton.allocated_in(&other));
    assert!(!baton.allocated_in(ctx.pool()));
    assert_eq!(ctx.auth_baton().pool(), ctx.pool());
    assert!(ctx.auth_baton().read().unwrap().unwrap().observes(&baton));
}

#[test]
fn test_callback_rebinding_its_own_slot_finishes() {
    let fx = fixture();
    let ctx = Arc::new(ClientContext::create(None).unwrap());
    let calls = Arc::new(Mutex::new(Vec::new()));

    // The provider replaces itself in the slot while it runs.
    let weak_ctx = Arc::downgrade(&ctx);
    let log = calls.clone();
    let provider = commit_message_fn(move |_| {
        if let Some(ctx) = weak_ctx.upgrade() {
            ctx.set_log_msg(Some(&commit_message_fn(|_| Ok(Some("second".to_string())))))?;
        }
        log.lock().unwrap().push("first");
        Ok(Some("first".to_string()))
    });
    ctx.set_log_msg(Some(&provider)).unwrap();
    drop(provider);

    fx.client.mkdir(&[&url("one")], false, None, &ctx).unwrap();
    fx.client.mkdir(&[&url("two")], false, None, &ctx).unwrap();
    assert_eq!(*calls.lock().unwrap(), vec!["first"]);
}

#[test]
fn test_child_pools_torn_down_before_parent_cleanup() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let parent = Pool::new();
    let child_ctx = ClientContext::create(Some(&parent)).unwrap();

    child_ctx.set_notify(Some(&notify_fn(|_| {}))).unwrap();
    let o = order.clone();
    child_ctx.pool().register_cleanup(move || o.lock().unwrap().push("child")).unwrap();
    let o = order.clone();
    parent.register_cleanup(move || o.lock().unwrap().push("parent")).unwrap();

    parent.destroy().unwrap();
    assert_eq!(*order.lock().unwrap(), vec!["child", "parent"]);
    assert!(!child_ctx.notify_baton().is_bound());
}

struct Counted(Arc<AtomicUsize>);

impl Drop for Counted {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Build a random pool tree; every pool gets one counted cleanup and one bound slot.
fn build_tree(shape: &[usize]) -> (Pool, Vec<Pool>, Arc<Mutex<Vec<usize>>>, Arc<AtomicUsize>) {
    let root = Pool::new();
    let mut pools = vec![root.clone()];
    for &parent in shape {
        let parent = pools[parent % pools.len()].clone();
        pools.push(parent.create_child().unwrap());
    }

    let order = Arc::new(Mutex::new(Vec::new()));
    let released = Arc::new(AtomicUsize::new(0));
    for (i, pool) in pools.iter().enumerate() {
        let o = order.clone();
        pool.register_cleanup(move || o.lock().unwrap().push(i)).unwrap();
        let slot: BridgedSlot<Counted> = BridgedSlot::new(pool, "counted").unwrap();
        slot.bind(&Arc::new(Counted(released.clone()))).unwrap();
    }
    (root, pools, order, released)
}

proptest! {
    #[test]
    fn prop_destroy_tears_down_children_first(shape in prop::collection::vec(0usize..16, 0..16)) {
        let (root, pools, order, released) = build_tree(&shape);
        root.destroy().unwrap();

        let order = order.lock().unwrap();
        prop_assert_eq!(order.len(), pools.len());
        prop_assert_eq!(released.load(Ordering::SeqCst), pools.len());
        prop_assert!(pools.iter().all(|p| !p.is_valid()));

        // A pool's cleanup runs only after every descendant's.
        let position = |id| order.iter().position(|i| *i == id).unwrap();
        for (child, &parent) in shape.iter().enumerate() {
            let child = child + 1;
            let parent = parent % child;
            prop_assert!(position(child) < position(parent));
        }
    }

    #[test]
    fn prop_destroying_subtree_leaves_rest(shape in prop::collection::vec(0usize..16, 1..16), pick in 1usize..16) {
        let (root, pools, _order, _released) = build_tree(&shape);
        let victim = pick % (pools.len() - 1) + 1;
        pools[victim].destroy().unwrap();
        prop_assert!(root.is_valid());
        prop_assert!(!pools[victim].is_valid());
        prop_assert!(matches!(pools[victim].destroy(), Err(ClientError::UseAfterDestroy(_))));
    }
}
