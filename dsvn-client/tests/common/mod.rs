//! Shared fixture: a registered repository with a small history
//!
//! r1 john  /trunk /branches /tags
//! r2 john  /trunk/README.txt ("A test.\n", 8 bytes)
//! r3 jane  /trunk/notes.txt
//! r4 john  "More directories." /trunk/dir1 /trunk/dir2 /trunk/dir3
//! r5 jane  /branches/v1x copied from /trunk@4
//! r6 john  /trunk/notes.txt modified
//! r7 jane  /tags/1.0 copied from /trunk@6
//! r8 jane  /branches/v1x/CHANGES.txt added
//! r9 jane  /branches/v1x/README.txt modified

#![allow(dead_code)]

use dsvn_client::{
    commit_message_fn, notify_fn, Client, ClientContext, NotifyEvent, UsernameProvider,
};
use dsvn_core::{Repository, RepositoryRegistry, VersionedBackend};
use std::sync::{Arc, Mutex};

pub const ROOT_URL: &str = "dsvn://localhost/svnrepos";
pub const HEAD_REV: u64 = 9;
pub const BASE_TIME: i64 = 1_700_000_000;

pub fn url(path: &str) -> String {
    format!("{}/{}", ROOT_URL, path.trim_start_matches('/'))
}

pub struct Fixture {
    pub client: Client,
    pub repo: Arc<Repository>,
    pub uuid: String,
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn fixture() -> Fixture {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let repo = Arc::new(Repository::new());
    runtime.block_on(populate(&repo));

    let mut registry = RepositoryRegistry::new();
    registry.register(ROOT_URL, repo.clone()).unwrap();
    let uuid = repo.uuid().to_string();
    Fixture {
        client: Client::new(registry).unwrap(),
        repo,
        uuid,
    }
}

async fn commit<F>(repo: &Repository, author: &str, message: &str, stage: F) -> u64
where
    F: FnOnce(&mut dsvn_core::Transaction),
{
    let mut txn = repo.begin_txn().await.unwrap();
    stage(&mut txn);
    let rev = txn.base_rev() + 1;
    repo.commit_txn(txn, Some(author.to_string()), message.to_string(), BASE_TIME + rev as i64 * 60)
        .await
        .unwrap()
}

async fn copy(repo: &Repository, author: &str, message: &str, from: &str, from_rev: u64, to: &str) -> u64 {
    let mut txn = repo.begin_txn().await.unwrap();
    repo.copy(&mut txn, from, from_rev, to).await.unwrap();
    let rev = txn.base_rev() + 1;
    repo.commit_txn(txn, Some(author.to_string()), message.to_string(), BASE_TIME + rev as i64 * 60)
        .await
        .unwrap()
}

async fn populate(repo: &Repository) {
    repo.initialize().await.unwrap();

    commit(repo, "john", "Initial layout.", |t| {
        t.mkdir("/trunk").unwrap();
        t.mkdir("/branches").unwrap();
        t.mkdir("/tags").unwrap();
    })
    .await;
    commit(repo, "john", "Add README.", |t| {
        t.put_file("/trunk/README.txt", b"A test.\n".to_vec(), false).unwrap();
    })
    .await;
    commit(repo, "jane", "Add notes.", |t| {
        t.put_file("/trunk/notes.txt", b"Some notes.\n".to_vec(), false).unwrap();
    })
    .await;
    commit(repo, "john", "More directories.", |t| {
        t.mkdir("/trunk/dir1").unwrap();
        t.mkdir("/trunk/dir2").unwrap();
        t.mkdir("/trunk/dir3").unwrap();
    })
    .await;
    copy(repo, "jane", "Create branch v1x.", "/trunk", 4, "/branches/v1x").await;
    commit(repo, "john", "Update notes.", |t| {
        t.put_file("/trunk/notes.txt", b"Some notes.\nMore notes.\n".to_vec(), false)
            .unwrap();
    })
    .await;
    copy(repo, "jane", "Tag 1.0.", "/trunk", 6, "/tags/1.0").await;
    commit(repo, "jane", "Add changelog on v1x.", |t| {
        t.put_file("/branches/v1x/CHANGES.txt", b"v1x changes\n".to_vec(), false)
            .unwrap();
    })
    .await;
    let head = commit(repo, "jane", "Fix README on v1x.", |t| {
        t.put_file("/branches/v1x/README.txt", b"This is a test.\n".to_vec(), false)
            .unwrap();
    })
    .await;
    assert_eq!(head, HEAD_REV);
}

/// Context acting as `jrandom` with a fixed commit message
pub fn context(message: &str) -> ClientContext {
    let ctx = ClientContext::create(None).unwrap();
    let message = message.to_string();
    ctx.set_log_msg(Some(&commit_message_fn(move |_| Ok(Some(message.clone())))))
        .unwrap();
    ctx.set_auth(vec![Arc::new(UsernameProvider::new("jrandom"))])
        .unwrap();
    ctx
}

/// Bind a notification receiver collecting every event
pub fn collect_notifications(ctx: &ClientContext) -> Arc<Mutex<Vec<NotifyEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    ctx.set_notify(Some(&notify_fn(move |e| sink.lock().unwrap().push(e.clone()))))
        .unwrap();
    events
}
