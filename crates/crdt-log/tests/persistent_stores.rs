//! Logs backed by the file-based block stores survive a reopen.

use std::sync::Arc;

use crdt_log::prelude::*;
use crdt_log_store::{RedbStore, SqliteStore};
use ed25519_dalek::SigningKey;

fn identity(seed: u8) -> Arc<Identity> {
    Arc::new(Identity::new(
        format!("device-{seed}"),
        SigningKey::from_bytes(&[seed; 32]),
    ))
}

fn write_log<S: BlockStore>(store: Arc<S>) -> (Cid, Vec<Arc<Entry>>) {
    let mut log = Log::builder(store, Arc::new(AllowAll), identity(1))
        .log_id("persisted")
        .build()
        .unwrap();
    for i in 0..5 {
        log.append(format!("entry-{i}")).unwrap();
    }
    (log.to_cid().unwrap(), log.values())
}

fn read_log<S: BlockStore>(store: Arc<S>, cid: &Cid) -> Log<S> {
    Log::from_cid(store, Arc::new(AllowAll), identity(2), cid, LoadOptions::new()).unwrap()
}

#[test]
fn sqlite_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("log.db");

    let (cid, values) = write_log(Arc::new(SqliteStore::open(&path).unwrap()));

    let store = Arc::new(SqliteStore::open(&path).unwrap());
    // five entries plus the manifest
    assert_eq!(store.block_count().unwrap(), 6);

    let log = read_log(store, &cid);
    assert_eq!(log.id(), "persisted");
    assert_eq!(log.values(), values);
}

#[test]
fn redb_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("log.redb");

    let (cid, values) = write_log(Arc::new(RedbStore::open(&path).unwrap()));

    let store = Arc::new(RedbStore::open(&path).unwrap());
    assert_eq!(store.block_count().unwrap(), 6);

    let mut log = read_log(store, &cid);
    assert_eq!(log.values(), values);

    let next = log.append("after reopen").unwrap();
    assert_eq!(next.clock.time(), 6);
}

#[test]
fn replicas_on_different_backends_converge() {
    let mut on_sqlite = Log::builder(
        Arc::new(SqliteStore::open_in_memory().unwrap()),
        Arc::new(AllowAll),
        identity(1),
    )
    .log_id("mixed")
    .build()
    .unwrap();
    let mut on_redb = Log::builder(
        Arc::new(RedbStore::open_in_memory().unwrap()),
        Arc::new(AllowAll),
        identity(2),
    )
    .log_id("mixed")
    .build()
    .unwrap();

    on_sqlite.append("from sqlite").unwrap();
    on_redb.append("from redb").unwrap();

    on_sqlite.join(&on_redb, None).unwrap();
    on_redb.join(&on_sqlite, None).unwrap();

    assert_eq!(on_sqlite.values(), on_redb.values());
    assert_eq!(on_sqlite.len(), 2);
}
