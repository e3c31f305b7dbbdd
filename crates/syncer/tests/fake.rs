mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use common::*;
use vsync_core::{Object, ObjectKey};
use vsync_store::{ItemBackoff, ObjectStore, WorkQueue};
use vsync_syncer::gc::{FakeGc, GarbageCollector};
use vsync_syncer::reconciler::{FakeReconciler, Reconciler};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn absent_object_is_created_present_object_is_updated() {
    let e = env();
    let s = Arc::new(CountingFake::new());
    let r = FakeReconciler::new(e.ctx.clone(), s.clone());
    let key = ObjectKey::cluster("node-1");

    r.reconcile(&key).await.unwrap();
    assert!(e.virt.get("v1/Node", &key).await.is_ok());
    assert_eq!(s.creates.load(Ordering::SeqCst), 1);

    r.reconcile(&key).await.unwrap();
    assert_eq!(s.creates.load(Ordering::SeqCst), 1);
    assert_eq!(s.updates.load(Ordering::SeqCst), 1);
    assert_eq!(mutations(&e.host), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn fake_gc_follows_update_needed() {
    let e = env();
    let s = Arc::new(CountingFake::new());
    e.virt.create(Object::new("v1/Node", &ObjectKey::cluster("node-1"))).await.unwrap();
    e.virt.create(Object::new("v1/Node", &ObjectKey::cluster("node-2"))).await.unwrap();
    let q = WorkQueue::new("fake", ItemBackoff::default());
    let gc = FakeGc::new(e.ctx.clone(), s.clone());

    assert_eq!(gc.collect(&q).await.unwrap(), 0);
    s.needs_update.store(true, Ordering::SeqCst);
    assert_eq!(gc.collect(&q).await.unwrap(), 2);
    assert_eq!(q.len(), 2);
}
