mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use common::*;
use vsync_core::ObjectKey;
use vsync_store::{ItemBackoff, ObjectStore, WorkQueue};
use vsync_syncer::gc::{ForwardGc, GarbageCollector};
use vsync_syncer::reconciler::{ForwardReconciler, Reconciler};
use vsync_syncer::Translator;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn drifted_pair_is_enqueued_once() {
    let e = env();
    let s = Arc::new(CountingSyncer::new(&e.ctx));
    s.translator.register_indices(e.virt.as_ref()).unwrap();
    let fwd = ForwardReconciler::new(e.ctx.clone(), s.clone());
    let key = ObjectKey::namespaced("test", "a");
    e.virt.create(cm("test", "a")).await.unwrap();
    fwd.reconcile(&key).await.unwrap();

    let q = WorkQueue::new("fwd", ItemBackoff::default());
    let gc = ForwardGc::new(e.ctx.clone(), s.clone());
    assert_eq!(gc.collect(&q).await.unwrap(), 0);

    s.update_needed.store(true, Ordering::SeqCst);
    assert_eq!(gc.collect(&q).await.unwrap(), 1);
    gc.collect(&q).await.unwrap();
    q.add(key.clone());
    assert_eq!(q.len(), 1);
    assert_eq!(q.get().await, Some(key));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn gc_matches_the_live_decisions() {
    let e = env();
    let s = Arc::new(CountingSyncer::new(&e.ctx));
    s.translator.register_indices(e.virt.as_ref()).unwrap();
    let fwd = ForwardReconciler::new(e.ctx.clone(), s.clone());

    // paired and in sync
    e.virt.create(cm("test", "synced")).await.unwrap();
    fwd.reconcile(&ObjectKey::namespaced("test", "synced")).await.unwrap();
    // virtual without host object
    e.virt.create(cm("test", "missing")).await.unwrap();
    // virtual colliding with a foreign host object
    e.virt.create(cm("test", "clash")).await.unwrap();
    e.host.seed([cm(HOST_NS, "clash-x-test-x-t1")]);
    // managed host object whose virtual object is gone
    e.host.seed([managed_host("orphan-x-test-x-t1")
        .with_annotation(vsync_core::naming::NAME_ANNOTATION, "orphan")
        .with_annotation(vsync_core::naming::NAMESPACE_ANNOTATION, "test")]);
    // foreign host object with nothing on the virtual side
    e.host.seed([cm(HOST_NS, "unrelated")]);

    let q = WorkQueue::new("fwd", ItemBackoff::default());
    assert_eq!(ForwardGc::new(e.ctx.clone(), s.clone()).collect(&q).await.unwrap(), 2);
    let mut got = Vec::new();
    while !q.is_empty() {
        got.push(q.get().await.unwrap());
    }
    got.sort();
    assert_eq!(got, vec![ObjectKey::namespaced("test", "missing"), ObjectKey::namespaced("test", "orphan")]);

    // and the live path agrees: creating the missing one and deleting the orphan
    let host_before = mutations(&e.host);
    for k in &got {
        fwd.reconcile(k).await.unwrap();
    }
    assert_eq!(mutations(&e.host), host_before + 2);
    assert!(exists(e.host.as_ref(), &ObjectKey::namespaced(HOST_NS, "unrelated")).await);
    assert!(exists(e.host.as_ref(), &ObjectKey::namespaced(HOST_NS, "clash-x-test-x-t1")).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failing_decision_skips_only_that_object() {
    let e = env();
    let s = Arc::new(CountingSyncer::new(&e.ctx));
    let fwd = ForwardReconciler::new(e.ctx.clone(), s.clone());
    for name in ["a", "b", "c"] {
        e.virt.create(cm("test", name)).await.unwrap();
        fwd.reconcile(&ObjectKey::namespaced("test", name)).await.unwrap();
    }
    s.update_needed.store(true, Ordering::SeqCst);
    s.failing.lock().unwrap().push("b".into());

    let q = WorkQueue::new("fwd", ItemBackoff::default());
    assert_eq!(ForwardGc::new(e.ctx.clone(), s.clone()).collect(&q).await.unwrap(), 2);
    assert_eq!(q.len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn recreated_virtual_object_is_drift() {
    let e = env();
    let s = Arc::new(vsync_syncer::GenericSyncer::namespaced(KIND, e.ctx.translation.clone()).unwrap());
    let fwd = ForwardReconciler::new(e.ctx.clone(), s.clone());
    let key = ObjectKey::namespaced("test", "a");
    e.virt.create(cm("test", "a")).await.unwrap();
    fwd.reconcile(&key).await.unwrap();

    let q = WorkQueue::new("fwd", ItemBackoff::default());
    let gc = ForwardGc::new(e.ctx.clone(), s.clone());
    assert_eq!(gc.collect(&q).await.unwrap(), 0);

    e.virt.delete(&cm("test", "a")).await.unwrap();
    e.virt.create(cm("test", "a")).await.unwrap();
    assert_eq!(gc.collect(&q).await.unwrap(), 1);
}
