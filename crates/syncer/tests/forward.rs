mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use common::*;
use vsync_core::naming::{NAMESPACE_ANNOTATION, NAME_ANNOTATION, UID_ANNOTATION};
use vsync_core::ObjectKey;
use vsync_store::{ItemBackoff, ObjectStore, WorkQueue};
use vsync_syncer::gc::{ForwardGc, GarbageCollector};
use vsync_syncer::reconciler::{ForwardReconciler, Reconciler};
use vsync_syncer::{GenericSyncer, SyncError, Syncer, Translator};

fn generic(e: &Env) -> Arc<GenericSyncer> {
    let s = Arc::new(GenericSyncer::namespaced(KIND, e.ctx.translation.clone()).unwrap());
    s.translator().register_indices(e.virt.as_ref()).unwrap();
    s
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn new_virtual_object_gets_a_host_counterpart() {
    let e = env();
    let s = generic(&e);
    let r = ForwardReconciler::new(e.ctx.clone(), s.clone());
    let key = ObjectKey::namespaced("test", "test-pod");
    e.virt.create(cm("test", "test-pod")).await.unwrap();

    r.reconcile(&key).await.unwrap();

    let pkey = ObjectKey::namespaced(HOST_NS, "test-pod-x-test-x-t1");
    let p = e.host.get(KIND, &pkey).await.unwrap();
    assert_eq!(p.body, serde_json::json!({ "data": { "k": "v" } }));
    assert_eq!(s.translator().physical_to_virtual(&e.ctx, &p).await, key);

    // reverse mapping through the index when annotations are missing
    let mut bare = p.clone();
    bare.annotations.remove(NAME_ANNOTATION);
    bare.annotations.remove(NAMESPACE_ANNOTATION);
    assert_eq!(s.translator().physical_to_virtual(&e.ctx, &bare).await, key);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn second_reconcile_writes_nothing() {
    let e = env();
    let r = ForwardReconciler::new(e.ctx.clone(), generic(&e));
    let key = ObjectKey::namespaced("test", "a");
    e.virt.create(cm("test", "a").with_label("app", "web").with_annotation("note", "x")).await.unwrap();

    r.reconcile(&key).await.unwrap();
    let before = mutations(&e.host);
    r.reconcile(&key).await.unwrap();
    assert_eq!(mutations(&e.host), before);
    assert_eq!(e.host.stats().creates.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn foreign_host_object_is_never_touched() {
    let e = env();
    let r = ForwardReconciler::new(e.ctx.clone(), generic(&e));
    let key = ObjectKey::namespaced("test", "a");
    e.host.seed([cm(HOST_NS, "a-x-test-x-t1")]);
    e.virt.create(cm("test", "a")).await.unwrap();

    let err = r.reconcile(&key).await.unwrap_err();
    assert!(matches!(err, SyncError::Unmanaged { .. }), "{err}");

    e.virt.delete(&cm("test", "a")).await.unwrap();
    r.reconcile(&key).await.unwrap();

    assert_eq!(mutations(&e.host), 0);
    assert!(exists(e.host.as_ref(), &ObjectKey::namespaced(HOST_NS, "a-x-test-x-t1")).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn deleted_virtual_object_removes_host_object() {
    let e = env();
    let r = ForwardReconciler::new(e.ctx.clone(), generic(&e));
    let key = ObjectKey::namespaced("test", "a");
    e.virt.create(cm("test", "a")).await.unwrap();
    r.reconcile(&key).await.unwrap();

    e.virt.delete(&cm("test", "a")).await.unwrap();
    r.reconcile(&key).await.unwrap();
    assert!(!exists(e.host.as_ref(), &ObjectKey::namespaced(HOST_NS, "a-x-test-x-t1")).await);

    // already gone: still a success
    r.reconcile(&key).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn recreated_virtual_object_replaces_host_object() {
    let e = env();
    let r = ForwardReconciler::new(e.ctx.clone(), generic(&e));
    let key = ObjectKey::namespaced("test", "a");
    let pkey = ObjectKey::namespaced(HOST_NS, "a-x-test-x-t1");
    e.virt.create(cm("test", "a")).await.unwrap();
    r.reconcile(&key).await.unwrap();

    e.virt.delete(&cm("test", "a")).await.unwrap();
    let second = e.virt.create(cm("test", "a")).await.unwrap();

    let action = r.reconcile(&key).await.unwrap();
    assert!(action.requeue_after.is_some());
    assert!(!exists(e.host.as_ref(), &pkey).await);

    r.reconcile(&key).await.unwrap();
    let p = e.host.get(KIND, &pkey).await.unwrap();
    assert_eq!(p.annotation(UID_ANNOTATION), second.uid_string().as_deref());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn spec_changes_flow_down_and_status_flows_up() {
    let e = env();
    let s = Arc::new(GenericSyncer::namespaced(KIND, e.ctx.translation.clone()).unwrap().with_status_backsync(true));
    let r = ForwardReconciler::new(e.ctx.clone(), s.clone());
    let key = ObjectKey::namespaced("test", "a");
    let pkey = ObjectKey::namespaced(HOST_NS, "a-x-test-x-t1");
    let v = e.virt.create(cm("test", "a")).await.unwrap();
    r.reconcile(&key).await.unwrap();

    let mut changed = v.clone();
    changed.body = serde_json::json!({ "data": { "k": "v2" } });
    e.virt.update(changed).await.unwrap();
    r.reconcile(&key).await.unwrap();
    let p = e.host.get(KIND, &pkey).await.unwrap();
    assert_eq!(p.body["data"]["k"], "v2");

    let mut running = p.clone();
    running.body["status"] = serde_json::json!({ "phase": "Ready" });
    e.host.update(running).await.unwrap();
    r.reconcile(&key).await.unwrap();

    let v = e.virt.get(KIND, &key).await.unwrap();
    assert_eq!(v.status(), Some(&serde_json::json!({ "phase": "Ready" })));
    let p = e.host.get(KIND, &pkey).await.unwrap();
    assert_eq!(p.body["data"]["k"], "v2");
    assert_eq!(p.body["status"]["phase"], "Ready");
    assert_eq!(e.virt.stats().status_updates.load(Ordering::SeqCst), 1);

    // status went through the status write, so the pair is now settled
    let (vbefore, hbefore) = (mutations(&e.virt), mutations(&e.host));
    r.reconcile(&key).await.unwrap();
    assert_eq!((mutations(&e.virt), mutations(&e.host)), (vbefore, hbefore));
    let q = WorkQueue::new("fwd", ItemBackoff::default());
    assert_eq!(ForwardGc::new(e.ctx.clone(), s.clone()).collect(&q).await.unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn starter_can_skip_and_always_ends() {
    let e = env();
    let mut s = CountingSyncer::new(&e.ctx);
    s.with_starter = true;
    s.skip.lock().unwrap().push("skipped".into());
    let s = Arc::new(s);
    let r = ForwardReconciler::new(e.ctx.clone(), s.clone());
    e.virt.create(cm("test", "skipped")).await.unwrap();
    e.virt.create(cm("test", "synced")).await.unwrap();

    r.reconcile(&ObjectKey::namespaced("test", "skipped")).await.unwrap();
    r.reconcile(&ObjectKey::namespaced("test", "synced")).await.unwrap();

    assert_eq!(CountingSyncer::count(&s.creates), 1);
    assert_eq!(CountingSyncer::count(&s.starts), 2);
    assert_eq!(CountingSyncer::count(&s.ends), 2);
}
