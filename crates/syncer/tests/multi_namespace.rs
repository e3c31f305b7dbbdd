mod common;

use std::sync::Arc;

use common::*;
use vsync_core::{ObjectKey, TranslationContext};
use vsync_store::{ItemBackoff, ObjectStore, WorkQueue};
use vsync_syncer::gc::{BackwardGc, ForwardGc, GarbageCollector};
use vsync_syncer::reconciler::{BackwardReconciler, ForwardReconciler, Reconciler};
use vsync_syncer::{GenericSyncer, Syncer, Translator};

fn multi() -> Env { env_with(TranslationContext::new(HOST_NS, TENANT).with_multi_namespace(true)) }

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn each_virtual_namespace_gets_its_own_host_namespace() {
    let e = multi();
    let s = Arc::new(GenericSyncer::namespaced(KIND, e.ctx.translation.clone()).unwrap());
    s.translator().register_indices(e.virt.as_ref()).unwrap();
    let fwd = ForwardReconciler::new(e.ctx.clone(), s.clone());
    let bwd = BackwardReconciler::new(e.ctx.clone(), s.clone());
    let key = ObjectKey::namespaced("test", "a");
    e.virt.create(cm("test", "a")).await.unwrap();
    e.virt.create(cm("other", "a")).await.unwrap();

    fwd.reconcile(&key).await.unwrap();
    fwd.reconcile(&ObjectKey::namespaced("other", "a")).await.unwrap();

    let pkey = s.translator().virtual_to_physical(&key, None);
    assert_eq!(pkey.name, "a");
    let pns = pkey.namespace().unwrap_or_default().to_string();
    assert!(pns.starts_with("vsync-"), "{pns}");
    assert_ne!(pns, HOST_NS);
    assert_ne!(pkey, s.translator().virtual_to_physical(&ObjectKey::namespaced("other", "a"), None));

    let p = e.host.get(KIND, &pkey).await.unwrap();
    assert!(s.translator().is_managed(&p).unwrap());
    assert_eq!(s.translator().physical_to_virtual(&e.ctx, &p).await, key);

    // marker alone is not enough outside the tenant's namespaces
    let stray = managed_host("a");
    e.host.seed([stray.clone()]);
    assert!(!s.translator().is_managed(&stray).unwrap());
    bwd.reconcile(&stray.key()).await.unwrap();
    assert!(exists(e.host.as_ref(), &stray.key()).await);

    e.virt.delete(&cm("test", "a")).await.unwrap();
    fwd.reconcile(&key).await.unwrap();
    assert!(!exists(e.host.as_ref(), &pkey).await);

    let q = WorkQueue::new("gc", ItemBackoff::default());
    assert_eq!(ForwardGc::new(e.ctx.clone(), s.clone()).collect(&q).await.unwrap(), 0);
    assert_eq!(BackwardGc::new(e.ctx.clone(), s).collect(&q).await.unwrap(), 0);
}
