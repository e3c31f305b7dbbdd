#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use vsync_core::naming::MARKER_LABEL;
use vsync_core::{Object, ObjectKey, TranslationContext};
use vsync_store::{MemStore, ObjectStore};
use vsync_syncer::translator::NamespacedTranslator;
use vsync_syncer::{
    Action, BackwardDeleter, EngineConfig, FakeSyncer, ForwardSyncer, Starter, SyncContext, SyncError, SyncResult,
    Syncer, Translator,
};

pub const KIND: &str = "v1/ConfigMap";
pub const HOST_NS: &str = "host-ns";
pub const TENANT: &str = "t1";

pub struct Env {
    pub virt: Arc<MemStore>,
    pub host: Arc<MemStore>,
    pub ctx: SyncContext,
}

pub fn env() -> Env { env_with(TranslationContext::new(HOST_NS, TENANT)) }

pub fn env_with(translation: TranslationContext) -> Env {
    let virt = Arc::new(MemStore::new("virtual"));
    let host = Arc::new(MemStore::new("host"));
    let config = EngineConfig::default().with_gc_period(Duration::from_secs(3600));
    let ctx = SyncContext::new(virt.clone(), host.clone(), translation, config);
    Env { virt, host, ctx }
}

pub fn cm(ns: &str, name: &str) -> Object {
    Object::new(KIND, &ObjectKey::namespaced(ns, name)).with_body(serde_json::json!({ "data": { "k": "v" } }))
}

/// Host object carrying the tenant marker but otherwise hand-made.
pub fn managed_host(name: &str) -> Object {
    Object::new(KIND, &ObjectKey::namespaced(HOST_NS, name)).with_label(MARKER_LABEL, TENANT)
}

pub fn mutations(store: &MemStore) -> u64 { store.stats().total() }

/// Poll until `check` holds or the deadline passes.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

pub async fn exists(store: &dyn ObjectStore, key: &ObjectKey) -> bool { store.get(KIND, key).await.is_ok() }

/// Forward syncer that records calls and copies objects with plain metadata.
pub struct CountingSyncer {
    pub translator: NamespacedTranslator,
    pub creates: AtomicUsize,
    pub updates: AtomicUsize,
    pub update_needed: AtomicBool,
    /// Names whose update-needed decision fails.
    pub failing: Mutex<Vec<String>>,
    pub deleter: bool,
    pub backward_deletes: AtomicUsize,
    pub skip: Mutex<Vec<String>>,
    pub starts: AtomicUsize,
    pub ends: AtomicUsize,
    pub with_starter: bool,
}

impl CountingSyncer {
    pub fn new(ctx: &SyncContext) -> Self {
        Self {
            translator: NamespacedTranslator::new(KIND, ctx.translation.clone()),
            creates: AtomicUsize::new(0),
            updates: AtomicUsize::new(0),
            update_needed: AtomicBool::new(false),
            failing: Mutex::new(Vec::new()),
            deleter: false,
            backward_deletes: AtomicUsize::new(0),
            skip: Mutex::new(Vec::new()),
            starts: AtomicUsize::new(0),
            ends: AtomicUsize::new(0),
            with_starter: false,
        }
    }

    pub fn count(c: &AtomicUsize) -> usize { c.load(Ordering::SeqCst) }
}

impl Syncer for CountingSyncer {
    fn name(&self) -> &str { "counting" }

    fn kind(&self) -> &str { KIND }

    fn translator(&self) -> &dyn Translator { &self.translator }

    fn forward(&self) -> Option<&dyn ForwardSyncer> { Some(self) }

    fn backward_deleter(&self) -> Option<&dyn BackwardDeleter> {
        if self.deleter {
            Some(self)
        } else {
            None
        }
    }

    fn starter(&self) -> Option<&dyn Starter> {
        if self.with_starter {
            Some(self)
        } else {
            None
        }
    }
}

#[async_trait::async_trait]
impl ForwardSyncer for CountingSyncer {
    async fn forward_create(&self, ctx: &SyncContext, vobj: &Object) -> SyncResult<Action> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        let pkey = self.translator.virtual_to_physical(&vobj.key(), Some(vobj));
        let mut p = Object::new(KIND, &pkey).with_label(MARKER_LABEL, TENANT).with_body(vobj.spec_body());
        p.annotations.insert(vsync_core::naming::NAME_ANNOTATION.into(), vobj.name.clone());
        p.annotations.insert(
            vsync_core::naming::NAMESPACE_ANNOTATION.into(),
            vobj.namespace.clone().unwrap_or_default(),
        );
        ctx.physical_store.create(p).await?;
        Ok(Action::done())
    }

    async fn forward_update(&self, _ctx: &SyncContext, _pobj: &Object, _vobj: &Object) -> SyncResult<Action> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        Ok(Action::done())
    }

    fn forward_update_needed(&self, _ctx: &SyncContext, _pobj: &Object, vobj: &Object) -> SyncResult<bool> {
        if self.failing.lock().unwrap().contains(&vobj.name) {
            return Err(SyncError::Config(format!("cannot decide {}", vobj.name)));
        }
        Ok(self.update_needed.load(Ordering::SeqCst))
    }
}

#[async_trait::async_trait]
impl BackwardDeleter for CountingSyncer {
    async fn backward_delete(&self, _ctx: &SyncContext, _pobj: &Object) -> SyncResult<Action> {
        self.backward_deletes.fetch_add(1, Ordering::SeqCst);
        Ok(Action::done())
    }
}

#[async_trait::async_trait]
impl Starter for CountingSyncer {
    async fn reconcile_start(&self, _ctx: &SyncContext, key: &ObjectKey) -> SyncResult<bool> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(self.skip.lock().unwrap().contains(&key.name))
    }

    fn reconcile_end(&self) { self.ends.fetch_add(1, Ordering::SeqCst); }
}

/// Virtual-only kind: `create` materializes a default object, `update` counts.
pub struct CountingFake {
    pub creates: AtomicUsize,
    pub updates: AtomicUsize,
    pub needs_update: AtomicBool,
}

impl CountingFake {
    pub fn new() -> Self {
        Self { creates: AtomicUsize::new(0), updates: AtomicUsize::new(0), needs_update: AtomicBool::new(false) }
    }
}

#[async_trait::async_trait]
impl FakeSyncer for CountingFake {
    fn name(&self) -> &str { "fake-nodes" }

    fn kind(&self) -> &str { "v1/Node" }

    async fn create(&self, ctx: &SyncContext, key: &ObjectKey) -> SyncResult<Action> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        ctx.virtual_store.create(Object::new("v1/Node", key)).await?;
        Ok(Action::done())
    }

    async fn update(&self, _ctx: &SyncContext, _vobj: &Object) -> SyncResult<Action> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        Ok(Action::done())
    }

    fn update_needed(&self, _ctx: &SyncContext, _vobj: &Object) -> SyncResult<bool> {
        Ok(self.needs_update.load(Ordering::SeqCst))
    }
}
