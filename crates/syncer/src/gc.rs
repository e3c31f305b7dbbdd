//! Periodic drift detection: list both stores, re-derive the reconcile decisions and enqueue what disagrees.
//!
//! A pass never mutates a store. Per-object decision errors are logged and the
//! object is skipped.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use vsync_core::{Object, ObjectKey};
use vsync_store::WorkQueue;

use crate::context::SyncContext;
use crate::error::{SyncError, SyncResult};
use crate::reconciler::uid_mismatch;
use crate::syncer::{FakeSyncer, Syncer};

#[async_trait::async_trait]
pub trait GarbageCollector: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// One pass; returns the number of keys handed to `queue`.
    async fn collect(&self, queue: &WorkQueue<ObjectKey>) -> SyncResult<usize>;
}

fn by_key(objs: &[Object]) -> HashMap<ObjectKey, &Object> {
    objs.iter().map(|o| (o.key(), o)).collect()
}

/// Resolve a decision, logging and treating errors as "no".
fn decide(gc: &str, obj: &Object, res: SyncResult<bool>) -> bool {
    match res {
        Ok(b) => b,
        Err(e) => {
            warn!(gc, kind = %obj.kind, key = %obj.key(), error = %e, "decision failed, skipping object");
            false
        }
    }
}

/// Enqueue into `queue`; duplicate keys collapse in the queue but are counted once per pass here.
struct Enqueuer<'a> {
    queue: &'a WorkQueue<ObjectKey>,
    seen: HashSet<ObjectKey>,
}

impl<'a> Enqueuer<'a> {
    fn new(queue: &'a WorkQueue<ObjectKey>) -> Self { Self { queue, seen: HashSet::new() } }

    fn add(&mut self, key: ObjectKey) {
        if !key.is_empty() && self.seen.insert(key.clone()) {
            self.queue.add(key);
        }
    }

    fn count(&self) -> usize { self.seen.len() }
}

/// Feeds the forward queue (virtual keys).
pub struct ForwardGc {
    name: String,
    ctx: SyncContext,
    syncer: Arc<dyn Syncer>,
}

impl ForwardGc {
    pub fn new(ctx: SyncContext, syncer: Arc<dyn Syncer>) -> Self {
        Self { name: format!("{}-forward", syncer.name()), ctx, syncer }
    }
}

#[async_trait::async_trait]
impl GarbageCollector for ForwardGc {
    fn name(&self) -> &str { &self.name }

    async fn collect(&self, queue: &WorkQueue<ObjectKey>) -> SyncResult<usize> {
        let ctx = &self.ctx;
        let kind = self.syncer.kind();
        let fwd = self.syncer.forward().ok_or_else(|| SyncError::missing(self.syncer.name(), "ForwardSyncer"))?;
        let tr = self.syncer.translator();
        let check_uid = !self.syncer.options().disable_uid_deletion;

        let virtuals = ctx.virtual_store.list(kind, None).await?;
        let physicals = ctx.physical_store.list(kind, None).await?;
        let pmap = by_key(&physicals);
        let vkeys: HashSet<ObjectKey> = virtuals.iter().map(Object::key).collect();
        let mut out = Enqueuer::new(queue);

        for v in &virtuals {
            let vkey = v.key();
            let pkey = tr.virtual_to_physical(&vkey, Some(v));
            if pkey.is_empty() {
                continue;
            }
            match pmap.get(&pkey) {
                None => {
                    if decide(&self.name, v, fwd.forward_create_needed(ctx, v)) {
                        out.add(vkey);
                    }
                }
                Some(p) => {
                    if !decide(&self.name, p, tr.is_managed(p)) {
                        continue;
                    }
                    if (check_uid && uid_mismatch(p, v)) || decide(&self.name, v, fwd.forward_update_needed(ctx, p, v)) {
                        out.add(vkey);
                    }
                }
            }
        }

        // managed host objects whose virtual object is gone
        for p in &physicals {
            if !decide(&self.name, p, tr.is_managed(p)) {
                continue;
            }
            let vkey = tr.physical_to_virtual(ctx, p).await;
            if !vkey.is_empty() && !vkeys.contains(&vkey) {
                out.add(vkey);
            }
        }
        Ok(out.count())
    }
}

/// Feeds the backward queue (host keys).
pub struct BackwardGc {
    name: String,
    ctx: SyncContext,
    syncer: Arc<dyn Syncer>,
}

impl BackwardGc {
    pub fn new(ctx: SyncContext, syncer: Arc<dyn Syncer>) -> Self {
        Self { name: format!("{}-backward", syncer.name()), ctx, syncer }
    }
}

#[async_trait::async_trait]
impl GarbageCollector for BackwardGc {
    fn name(&self) -> &str { &self.name }

    async fn collect(&self, queue: &WorkQueue<ObjectKey>) -> SyncResult<usize> {
        let ctx = &self.ctx;
        let kind = self.syncer.kind();
        let tr = self.syncer.translator();
        let back = self.syncer.backward();

        let physicals = ctx.physical_store.list(kind, None).await?;
        let virtuals = ctx.virtual_store.list(kind, None).await?;
        let vmap = by_key(&virtuals);
        let mut out = Enqueuer::new(queue);

        for p in &physicals {
            if !decide(&self.name, p, tr.is_managed(p)) {
                continue;
            }
            let vkey = tr.physical_to_virtual(ctx, p).await;
            if vkey.is_empty() {
                continue;
            }
            match (vmap.get(&vkey), back) {
                (None, _) => out.add(p.key()),
                (Some(v), Some(b)) => {
                    if decide(&self.name, p, b.backward_update_needed(ctx, p, v)) {
                        out.add(p.key());
                    }
                }
                (Some(_), None) => {}
            }
        }
        Ok(out.count())
    }
}

/// Feeds the import queue (virtual keys).
pub struct OneWayGc {
    name: String,
    ctx: SyncContext,
    syncer: Arc<dyn Syncer>,
}

impl OneWayGc {
    pub fn new(ctx: SyncContext, syncer: Arc<dyn Syncer>) -> Self {
        Self { name: format!("{}-import", syncer.name()), ctx, syncer }
    }
}

#[async_trait::async_trait]
impl GarbageCollector for OneWayGc {
    fn name(&self) -> &str { &self.name }

    async fn collect(&self, queue: &WorkQueue<ObjectKey>) -> SyncResult<usize> {
        let ctx = &self.ctx;
        let kind = self.syncer.kind();
        let back = self.syncer.backward().ok_or_else(|| SyncError::missing(self.syncer.name(), "BackwardSyncer"))?;
        let creator =
            self.syncer.backward_creator().ok_or_else(|| SyncError::missing(self.syncer.name(), "BackwardCreator"))?;
        let tr = self.syncer.translator();

        let physicals = ctx.physical_store.list(kind, None).await?;
        let virtuals = ctx.virtual_store.list(kind, None).await?;
        let vmap = by_key(&virtuals);
        let pkeys: HashSet<ObjectKey> = physicals.iter().map(Object::key).collect();
        let mut out = Enqueuer::new(queue);

        for p in &physicals {
            if !decide(&self.name, p, tr.is_managed(p)) {
                continue;
            }
            let vkey = tr.physical_to_virtual(ctx, p).await;
            if vkey.is_empty() {
                continue;
            }
            let needed = match vmap.get(&vkey) {
                None => decide(&self.name, p, creator.backward_create_needed(ctx, p)),
                Some(v) => decide(&self.name, p, back.backward_update_needed(ctx, p, v)),
            };
            if needed {
                out.add(vkey);
            }
        }
        for v in &virtuals {
            let vkey = v.key();
            let pkey = tr.virtual_to_physical(&vkey, Some(v));
            if !pkey.is_empty() && !pkeys.contains(&pkey) {
                out.add(vkey);
            }
        }
        Ok(out.count())
    }
}

/// Feeds the fake queue (virtual keys).
pub struct FakeGc {
    name: String,
    ctx: SyncContext,
    syncer: Arc<dyn FakeSyncer>,
}

impl FakeGc {
    pub fn new(ctx: SyncContext, syncer: Arc<dyn FakeSyncer>) -> Self {
        Self { name: format!("{}-fake", syncer.name()), ctx, syncer }
    }
}

#[async_trait::async_trait]
impl GarbageCollector for FakeGc {
    fn name(&self) -> &str { &self.name }

    async fn collect(&self, queue: &WorkQueue<ObjectKey>) -> SyncResult<usize> {
        let virtuals = self.ctx.virtual_store.list(self.syncer.kind(), None).await?;
        let mut out = Enqueuer::new(queue);
        for v in &virtuals {
            if decide(&self.name, v, self.syncer.update_needed(&self.ctx, v)) {
                out.add(v.key());
            }
        }
        Ok(out.count())
    }
}

/// Run one pass with timing and metrics.
pub async fn run_pass(gc: &dyn GarbageCollector, queue: &WorkQueue<ObjectKey>) -> SyncResult<usize> {
    let t0 = Instant::now();
    let res = gc.collect(queue).await;
    histogram!("vsync_gc_pass_ms", t0.elapsed().as_secs_f64() * 1000.0, "gc" => gc.name().to_string());
    match &res {
        Ok(n) => {
            counter!("vsync_gc_enqueued_total", *n as u64, "gc" => gc.name().to_string());
            if *n > 0 {
                info!(gc = gc.name(), enqueued = n, "gc pass found drift");
            } else {
                debug!(gc = gc.name(), "gc pass clean");
            }
        }
        Err(e) => warn!(gc = gc.name(), error = %e, "gc pass failed"),
    }
    res
}

/// Initial pass (picks up objects that existed before the watches), then a jittered
/// period until the context is cancelled.
pub fn spawn(gc: Arc<dyn GarbageCollector>, queue: WorkQueue<ObjectKey>, ctx: &SyncContext) -> JoinHandle<()> {
    let cancel = ctx.cancel.clone();
    let config = ctx.config.clone();
    tokio::spawn(async move {
        let _ = run_pass(gc.as_ref(), &queue).await;
        loop {
            let delay = config.jittered_gc_period();
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
            let _ = run_pass(gc.as_ref(), &queue).await;
        }
        debug!(gc = gc.name(), "gc stopped");
    })
}
