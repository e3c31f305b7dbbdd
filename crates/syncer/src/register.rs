//! Wiring syncers to stores: indices, controllers, watches and collectors.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use vsync_core::{Delta, DeltaKind, ObjectKey};
use vsync_store::WorkQueue;

use crate::context::SyncContext;
use crate::controller::Controller;
use crate::error::{SyncError, SyncResult};
use crate::gc::{self, BackwardGc, FakeGc, ForwardGc, GarbageCollector, OneWayGc};
use crate::reconciler::{BackwardReconciler, FakeReconciler, ForwardReconciler, OneWayReconciler};
use crate::syncer::{FakeSyncer, Syncer, SyncerOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Forward,
    Backward,
    Import,
    Fake,
}

/// Handle over everything started for one syncer.
pub struct Registration {
    name: String,
    lanes: Vec<(Direction, WorkQueue<ObjectKey>, Arc<dyn GarbageCollector>)>,
    handles: Vec<JoinHandle<()>>,
}

impl Registration {
    pub fn name(&self) -> &str { &self.name }

    pub fn queue(&self, dir: Direction) -> Option<&WorkQueue<ObjectKey>> {
        self.lanes.iter().find(|(d, _, _)| *d == dir).map(|(_, q, _)| q)
    }

    /// Run one garbage-collection pass for `dir` immediately.
    pub async fn collect_now(&self, dir: Direction) -> SyncResult<usize> {
        let (_, queue, collector) = self
            .lanes
            .iter()
            .find(|(d, _, _)| *d == dir)
            .ok_or_else(|| SyncError::Config(format!("{} has no {:?} lane", self.name, dir)))?;
        gc::run_pass(collector.as_ref(), queue).await
    }

    pub fn handles(&self) -> &[JoinHandle<()>] { &self.handles }

    /// Wait for every task; they finish once the context is cancelled.
    pub async fn join(self) {
        for h in self.handles {
            if let Err(e) = h.await {
                warn!(syncer = %self.name, error = %e, "task ended abnormally");
            }
        }
    }
}

fn workers(ctx: &SyncContext, opts: &SyncerOptions) -> usize {
    opts.max_concurrent_reconciles.unwrap_or(ctx.config.max_concurrent_reconciles).max(1)
}

/// Forward deltas from `rx` to `on_delta` until the channel closes or the context is cancelled.
fn pump<F, Fut>(ctx: &SyncContext, mut rx: mpsc::Receiver<Delta>, label: String, mut on_delta: F) -> JoinHandle<()>
where
    F: FnMut(Delta) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let cancel = ctx.cancel.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                d = rx.recv() => match d {
                    Some(d) => on_delta(d).await,
                    None => {
                        warn!(watch = %label, "watch closed");
                        break;
                    }
                },
            }
        }
        debug!(watch = %label, "watch pump stopped");
    })
}

/// Two-way registration for namespaced and cluster-scoped kinds.
pub async fn register_syncer(ctx: &SyncContext, syncer: Arc<dyn Syncer>) -> SyncResult<Registration> {
    if syncer.forward().is_none() {
        return Err(SyncError::missing(syncer.name(), "ForwardSyncer"));
    }
    let kind = syncer.kind().to_string();
    syncer.translator().register_indices(ctx.virtual_store.as_ref())?;

    let n = workers(ctx, &syncer.options());
    let fwd = Controller::new(Arc::new(ForwardReconciler::new(ctx.clone(), syncer.clone())), n, ctx.config.backoff);
    let bwd = Controller::new(Arc::new(BackwardReconciler::new(ctx.clone(), syncer.clone())), n, ctx.config.backoff);
    let fq = fwd.queue();
    let bq = bwd.queue();

    let mut handles = fwd.start(ctx.cancel.clone());
    handles.extend(bwd.start(ctx.cancel.clone()));

    let vrx = ctx.virtual_store.watch(&kind).await?;
    let prx = ctx.physical_store.watch(&kind).await?;

    {
        let (syncer, fq, bq) = (syncer.clone(), fq.clone(), bq.clone());
        handles.push(pump(ctx, vrx, format!("{}-virtual", syncer.name()), move |d| {
            let key = d.object.key();
            fq.add(key.clone());
            if d.kind == DeltaKind::Deleted {
                let pkey = syncer.translator().virtual_to_physical(&key, Some(&d.object));
                if !pkey.is_empty() {
                    bq.add(pkey);
                }
            }
            std::future::ready(())
        }));
    }
    {
        let (syncer, fq, bq, wctx) = (syncer.clone(), fq.clone(), bq.clone(), ctx.clone());
        handles.push(pump(ctx, prx, format!("{}-physical", syncer.name()), move |d| {
            let (syncer, fq, bq, wctx) = (syncer.clone(), fq.clone(), bq.clone(), wctx.clone());
            async move {
                let tr = syncer.translator();
                match tr.is_managed(&d.object) {
                    Ok(true) => {}
                    Ok(false) => return,
                    Err(e) => {
                        warn!(kind = %d.object.kind, key = %d.object.key(), error = %e, "ownership check failed");
                        return;
                    }
                }
                bq.add(d.object.key());
                let vkey = tr.physical_to_virtual(&wctx, &d.object).await;
                if !vkey.is_empty() {
                    fq.add(vkey);
                }
            }
        }));
    }

    let fgc: Arc<dyn GarbageCollector> = Arc::new(ForwardGc::new(ctx.clone(), syncer.clone()));
    let bgc: Arc<dyn GarbageCollector> = Arc::new(BackwardGc::new(ctx.clone(), syncer.clone()));
    handles.push(gc::spawn(fgc.clone(), fq.clone(), ctx));
    handles.push(gc::spawn(bgc.clone(), bq.clone(), ctx));

    info!(syncer = syncer.name(), kind = %kind, workers = n, "syncer registered");
    Ok(Registration {
        name: syncer.name().to_string(),
        lanes: vec![(Direction::Forward, fq, fgc), (Direction::Backward, bq, bgc)],
        handles,
    })
}

/// One-way host → virtual registration.
pub async fn register_import(ctx: &SyncContext, syncer: Arc<dyn Syncer>) -> SyncResult<Registration> {
    if syncer.backward().is_none() {
        return Err(SyncError::missing(syncer.name(), "BackwardSyncer"));
    }
    if syncer.backward_creator().is_none() {
        return Err(SyncError::missing(syncer.name(), "BackwardCreator"));
    }
    let kind = syncer.kind().to_string();
    syncer.translator().register_indices(ctx.virtual_store.as_ref())?;

    let n = workers(ctx, &syncer.options());
    let ctl = Controller::new(Arc::new(OneWayReconciler::new(ctx.clone(), syncer.clone())), n, ctx.config.backoff);
    let q = ctl.queue();
    let mut handles = ctl.start(ctx.cancel.clone());

    let vrx = ctx.virtual_store.watch(&kind).await?;
    let prx = ctx.physical_store.watch(&kind).await?;
    {
        let q = q.clone();
        handles.push(pump(ctx, vrx, format!("{}-virtual", syncer.name()), move |d| {
            q.add(d.object.key());
            std::future::ready(())
        }));
    }
    {
        let (syncer, q, wctx) = (syncer.clone(), q.clone(), ctx.clone());
        handles.push(pump(ctx, prx, format!("{}-physical", syncer.name()), move |d| {
            let (syncer, q, wctx) = (syncer.clone(), q.clone(), wctx.clone());
            async move {
                let tr = syncer.translator();
                if !matches!(tr.is_managed(&d.object), Ok(true)) {
                    return;
                }
                let vkey = tr.physical_to_virtual(&wctx, &d.object).await;
                if !vkey.is_empty() {
                    q.add(vkey);
                }
            }
        }));
    }

    let collector: Arc<dyn GarbageCollector> = Arc::new(OneWayGc::new(ctx.clone(), syncer.clone()));
    handles.push(gc::spawn(collector.clone(), q.clone(), ctx));

    info!(syncer = syncer.name(), kind = %kind, workers = n, "import registered");
    Ok(Registration { name: syncer.name().to_string(), lanes: vec![(Direction::Import, q, collector)], handles })
}

/// Virtual-only registration.
pub async fn register_fake(ctx: &SyncContext, syncer: Arc<dyn FakeSyncer>) -> SyncResult<Registration> {
    let kind = syncer.kind().to_string();
    let n = workers(ctx, &syncer.options());
    let ctl = Controller::new(Arc::new(FakeReconciler::new(ctx.clone(), syncer.clone())), n, ctx.config.backoff);
    let q = ctl.queue();
    let mut handles = ctl.start(ctx.cancel.clone());

    let vrx = ctx.virtual_store.watch(&kind).await?;
    {
        let q = q.clone();
        handles.push(pump(ctx, vrx, format!("{}-virtual", syncer.name()), move |d| {
            q.add(d.object.key());
            std::future::ready(())
        }));
    }

    let collector: Arc<dyn GarbageCollector> = Arc::new(FakeGc::new(ctx.clone(), syncer.clone()));
    handles.push(gc::spawn(collector.clone(), q.clone(), ctx));

    info!(syncer = syncer.name(), kind = %kind, workers = n, "fake syncer registered");
    Ok(Registration { name: syncer.name().to_string(), lanes: vec![(Direction::Fake, q, collector)], handles })
}
