//! Per-kind syncer plugins and their optional capabilities.
//!
//! A [`Syncer`] always has a translator; everything else is opt-in through the
//! capability accessors, which return `None` unless overridden.

use std::time::Duration;

use vsync_core::{Object, ObjectKey};

use crate::context::SyncContext;
use crate::error::SyncResult;
use crate::translator::Translator;

/// Outcome of a successful reconcile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Action {
    pub requeue_after: Option<Duration>,
}

impl Action {
    pub fn done() -> Self { Self::default() }

    pub fn requeue(after: Duration) -> Self { Self { requeue_after: Some(after) } }
}

#[derive(Debug, Clone, Default)]
pub struct SyncerOptions {
    /// Worker count; falls back to the engine default when `None`.
    pub max_concurrent_reconciles: Option<usize>,
    /// Keep host objects whose `object-uid` annotation no longer matches the virtual object.
    pub disable_uid_deletion: bool,
}

pub trait Syncer: Send + Sync {
    fn name(&self) -> &str;

    /// Kind key, e.g. `v1/ConfigMap`.
    fn kind(&self) -> &str;

    fn translator(&self) -> &dyn Translator;

    fn options(&self) -> SyncerOptions { SyncerOptions::default() }

    fn forward(&self) -> Option<&dyn ForwardSyncer> { None }

    fn backward(&self) -> Option<&dyn BackwardSyncer> { None }

    fn backward_creator(&self) -> Option<&dyn BackwardCreator> { None }

    fn backward_deleter(&self) -> Option<&dyn BackwardDeleter> { None }

    /// Hook around forward reconciles.
    fn starter(&self) -> Option<&dyn Starter> { None }

    /// Hook around import reconciles.
    fn lifecycle(&self) -> Option<&dyn BackwardLifecycle> { None }
}

#[async_trait::async_trait]
pub trait ForwardSyncer: Send + Sync {
    async fn forward_create(&self, ctx: &SyncContext, vobj: &Object) -> SyncResult<Action>;

    async fn forward_update(&self, ctx: &SyncContext, pobj: &Object, vobj: &Object) -> SyncResult<Action>;

    fn forward_create_needed(&self, _ctx: &SyncContext, _vobj: &Object) -> SyncResult<bool> { Ok(true) }

    fn forward_update_needed(&self, ctx: &SyncContext, pobj: &Object, vobj: &Object) -> SyncResult<bool>;
}

#[async_trait::async_trait]
pub trait BackwardSyncer: Send + Sync {
    async fn backward_update(&self, ctx: &SyncContext, pobj: &Object, vobj: &Object) -> SyncResult<Action>;

    fn backward_update_needed(&self, ctx: &SyncContext, pobj: &Object, vobj: &Object) -> SyncResult<bool>;
}

#[async_trait::async_trait]
pub trait BackwardCreator: Send + Sync {
    async fn backward_create(&self, ctx: &SyncContext, pobj: &Object) -> SyncResult<Action>;

    fn backward_create_needed(&self, _ctx: &SyncContext, _pobj: &Object) -> SyncResult<bool> { Ok(true) }
}

/// Replaces the default "delete the orphaned host object" behaviour of the backward reconciler.
#[async_trait::async_trait]
pub trait BackwardDeleter: Send + Sync {
    async fn backward_delete(&self, ctx: &SyncContext, pobj: &Object) -> SyncResult<Action>;
}

/// `reconcile_start` returning `true` skips the reconcile; `reconcile_end` always runs afterwards.
#[async_trait::async_trait]
pub trait Starter: Send + Sync {
    async fn reconcile_start(&self, ctx: &SyncContext, key: &ObjectKey) -> SyncResult<bool>;

    fn reconcile_end(&self);
}

pub use self::Starter as BackwardLifecycle;

/// Virtual-only kinds with no host counterpart.
#[async_trait::async_trait]
pub trait FakeSyncer: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> &str;

    fn options(&self) -> SyncerOptions { SyncerOptions::default() }

    /// Called when the virtual object is absent.
    async fn create(&self, ctx: &SyncContext, key: &ObjectKey) -> SyncResult<Action>;

    async fn update(&self, ctx: &SyncContext, vobj: &Object) -> SyncResult<Action>;

    /// Garbage-collection predicate for existing virtual objects.
    fn update_needed(&self, _ctx: &SyncContext, _vobj: &Object) -> SyncResult<bool> { Ok(false) }

    fn starter(&self) -> Option<&dyn Starter> { None }
}

/// Calls `reconcile_end` when dropped.
pub(crate) struct EndGuard<'a>(&'a dyn Starter);

impl Drop for EndGuard<'_> {
    fn drop(&mut self) { self.0.reconcile_end(); }
}

pub(crate) struct Started<'a> {
    pub skip: bool,
    _guard: Option<EndGuard<'a>>,
}

/// Run the start hook, if any. The returned guard ends the reconcile when dropped.
pub(crate) async fn start<'a>(hook: Option<&'a dyn Starter>, ctx: &SyncContext, key: &ObjectKey) -> SyncResult<Started<'a>> {
    let Some(hook) = hook else { return Ok(Started { skip: false, _guard: None }) };
    let guard = EndGuard(hook);
    let skip = hook.reconcile_start(ctx, key).await?;
    Ok(Started { skip, _guard: Some(guard) })
}
