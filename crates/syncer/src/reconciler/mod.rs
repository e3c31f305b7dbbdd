//! Reconcile state machines, one per sync topology.

use vsync_core::{ignore_not_found, Object, ObjectKey};

use crate::context::SyncContext;
use crate::error::SyncResult;
use crate::syncer::Action;

mod backward;
mod fake;
mod forward;
mod oneway;

pub use backward::BackwardReconciler;
pub use fake::FakeReconciler;
pub use forward::{uid_mismatch, ForwardReconciler};
pub use oneway::OneWayReconciler;

/// Converges the state behind one reconcile key.
#[async_trait::async_trait]
pub trait Reconciler: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn reconcile(&self, key: &ObjectKey) -> SyncResult<Action>;
}

pub(crate) async fn get_virtual(ctx: &SyncContext, kind: &str, key: &ObjectKey) -> SyncResult<Option<Object>> {
    Ok(ignore_not_found(ctx.virtual_store.get(kind, key).await)?)
}

pub(crate) async fn get_physical(ctx: &SyncContext, kind: &str, key: &ObjectKey) -> SyncResult<Option<Object>> {
    Ok(ignore_not_found(ctx.physical_store.get(kind, key).await)?)
}

/// Delete, treating an already-gone object as success.
pub(crate) async fn delete_ignore_missing(store: &dyn vsync_store::ObjectStore, obj: &Object) -> SyncResult<()> {
    ignore_not_found(store.delete(obj).await)?;
    Ok(())
}
