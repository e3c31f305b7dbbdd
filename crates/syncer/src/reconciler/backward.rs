use std::sync::Arc;

use tracing::{debug, info};
use vsync_core::ObjectKey;

use super::{delete_ignore_missing, get_physical, get_virtual, Reconciler};
use crate::context::SyncContext;
use crate::error::SyncResult;
use crate::syncer::{Action, Syncer};

/// Host → virtual convergence for two-way kinds, keyed by host key.
pub struct BackwardReconciler {
    name: String,
    ctx: SyncContext,
    syncer: Arc<dyn Syncer>,
}

impl BackwardReconciler {
    pub fn new(ctx: SyncContext, syncer: Arc<dyn Syncer>) -> Self {
        Self { name: format!("{}-backward", syncer.name()), ctx, syncer }
    }
}

#[async_trait::async_trait]
impl Reconciler for BackwardReconciler {
    fn name(&self) -> &str { &self.name }

    async fn reconcile(&self, pkey: &ObjectKey) -> SyncResult<Action> {
        let ctx = &self.ctx;
        let kind = self.syncer.kind();
        let tr = self.syncer.translator();

        let Some(p) = get_physical(ctx, kind, pkey).await? else {
            return Ok(Action::done());
        };
        if !tr.is_managed(&p)? {
            debug!(kind, physical = %pkey, "ignore unmanaged host object");
            return Ok(Action::done());
        }
        let vkey = tr.physical_to_virtual(ctx, &p).await;
        if vkey.is_empty() {
            debug!(kind, physical = %pkey, "host object does not resolve to a virtual key");
            return Ok(Action::done());
        }

        match get_virtual(ctx, kind, &vkey).await? {
            None => match self.syncer.backward_deleter() {
                Some(d) => d.backward_delete(ctx, &p).await,
                None => {
                    info!(kind, key = %vkey, physical = %pkey, "delete orphaned host object");
                    delete_ignore_missing(ctx.physical_store.as_ref(), &p).await?;
                    Ok(Action::done())
                }
            },
            Some(v) => match self.syncer.backward() {
                Some(b) => b.backward_update(ctx, &p, &v).await,
                None => Ok(Action::done()),
            },
        }
    }
}
