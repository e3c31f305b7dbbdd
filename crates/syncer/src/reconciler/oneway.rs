use std::sync::Arc;

use tracing::{debug, info};
use vsync_core::ObjectKey;

use super::{delete_ignore_missing, get_physical, get_virtual, Reconciler};
use crate::context::SyncContext;
use crate::error::{SyncError, SyncResult};
use crate::syncer::{self, Action, Syncer};

/// Host → virtual import, keyed by virtual key. Never mutates the host store.
pub struct OneWayReconciler {
    name: String,
    ctx: SyncContext,
    syncer: Arc<dyn Syncer>,
}

impl OneWayReconciler {
    pub fn new(ctx: SyncContext, syncer: Arc<dyn Syncer>) -> Self {
        Self { name: format!("{}-import", syncer.name()), ctx, syncer }
    }
}

#[async_trait::async_trait]
impl Reconciler for OneWayReconciler {
    fn name(&self) -> &str { &self.name }

    async fn reconcile(&self, key: &ObjectKey) -> SyncResult<Action> {
        let ctx = &self.ctx;
        let kind = self.syncer.kind();
        let back = self.syncer.backward().ok_or_else(|| SyncError::missing(self.syncer.name(), "BackwardSyncer"))?;
        let creator =
            self.syncer.backward_creator().ok_or_else(|| SyncError::missing(self.syncer.name(), "BackwardCreator"))?;
        let started = syncer::start(self.syncer.lifecycle(), ctx, key).await?;
        if started.skip {
            return Ok(Action::done());
        }

        let tr = self.syncer.translator();
        let vobj = get_virtual(ctx, kind, key).await?;
        let pkey = tr.virtual_to_physical(key, vobj.as_ref());
        let pobj = if pkey.is_empty() { None } else { get_physical(ctx, kind, &pkey).await? };

        match (pobj, vobj) {
            (Some(p), _) if !tr.is_managed(&p)? => {
                debug!(kind, physical = %pkey, "ignore unmanaged host object");
                Ok(Action::done())
            }
            (Some(p), None) => {
                if creator.backward_create_needed(ctx, &p)? {
                    info!(kind, key = %key, "import host object");
                    creator.backward_create(ctx, &p).await
                } else {
                    Ok(Action::done())
                }
            }
            (Some(p), Some(v)) => {
                if back.backward_update_needed(ctx, &p, &v)? {
                    back.backward_update(ctx, &p, &v).await
                } else {
                    Ok(Action::done())
                }
            }
            (None, Some(v)) => {
                info!(kind, key = %key, "host object gone, delete virtual mirror");
                delete_ignore_missing(ctx.virtual_store.as_ref(), &v).await?;
                Ok(Action::done())
            }
            (None, None) => Ok(Action::done()),
        }
    }
}
