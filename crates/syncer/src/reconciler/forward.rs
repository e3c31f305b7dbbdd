use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use vsync_core::naming::UID_ANNOTATION;
use vsync_core::{Object, ObjectKey};

use super::{delete_ignore_missing, get_physical, get_virtual, Reconciler};
use crate::context::SyncContext;
use crate::error::{SyncError, SyncResult};
use crate::syncer::{self, Action, Syncer};

/// The host object was created for an earlier virtual object of the same name.
pub fn uid_mismatch(pobj: &Object, vobj: &Object) -> bool {
    match (pobj.annotation(UID_ANNOTATION), vobj.uid_string()) {
        (Some(recorded), Some(current)) => recorded != current,
        _ => false,
    }
}

/// Virtual → host convergence, keyed by virtual key.
pub struct ForwardReconciler {
    name: String,
    ctx: SyncContext,
    syncer: Arc<dyn Syncer>,
}

impl ForwardReconciler {
    pub fn new(ctx: SyncContext, syncer: Arc<dyn Syncer>) -> Self {
        Self { name: format!("{}-forward", syncer.name()), ctx, syncer }
    }
}

#[async_trait::async_trait]
impl Reconciler for ForwardReconciler {
    fn name(&self) -> &str { &self.name }

    async fn reconcile(&self, key: &ObjectKey) -> SyncResult<Action> {
        let ctx = &self.ctx;
        let kind = self.syncer.kind();
        let fwd = self.syncer.forward().ok_or_else(|| SyncError::missing(self.syncer.name(), "ForwardSyncer"))?;
        let started = syncer::start(self.syncer.starter(), ctx, key).await?;
        if started.skip {
            debug!(kind, key = %key, "reconcile skipped by starter");
            return Ok(Action::done());
        }

        let tr = self.syncer.translator();
        let vobj = get_virtual(ctx, kind, key).await?;
        let pkey = tr.virtual_to_physical(key, vobj.as_ref());
        if pkey.is_empty() {
            debug!(kind, key = %key, "no host key");
            return Ok(Action::done());
        }
        let pobj = get_physical(ctx, kind, &pkey).await?;

        match (vobj, pobj) {
            (Some(v), None) => {
                info!(kind, key = %key, physical = %pkey, "create host object");
                fwd.forward_create(ctx, &v).await
            }
            (Some(v), Some(p)) => {
                if !tr.is_managed(&p)? {
                    warn!(kind, key = %key, physical = %pkey, "host object exists but is not managed");
                    return Err(SyncError::Unmanaged { kind: kind.to_string(), key: pkey });
                }
                if !self.syncer.options().disable_uid_deletion && uid_mismatch(&p, &v) {
                    info!(kind, key = %key, physical = %pkey, "virtual object was recreated, delete stale host object");
                    delete_ignore_missing(ctx.physical_store.as_ref(), &p).await?;
                    return Ok(Action::requeue(Duration::ZERO));
                }
                fwd.forward_update(ctx, &p, &v).await
            }
            (None, Some(p)) => {
                if tr.is_managed(&p)? {
                    info!(kind, key = %key, physical = %pkey, "virtual object gone, delete host object");
                    delete_ignore_missing(ctx.physical_store.as_ref(), &p).await?;
                } else {
                    debug!(kind, physical = %pkey, "ignore unmanaged host object");
                }
                Ok(Action::done())
            }
            (None, None) => Ok(Action::done()),
        }
    }
}
