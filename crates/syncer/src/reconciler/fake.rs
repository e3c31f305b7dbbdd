use std::sync::Arc;

use tracing::debug;
use vsync_core::ObjectKey;

use super::{get_virtual, Reconciler};
use crate::context::SyncContext;
use crate::error::SyncResult;
use crate::syncer::{self, Action, FakeSyncer};

/// Virtual-only reconcile: no translator, no host access.
pub struct FakeReconciler {
    name: String,
    ctx: SyncContext,
    syncer: Arc<dyn FakeSyncer>,
}

impl FakeReconciler {
    pub fn new(ctx: SyncContext, syncer: Arc<dyn FakeSyncer>) -> Self {
        Self { name: format!("{}-fake", syncer.name()), ctx, syncer }
    }
}

#[async_trait::async_trait]
impl Reconciler for FakeReconciler {
    fn name(&self) -> &str { &self.name }

    async fn reconcile(&self, key: &ObjectKey) -> SyncResult<Action> {
        let ctx = &self.ctx;
        let started = syncer::start(self.syncer.starter(), ctx, key).await?;
        if started.skip {
            return Ok(Action::done());
        }
        match get_virtual(ctx, self.syncer.kind(), key).await? {
            None => {
                debug!(kind = self.syncer.kind(), key = %key, "virtual object absent");
                self.syncer.create(ctx, key).await
            }
            Some(v) => self.syncer.update(ctx, &v).await,
        }
    }
}
