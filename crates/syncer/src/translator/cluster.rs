use std::sync::Arc;

use vsync_core::naming::{HOST_PREFIX, MARKER_LABEL, NAME_ANNOTATION};
use vsync_core::{Object, ObjectKey, TranslationContext};
use vsync_store::ObjectStore;

use super::{lookup_by_physical_name, register_physical_name_index, Translator};
use crate::context::SyncContext;
use crate::error::SyncResult;

/// Cluster-scoped kinds: one host object per virtual object, prefixed and suffixed per tenant.
#[derive(Debug, Clone)]
pub struct ClusterTranslator {
    kind: String,
    ctx: Arc<TranslationContext>,
}

impl ClusterTranslator {
    pub fn new(kind: impl Into<String>, ctx: Arc<TranslationContext>) -> Self {
        Self { kind: kind.into(), ctx }
    }

    fn to_physical(ctx: &TranslationContext, key: &ObjectKey) -> ObjectKey {
        if key.is_empty() {
            return ObjectKey::empty();
        }
        ObjectKey::cluster(ctx.physical_name_cluster_scoped(&key.name))
    }
}

#[async_trait::async_trait]
impl Translator for ClusterTranslator {
    fn kind(&self) -> &str { &self.kind }

    fn is_managed(&self, physical: &Object) -> SyncResult<bool> {
        if physical.label(MARKER_LABEL) != Some(self.ctx.cluster_marker().as_str()) {
            return Ok(false);
        }
        if !physical.name.starts_with(&format!("{}-", HOST_PREFIX)) {
            return Ok(false);
        }
        if let Some(name) = physical.annotation(NAME_ANNOTATION) {
            return Ok(Self::to_physical(&self.ctx, &ObjectKey::cluster(name)).name == physical.name);
        }
        Ok(true)
    }

    fn virtual_to_physical(&self, key: &ObjectKey, _vobj: Option<&Object>) -> ObjectKey {
        Self::to_physical(&self.ctx, key)
    }

    async fn physical_to_virtual(&self, ctx: &SyncContext, physical: &Object) -> ObjectKey {
        if let Some(name) = physical.annotation(NAME_ANNOTATION) {
            return ObjectKey::cluster(name);
        }
        lookup_by_physical_name(ctx, &self.kind, physical).await
    }

    fn register_indices(&self, virtual_store: &dyn ObjectStore) -> SyncResult<()> {
        let ctx = self.ctx.clone();
        register_physical_name_index(virtual_store, &self.kind, move |k| Self::to_physical(&ctx, k))
    }
}
