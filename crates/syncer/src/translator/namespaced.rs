use std::sync::Arc;

use vsync_core::naming::{MARKER_LABEL, NAMESPACE_ANNOTATION, NAME_ANNOTATION};
use vsync_core::{Object, ObjectKey, TranslationContext};
use vsync_store::ObjectStore;

use super::{lookup_by_physical_name, register_physical_name_index, Translator};
use crate::context::SyncContext;
use crate::error::SyncResult;

/// Namespaced kinds: virtual objects are renamed into the tenant's host namespace(s).
#[derive(Debug, Clone)]
pub struct NamespacedTranslator {
    kind: String,
    ctx: Arc<TranslationContext>,
}

impl NamespacedTranslator {
    pub fn new(kind: impl Into<String>, ctx: Arc<TranslationContext>) -> Self {
        Self { kind: kind.into(), ctx }
    }

    fn to_physical(ctx: &TranslationContext, key: &ObjectKey) -> ObjectKey {
        if key.is_empty() {
            return ObjectKey::empty();
        }
        let ns = key.namespace().unwrap_or_default();
        ObjectKey::namespaced(ctx.physical_namespace(ns), ctx.physical_name(&key.name, ns))
    }
}

#[async_trait::async_trait]
impl Translator for NamespacedTranslator {
    fn kind(&self) -> &str { &self.kind }

    fn is_managed(&self, physical: &Object) -> SyncResult<bool> {
        let Some(ns) = physical.namespace.as_deref() else { return Ok(false) };
        if !self.ctx.is_targeted_namespace(ns) || physical.label(MARKER_LABEL) != Some(self.ctx.marker()) {
            return Ok(false);
        }
        // reverse-mapping annotations must agree with the deterministic name
        if let (Some(name), Some(vns)) = (physical.annotation(NAME_ANNOTATION), physical.annotation(NAMESPACE_ANNOTATION)) {
            let expected = Self::to_physical(&self.ctx, &ObjectKey::namespaced(vns, name));
            return Ok(expected == physical.key());
        }
        Ok(true)
    }

    fn virtual_to_physical(&self, key: &ObjectKey, _vobj: Option<&Object>) -> ObjectKey {
        Self::to_physical(&self.ctx, key)
    }

    async fn physical_to_virtual(&self, ctx: &SyncContext, physical: &Object) -> ObjectKey {
        if let (Some(name), Some(ns)) = (physical.annotation(NAME_ANNOTATION), physical.annotation(NAMESPACE_ANNOTATION)) {
            return ObjectKey::namespaced(ns, name);
        }
        lookup_by_physical_name(ctx, &self.kind, physical).await
    }

    fn register_indices(&self, virtual_store: &dyn ObjectStore) -> SyncResult<()> {
        let ctx = self.ctx.clone();
        register_physical_name_index(virtual_store, &self.kind, move |k| Self::to_physical(&ctx, k))
    }
}
