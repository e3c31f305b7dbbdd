//! Kind-agnostic syncers: metadata + body copy to the host, and host → virtual import.

use std::sync::Arc;

use tracing::{debug, info};
use vsync_core::{Object, TranslationContext};

use crate::context::SyncContext;
use crate::error::SyncResult;
use crate::syncer::{Action, BackwardCreator, BackwardSyncer, ForwardSyncer, Syncer, SyncerOptions};
use crate::translator::{ClusterTranslator, MetadataTranslator, MirrorTranslator, NamespacedTranslator, Translator};

fn with_status(mut body: serde_json::Value, status: Option<&serde_json::Value>) -> serde_json::Value {
    if let (Some(map), Some(status)) = (body.as_object_mut(), status) {
        map.insert("status".to_string(), status.clone());
    }
    body
}

/// Forward syncer for any kind. The host object is the translated metadata plus the
/// virtual body without `status`; host `status` is kept and optionally copied back.
pub struct GenericSyncer {
    name: String,
    kind: String,
    translator: Box<dyn Translator>,
    metadata: MetadataTranslator,
    status_backsync: bool,
    options: SyncerOptions,
}

impl GenericSyncer {
    pub fn namespaced(kind: impl Into<String>, ctx: Arc<TranslationContext>) -> SyncResult<Self> {
        let kind = kind.into();
        let metadata = MetadataTranslator::new(ctx.clone(), false)?;
        Ok(Self::build(kind.clone(), Box::new(NamespacedTranslator::new(kind, ctx)), metadata))
    }

    pub fn cluster(kind: impl Into<String>, ctx: Arc<TranslationContext>) -> SyncResult<Self> {
        let kind = kind.into();
        let metadata = MetadataTranslator::new(ctx.clone(), true)?;
        Ok(Self::build(kind.clone(), Box::new(ClusterTranslator::new(kind, ctx)), metadata))
    }

    fn build(kind: String, translator: Box<dyn Translator>, metadata: MetadataTranslator) -> Self {
        Self {
            name: kind.to_lowercase().replace('/', "-"),
            kind,
            translator,
            metadata,
            status_backsync: false,
            options: SyncerOptions::default(),
        }
    }

    /// Copy host `status` into the virtual object (enables the backward update capability).
    pub fn with_status_backsync(mut self, on: bool) -> Self {
        self.status_backsync = on;
        self
    }

    pub fn with_options(mut self, options: SyncerOptions) -> Self {
        self.options = options;
        self
    }

    fn desired_body(vobj: &Object, pobj: &Object) -> serde_json::Value {
        with_status(vobj.spec_body(), pobj.status())
    }

    fn status_differs(&self, pobj: &Object, vobj: &Object) -> bool {
        self.status_backsync && pobj.status().is_some() && pobj.status() != vobj.status()
    }

    async fn push_status(&self, ctx: &SyncContext, pobj: &Object, vobj: &Object) -> SyncResult<()> {
        if !self.status_differs(pobj, vobj) {
            return Ok(());
        }
        let mut next = vobj.clone();
        next.set_status(pobj.status().cloned());
        ctx.virtual_store.update_status(next).await?;
        debug!(kind = %self.kind, key = %vobj.key(), "status copied to virtual object");
        Ok(())
    }
}

impl Syncer for GenericSyncer {
    fn name(&self) -> &str { &self.name }

    fn kind(&self) -> &str { &self.kind }

    fn translator(&self) -> &dyn Translator { self.translator.as_ref() }

    fn options(&self) -> SyncerOptions { self.options.clone() }

    fn forward(&self) -> Option<&dyn ForwardSyncer> { Some(self) }

    fn backward(&self) -> Option<&dyn BackwardSyncer> {
        if self.status_backsync {
            Some(self)
        } else {
            None
        }
    }
}

#[async_trait::async_trait]
impl ForwardSyncer for GenericSyncer {
    async fn forward_create(&self, ctx: &SyncContext, vobj: &Object) -> SyncResult<Action> {
        let pkey = self.translator.virtual_to_physical(&vobj.key(), Some(vobj));
        let mut pobj = self.metadata.translate_metadata(vobj, &pkey);
        pobj.body = vobj.spec_body();
        let created = ctx.physical_store.create(pobj).await?;
        info!(kind = %self.kind, key = %vobj.key(), physical = %created.key(), "host object created");
        Ok(Action::done())
    }

    async fn forward_update(&self, ctx: &SyncContext, pobj: &Object, vobj: &Object) -> SyncResult<Action> {
        let meta = self.metadata.translate_metadata_update(vobj, pobj);
        let body = Self::desired_body(vobj, pobj);
        if meta.changed || body != pobj.body {
            let mut next = pobj.clone();
            next.labels = meta.labels;
            next.annotations = meta.annotations;
            next.body = body;
            ctx.physical_store.update(next).await?;
            info!(kind = %self.kind, key = %vobj.key(), physical = %pobj.key(), "host object updated");
        }
        self.push_status(ctx, pobj, vobj).await?;
        Ok(Action::done())
    }

    fn forward_update_needed(&self, _ctx: &SyncContext, pobj: &Object, vobj: &Object) -> SyncResult<bool> {
        Ok(self.metadata.translate_metadata_update(vobj, pobj).changed
            || Self::desired_body(vobj, pobj) != pobj.body
            || self.status_differs(pobj, vobj))
    }
}

#[async_trait::async_trait]
impl BackwardSyncer for GenericSyncer {
    async fn backward_update(&self, ctx: &SyncContext, pobj: &Object, vobj: &Object) -> SyncResult<Action> {
        self.push_status(ctx, pobj, vobj).await?;
        Ok(Action::done())
    }

    fn backward_update_needed(&self, _ctx: &SyncContext, pobj: &Object, vobj: &Object) -> SyncResult<bool> {
        Ok(self.status_differs(pobj, vobj))
    }
}

/// One-way import: every host object of the kind is mirrored into the virtual store under the same key.
pub struct ImportSyncer {
    name: String,
    kind: String,
    translator: MirrorTranslator,
}

impl ImportSyncer {
    pub fn new(kind: impl Into<String>) -> Self {
        let kind = kind.into();
        Self {
            name: format!("import-{}", kind.to_lowercase().replace('/', "-")),
            translator: MirrorTranslator::new(kind.clone()),
            kind,
        }
    }

    fn mirror(pobj: &Object) -> Object {
        Object { uid: None, resource_version: None, ..pobj.clone() }
    }

    fn differs(pobj: &Object, vobj: &Object) -> bool {
        pobj.labels != vobj.labels || pobj.annotations != vobj.annotations || pobj.body != vobj.body
    }
}

impl Syncer for ImportSyncer {
    fn name(&self) -> &str { &self.name }

    fn kind(&self) -> &str { &self.kind }

    fn translator(&self) -> &dyn Translator { &self.translator }

    fn backward(&self) -> Option<&dyn BackwardSyncer> { Some(self) }

    fn backward_creator(&self) -> Option<&dyn BackwardCreator> { Some(self) }
}

#[async_trait::async_trait]
impl BackwardCreator for ImportSyncer {
    async fn backward_create(&self, ctx: &SyncContext, pobj: &Object) -> SyncResult<Action> {
        ctx.virtual_store.create(Self::mirror(pobj)).await?;
        info!(kind = %self.kind, key = %pobj.key(), "host object imported");
        Ok(Action::done())
    }
}

#[async_trait::async_trait]
impl BackwardSyncer for ImportSyncer {
    async fn backward_update(&self, ctx: &SyncContext, pobj: &Object, vobj: &Object) -> SyncResult<Action> {
        if !Self::differs(pobj, vobj) {
            return Ok(Action::done());
        }
        let next = Object {
            labels: pobj.labels.clone(),
            annotations: pobj.annotations.clone(),
            body: pobj.body.clone(),
            ..vobj.clone()
        };
        ctx.virtual_store.update(next).await?;
        info!(kind = %self.kind, key = %vobj.key(), "import refreshed");
        Ok(Action::done())
    }

    fn backward_update_needed(&self, _ctx: &SyncContext, pobj: &Object, vobj: &Object) -> SyncResult<bool> {
        Ok(Self::differs(pobj, vobj))
    }
}
