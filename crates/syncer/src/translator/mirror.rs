use vsync_core::{Object, ObjectKey};

use super::Translator;
use crate::context::SyncContext;
use crate::error::SyncResult;

/// Identity mapping for imported kinds: the host object and its virtual mirror share a key.
#[derive(Debug, Clone)]
pub struct MirrorTranslator {
    kind: String,
}

impl MirrorTranslator {
    pub fn new(kind: impl Into<String>) -> Self { Self { kind: kind.into() } }
}

#[async_trait::async_trait]
impl Translator for MirrorTranslator {
    fn kind(&self) -> &str { &self.kind }

    fn is_managed(&self, _physical: &Object) -> SyncResult<bool> { Ok(true) }

    fn virtual_to_physical(&self, key: &ObjectKey, _vobj: Option<&Object>) -> ObjectKey { key.clone() }

    async fn physical_to_virtual(&self, _ctx: &SyncContext, physical: &Object) -> ObjectKey { physical.key() }
}
