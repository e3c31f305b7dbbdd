use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use vsync_core::TranslationContext;
use vsync_store::ObjectStore;

use crate::config::EngineConfig;

/// Everything a reconcile or a syncer callback may touch. Cheap to clone.
#[derive(Clone)]
pub struct SyncContext {
    pub virtual_store: Arc<dyn ObjectStore>,
    pub physical_store: Arc<dyn ObjectStore>,
    pub translation: Arc<TranslationContext>,
    pub config: EngineConfig,
    /// Cancelled on shutdown; stops workers, watches and collectors.
    pub cancel: CancellationToken,
}

impl SyncContext {
    pub fn new(
        virtual_store: Arc<dyn ObjectStore>,
        physical_store: Arc<dyn ObjectStore>,
        translation: TranslationContext,
        config: EngineConfig,
    ) -> Self {
        Self {
            virtual_store,
            physical_store,
            translation: Arc::new(translation),
            config,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}
