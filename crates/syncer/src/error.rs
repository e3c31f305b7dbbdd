use vsync_core::{ObjectKey, StoreError};

/// Errors surfaced by reconcilers, translators and registration.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The host object at the derived name is not ours; nothing is touched.
    #[error("{kind} {key}: host object exists but is not managed by this tenant")]
    Unmanaged { kind: String, key: ObjectKey },
    #[error("syncer {syncer} lacks the {capability} capability")]
    MissingCapability { syncer: String, capability: &'static str },
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SyncError {
    pub fn is_not_found(&self) -> bool { matches!(self, SyncError::Store(e) if e.is_not_found()) }

    pub fn is_conflict(&self) -> bool { matches!(self, SyncError::Store(e) if e.is_conflict()) }

    pub fn missing(syncer: &str, capability: &'static str) -> Self {
        SyncError::MissingCapability { syncer: syncer.to_string(), capability }
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
