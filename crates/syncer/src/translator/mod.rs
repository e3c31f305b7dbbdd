//! Identity translation between virtual and host objects.

use std::sync::Arc;

use tracing::warn;
use vsync_core::{Object, ObjectKey};
use vsync_store::ObjectStore;

use crate::context::SyncContext;
use crate::error::SyncResult;

mod cluster;
mod metadata;
mod mirror;
mod namespaced;

pub use cluster::ClusterTranslator;
pub use metadata::{MetadataTranslator, MetadataUpdate};
pub use mirror::MirrorTranslator;
pub use namespaced::NamespacedTranslator;

/// Virtual-store index mapping `<host ns>/<host name>` to virtual objects.
pub const INDEX_BY_PHYSICAL_NAME: &str = "vsync.io/physical-name";

/// Maps virtual identity to host identity and back, and decides ownership of host objects.
#[async_trait::async_trait]
pub trait Translator: Send + Sync {
    fn kind(&self) -> &str;

    /// Whether `physical` belongs to this tenant. Unmanaged objects are never mutated.
    fn is_managed(&self, physical: &Object) -> SyncResult<bool>;

    /// Deterministic host key; the empty key when `key` is empty.
    fn virtual_to_physical(&self, key: &ObjectKey, vobj: Option<&Object>) -> ObjectKey;

    /// Virtual key of a host object, or the empty key when it cannot be resolved.
    async fn physical_to_virtual(&self, ctx: &SyncContext, physical: &Object) -> ObjectKey;

    /// Register the virtual-store indices `physical_to_virtual` relies on.
    fn register_indices(&self, _virtual_store: &dyn ObjectStore) -> SyncResult<()> { Ok(()) }
}

pub(crate) fn index_value(key: &ObjectKey) -> String {
    format!("{}/{}", key.namespace().unwrap_or_default(), key.name)
}

/// Look up the virtual object indexed under the host key of `physical`.
pub(crate) async fn lookup_by_physical_name(ctx: &SyncContext, kind: &str, physical: &Object) -> ObjectKey {
    let value = index_value(&physical.key());
    match ctx.virtual_store.list_by_index(kind, INDEX_BY_PHYSICAL_NAME, &value).await {
        Ok(found) => match found.as_slice() {
            [] => ObjectKey::empty(),
            [one] => one.key(),
            [first, ..] => {
                warn!(kind, physical = %physical.key(), matches = found.len(), "physical name maps to several virtual objects");
                first.key()
            }
        },
        Err(e) => {
            warn!(kind, physical = %physical.key(), error = %e, "physical name index lookup failed");
            ObjectKey::empty()
        }
    }
}

pub(crate) fn register_physical_name_index(
    virtual_store: &dyn ObjectStore,
    kind: &str,
    to_physical: impl Fn(&ObjectKey) -> ObjectKey + Send + Sync + 'static,
) -> SyncResult<()> {
    virtual_store.register_index(
        kind,
        INDEX_BY_PHYSICAL_NAME,
        Arc::new(move |o: &Object| {
            let pkey = to_physical(&o.key());
            if pkey.is_empty() {
                Vec::new()
            } else {
                vec![index_value(&pkey)]
            }
        }),
    )?;
    Ok(())
}
