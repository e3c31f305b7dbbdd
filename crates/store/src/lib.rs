//! vsync store: the object store contract, an in-RAM implementation and the work queue.

#![forbid(unsafe_code)]

use std::sync::Arc;

use tokio::sync::mpsc;
use vsync_core::{Delta, Object, ObjectKey, StoreResult};

mod mem;
mod queue;

pub use mem::{MemStore, MutationStats, StoreSnapshot};
pub use queue::{ItemBackoff, WorkQueue};

/// Computes the index values of an object (e.g. its physical name).
pub type IndexFn = Arc<dyn Fn(&Object) -> Vec<String> + Send + Sync>;

/// Capacity of the channel handed out by [`ObjectStore::watch`].
pub const WATCH_BUFFER: usize = 256;

/// Contract shared by the virtual and the host store.
///
/// `update` rejects a stale `resource_version` with `Conflict`; `get` and `delete`
/// report absence as `NotFound`.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    /// Short store name used in logs and metrics ("virtual", "host").
    fn name(&self) -> &str;

    async fn get(&self, kind: &str, key: &ObjectKey) -> StoreResult<Object>;

    /// List objects of a kind, optionally restricted to one namespace.
    async fn list(&self, kind: &str, namespace: Option<&str>) -> StoreResult<Vec<Object>>;

    /// Objects whose `index` function yields `value`.
    async fn list_by_index(&self, kind: &str, index: &str, value: &str) -> StoreResult<Vec<Object>>;

    async fn create(&self, obj: Object) -> StoreResult<Object>;

    async fn update(&self, obj: Object) -> StoreResult<Object>;

    /// Write only the `status` stanza of `obj` (the status subresource on Kubernetes).
    /// Same version check as `update`.
    async fn update_status(&self, obj: Object) -> StoreResult<Object>;

    /// Delete by key; a set `uid` acts as a precondition.
    async fn delete(&self, obj: &Object) -> StoreResult<()>;

    /// Register a secondary index; existing objects are indexed immediately.
    fn register_index(&self, kind: &str, index: &str, func: IndexFn) -> StoreResult<()>;

    /// Subscribe to applied/deleted notifications for a kind.
    async fn watch(&self, kind: &str) -> StoreResult<mpsc::Receiver<Delta>>;
}

pub mod prelude {
    pub use super::{IndexFn, ItemBackoff, MemStore, ObjectStore, WorkQueue};
}
