//! In-RAM object store with optimistic concurrency, secondary indices and snapshot reads.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use arc_swap::ArcSwap;
use metrics::counter;
use rustc_hash::FxHashMap;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};
use vsync_core::{Delta, DeltaKind, Object, ObjectKey, StoreError, StoreResult};

use crate::{IndexFn, ObjectStore, WATCH_BUFFER};

const EVENT_BUFFER: usize = 1024;

struct Index {
    func: IndexFn,
    postings: FxHashMap<String, BTreeSet<ObjectKey>>,
}

impl Index {
    fn insert(&mut self, obj: &Object) {
        let key = obj.key();
        for v in (self.func)(obj) {
            self.postings.entry(v).or_default().insert(key.clone());
        }
    }

    fn remove(&mut self, obj: &Object) {
        let key = obj.key();
        for v in (self.func)(obj) {
            if let Some(set) = self.postings.get_mut(&v) {
                set.remove(&key);
                if set.is_empty() {
                    self.postings.remove(&v);
                }
            }
        }
    }
}

#[derive(Default)]
struct KindState {
    objects: BTreeMap<ObjectKey, Object>,
    indices: FxHashMap<String, Index>,
}

impl KindState {
    fn unindex(&mut self, obj: &Object) {
        for idx in self.indices.values_mut() {
            idx.remove(obj);
        }
    }

    fn index(&mut self, obj: &Object) {
        for idx in self.indices.values_mut() {
            idx.insert(obj);
        }
    }
}

/// Immutable view of every kind, swapped in after each write.
#[derive(Debug, Clone, Default)]
pub struct StoreSnapshot {
    pub epoch: u64,
    pub kinds: FxHashMap<String, Arc<Vec<Object>>>,
}

impl StoreSnapshot {
    pub fn items(&self, kind: &str) -> &[Object] {
        self.kinds.get(kind).map(|v| v.as_slice()).unwrap_or(&[])
    }
}

/// Mutation counters, used by tests to assert idempotence.
#[derive(Debug, Default)]
pub struct MutationStats {
    pub creates: AtomicU64,
    pub updates: AtomicU64,
    pub deletes: AtomicU64,
    pub status_updates: AtomicU64,
}

impl MutationStats {
    pub fn total(&self) -> u64 {
        self.creates.load(Ordering::SeqCst)
            + self.updates.load(Ordering::SeqCst)
            + self.deletes.load(Ordering::SeqCst)
            + self.status_updates.load(Ordering::SeqCst)
    }
}

/// In-RAM [`ObjectStore`]. Keeps caller supplied uids; assigns a v4 uid otherwise.
pub struct MemStore {
    name: String,
    state: Mutex<FxHashMap<String, KindState>>,
    snap: ArcSwap<StoreSnapshot>,
    events: broadcast::Sender<Delta>,
    rv: AtomicU64,
    stats: MutationStats,
}

impl MemStore {
    pub fn new(name: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            name: name.into(),
            state: Mutex::new(FxHashMap::default()),
            snap: ArcSwap::from_pointee(StoreSnapshot::default()),
            events,
            rv: AtomicU64::new(0),
            stats: MutationStats::default(),
        }
    }

    pub fn stats(&self) -> &MutationStats { &self.stats }

    pub fn current(&self) -> Arc<StoreSnapshot> { self.snap.load_full() }

    /// Insert objects without counting mutations or emitting events (test fixtures, cache warmup).
    pub fn seed(&self, objs: impl IntoIterator<Item = Object>) {
        let mut state = self.lock();
        let mut touched = BTreeSet::new();
        for mut obj in objs {
            if obj.uid.is_none() {
                obj.uid = Some(*uuid::Uuid::new_v4().as_bytes());
            }
            obj.resource_version = Some(self.next_rv());
            let ks = state.entry(obj.kind.clone()).or_default();
            if let Some(old) = ks.objects.remove(&obj.key()) {
                ks.unindex(&old);
            }
            ks.index(&obj);
            touched.insert(obj.kind.clone());
            ks.objects.insert(obj.key(), obj);
        }
        for kind in touched {
            self.publish(&state, &kind);
        }
    }

    fn lock(&self) -> MutexGuard<'_, FxHashMap<String, KindState>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_rv(&self) -> String {
        (self.rv.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    fn publish(&self, state: &FxHashMap<String, KindState>, kind: &str) {
        let items: Vec<Object> = state.get(kind).map(|ks| ks.objects.values().cloned().collect()).unwrap_or_default();
        let cur = self.snap.load_full();
        let mut kinds = cur.kinds.clone();
        kinds.insert(kind.to_string(), Arc::new(items));
        self.snap.store(Arc::new(StoreSnapshot { epoch: cur.epoch.saturating_add(1), kinds }));
    }

    fn emit(&self, kind: DeltaKind, object: Object) {
        // no subscribers is fine
        let _ = self.events.send(Delta { kind, object });
    }

    /// Swap in a new version of an existing object. With `status_only` only the
    /// `status` stanza of `obj` is taken, the rest of the stored object is kept.
    fn replace(&self, obj: Object, status_only: bool) -> StoreResult<Object> {
        let mut state = self.lock();
        let key = obj.key();
        let ks = state.get_mut(&obj.kind).ok_or_else(|| Self::not_found(&obj.kind, &key))?;
        let cur = ks.objects.get(&key).ok_or_else(|| Self::not_found(&obj.kind, &key))?;
        if let Some(rv) = obj.resource_version.as_deref() {
            if cur.resource_version.as_deref() != Some(rv) {
                return Err(StoreError::Conflict(format!(
                    "{} {}: resource version {} is stale (current {})",
                    obj.kind,
                    key,
                    rv,
                    cur.resource_version.as_deref().unwrap_or("")
                )));
            }
        }
        let mut next = if status_only {
            let mut next = cur.clone();
            next.set_status(obj.status().cloned());
            next
        } else {
            Object { uid: cur.uid, ..obj }
        };
        next.resource_version = Some(self.next_rv());
        if let Some(old) = ks.objects.remove(&key) {
            ks.unindex(&old);
        }
        ks.index(&next);
        ks.objects.insert(key, next.clone());
        self.publish(&state, &next.kind);
        Ok(next)
    }

    fn not_found(kind: &str, key: &ObjectKey) -> StoreError {
        StoreError::NotFound(format!("{} {}", kind, key))
    }
}

#[async_trait::async_trait]
impl ObjectStore for MemStore {
    fn name(&self) -> &str { &self.name }

    async fn get(&self, kind: &str, key: &ObjectKey) -> StoreResult<Object> {
        let state = self.lock();
        state
            .get(kind)
            .and_then(|ks| ks.objects.get(key))
            .cloned()
            .ok_or_else(|| Self::not_found(kind, key))
    }

    async fn list(&self, kind: &str, namespace: Option<&str>) -> StoreResult<Vec<Object>> {
        let snap = self.snap.load();
        let items = snap.items(kind);
        Ok(match namespace {
            Some(ns) => items.iter().filter(|o| o.namespace.as_deref() == Some(ns)).cloned().collect(),
            None => items.to_vec(),
        })
    }

    async fn list_by_index(&self, kind: &str, index: &str, value: &str) -> StoreResult<Vec<Object>> {
        let state = self.lock();
        let Some(ks) = state.get(kind) else { return Ok(Vec::new()) };
        let idx = ks
            .indices
            .get(index)
            .ok_or_else(|| StoreError::Invalid(format!("index {} not registered for {}", index, kind)))?;
        Ok(idx
            .postings
            .get(value)
            .map(|keys| keys.iter().filter_map(|k| ks.objects.get(k).cloned()).collect())
            .unwrap_or_default())
    }

    async fn create(&self, mut obj: Object) -> StoreResult<Object> {
        if obj.name.is_empty() {
            return Err(StoreError::Invalid(format!("{}: object name must not be empty", obj.kind)));
        }
        let out = {
            let mut state = self.lock();
            let ks = state.entry(obj.kind.clone()).or_default();
            let key = obj.key();
            if ks.objects.contains_key(&key) {
                return Err(StoreError::AlreadyExists(format!("{} {}", obj.kind, key)));
            }
            if obj.uid.is_none() {
                obj.uid = Some(*uuid::Uuid::new_v4().as_bytes());
            }
            obj.resource_version = Some(self.next_rv());
            ks.index(&obj);
            ks.objects.insert(key, obj.clone());
            self.publish(&state, &obj.kind);
            obj
        };
        self.stats.creates.fetch_add(1, Ordering::SeqCst);
        counter!("vsync_store_mutations_total", 1, "store" => self.name.clone(), "op" => "create");
        debug!(store = %self.name, kind = %out.kind, key = %out.key(), "created");
        self.emit(DeltaKind::Applied, out.clone());
        Ok(out)
    }

    async fn update(&self, obj: Object) -> StoreResult<Object> {
        let out = self.replace(obj, false)?;
        self.stats.updates.fetch_add(1, Ordering::SeqCst);
        counter!("vsync_store_mutations_total", 1, "store" => self.name.clone(), "op" => "update");
        debug!(store = %self.name, kind = %out.kind, key = %out.key(), rv = ?out.resource_version, "updated");
        self.emit(DeltaKind::Applied, out.clone());
        Ok(out)
    }

    async fn update_status(&self, obj: Object) -> StoreResult<Object> {
        let out = self.replace(obj, true)?;
        self.stats.status_updates.fetch_add(1, Ordering::SeqCst);
        counter!("vsync_store_mutations_total", 1, "store" => self.name.clone(), "op" => "update_status");
        debug!(store = %self.name, kind = %out.kind, key = %out.key(), rv = ?out.resource_version, "status updated");
        self.emit(DeltaKind::Applied, out.clone());
        Ok(out)
    }

    async fn delete(&self, obj: &Object) -> StoreResult<()> {
        let removed = {
            let mut state = self.lock();
            let key = obj.key();
            let ks = state.get_mut(&obj.kind).ok_or_else(|| Self::not_found(&obj.kind, &key))?;
            let cur = ks.objects.get(&key).ok_or_else(|| Self::not_found(&obj.kind, &key))?;
            if obj.uid.is_some() && cur.uid != obj.uid {
                return Err(StoreError::Conflict(format!("{} {}: uid precondition failed", obj.kind, key)));
            }
            let removed = ks.objects.remove(&key);
            if let Some(old) = removed.as_ref() {
                ks.unindex(old);
            }
            self.publish(&state, &obj.kind);
            removed
        };
        self.stats.deletes.fetch_add(1, Ordering::SeqCst);
        counter!("vsync_store_mutations_total", 1, "store" => self.name.clone(), "op" => "delete");
        if let Some(old) = removed {
            debug!(store = %self.name, kind = %old.kind, key = %old.key(), "deleted");
            self.emit(DeltaKind::Deleted, old);
        }
        Ok(())
    }

    fn register_index(&self, kind: &str, index: &str, func: IndexFn) -> StoreResult<()> {
        let mut state = self.lock();
        let ks = state.entry(kind.to_string()).or_default();
        let mut idx = Index { func, postings: FxHashMap::default() };
        for obj in ks.objects.values() {
            idx.insert(obj);
        }
        if ks.indices.insert(index.to_string(), idx).is_some() {
            debug!(store = %self.name, kind, index, "index replaced");
        }
        Ok(())
    }

    async fn watch(&self, kind: &str) -> StoreResult<mpsc::Receiver<Delta>> {
        let mut rx = self.events.subscribe();
        let (tx, out) = mpsc::channel(WATCH_BUFFER);
        let kind = kind.to_string();
        let store = self.name.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(d) if d.object.kind == kind => {
                        if tx.send(d).await.is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        // dropped notifications are repaired by the next garbage collection pass
                        warn!(store = %store, kind = %kind, missed = n, "watch lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!(store = %store, kind = %kind, "watch stopped");
        });
        Ok(out)
    }
}
