//! vsync kubehub: an [`ObjectStore`] over a Kubernetes API server (discovery, CRUD, watch).

#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use anyhow::{anyhow, Context, Result};
use futures::StreamExt;
use k8s_openapi::api::core::v1::Namespace;
use kube::{
    api::{Api, DeleteParams, ListParams, PostParams, Preconditions},
    config::{KubeConfigOptions, Kubeconfig},
    core::{ApiResource, DynamicObject},
    discovery::{Discovery, Scope},
    runtime::{
        watcher::{self, Event},
        WatchStreamExt,
    },
    Client, Config,
};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use vsync_core::{Delta, DeltaKind, Object, ObjectKey, StoreError, StoreResult};
use vsync_store::{IndexFn, ObjectStore, WATCH_BUFFER};

mod convert;

use convert::{from_dynamic, map_error, parse_kind_key, to_dynamic};

/// Build a client from an explicit kubeconfig file, or the default chain when `None`.
pub async fn connect(kubeconfig: Option<&Path>) -> Result<Client> {
    match kubeconfig {
        None => Client::try_default().await.context("building default kube client"),
        Some(path) => {
            let kc = Kubeconfig::read_from(path).with_context(|| format!("reading kubeconfig {}", path.display()))?;
            let cfg = Config::from_custom_kubeconfig(kc, &KubeConfigOptions::default())
                .await
                .context("loading kubeconfig")?;
            Client::try_from(cfg).context("building kube client")
        }
    }
}

#[derive(Clone)]
struct Resolved {
    ar: ApiResource,
    namespaced: bool,
}

/// Kubernetes-backed store. Kind keys use the `v1/Kind` / `group/v1/Kind` form.
pub struct KubeStore {
    name: String,
    client: Client,
    resources: RwLock<HashMap<String, Resolved>>,
    indices: Mutex<HashMap<(String, String), IndexFn>>,
    create_namespaces: bool,
}

impl KubeStore {
    pub fn new(name: impl Into<String>, client: Client) -> Self {
        Self {
            name: name.into(),
            client,
            resources: RwLock::new(HashMap::new()),
            indices: Mutex::new(HashMap::new()),
            create_namespaces: false,
        }
    }

    /// Create a missing target namespace before creating a namespaced object in it.
    pub fn with_namespace_creation(mut self, on: bool) -> Self {
        self.create_namespaces = on;
        self
    }

    /// Resolve kind keys up front so a typo fails at startup rather than on first sync.
    pub async fn preload(&self, kinds: &[String]) -> Result<()> {
        let discovery = Discovery::new(self.client.clone()).run().await.context("running discovery")?;
        let mut cache = self.resources.write().await;
        for key in kinds {
            let gvk = parse_kind_key(key)?;
            let found = discovery.groups().flat_map(|g| g.recommended_resources()).find(|(ar, _)| {
                ar.group == gvk.group && ar.version == gvk.version && ar.kind == gvk.kind
            });
            let (ar, caps) = found.ok_or_else(|| anyhow!("kind not served by {}: {}", self.name, key))?;
            info!(store = %self.name, kind = %key, namespaced = matches!(caps.scope, Scope::Namespaced), "kind resolved");
            cache.insert(key.clone(), Resolved { ar, namespaced: matches!(caps.scope, Scope::Namespaced) });
        }
        Ok(())
    }

    async fn resolve(&self, kind: &str) -> StoreResult<Resolved> {
        if let Some(r) = self.resources.read().await.get(kind) {
            return Ok(r.clone());
        }
        self.preload(&[kind.to_string()]).await.map_err(|e| StoreError::Invalid(format!("{:#}", e)))?;
        self.resources
            .read()
            .await
            .get(kind)
            .cloned()
            .ok_or_else(|| StoreError::Invalid(format!("unknown kind {}", kind)))
    }

    fn api(&self, r: &Resolved, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(ns) if r.namespaced => Api::namespaced_with(self.client.clone(), ns, &r.ar),
            _ => Api::all_with(self.client.clone(), &r.ar),
        }
    }

    async fn ensure_namespace(&self, ns: &str) -> StoreResult<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        match api.get_opt(ns).await {
            Ok(Some(_)) => Ok(()),
            Ok(None) => {
                let mut obj = Namespace::default();
                obj.metadata.name = Some(ns.to_string());
                match api.create(&PostParams::default(), &obj).await {
                    Ok(_) => {
                        info!(store = %self.name, namespace = ns, "namespace created");
                        Ok(())
                    }
                    Err(e) => match map_error(ns, e) {
                        StoreError::AlreadyExists(_) => Ok(()),
                        other => Err(other),
                    },
                }
            }
            Err(e) => Err(map_error(ns, e)),
        }
    }

    fn convert(&self, kind: &str, obj: DynamicObject) -> StoreResult<Object> {
        from_dynamic(kind, obj).map_err(|e| StoreError::Internal(format!("{:#}", e)))
    }

    fn record(&self, op: &'static str) {
        metrics::counter!("vsync_store_mutations_total", 1, "store" => self.name.clone(), "op" => op);
    }
}

#[async_trait::async_trait]
impl ObjectStore for KubeStore {
    fn name(&self) -> &str { &self.name }

    async fn get(&self, kind: &str, key: &ObjectKey) -> StoreResult<Object> {
        let r = self.resolve(kind).await?;
        let api = self.api(&r, key.namespace());
        let obj = api.get(&key.name).await.map_err(|e| map_error(&format!("{} {}", kind, key), e))?;
        self.convert(kind, obj)
    }

    async fn list(&self, kind: &str, namespace: Option<&str>) -> StoreResult<Vec<Object>> {
        let r = self.resolve(kind).await?;
        let api = self.api(&r, namespace);
        let list = api.list(&ListParams::default()).await.map_err(|e| map_error(kind, e))?;
        list.items.into_iter().map(|o| self.convert(kind, o)).collect()
    }

    async fn list_by_index(&self, kind: &str, index: &str, value: &str) -> StoreResult<Vec<Object>> {
        let func = self
            .indices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(kind.to_string(), index.to_string()))
            .cloned()
            .ok_or_else(|| StoreError::Invalid(format!("index {} not registered for {}", index, kind)))?;
        let all = self.list(kind, None).await?;
        Ok(all.into_iter().filter(|o| func(o).iter().any(|v| v == value)).collect())
    }

    async fn create(&self, obj: Object) -> StoreResult<Object> {
        let r = self.resolve(&obj.kind).await?;
        if self.create_namespaces && r.namespaced {
            if let Some(ns) = obj.namespace.as_deref() {
                self.ensure_namespace(ns).await?;
            }
        }
        let api = self.api(&r, obj.namespace.as_deref());
        let mut dynamic = to_dynamic(&obj, &r.ar, r.namespaced);
        dynamic.metadata.uid = None;
        dynamic.metadata.resource_version = None;
        let created = api
            .create(&PostParams::default(), &dynamic)
            .await
            .map_err(|e| map_error(&format!("{} {}", obj.kind, obj.key()), e))?;
        self.record("create");
        debug!(store = %self.name, kind = %obj.kind, key = %obj.key(), "created");
        self.convert(&obj.kind, created)
    }

    async fn update(&self, obj: Object) -> StoreResult<Object> {
        let r = self.resolve(&obj.kind).await?;
        let api = self.api(&r, obj.namespace.as_deref());
        let mut dynamic = to_dynamic(&obj, &r.ar, r.namespaced);
        if dynamic.metadata.resource_version.is_none() {
            // replace requires a version; an unconditional update takes the current one
            let cur = api.get(&obj.name).await.map_err(|e| map_error(&format!("{} {}", obj.kind, obj.key()), e))?;
            dynamic.metadata.resource_version = cur.metadata.resource_version;
        }
        let updated = api
            .replace(&obj.name, &PostParams::default(), &dynamic)
            .await
            .map_err(|e| map_error(&format!("{} {}", obj.kind, obj.key()), e))?;
        self.record("update");
        debug!(store = %self.name, kind = %obj.kind, key = %obj.key(), "updated");
        self.convert(&obj.kind, updated)
    }

    async fn update_status(&self, obj: Object) -> StoreResult<Object> {
        let r = self.resolve(&obj.kind).await?;
        let api = self.api(&r, obj.namespace.as_deref());
        let mut dynamic = to_dynamic(&obj, &r.ar, r.namespaced);
        if dynamic.metadata.resource_version.is_none() {
            let cur = api.get(&obj.name).await.map_err(|e| map_error(&format!("{} {}", obj.kind, obj.key()), e))?;
            dynamic.metadata.resource_version = cur.metadata.resource_version;
        }
        let data = serde_json::to_vec(&dynamic)
            .map_err(|e| StoreError::Internal(format!("{} {}: encode status: {}", obj.kind, obj.key(), e)))?;
        let updated = api
            .replace_status(&obj.name, &PostParams::default(), data)
            .await
            .map_err(|e| map_error(&format!("{} {}", obj.kind, obj.key()), e))?;
        self.record("update_status");
        debug!(store = %self.name, kind = %obj.kind, key = %obj.key(), "status updated");
        self.convert(&obj.kind, updated)
    }

    async fn delete(&self, obj: &Object) -> StoreResult<()> {
        let r = self.resolve(&obj.kind).await?;
        let api = self.api(&r, obj.namespace.as_deref());
        let dp = DeleteParams {
            preconditions: obj.uid_string().map(|uid| Preconditions { uid: Some(uid), resource_version: None }),
            ..DeleteParams::default()
        };
        api.delete(&obj.name, &dp).await.map_err(|e| map_error(&format!("{} {}", obj.kind, obj.key()), e))?;
        self.record("delete");
        debug!(store = %self.name, kind = %obj.kind, key = %obj.key(), "deleted");
        Ok(())
    }

    fn register_index(&self, kind: &str, index: &str, func: IndexFn) -> StoreResult<()> {
        self.indices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((kind.to_string(), index.to_string()), func);
        Ok(())
    }

    async fn watch(&self, kind: &str) -> StoreResult<mpsc::Receiver<Delta>> {
        let r = self.resolve(kind).await?;
        let api = self.api(&r, None);
        let (tx, rx) = mpsc::channel(WATCH_BUFFER);
        let kind = kind.to_string();
        let store = self.name.clone();
        tokio::spawn(async move {
            let stream = watcher::watcher(api, watcher::Config::default()).default_backoff();
            futures::pin_mut!(stream);
            info!(store = %store, kind = %kind, "watcher started");
            while let Some(ev) = stream.next().await {
                let (delta_kind, objs) = match ev {
                    Ok(Event::Applied(o)) => (DeltaKind::Applied, vec![o]),
                    Ok(Event::Deleted(o)) => (DeltaKind::Deleted, vec![o]),
                    Ok(Event::Restarted(list)) => {
                        debug!(store = %store, kind = %kind, count = list.len(), "watch restart");
                        (DeltaKind::Applied, list)
                    }
                    Err(e) => {
                        warn!(store = %store, kind = %kind, error = %e, "watch error");
                        continue;
                    }
                };
                for o in objs {
                    match from_dynamic(&kind, o) {
                        Ok(object) => {
                            if tx.send(Delta { kind: delta_kind, object }).await.is_err() {
                                debug!(store = %store, kind = %kind, "watch receiver dropped");
                                return;
                            }
                        }
                        Err(e) => warn!(store = %store, kind = %kind, error = %e, "skipping undecodable object"),
                    }
                }
            }
            warn!(store = %store, kind = %kind, "watcher stream ended");
        });
        Ok(rx)
    }
}
