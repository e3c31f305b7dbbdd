//! vsync core types: object identity, store-agnostic objects, deltas and store errors.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub mod naming;

pub use naming::{safe_concat_name, TranslationContext};

pub type Uid = [u8; 16];

/// Namespaced or cluster-scoped identity of an object.
///
/// The empty key (no name) is the "no match" signal returned by translators.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { namespace: Some(namespace.into()), name: name.into() }
    }

    pub fn cluster(name: impl Into<String>) -> Self {
        Self { namespace: None, name: name.into() }
    }

    pub fn empty() -> Self { Self::default() }

    pub fn is_empty(&self) -> bool { self.name.is_empty() }

    pub fn namespace(&self) -> Option<&str> { self.namespace.as_deref() }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.namespace.as_deref() {
            Some(ns) if !ns.is_empty() => write!(f, "{}/{}", ns, self.name),
            _ => f.write_str(&self.name),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DeltaKind {
    Applied,
    Deleted,
}

/// A single watch notification from either store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delta {
    pub kind: DeltaKind,
    pub object: Object,
}

/// Store-agnostic object record shared by the virtual and the host store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Object {
    /// Kind key, e.g. `v1/ConfigMap` or `storage.k8s.io/v1/StorageClass`.
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
    pub uid: Option<Uid>,
    /// Optimistic-concurrency token. `None` on objects that were never persisted.
    pub resource_version: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    /// Everything outside `metadata` (spec, status, data, ...).
    pub body: serde_json::Value,
}

impl Object {
    pub fn new(kind: impl Into<String>, key: &ObjectKey) -> Self {
        Self {
            kind: kind.into(),
            namespace: key.namespace.clone(),
            name: key.name.clone(),
            body: serde_json::Value::Object(serde_json::Map::new()),
            ..Default::default()
        }
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey { namespace: self.namespace.clone(), name: self.name.clone() }
    }

    pub fn label(&self, key: &str) -> Option<&str> { self.labels.get(key).map(String::as_str) }

    pub fn annotation(&self, key: &str) -> Option<&str> { self.annotations.get(key).map(String::as_str) }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = body;
        self
    }

    /// Hyphenated uid, the format used in annotations and by Kubernetes.
    pub fn uid_string(&self) -> Option<String> {
        self.uid.map(|u| uuid::Uuid::from_bytes(u).to_string())
    }

    /// Body without the `status` stanza; status is owned by whichever side runs the workload.
    pub fn spec_body(&self) -> serde_json::Value {
        let mut body = self.body.clone();
        if let Some(map) = body.as_object_mut() {
            map.remove("status");
        }
        body
    }

    pub fn status(&self) -> Option<&serde_json::Value> { self.body.get("status") }

    /// Replace or drop the `status` stanza.
    pub fn set_status(&mut self, status: Option<serde_json::Value>) {
        if !self.body.is_object() {
            self.body = serde_json::Value::Object(serde_json::Map::new());
        }
        if let Some(map) = self.body.as_object_mut() {
            match status {
                Some(st) => {
                    map.insert("status".to_string(), st);
                }
                None => {
                    map.remove("status");
                }
            }
        }
    }
}

/// Store errors. `NotFound` must stay distinguishable: the reconcilers treat it as absence.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum StoreError {
    #[error("not_found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("already_exists: {0}")]
    AlreadyExists(String),
    #[error("invalid: {0}")]
    Invalid(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool { matches!(self, StoreError::NotFound(_)) }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_) | StoreError::AlreadyExists(_))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Map `NotFound` to `Ok(None)`.
pub fn ignore_not_found<T>(res: StoreResult<T>) -> StoreResult<Option<T>> {
    match res {
        Ok(v) => Ok(Some(v)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

pub mod prelude {
    pub use super::{
        ignore_not_found, Delta, DeltaKind, Object, ObjectKey, StoreError, StoreResult, TranslationContext, Uid,
    };
}
