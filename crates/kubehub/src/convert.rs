//! `DynamicObject` <-> `Object` conversion and API error mapping.

use anyhow::{anyhow, Context, Result};
use kube::core::{ApiResource, DynamicObject, GroupVersionKind, ObjectMeta};
use uuid::Uuid;
use vsync_core::{Object, StoreError, Uid};

pub(crate) fn parse_kind_key(key: &str) -> Result<GroupVersionKind> {
    let parts: Vec<_> = key.split('/').collect();
    match parts.as_slice() {
        [version, kind] if !version.is_empty() && !kind.is_empty() => {
            Ok(GroupVersionKind { group: String::new(), version: version.to_string(), kind: kind.to_string() })
        }
        [group, version, kind] if !group.is_empty() && !version.is_empty() && !kind.is_empty() => Ok(GroupVersionKind {
            group: (*group).to_string(),
            version: (*version).to_string(),
            kind: (*kind).to_string(),
        }),
        _ => Err(anyhow!("invalid kind key: {} (expect v1/Kind or group/v1/Kind)", key)),
    }
}

fn to_uid(uid_str: &str) -> Result<Uid> {
    let u = Uuid::parse_str(uid_str).context("parsing metadata.uid as uuid")?;
    Ok(*u.as_bytes())
}

fn non_empty<T>(m: std::collections::BTreeMap<String, T>) -> Option<std::collections::BTreeMap<String, T>> {
    if m.is_empty() {
        None
    } else {
        Some(m)
    }
}

pub(crate) fn from_dynamic(kind: &str, obj: DynamicObject) -> Result<Object> {
    let meta = obj.metadata;
    let uid = meta.uid.as_deref().map(to_uid).transpose()?;
    let mut body = obj.data;
    if let Some(map) = body.as_object_mut() {
        map.remove("apiVersion");
        map.remove("kind");
        map.remove("metadata");
    }
    if body.is_null() {
        body = serde_json::Value::Object(serde_json::Map::new());
    }
    Ok(Object {
        kind: kind.to_string(),
        namespace: meta.namespace,
        name: meta.name.unwrap_or_default(),
        uid,
        resource_version: meta.resource_version,
        labels: meta.labels.unwrap_or_default(),
        annotations: meta.annotations.unwrap_or_default(),
        body,
    })
}

pub(crate) fn to_dynamic(obj: &Object, ar: &ApiResource, namespaced: bool) -> DynamicObject {
    let mut out = DynamicObject::new(&obj.name, ar);
    out.metadata = ObjectMeta {
        name: Some(obj.name.clone()),
        namespace: if namespaced { obj.namespace.clone() } else { None },
        uid: obj.uid_string(),
        resource_version: obj.resource_version.clone(),
        labels: non_empty(obj.labels.clone()),
        annotations: non_empty(obj.annotations.clone()),
        ..Default::default()
    };
    out.data = obj.body.clone();
    out
}

pub(crate) fn map_error(what: &str, err: kube::Error) -> StoreError {
    match err {
        kube::Error::Api(resp) => match resp.code {
            404 => StoreError::NotFound(format!("{}: {}", what, resp.message)),
            409 if resp.reason == "AlreadyExists" => StoreError::AlreadyExists(format!("{}: {}", what, resp.message)),
            409 => StoreError::Conflict(format!("{}: {}", what, resp.message)),
            400 | 422 => StoreError::Invalid(format!("{}: {}", what, resp.message)),
            _ => StoreError::Internal(format!("{}: {} ({})", what, resp.message, resp.code)),
        },
        other => StoreError::Internal(format!("{}: {}", what, other)),
    }
}
