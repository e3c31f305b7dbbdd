//! Label and annotation rewriting between virtual and host objects.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use regex::RegexSet;
use vsync_core::naming::{
    CONTROLLER_LABEL, MANAGED_ANNOTATIONS_ANNOTATION, MARKER_LABEL, NAMESPACE_ANNOTATION, NAMESPACE_LABEL,
    NAME_ANNOTATION, UID_ANNOTATION,
};
use vsync_core::{Object, ObjectKey, TranslationContext};

use crate::error::{SyncError, SyncResult};

/// Annotations written by the engine itself; never copied from a virtual object.
const RESERVED_ANNOTATIONS: [&str; 4] =
    [NAME_ANNOTATION, NAMESPACE_ANNOTATION, UID_ANNOTATION, MANAGED_ANNOTATIONS_ANNOTATION];

/// Result of merging a virtual object's metadata into an existing host object.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataUpdate {
    pub changed: bool,
    pub annotations: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
}

#[derive(Clone)]
pub struct MetadataTranslator {
    ctx: Arc<TranslationContext>,
    synced: RegexSet,
    cluster_scoped: bool,
}

impl MetadataTranslator {
    pub fn new(ctx: Arc<TranslationContext>, cluster_scoped: bool) -> SyncResult<Self> {
        let patterns = ctx.synced_labels.iter().map(|l| match l.strip_suffix('*') {
            Some(prefix) => format!("^{}.*$", regex::escape(prefix)),
            None => format!("^{}$", regex::escape(l)),
        });
        let synced = RegexSet::new(patterns).map_err(|e| SyncError::Config(format!("synced labels: {}", e)))?;
        Ok(Self { ctx, synced, cluster_scoped })
    }

    fn marker(&self) -> String {
        if self.cluster_scoped {
            self.ctx.cluster_marker()
        } else {
            self.ctx.marker().to_string()
        }
    }

    pub fn translate_labels(&self, vobj: &Object) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        for (k, v) in &vobj.labels {
            if k == MARKER_LABEL || k == NAMESPACE_LABEL {
                continue;
            }
            let key = if self.synced.is_match(k) { k.clone() } else { self.ctx.convert_label_key(k) };
            out.insert(key, v.clone());
        }
        out.insert(MARKER_LABEL.to_string(), self.marker());
        if !self.cluster_scoped {
            if let Some(ns) = vobj.namespace.as_deref() {
                out.insert(NAMESPACE_LABEL.to_string(), ns.to_string());
            }
        }
        out
    }

    /// Copy virtual annotations onto `base`, dropping keys a previous sync managed that are gone now.
    pub fn translate_annotations(&self, vobj: &Object, base: Option<&BTreeMap<String, String>>) -> BTreeMap<String, String> {
        let mut out = base.cloned().unwrap_or_default();
        if let Some(prev) = out.get(MANAGED_ANNOTATIONS_ANNOTATION).cloned() {
            for k in prev.lines().filter(|k| !k.is_empty()) {
                if !vobj.annotations.contains_key(k) {
                    out.remove(k);
                }
            }
        }
        let mut managed = BTreeSet::new();
        for (k, v) in &vobj.annotations {
            if RESERVED_ANNOTATIONS.contains(&k.as_str()) {
                continue;
            }
            out.insert(k.clone(), v.clone());
            managed.insert(k.as_str());
        }
        if managed.is_empty() {
            out.remove(MANAGED_ANNOTATIONS_ANNOTATION);
        } else {
            out.insert(MANAGED_ANNOTATIONS_ANNOTATION.to_string(), managed.into_iter().collect::<Vec<_>>().join("\n"));
        }
        out.insert(NAME_ANNOTATION.to_string(), vobj.name.clone());
        match vobj.namespace.as_deref() {
            Some(ns) if !self.cluster_scoped => {
                out.insert(NAMESPACE_ANNOTATION.to_string(), ns.to_string());
            }
            _ => {
                out.remove(NAMESPACE_ANNOTATION);
            }
        }
        match vobj.uid_string() {
            Some(uid) => out.insert(UID_ANNOTATION.to_string(), uid),
            None => out.remove(UID_ANNOTATION),
        };
        out
    }

    /// Fresh host object for `vobj` at `pkey`; server-owned metadata is reset.
    pub fn translate_metadata(&self, vobj: &Object, pkey: &ObjectKey) -> Object {
        Object {
            kind: vobj.kind.clone(),
            namespace: pkey.namespace.clone(),
            name: pkey.name.clone(),
            uid: None,
            resource_version: None,
            labels: self.translate_labels(vobj),
            annotations: self.translate_annotations(vobj, None),
            body: vobj.body.clone(),
        }
    }

    pub fn translate_metadata_update(&self, vobj: &Object, pobj: &Object) -> MetadataUpdate {
        let annotations = self.translate_annotations(vobj, Some(&pobj.annotations));
        let mut labels = self.translate_labels(vobj);
        if let Some(c) = pobj.label(CONTROLLER_LABEL) {
            labels.insert(CONTROLLER_LABEL.to_string(), c.to_string());
        }
        let changed = annotations != pobj.annotations || labels != pobj.labels;
        MetadataUpdate { changed, annotations, labels }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> Arc<TranslationContext> {
        Arc::new(TranslationContext::new("host", "t1").with_synced_labels(vec!["release".into(), "example.com/*".into()]))
    }

    fn vobj() -> Object {
        let mut v = Object::new("v1/ConfigMap", &ObjectKey::namespaced("test", "cfg"))
            .with_label("app", "web")
            .with_label("release", "r1")
            .with_label("example.com/tier", "gold")
            .with_annotation("note", "hi");
        v.uid = Some([1u8; 16]);
        v
    }

    #[test]
    fn labels_are_rewritten_except_synced_ones() {
        let m = MetadataTranslator::new(ctx(), false).unwrap();
        let labels = m.translate_labels(&vobj());
        assert_eq!(labels.get("release").map(String::as_str), Some("r1"));
        assert_eq!(labels.get("example.com/tier").map(String::as_str), Some("gold"));
        assert!(!labels.contains_key("app"));
        assert_eq!(labels.get(&ctx().convert_label_key("app")).map(String::as_str), Some("web"));
        assert_eq!(labels.get(MARKER_LABEL).map(String::as_str), Some("t1"));
        assert_eq!(labels.get(NAMESPACE_LABEL).map(String::as_str), Some("test"));
    }

    #[test]
    fn fresh_metadata_carries_reverse_mapping() {
        let m = MetadataTranslator::new(ctx(), false).unwrap();
        let p = m.translate_metadata(&vobj(), &ObjectKey::namespaced("host", "cfg-x-test-x-t1"));
        assert_eq!(p.uid, None);
        assert_eq!(p.annotation(NAME_ANNOTATION), Some("cfg"));
        assert_eq!(p.annotation(NAMESPACE_ANNOTATION), Some("test"));
        assert_eq!(p.annotation(UID_ANNOTATION), vobj().uid_string().as_deref());
        assert_eq!(p.annotation(MANAGED_ANNOTATIONS_ANNOTATION), Some("note"));
        assert_eq!(p.annotation("note"), Some("hi"));
    }

    #[test]
    fn removed_annotations_are_dropped_and_foreign_ones_kept() {
        let m = MetadataTranslator::new(ctx(), false).unwrap();
        let mut p = m.translate_metadata(&vobj(), &ObjectKey::namespaced("host", "cfg-x-test-x-t1"));
        p.annotations.insert("host.io/injected".into(), "1".into());
        p.labels.insert(CONTROLLER_LABEL.into(), "owner".into());

        let mut v = vobj();
        v.annotations.clear();
        let upd = m.translate_metadata_update(&v, &p);
        assert!(upd.changed);
        assert!(!upd.annotations.contains_key("note"));
        assert!(!upd.annotations.contains_key(MANAGED_ANNOTATIONS_ANNOTATION));
        assert_eq!(upd.annotations.get("host.io/injected").map(String::as_str), Some("1"));
        assert_eq!(upd.labels.get(CONTROLLER_LABEL).map(String::as_str), Some("owner"));
    }

    #[test]
    fn unchanged_object_reports_no_change() {
        let m = MetadataTranslator::new(ctx(), false).unwrap();
        let p = m.translate_metadata(&vobj(), &ObjectKey::namespaced("host", "cfg-x-test-x-t1"));
        assert!(!m.translate_metadata_update(&vobj(), &p).changed);
    }

    #[test]
    fn cluster_scope_uses_cluster_marker() {
        let m = MetadataTranslator::new(ctx(), true).unwrap();
        let v = Object::new("storage.k8s.io/v1/StorageClass", &ObjectKey::cluster("fast"));
        let p = m.translate_metadata(&v, &ObjectKey::cluster("vsync-fast-x-host-x-t1"));
        assert_eq!(p.label(MARKER_LABEL), Some("host-x-t1"));
        assert!(p.annotation(NAMESPACE_ANNOTATION).is_none());
        assert!(p.label(NAMESPACE_LABEL).is_none());
    }
}
