//! Physical naming and the translation context threaded through translators and syncers.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Label proving a host object is owned by this tenant's engine.
pub const MARKER_LABEL: &str = "vsync.io/managed-by";
/// Label carrying the virtual namespace of a namespaced host object.
pub const NAMESPACE_LABEL: &str = "vsync.io/namespace";
pub const CONTROLLER_LABEL: &str = "vsync.io/controlled-by";
/// Prefix for rewritten tenant label keys.
pub const LABEL_PREFIX: &str = "vsync.io/label";

pub const NAME_ANNOTATION: &str = "vsync.io/object-name";
pub const NAMESPACE_ANNOTATION: &str = "vsync.io/object-namespace";
pub const UID_ANNOTATION: &str = "vsync.io/object-uid";
/// Newline separated list of annotation keys copied from the virtual object.
pub const MANAGED_ANNOTATIONS_ANNOTATION: &str = "vsync.io/managed-annotations";

/// Prefix of cluster-scoped host names and multi-namespace host namespaces.
pub const HOST_PREFIX: &str = "vsync";

const MAX_NAME_LEN: usize = 63;
const TRUNCATED_LEN: usize = 52;

pub fn sha256_hex(s: &str) -> String {
    format!("{:x}", Sha256::digest(s.as_bytes()))
}

/// Join parts with `-`, keeping the result a valid DNS label length.
pub fn safe_concat_name(parts: &[&str]) -> String {
    let full = parts.join("-");
    if full.len() > MAX_NAME_LEN {
        let digest = sha256_hex(&full);
        let mut cut = TRUNCATED_LEN;
        while !full.is_char_boundary(cut) {
            cut -= 1;
        }
        return format!("{}-{}", &full[..cut], &digest[..10]).replace(".-", "-");
    }
    full
}

/// Naming inputs for one tenant, built once at process start.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TranslationContext {
    /// Shared host namespace (single-namespace mode) or the tenant's own namespace.
    pub target_namespace: String,
    /// Tenant name; doubles as the managed marker value.
    pub suffix: String,
    /// Map every virtual namespace to its own host namespace instead of renaming objects.
    pub multi_namespace: bool,
    /// Label keys copied verbatim to host objects; `prefix/*` matches a whole prefix.
    pub synced_labels: Vec<String>,
}

impl TranslationContext {
    pub fn new(target_namespace: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self {
            target_namespace: target_namespace.into(),
            suffix: suffix.into(),
            multi_namespace: false,
            synced_labels: Vec::new(),
        }
    }

    pub fn with_multi_namespace(mut self, on: bool) -> Self {
        self.multi_namespace = on;
        self
    }

    pub fn with_synced_labels(mut self, labels: Vec<String>) -> Self {
        self.synced_labels = labels;
        self
    }

    pub fn physical_name(&self, name: &str, namespace: &str) -> String {
        if name.is_empty() {
            return String::new();
        }
        if self.multi_namespace {
            return name.to_string();
        }
        safe_concat_name(&[name, "x", namespace, "x", &self.suffix])
    }

    pub fn physical_namespace(&self, virtual_namespace: &str) -> String {
        if !self.multi_namespace {
            return self.target_namespace.clone();
        }
        format!("{}-{}-{}", HOST_PREFIX, &sha256_hex(virtual_namespace)[..8], self.namespace_suffix())
    }

    pub fn is_targeted_namespace(&self, namespace: &str) -> bool {
        if !self.multi_namespace {
            return namespace == self.target_namespace;
        }
        namespace.starts_with(&format!("{}-", HOST_PREFIX)) && namespace.ends_with(&self.namespace_suffix())
    }

    fn namespace_suffix(&self) -> String {
        sha256_hex(&format!("{}x{}", self.target_namespace, self.suffix))[..8].to_string()
    }

    pub fn physical_name_cluster_scoped(&self, name: &str) -> String {
        if name.is_empty() {
            return String::new();
        }
        safe_concat_name(&[HOST_PREFIX, name, "x", &self.target_namespace, "x", &self.suffix])
    }

    /// Marker value on namespaced host objects.
    pub fn marker(&self) -> &str { &self.suffix }

    /// Marker value on cluster-scoped host objects.
    pub fn cluster_marker(&self) -> String {
        safe_concat_name(&[&self.target_namespace, "x", &self.suffix])
    }

    pub fn convert_label_key(&self, key: &str) -> String {
        safe_concat_name(&[LABEL_PREFIX, &self.suffix, "x", &sha256_hex(key)[..10]])
    }
}
