//! # Cluster Store
//!
//! The narrow interface the reconciler uses to read and write cluster objects.
//!
//! Everything goes through [`DynamicObject`] so that provider manifests of any
//! kind can be handled uniformly. Typed `k8s-openapi` objects are converted at
//! the edges with [`to_dynamic`] and [`from_dynamic`].
//!
//! Two implementations exist:
//! - [`KubeStore`] talks to the API server, resolving kinds via discovery
//! - [`MemoryStore`] keeps objects in memory and backs the test suite

mod kube_store;
mod memory;

pub use kube_store::KubeStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use kube::api::{DynamicObject, GroupVersionKind};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// `apiVersion` + `kind` of an object
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeRef {
    pub api_version: String,
    pub kind: String,
}

impl TypeRef {
    pub fn new(api_version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
        }
    }

    /// Type of a `k8s-openapi` resource
    #[must_use]
    pub fn of<K: k8s_openapi::Resource>() -> Self {
        Self::new(K::API_VERSION, K::KIND)
    }

    #[must_use]
    pub fn gvk(&self) -> GroupVersionKind {
        let (group, version) = match self.api_version.split_once('/') {
            Some((g, v)) => (g.to_string(), v.to_string()),
            None => (String::new(), self.api_version.clone()),
        };
        GroupVersionKind {
            group,
            version,
            kind: self.kind.clone(),
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.api_version, self.kind)
    }
}

/// Full identity of a single object
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub type_ref: TypeRef,
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn new(type_ref: TypeRef, namespace: Option<&str>, name: impl Into<String>) -> Self {
        Self {
            type_ref,
            namespace: namespace.map(str::to_string),
            name: name.into(),
        }
    }

    /// Key of an existing object; fails when type or name are missing
    pub fn of(obj: &DynamicObject) -> Result<Self, StoreError> {
        let types = obj
            .types
            .as_ref()
            .ok_or_else(|| StoreError::Invalid("apiVersion/kind".to_string()))?;
        let name = obj
            .metadata
            .name
            .clone()
            .ok_or_else(|| StoreError::Invalid("metadata.name".to_string()))?;
        Ok(Self {
            type_ref: TypeRef::new(types.api_version.clone(), types.kind.clone()),
            namespace: obj.metadata.namespace.clone(),
            name,
        })
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {}/{}", self.type_ref.kind, ns, self.name),
            None => write!(f, "{} {}", self.type_ref.kind, self.name),
        }
    }
}

/// Cluster store errors
///
/// `NotFound` is distinguishable so callers can branch on create-vs-update.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("conflict writing {0}")]
    Conflict(String),

    #[error("object is missing {0}")]
    Invalid(String),

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("failed to convert object: {0}")]
    Serde(#[from] serde_json::Error),
}

impl StoreError {
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Read/write access to cluster objects
#[async_trait]
pub trait ClusterStore: Send + Sync {
    async fn get(&self, key: &ObjectKey) -> Result<DynamicObject, StoreError>;

    async fn create(&self, obj: &DynamicObject) -> Result<DynamicObject, StoreError>;

    /// Replace an existing object
    async fn update(&self, obj: &DynamicObject) -> Result<DynamicObject, StoreError>;

    /// Apply a JSON merge patch (RFC 7386)
    async fn patch(&self, key: &ObjectKey, patch: &Value) -> Result<DynamicObject, StoreError>;

    /// Patch the status subresource with a JSON merge patch
    async fn patch_status(
        &self,
        key: &ObjectKey,
        patch: &Value,
    ) -> Result<DynamicObject, StoreError>;

    /// List objects of a type, optionally scoped to a namespace and filtered by label selector
    async fn list(
        &self,
        type_ref: &TypeRef,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<DynamicObject>, StoreError>;

    async fn delete(&self, key: &ObjectKey) -> Result<(), StoreError>;
}

/// Convert a typed object into a [`DynamicObject`]
pub fn to_dynamic<K: Serialize>(obj: &K) -> Result<DynamicObject, StoreError> {
    Ok(serde_json::from_value(serde_json::to_value(obj)?)?)
}

/// Convert a [`DynamicObject`] into a typed object
pub fn from_dynamic<K: DeserializeOwned>(obj: &DynamicObject) -> Result<K, StoreError> {
    Ok(serde_json::from_value(serde_json::to_value(obj)?)?)
}

/// Apply an RFC 7386 JSON merge patch to `target` in place
pub fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(serde_json::Map::new());
    }
    if let Value::Object(target_map) = target {
        for (key, value) in patch_map {
            if value.is_null() {
                target_map.remove(key);
            } else {
                merge_patch(
                    target_map.entry(key.clone()).or_insert(Value::Null),
                    value,
                );
            }
        }
    }
}

/// Does `labels` satisfy a simple `key`, `key=value`, `key!=value` selector list?
#[must_use]
pub fn matches_selector(
    labels: Option<&std::collections::BTreeMap<String, String>>,
    selector: &str,
) -> bool {
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| {
            let get = |k: &str| labels.and_then(|l| l.get(k.trim()));
            if let Some((k, v)) = term.split_once("!=") {
                get(k).map(String::as_str) != Some(v.trim())
            } else if let Some((k, v)) = term.split_once("==").or_else(|| term.split_once('=')) {
                get(k).map(String::as_str) == Some(v.trim())
            } else if let Some(k) = term.strip_prefix('!') {
                get(k).is_none()
            } else {
                get(term).is_some()
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    #[test]
    fn test_gvk_split() {
        let core = TypeRef::new("v1", "ConfigMap").gvk();
        assert_eq!(core.group, "");
        assert_eq!(core.version, "v1");

        let apps = TypeRef::new("apps/v1", "Deployment").gvk();
        assert_eq!(apps.group, "apps");
        assert_eq!(apps.version, "v1");
        assert_eq!(apps.kind, "Deployment");
    }

    #[test]
    fn test_merge_patch_rfc7386() {
        let mut target = json!({"a": "b", "c": {"d": "e", "f": "g"}});
        merge_patch(&mut target, &json!({"a": "z", "c": {"f": null}}));
        assert_eq!(target, json!({"a": "z", "c": {"d": "e"}}));

        let mut target = json!({"list": [1, 2]});
        merge_patch(&mut target, &json!({"list": [3]}));
        assert_eq!(target, json!({"list": [3]}));
    }

    #[test]
    fn test_matches_selector() {
        let labels: BTreeMap<String, String> = [
            ("provider.cluster.x-k8s.io/version".to_string(), "v1.8.0".to_string()),
            ("app".to_string(), "capi".to_string()),
        ]
        .into_iter()
        .collect();

        assert!(matches_selector(Some(&labels), "provider.cluster.x-k8s.io/version"));
        assert!(matches_selector(Some(&labels), "app=capi"));
        assert!(matches_selector(Some(&labels), "app==capi"));
        assert!(!matches_selector(Some(&labels), "app!=capi"));
        assert!(!matches_selector(Some(&labels), "missing"));
        assert!(matches_selector(Some(&labels), "!missing"));
        assert!(!matches_selector(None, "app"));
        assert!(matches_selector(None, ""));
    }

    #[test]
    fn test_object_key_requires_name() {
        let obj = DynamicObject {
            types: Some(kube::api::TypeMeta {
                api_version: "v1".to_string(),
                kind: "ConfigMap".to_string(),
            }),
            metadata: kube::api::ObjectMeta::default(),
            data: json!({}),
        };
        assert!(ObjectKey::of(&obj).is_err());
    }
}
