//! # Apply Engine
//!
//! Writes decoded provider components to the cluster.
//!
//! Each decoded object is classified once into an [`ApplyObject`] and applied
//! with the strategy for its kind:
//!
//! - [`generic`] - create if absent, otherwise replace drifted fields
//! - [`deployment`] - spec-hash annotation plus expected-generation tracking
//! - [`crd`] - like generic, but an injected CA bundle is never overwritten
//!
//! Drift is judged with [`covers`]: fields the API server fills in on its own
//! (defaults, allocated IPs) do not count as drift, so a steady cluster sees
//! no writes.
//!
//! [`apply_all`] applies a batch without stopping at the first failure; the
//! failures are folded into one [`AggregateError`] by [`join_errors`].

pub mod crd;
pub mod deployment;
pub mod generic;

use crate::cluster::{from_dynamic, ClusterStore, ObjectKey, StoreError, TypeRef};
use crate::observability::metrics;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::DynamicObject;
use serde_json::Value;
use std::fmt;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("failed to apply {key}: {source}")]
    Store {
        key: String,
        #[source]
        source: StoreError,
    },

    #[error("failed to decode {key}: {source}")]
    Decode {
        key: String,
        #[source]
        source: StoreError,
    },
}

impl ApplyError {
    pub(crate) fn store(key: impl fmt::Display, source: StoreError) -> Self {
        Self::Store {
            key: key.to_string(),
            source,
        }
    }
}

/// Every failure of one batch, in apply order
#[derive(Debug, Error)]
pub struct AggregateError {
    pub errors: Vec<ApplyError>,
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.errors.as_slice() {
            [single] => write!(f, "{single}"),
            errors => {
                let joined: Vec<String> = errors.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", joined.join(", "))
            }
        }
    }
}

/// Per-object outcome of a batch apply
#[derive(Debug)]
pub struct ApplyResult {
    /// Display form of the object key, e.g. `ServiceAccount ns/name`
    pub object: String,
    pub changed: bool,
    pub error: Option<ApplyError>,
}

/// Object decoded once into the strategy used to apply it
#[derive(Debug, Clone)]
pub enum ApplyObject {
    Deployment(Box<Deployment>),
    CustomResourceDefinition(Box<CustomResourceDefinition>),
    Generic(DynamicObject),
}

impl ApplyObject {
    /// Classify a decoded object by its kind
    pub fn classify(obj: DynamicObject) -> Result<Self, ApplyError> {
        let key = ObjectKey::of(&obj).map_err(|source| ApplyError::Decode {
            key: obj.metadata.name.clone().unwrap_or_default(),
            source,
        })?;
        let decode = |source| ApplyError::Decode {
            key: key.to_string(),
            source,
        };
        if key.type_ref == TypeRef::of::<Deployment>() {
            return Ok(Self::Deployment(Box::new(
                from_dynamic(&obj).map_err(decode)?,
            )));
        }
        if key.type_ref == TypeRef::of::<CustomResourceDefinition>() {
            return Ok(Self::CustomResourceDefinition(Box::new(
                from_dynamic(&obj).map_err(decode)?,
            )));
        }
        Ok(Self::Generic(obj))
    }

    #[must_use]
    pub fn kind(&self) -> &str {
        match self {
            Self::Deployment(_) => "Deployment",
            Self::CustomResourceDefinition(_) => "CustomResourceDefinition",
            Self::Generic(obj) => obj.types.as_ref().map_or("", |t| t.kind.as_str()),
        }
    }

    #[must_use]
    pub fn name(&self) -> String {
        let meta = match self {
            Self::Deployment(d) => &d.metadata,
            Self::CustomResourceDefinition(c) => &c.metadata,
            Self::Generic(obj) => &obj.metadata,
        };
        match (&meta.namespace, &meta.name) {
            (Some(ns), Some(name)) => format!("{} {ns}/{name}", self.kind()),
            (None, Some(name)) => format!("{} {name}", self.kind()),
            _ => self.kind().to_string(),
        }
    }

    async fn apply(&self, store: &dyn ClusterStore) -> Result<bool, ApplyError> {
        match self {
            Self::Deployment(d) => deployment::apply_deployment_tracked(store, d)
                .await
                .map(|(_, changed)| changed),
            Self::CustomResourceDefinition(c) => crd::apply_crd(store, c).await,
            Self::Generic(obj) => generic::apply_generic(store, obj).await,
        }
    }
}

/// Apply order for a kind, lower first
///
/// Deployments are not ranked here; they always go after everything else.
#[must_use]
pub fn kind_priority(kind: &str) -> u8 {
    match kind {
        "Namespace" => 0,
        "CustomResourceDefinition" => 1,
        "ServiceAccount" => 2,
        "ClusterRole" | "Role" => 3,
        "ClusterRoleBinding" | "RoleBinding" => 4,
        "ConfigMap" | "Secret" => 5,
        "Service" => 6,
        "Certificate" | "Issuer" => 7,
        "ValidatingWebhookConfiguration" | "MutatingWebhookConfiguration" => 8,
        _ => 9,
    }
}

/// Apply a batch of objects
///
/// Non-Deployment objects go first in [`kind_priority`] order, then
/// Deployments. Every object is attempted regardless of earlier failures.
pub async fn apply_all(store: &dyn ClusterStore, objects: Vec<ApplyObject>) -> Vec<ApplyResult> {
    let (mut immediate, deployments): (Vec<_>, Vec<_>) = objects
        .into_iter()
        .partition(|o| !matches!(o, ApplyObject::Deployment(_)));
    immediate.sort_by_key(|o| kind_priority(o.kind()));

    let mut results = Vec::with_capacity(immediate.len() + deployments.len());
    for object in immediate.iter().chain(deployments.iter()) {
        let name = object.name();
        let result = match object.apply(store).await {
            Ok(changed) => {
                debug!(object = %name, changed, "applied");
                let outcome = if changed { "changed" } else { "unchanged" };
                metrics::increment_manifests_applied(outcome);
                ApplyResult {
                    object: name,
                    changed,
                    error: None,
                }
            }
            Err(e) => {
                warn!(object = %name, error = %e, "apply failed");
                metrics::increment_manifests_applied("failed");
                ApplyResult {
                    object: name,
                    changed: false,
                    error: Some(e),
                }
            }
        };
        results.push(result);
    }
    results
}

/// Fold batch failures into one error; returns the number of changed objects on success
pub fn join_errors(results: Vec<ApplyResult>) -> Result<usize, AggregateError> {
    let changed = results.iter().filter(|r| r.changed).count();
    let errors: Vec<ApplyError> = results.into_iter().filter_map(|r| r.error).collect();
    if errors.is_empty() {
        Ok(changed)
    } else {
        Err(AggregateError { errors })
    }
}

/// Merge required labels, annotations and owner references into `existing`
///
/// Keys present only on the existing object are kept. Returns whether anything changed.
pub fn merge_object_meta(existing: &mut ObjectMeta, required: &ObjectMeta) -> bool {
    let mut modified = false;
    for (target, source) in [
        (&mut existing.labels, &required.labels),
        (&mut existing.annotations, &required.annotations),
    ] {
        let Some(source) = source else { continue };
        let target = target.get_or_insert_with(Default::default);
        for (k, v) in source {
            if target.get(k) != Some(v) {
                target.insert(k.clone(), v.clone());
                modified = true;
            }
        }
    }
    if let Some(required_refs) = &required.owner_references {
        let refs = existing.owner_references.get_or_insert_with(Vec::new);
        for r in required_refs {
            if !refs.iter().any(|e| e.uid == r.uid) {
                refs.push(r.clone());
                modified = true;
            }
        }
    }
    modified
}

/// Whether `existing` already carries everything `required` asks for
///
/// Objects are covered when every required key is covered; keys only the
/// existing side has are ignored. Arrays must have the same length and be
/// covered element by element. A required `null` is always covered; any
/// other scalar must be equal.
#[must_use]
pub fn covers(existing: &Value, required: &Value) -> bool {
    match (existing, required) {
        (_, Value::Null) => true,
        (Value::Object(e), Value::Object(r)) => r
            .iter()
            .all(|(k, v)| e.get(k).map_or(v.is_null(), |existing| covers(existing, v))),
        (Value::Array(e), Value::Array(r)) => {
            e.len() == r.len() && e.iter().zip(r).all(|(e, r)| covers(e, r))
        }
        (e, r) => e == r,
    }
}
