//! # Deployment Apply
//!
//! Deployments are written only when our metadata changed or when someone
//! else changed the object since our last write.
//!
//! The required spec is hashed into the `operator.openshift.io/spec-hash`
//! annotation, so a spec change surfaces as a metadata change. The generation
//! observed after our last write is kept in the
//! `capi-operator.openshift.io/applied-generation` annotation and passed back
//! in as the expected generation on the next apply.

use super::{merge_object_meta, ApplyError};
use crate::cluster::{from_dynamic, to_dynamic, ClusterStore, ObjectKey, StoreError, TypeRef};
use crate::constants::{APPLIED_GENERATION_ANNOTATION, SPEC_HASH_ANNOTATION};
use k8s_openapi::api::apps::v1::Deployment;
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::debug;

/// Generation expected when nothing is recorded
pub const UNKNOWN_GENERATION: i64 = -1;

/// sha256 of the JSON form of the Deployment spec
pub fn spec_hash(deployment: &Deployment) -> Result<String, StoreError> {
    let raw = serde_json::to_vec(&deployment.spec)?;
    Ok(format!("{:x}", Sha256::digest(&raw)))
}

/// Generation recorded on an existing Deployment, or [`UNKNOWN_GENERATION`]
#[must_use]
pub fn expected_generation(existing: Option<&Deployment>) -> i64 {
    existing
        .and_then(|d| d.metadata.annotations.as_ref())
        .and_then(|a| a.get(APPLIED_GENERATION_ANNOTATION))
        .and_then(|g| g.parse().ok())
        .unwrap_or(UNKNOWN_GENERATION)
}

fn key_of(deployment: &Deployment) -> ObjectKey {
    ObjectKey::new(
        TypeRef::of::<Deployment>(),
        deployment.metadata.namespace.as_deref(),
        deployment.metadata.name.clone().unwrap_or_default(),
    )
}

async fn get_deployment(
    store: &dyn ClusterStore,
    key: &ObjectKey,
) -> Result<Option<Deployment>, ApplyError> {
    match store.get(key).await {
        Ok(obj) => from_dynamic(&obj)
            .map(Some)
            .map_err(|source| ApplyError::Decode {
                key: key.to_string(),
                source,
            }),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(ApplyError::store(key, e)),
    }
}

/// Apply a Deployment against an expected generation
///
/// Skips the write when the merged metadata is unchanged and the live
/// generation equals `expected_generation`. Returns the live object and
/// whether it was written.
pub async fn apply_deployment(
    store: &dyn ClusterStore,
    required: &Deployment,
    expected_generation: i64,
) -> Result<(Deployment, bool), ApplyError> {
    let key = key_of(required);
    let mut required = required.clone();
    let hash = spec_hash(&required).map_err(|e| ApplyError::store(&key, e))?;
    required
        .metadata
        .annotations
        .get_or_insert_with(Default::default)
        .insert(SPEC_HASH_ANNOTATION.to_string(), hash);

    let to_dynamic_err = |e| ApplyError::store(&key, e);

    let Some(existing) = get_deployment(store, &key).await? else {
        let created = store
            .create(&to_dynamic(&required).map_err(to_dynamic_err)?)
            .await
            .map_err(|e| ApplyError::store(&key, e))?;
        let created = from_dynamic(&created).map_err(to_dynamic_err)?;
        return Ok((created, true));
    };

    let mut to_write = existing.clone();
    let modified = merge_object_meta(&mut to_write.metadata, &required.metadata);
    let generation = existing.metadata.generation.unwrap_or_default();
    if !modified && generation == expected_generation {
        debug!(deployment = %key, generation, "deployment unchanged");
        return Ok((existing, false));
    }

    to_write.spec = required.spec;
    let updated = store
        .update(&to_dynamic(&to_write).map_err(to_dynamic_err)?)
        .await
        .map_err(|e| ApplyError::store(&key, e))?;
    let updated = from_dynamic(&updated).map_err(to_dynamic_err)?;
    Ok((updated, true))
}

/// Apply a Deployment, reading and recording the expected generation in its annotations
pub async fn apply_deployment_tracked(
    store: &dyn ClusterStore,
    required: &Deployment,
) -> Result<(Deployment, bool), ApplyError> {
    let key = key_of(required);
    let existing = get_deployment(store, &key).await?;
    let expected = expected_generation(existing.as_ref());

    let (live, changed) = apply_deployment(store, required, expected).await?;
    let generation = live.metadata.generation.unwrap_or_default();
    if !changed || expected_generation(Some(&live)) == generation {
        return Ok((live, changed));
    }

    let patch = json!({
        "metadata": {
            "annotations": { APPLIED_GENERATION_ANNOTATION: generation.to_string() }
        }
    });
    let patched = store
        .patch(&key, &patch)
        .await
        .map_err(|e| ApplyError::store(&key, e))?;
    let patched = from_dynamic(&patched).map_err(|e| ApplyError::store(&key, e))?;
    Ok((patched, true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MemoryStore;
    use k8s_openapi::api::apps::v1::DeploymentSpec;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
    use kube::api::ObjectMeta;
    use std::collections::BTreeMap;

    fn deployment(replicas: i32) -> Deployment {
        Deployment {
            metadata: ObjectMeta {
                name: Some("capa-controller-manager".to_string()),
                namespace: Some("openshift-cluster-api".to_string()),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                replicas: Some(replicas),
                selector: LabelSelector {
                    match_labels: Some(BTreeMap::from([(
                        "app".to_string(),
                        "capa".to_string(),
                    )])),
                    ..Default::default()
                },
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_first_apply_creates_and_records_generation() {
        let store = MemoryStore::new();
        let (live, changed) = apply_deployment_tracked(&store, &deployment(1)).await.unwrap();
        assert!(changed);
        assert_eq!(expected_generation(Some(&live)), 1);
        assert!(live
            .metadata
            .annotations
            .as_ref()
            .is_some_and(|a| a.contains_key(SPEC_HASH_ANNOTATION)));
    }

    #[tokio::test]
    async fn test_reapply_without_change_skips_write() {
        let store = MemoryStore::new();
        apply_deployment_tracked(&store, &deployment(1)).await.unwrap();
        let writes = store.writes();

        let (_, changed) = apply_deployment_tracked(&store, &deployment(1)).await.unwrap();
        assert!(!changed);
        assert_eq!(store.writes(), writes);
    }

    #[tokio::test]
    async fn test_spec_change_rewrites_and_tracks_new_generation() {
        let store = MemoryStore::new();
        apply_deployment_tracked(&store, &deployment(1)).await.unwrap();

        let (live, changed) = apply_deployment_tracked(&store, &deployment(3)).await.unwrap();
        assert!(changed);
        assert_eq!(live.spec.as_ref().and_then(|s| s.replicas), Some(3));
        assert_eq!(expected_generation(Some(&live)), 2);
    }

    #[tokio::test]
    async fn test_generation_drift_forces_write() {
        let store = MemoryStore::new();
        let (live, _) = apply_deployment(&store, &deployment(1), UNKNOWN_GENERATION)
            .await
            .unwrap();
        assert_eq!(live.metadata.generation, Some(1));

        // Expected generation differs from the live one: write again
        let (_, changed) = apply_deployment(&store, &deployment(1), 7).await.unwrap();
        assert!(changed);

        // Matches: skip
        let (_, changed) = apply_deployment(&store, &deployment(1), 1).await.unwrap();
        assert!(!changed);
    }

    #[test]
    fn test_spec_hash_stable_and_sensitive() {
        assert_eq!(spec_hash(&deployment(1)).unwrap(), spec_hash(&deployment(1)).unwrap());
        assert_ne!(spec_hash(&deployment(1)).unwrap(), spec_hash(&deployment(2)).unwrap());
    }
}
