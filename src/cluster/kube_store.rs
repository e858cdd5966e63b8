//! # Kubernetes Store
//!
//! [`ClusterStore`] backed by the API server.
//!
//! Kinds are resolved with `kube::discovery::pinned_kind` the first time they
//! are seen; the resolved `ApiResource` and its scope are remembered for the
//! lifetime of the store.

use super::{ClusterStore, ObjectKey, StoreError, TypeRef};
use crate::constants::FIELD_MANAGER;
use async_trait::async_trait;
use kube::api::{
    Api, ApiResource, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams,
    TypeMeta,
};
use kube::discovery::Scope;
use kube::Client;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

pub struct KubeStore {
    client: Client,
    resources: Mutex<HashMap<TypeRef, (ApiResource, bool)>>,
}

impl std::fmt::Debug for KubeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeStore").finish_non_exhaustive()
    }
}

impl KubeStore {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self {
            client,
            resources: Mutex::new(HashMap::new()),
        }
    }

    async fn resolve(&self, type_ref: &TypeRef) -> Result<(ApiResource, bool), StoreError> {
        if let Some(hit) = self
            .resources
            .lock()
            .ok()
            .and_then(|cache| cache.get(type_ref).cloned())
        {
            return Ok(hit);
        }

        let (resource, caps) = kube::discovery::pinned_kind(&self.client, &type_ref.gvk())
            .await
            .map_err(|e| map_kube_error(e, &type_ref.to_string()))?;
        let namespaced = matches!(caps.scope, Scope::Namespaced);
        debug!(kind = %type_ref, namespaced, "resolved api resource");

        if let Ok(mut cache) = self.resources.lock() {
            cache.insert(type_ref.clone(), (resource.clone(), namespaced));
        }
        Ok((resource, namespaced))
    }

    async fn api(
        &self,
        type_ref: &TypeRef,
        namespace: Option<&str>,
    ) -> Result<Api<DynamicObject>, StoreError> {
        let (resource, namespaced) = self.resolve(type_ref).await?;
        Ok(match (namespaced, namespace) {
            (true, Some(ns)) => Api::namespaced_with(self.client.clone(), ns, &resource),
            _ => Api::all_with(self.client.clone(), &resource),
        })
    }
}

/// List responses carry `apiVersion`/`kind` only at the list level; copy
/// them onto every item so each one can be addressed on its own
fn with_types(mut items: Vec<DynamicObject>, resource: &ApiResource) -> Vec<DynamicObject> {
    for item in &mut items {
        item.types.get_or_insert_with(|| TypeMeta {
            api_version: resource.api_version.clone(),
            kind: resource.kind.clone(),
        });
    }
    items
}

fn post_params() -> PostParams {
    PostParams {
        field_manager: Some(FIELD_MANAGER.to_string()),
        ..Default::default()
    }
}

fn patch_params() -> PatchParams {
    PatchParams {
        field_manager: Some(FIELD_MANAGER.to_string()),
        ..Default::default()
    }
}

fn map_kube_error(error: kube::Error, what: &str) -> StoreError {
    match error {
        kube::Error::Api(ae) if ae.code == 404 => StoreError::NotFound(what.to_string()),
        kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => {
            StoreError::AlreadyExists(what.to_string())
        }
        kube::Error::Api(ae) if ae.code == 409 => StoreError::Conflict(what.to_string()),
        other => StoreError::Kube(other),
    }
}

#[async_trait]
impl ClusterStore for KubeStore {
    async fn get(&self, key: &ObjectKey) -> Result<DynamicObject, StoreError> {
        let api = self.api(&key.type_ref, key.namespace.as_deref()).await?;
        api.get(&key.name)
            .await
            .map_err(|e| map_kube_error(e, &key.to_string()))
    }

    async fn create(&self, obj: &DynamicObject) -> Result<DynamicObject, StoreError> {
        let key = ObjectKey::of(obj)?;
        let api = self.api(&key.type_ref, key.namespace.as_deref()).await?;
        api.create(&post_params(), obj)
            .await
            .map_err(|e| map_kube_error(e, &key.to_string()))
    }

    async fn update(&self, obj: &DynamicObject) -> Result<DynamicObject, StoreError> {
        let key = ObjectKey::of(obj)?;
        let api = self.api(&key.type_ref, key.namespace.as_deref()).await?;
        api.replace(&key.name, &post_params(), obj)
            .await
            .map_err(|e| map_kube_error(e, &key.to_string()))
    }

    async fn patch(&self, key: &ObjectKey, patch: &Value) -> Result<DynamicObject, StoreError> {
        let api = self.api(&key.type_ref, key.namespace.as_deref()).await?;
        api.patch(&key.name, &patch_params(), &Patch::Merge(patch))
            .await
            .map_err(|e| map_kube_error(e, &key.to_string()))
    }

    async fn patch_status(
        &self,
        key: &ObjectKey,
        patch: &Value,
    ) -> Result<DynamicObject, StoreError> {
        let api = self.api(&key.type_ref, key.namespace.as_deref()).await?;
        api.patch_status(&key.name, &patch_params(), &Patch::Merge(patch))
            .await
            .map_err(|e| map_kube_error(e, &key.to_string()))
    }

    async fn list(
        &self,
        type_ref: &TypeRef,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<DynamicObject>, StoreError> {
        let api = self.api(type_ref, namespace).await?;
        let (resource, _) = self.resolve(type_ref).await?;
        let mut params = ListParams::default();
        if let Some(selector) = label_selector {
            params = params.labels(selector);
        }
        let list = api
            .list(&params)
            .await
            .map_err(|e| map_kube_error(e, &type_ref.to_string()))?;
        Ok(with_types(list.items, &resource))
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), StoreError> {
        let api = self.api(&key.type_ref, key.namespace.as_deref()).await?;
        api.delete(&key.name, &DeleteParams::background())
            .await
            .map(|_| ())
            .map_err(|e| map_kube_error(e, &key.to_string()))
    }
}
