//! # Provider Installer
//!
//! The cluster side of the phase reconciler: inventory CRD, upgrade cleanup,
//! applying components and waiting for them to come up.
//!
//! Installed providers are recorded as clusterctl inventory `Provider`
//! objects (`clusterctl.cluster.x-k8s.io/v1alpha3`) in the provider namespace.
//! The recorded version is how an upgrade is detected on the next pass.

use crate::apply::generic::{apply_generic, ensure_exists};
use crate::apply::{apply_all, join_errors, AggregateError, ApplyError, ApplyObject, ApplyResult};
use crate::cluster::{from_dynamic, to_dynamic, ClusterStore, ObjectKey, StoreError, TypeRef};
use crate::constants::{CLUSTERCTL_LABEL, CLUSTER_PROVIDER_LABEL};
use crate::observability::metrics;
use crate::provider::Provider;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::{
    CustomResourceDefinition, CustomResourceDefinitionNames, CustomResourceDefinitionSpec,
    CustomResourceDefinitionVersion, CustomResourceValidation, JSONSchemaProps,
};
use kube::api::{DynamicObject, ObjectMeta, TypeMeta};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

const INVENTORY_GROUP: &str = "clusterctl.cluster.x-k8s.io";
const INVENTORY_VERSION: &str = "v1alpha3";
const INVENTORY_KIND: &str = "Provider";
const INVENTORY_PLURAL: &str = "providers";

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("timed out waiting for deployments to become available: {}", .pending.join(", "))]
    Timeout { pending: Vec<String> },

    #[error(transparent)]
    Apply(#[from] AggregateError),

    #[error("failed to ensure inventory CRD: {0}")]
    InventoryCrd(#[source] ApplyError),

    #[error("failed to record inventory for {provider}: {source}")]
    Inventory {
        provider: String,
        #[source]
        source: ApplyError,
    },

    #[error("failed to delete {object}: {source}")]
    Delete {
        object: String,
        #[source]
        source: StoreError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl InstallError {
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Cluster operations the phase reconciler needs
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ProviderInstaller: Send + Sync {
    /// Make sure the CRDs the installer itself depends on exist
    async fn ensure_custom_resource_definitions(&self) -> Result<(), InstallError>;

    /// Is `namespace` being deleted?
    async fn namespace_terminating(&self, namespace: &str) -> Result<bool, InstallError>;

    /// Version recorded in the inventory, if the provider was installed before
    async fn installed_version(&self, provider: &Provider) -> Result<Option<String>, InstallError>;

    /// Delete the provider's components except its Namespace and CRDs
    ///
    /// Returns the number of deleted objects.
    async fn delete(&self, provider: &Provider) -> Result<usize, InstallError>;

    /// Apply components, wait for Deployments, record the inventory
    async fn install(
        &self,
        provider: &Provider,
        components: Vec<DynamicObject>,
    ) -> Result<(), InstallError>;
}

/// Kinds removed on upgrade, with whether they are namespaced
fn deletable_kinds() -> Vec<(TypeRef, bool)> {
    vec![
        (TypeRef::new("apps/v1", "Deployment"), true),
        (TypeRef::new("v1", "Service"), true),
        (TypeRef::new("v1", "ServiceAccount"), true),
        (TypeRef::new("v1", "ConfigMap"), true),
        (TypeRef::new("v1", "Secret"), true),
        (TypeRef::new("rbac.authorization.k8s.io/v1", "Role"), true),
        (TypeRef::new("rbac.authorization.k8s.io/v1", "RoleBinding"), true),
        (TypeRef::new("rbac.authorization.k8s.io/v1", "ClusterRole"), false),
        (TypeRef::new("rbac.authorization.k8s.io/v1", "ClusterRoleBinding"), false),
        (
            TypeRef::new("admissionregistration.k8s.io/v1", "ValidatingWebhookConfiguration"),
            false,
        ),
        (
            TypeRef::new("admissionregistration.k8s.io/v1", "MutatingWebhookConfiguration"),
            false,
        ),
    ]
}

fn inventory_type() -> TypeRef {
    TypeRef::new(format!("{INVENTORY_GROUP}/{INVENTORY_VERSION}"), INVENTORY_KIND)
}

fn inventory_key(provider: &Provider) -> ObjectKey {
    ObjectKey::new(
        inventory_type(),
        Some(&provider.namespace),
        provider.manifest_label(),
    )
}

/// CRD for the clusterctl inventory `Provider` kind
#[must_use]
pub fn inventory_crd() -> CustomResourceDefinition {
    CustomResourceDefinition {
        metadata: ObjectMeta {
            name: Some(format!("{INVENTORY_PLURAL}.{INVENTORY_GROUP}")),
            labels: Some(BTreeMap::from([(
                CLUSTERCTL_LABEL.to_string(),
                "core".to_string(),
            )])),
            ..Default::default()
        },
        spec: CustomResourceDefinitionSpec {
            group: INVENTORY_GROUP.to_string(),
            names: CustomResourceDefinitionNames {
                kind: INVENTORY_KIND.to_string(),
                list_kind: Some(format!("{INVENTORY_KIND}List")),
                plural: INVENTORY_PLURAL.to_string(),
                singular: Some("provider".to_string()),
                ..Default::default()
            },
            scope: "Namespaced".to_string(),
            versions: vec![CustomResourceDefinitionVersion {
                name: INVENTORY_VERSION.to_string(),
                served: true,
                storage: true,
                schema: Some(CustomResourceValidation {
                    open_api_v3_schema: Some(JSONSchemaProps {
                        type_: Some("object".to_string()),
                        x_kubernetes_preserve_unknown_fields: Some(true),
                        ..Default::default()
                    }),
                }),
                ..Default::default()
            }],
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Inventory record for an installed provider
#[must_use]
pub fn inventory_record(provider: &Provider) -> DynamicObject {
    DynamicObject {
        types: Some(TypeMeta {
            api_version: inventory_type().api_version,
            kind: INVENTORY_KIND.to_string(),
        }),
        metadata: ObjectMeta {
            name: Some(provider.manifest_label()),
            namespace: Some(provider.namespace.clone()),
            labels: Some(BTreeMap::from([
                (CLUSTERCTL_LABEL.to_string(), String::new()),
                (CLUSTER_PROVIDER_LABEL.to_string(), provider.manifest_label()),
            ])),
            ..Default::default()
        },
        data: json!({
            "providerName": provider.name,
            "type": provider.provider_type.clusterctl_type(),
            "version": provider.version,
        }),
    }
}

fn deployment_available(obj: &DynamicObject) -> bool {
    let Ok(deployment) = from_dynamic::<Deployment>(obj) else {
        return false;
    };
    let Some(status) = deployment.status.as_ref() else {
        return false;
    };
    let observed = status.observed_generation.unwrap_or_default();
    let current = deployment.metadata.generation.unwrap_or_default();
    observed >= current
        && status
            .conditions
            .iter()
            .flatten()
            .any(|c| c.type_ == "Available" && c.status == "True")
}

/// [`ProviderInstaller`] backed by a [`ClusterStore`]
pub struct KubeInstaller {
    store: Arc<dyn ClusterStore>,
    timeout: Duration,
    poll_interval: Duration,
}

impl std::fmt::Debug for KubeInstaller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeInstaller")
            .field("timeout", &self.timeout)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

impl KubeInstaller {
    pub fn new(store: Arc<dyn ClusterStore>, timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            store,
            timeout,
            poll_interval,
        }
    }

    async fn wait_for_deployments(&self, keys: &[ObjectKey]) -> Result<(), InstallError> {
        let mut pending: Vec<String> = keys.iter().map(ToString::to_string).collect();
        let wait = async {
            loop {
                let mut still_pending = Vec::new();
                for key in keys {
                    match self.store.get(key).await {
                        Ok(obj) if deployment_available(&obj) => {}
                        Ok(_) => still_pending.push(key.to_string()),
                        Err(e) if e.is_not_found() => still_pending.push(key.to_string()),
                        Err(e) => return Err(InstallError::Store(e)),
                    }
                }
                pending = still_pending;
                if pending.is_empty() {
                    return Ok(());
                }
                debug!(pending = ?pending, "waiting for deployments");
                tokio::time::sleep(self.poll_interval).await;
            }
        };
        let waited = tokio::time::timeout(self.timeout, wait).await;
        match waited {
            Ok(result) => result,
            Err(_) => Err(InstallError::Timeout { pending }),
        }
    }
}

#[async_trait]
impl ProviderInstaller for KubeInstaller {
    async fn ensure_custom_resource_definitions(&self) -> Result<(), InstallError> {
        let crd = to_dynamic(&inventory_crd())?;
        if ensure_exists(self.store.as_ref(), &crd)
            .await
            .map_err(InstallError::InventoryCrd)?
        {
            info!("created inventory CRD");
        }
        Ok(())
    }

    async fn namespace_terminating(&self, namespace: &str) -> Result<bool, InstallError> {
        let key = ObjectKey::new(TypeRef::of::<Namespace>(), None, namespace);
        match self.store.get(&key).await {
            Ok(obj) => {
                let phase = obj.data.pointer("/status/phase").and_then(|p| p.as_str());
                Ok(obj.metadata.deletion_timestamp.is_some() || phase == Some("Terminating"))
            }
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn installed_version(&self, provider: &Provider) -> Result<Option<String>, InstallError> {
        match self.store.get(&inventory_key(provider)).await {
            Ok(obj) => Ok(obj
                .data
                .get("version")
                .and_then(|v| v.as_str())
                .map(str::to_string)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, provider: &Provider) -> Result<usize, InstallError> {
        let selector = format!("{CLUSTER_PROVIDER_LABEL}={}", provider.manifest_label());
        let mut deleted = 0;
        for (type_ref, namespaced) in deletable_kinds() {
            let namespace = namespaced.then_some(provider.namespace.as_str());
            let objects = self
                .store
                .list(&type_ref, namespace, Some(&selector))
                .await?;
            for obj in objects {
                let Some(name) = obj.metadata.name else {
                    continue;
                };
                let key = ObjectKey::new(type_ref.clone(), obj.metadata.namespace.as_deref(), name);
                match self.store.delete(&key).await {
                    Ok(()) => {
                        debug!(object = %key, "deleted outdated component");
                        deleted += 1;
                    }
                    Err(e) if e.is_not_found() => {}
                    Err(source) => {
                        return Err(InstallError::Delete {
                            object: key.to_string(),
                            source,
                        })
                    }
                }
            }
        }
        info!(provider = %provider, deleted, "deleted outdated provider components");
        Ok(deleted)
    }

    async fn install(
        &self,
        provider: &Provider,
        components: Vec<DynamicObject>,
    ) -> Result<(), InstallError> {
        let mut objects = Vec::with_capacity(components.len());
        let mut rejected = Vec::new();
        for obj in components {
            match ApplyObject::classify(obj) {
                Ok(object) => objects.push(object),
                Err(e) => rejected.push(ApplyResult {
                    object: String::new(),
                    changed: false,
                    error: Some(e),
                }),
            }
        }

        let deployments: Vec<ObjectKey> = objects
            .iter()
            .filter_map(|o| match o {
                ApplyObject::Deployment(d) => Some(ObjectKey::new(
                    TypeRef::of::<Deployment>(),
                    d.metadata.namespace.as_deref(),
                    d.metadata.name.clone().unwrap_or_default(),
                )),
                _ => None,
            })
            .collect();

        let mut results = apply_all(self.store.as_ref(), objects).await;
        results.extend(rejected);
        let changed = join_errors(results)?;
        info!(provider = %provider, changed, "applied provider components");

        self.wait_for_deployments(&deployments).await?;

        apply_generic(self.store.as_ref(), &inventory_record(provider))
            .await
            .map_err(|source| InstallError::Inventory {
                provider: provider.to_string(),
                source,
            })?;
        metrics::increment_provider_installs(&provider.manifest_label());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MemoryStore;
    use crate::provider::ProviderType;

    fn provider(version: &str) -> Provider {
        Provider {
            name: "aws".to_string(),
            namespace: "openshift-cluster-api".to_string(),
            version: version.to_string(),
            provider_type: ProviderType::Infrastructure,
            install_order: 20,
        }
    }

    fn installer(store: Arc<MemoryStore>) -> KubeInstaller {
        KubeInstaller::new(store, Duration::from_millis(200), Duration::from_millis(10))
    }

    fn object(
        api_version: &str,
        kind: &str,
        namespace: Option<&str>,
        name: &str,
        labels: &[(&str, &str)],
    ) -> DynamicObject {
        DynamicObject {
            types: Some(TypeMeta {
                api_version: api_version.to_string(),
                kind: kind.to_string(),
            }),
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: namespace.map(str::to_string),
                labels: Some(
                    labels
                        .iter()
                        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                        .collect(),
                ),
                ..Default::default()
            },
            data: json!({}),
        }
    }

    #[tokio::test]
    async fn test_ensure_inventory_crd_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let installer = installer(store.clone());
        installer.ensure_custom_resource_definitions().await.unwrap();
        installer.ensure_custom_resource_definitions().await.unwrap();
        assert_eq!(store.writes(), 1);
    }

    #[tokio::test]
    async fn test_installed_version_reads_inventory() {
        let store = Arc::new(MemoryStore::new());
        let installer = installer(store.clone());
        assert_eq!(installer.installed_version(&provider("v2.5.0")).await.unwrap(), None);

        store.insert(inventory_record(&provider("v2.4.0"))).unwrap();
        assert_eq!(
            installer.installed_version(&provider("v2.5.0")).await.unwrap(),
            Some("v2.4.0".to_string())
        );
    }

    #[tokio::test]
    async fn test_namespace_terminating() {
        let store = Arc::new(MemoryStore::new());
        let installer = installer(store.clone());
        assert!(!installer.namespace_terminating("openshift-cluster-api").await.unwrap());

        let mut ns = object("v1", "Namespace", None, "openshift-cluster-api", &[]);
        ns.data = json!({"status": {"phase": "Terminating"}});
        store.insert(ns).unwrap();
        assert!(installer.namespace_terminating("openshift-cluster-api").await.unwrap());
    }

    const AWS_CRD: &str = "awsclusters.infrastructure.cluster.x-k8s.io";

    fn seed_aws_components(store: &MemoryStore) {
        let ours = [(CLUSTER_PROVIDER_LABEL, "infrastructure-aws")];
        let theirs = [(CLUSTER_PROVIDER_LABEL, "cluster-api")];
        let ns = Some("openshift-cluster-api");
        let rbac = "rbac.authorization.k8s.io/v1";
        let crds = "apiextensions.k8s.io/v1";
        for obj in [
            object("v1", "Namespace", None, "openshift-cluster-api", &ours),
            object(crds, "CustomResourceDefinition", None, AWS_CRD, &ours),
            object("apps/v1", "Deployment", ns, "capa-controller-manager", &ours),
            object("v1", "ServiceAccount", ns, "capa-manager", &ours),
            object(rbac, "ClusterRole", None, "capa-manager-role", &ours),
            object("apps/v1", "Deployment", ns, "capi-controller-manager", &theirs),
        ] {
            store.insert(obj).unwrap();
        }
    }

    fn remaining_names(store: &MemoryStore) -> Vec<String> {
        store
            .objects()
            .iter()
            .filter_map(|o| o.metadata.name.clone())
            .collect()
    }

    #[tokio::test]
    async fn test_delete_spares_namespace_crds_and_other_providers() {
        let store = Arc::new(MemoryStore::new());
        seed_aws_components(&store);

        let deleted = installer(store.clone()).delete(&provider("v2.5.0")).await.unwrap();
        assert_eq!(deleted, 3);

        let remaining = remaining_names(&store);
        assert!(remaining.contains(&"openshift-cluster-api".to_string()));
        assert!(remaining.contains(&AWS_CRD.to_string()));
        assert!(remaining.contains(&"capi-controller-manager".to_string()));
        assert!(!remaining.contains(&"capa-controller-manager".to_string()));
    }

    /// Store whose list results lack `apiVersion`/`kind`, like API server list items
    struct UntypedListStore(Arc<MemoryStore>);

    #[async_trait]
    impl ClusterStore for UntypedListStore {
        async fn get(&self, key: &ObjectKey) -> Result<DynamicObject, StoreError> {
            self.0.get(key).await
        }

        async fn create(&self, obj: &DynamicObject) -> Result<DynamicObject, StoreError> {
            self.0.create(obj).await
        }

        async fn update(&self, obj: &DynamicObject) -> Result<DynamicObject, StoreError> {
            self.0.update(obj).await
        }

        async fn patch(
            &self,
            key: &ObjectKey,
            patch: &serde_json::Value,
        ) -> Result<DynamicObject, StoreError> {
            self.0.patch(key, patch).await
        }

        async fn patch_status(
            &self,
            key: &ObjectKey,
            patch: &serde_json::Value,
        ) -> Result<DynamicObject, StoreError> {
            self.0.patch_status(key, patch).await
        }

        async fn list(
            &self,
            type_ref: &TypeRef,
            namespace: Option<&str>,
            label_selector: Option<&str>,
        ) -> Result<Vec<DynamicObject>, StoreError> {
            let mut items = self.0.list(type_ref, namespace, label_selector).await?;
            for item in &mut items {
                item.types = None;
            }
            Ok(items)
        }

        async fn delete(&self, key: &ObjectKey) -> Result<(), StoreError> {
            self.0.delete(key).await
        }
    }

    #[tokio::test]
    async fn test_delete_handles_untyped_list_items() {
        let store = Arc::new(MemoryStore::new());
        seed_aws_components(&store);
        let installer = KubeInstaller::new(
            Arc::new(UntypedListStore(Arc::clone(&store))),
            Duration::from_millis(200),
            Duration::from_millis(10),
        );

        assert_eq!(installer.delete(&provider("v2.5.0")).await.unwrap(), 3);
        let remaining = remaining_names(&store);
        assert!(!remaining.contains(&"capa-manager".to_string()));
        assert!(remaining.contains(&"capi-controller-manager".to_string()));
    }

    #[tokio::test]
    async fn test_install_times_out_on_unavailable_deployment() {
        let store = Arc::new(MemoryStore::new());
        let deployment = to_dynamic(&Deployment {
            metadata: ObjectMeta {
                name: Some("capa-controller-manager".to_string()),
                namespace: Some("openshift-cluster-api".to_string()),
                ..Default::default()
            },
            ..Default::default()
        })
        .unwrap();

        let err = installer(store.clone())
            .install(&provider("v2.5.0"), vec![deployment])
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(
            err.to_string(),
            concat!(
                "timed out waiting for deployments to become available: ",
                "Deployment openshift-cluster-api/capa-controller-manager"
            )
        );
        // No inventory record for an install that never became ready
        assert!(store.object(&inventory_key(&provider("v2.5.0"))).is_none());
    }

    #[tokio::test]
    async fn test_install_without_deployments_records_inventory() {
        let store = Arc::new(MemoryStore::new());
        let sa = object("v1", "ServiceAccount", Some("openshift-cluster-api"), "capa-manager", &[]);
        installer(store.clone())
            .install(&provider("v2.5.0"), vec![sa])
            .await
            .unwrap();

        let record = store.object(&inventory_key(&provider("v2.5.0"))).unwrap();
        assert_eq!(record.data["version"], "v2.5.0");
        assert_eq!(record.data["type"], "InfrastructureProvider");
    }
}
