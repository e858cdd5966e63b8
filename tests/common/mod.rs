//! Common test utilities for reconciler integration tests
//!
//! Builds provider ConfigMaps the way the asset generator lays them out and
//! stands in for the Deployment controller of a real cluster.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use capi_provider_operator::cluster::{to_dynamic, ClusterStore, MemoryStore, ObjectKey, TypeRef};
use capi_provider_operator::config::ControllerConfig;
use capi_provider_operator::constants::{
    COMPONENTS_KEY, COMPONENTS_ZSTD_KEY, METADATA_KEY, PROVIDER_NAME_LABEL, PROVIDER_TYPE_LABEL,
    PROVIDER_VERSION_LABEL,
};
use capi_provider_operator::controller::reconciler::Reconciler;
use capi_provider_operator::platform::{Images, PlatformType};
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::ByteString;
use kube::api::{DynamicObject, ObjectMeta};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Once};
use std::time::Duration;
use tokio::task::JoinHandle;

static INIT: Once = Once::new();

/// Initialize test logging (idempotent)
pub fn init_test_logging() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::from_default_env()
                    .add_directive("capi_provider_operator=debug".parse().unwrap()),
            )
            .with_test_writer()
            .try_init();
    });
}

pub const NAMESPACE: &str = "openshift-cluster-api";
pub const CORE_IMAGE: &str = "quay.io/openshift/origin-cluster-capi-controllers:4.18";
pub const AWS_IMAGE: &str = "quay.io/openshift/origin-aws-cluster-api-controllers:4.18";

pub const CORE_COMPONENTS: &str = r"apiVersion: v1
kind: Namespace
metadata:
  name: capi-system
---
apiVersion: v1
kind: ServiceAccount
metadata:
  name: capi-manager
  namespace: capi-system
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: capi-controller-manager
  namespace: capi-system
spec:
  selector:
    matchLabels:
      cluster.x-k8s.io/provider: cluster-api
  template:
    metadata:
      labels:
        cluster.x-k8s.io/provider: cluster-api
    spec:
      serviceAccountName: capi-manager
      containers:
      - name: manager
        image: to.be/replaced:v99
        command:
        - /manager
        args:
        - --feature-gates=MachinePool=${EXP_MACHINE_POOL:=false}
";

pub const AWS_COMPONENTS: &str = r"# Generated by the asset generator
---
apiVersion: v1
kind: ServiceAccount
metadata:
  name: capa-controller-manager
  namespace: capa-system
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: capa-controller-manager
  namespace: capa-system
spec:
  selector:
    matchLabels:
      cluster.x-k8s.io/provider: infrastructure-aws
  template:
    metadata:
      labels:
        cluster.x-k8s.io/provider: infrastructure-aws
    spec:
      serviceAccountName: capa-controller-manager
      containers:
      - name: manager
        image: to.be/replaced:v99
        command:
        - /manager
        args:
        - --feature-gates=EKS=${EXP_EKS:=false}
";

/// clusterctl metadata declaring one release series
pub fn metadata(major: u64, minor: u64, contract: &str) -> String {
    format!(
        "apiVersion: clusterctl.cluster.x-k8s.io/v1alpha3\nkind: Metadata\n\
         releaseSeries:\n- major: {major}\n  minor: {minor}\n  contract: {contract}\n"
    )
}

/// Payload layout of a provider ConfigMap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Payload {
    Plain,
    Zstd,
}

/// A labelled provider ConfigMap
pub fn provider_config_map(
    name: &str,
    provider_type: &str,
    version: &str,
    components: &str,
    metadata: &str,
    payload: Payload,
) -> DynamicObject {
    let mut data = BTreeMap::from([(METADATA_KEY.to_string(), metadata.to_string())]);
    let mut binary_data = BTreeMap::new();
    match payload {
        Payload::Plain => {
            data.insert(COMPONENTS_KEY.to_string(), components.to_string());
        }
        Payload::Zstd => {
            let compressed = zstd::encode_all(components.as_bytes(), 3).unwrap();
            binary_data.insert(COMPONENTS_ZSTD_KEY.to_string(), ByteString(compressed));
        }
    }

    to_dynamic(&ConfigMap {
        metadata: ObjectMeta {
            name: Some(format!("{name}-{version}")),
            namespace: Some(NAMESPACE.to_string()),
            labels: Some(BTreeMap::from([
                (PROVIDER_NAME_LABEL.to_string(), name.to_string()),
                (PROVIDER_TYPE_LABEL.to_string(), provider_type.to_string()),
                (PROVIDER_VERSION_LABEL.to_string(), version.to_string()),
            ])),
            ..Default::default()
        },
        data: Some(data),
        binary_data: (!binary_data.is_empty()).then_some(binary_data),
        ..Default::default()
    })
    .unwrap()
}

/// Store seeded with core v1.8.0 and aws v2.5.0 (zstd) plus an older aws v2.4.0
pub fn seeded_store(aws_contract: &str) -> Arc<MemoryStore> {
    init_test_logging();
    let store = Arc::new(MemoryStore::new());
    store
        .insert(provider_config_map(
            "cluster-api",
            "core",
            "v1.8.0",
            CORE_COMPONENTS,
            &metadata(1, 8, "v1beta1"),
            Payload::Plain,
        ))
        .unwrap();
    store
        .insert(provider_config_map(
            "aws",
            "infrastructure",
            "v2.4.0",
            AWS_COMPONENTS,
            &metadata(2, 4, "v1beta1"),
            Payload::Plain,
        ))
        .unwrap();
    store
        .insert(provider_config_map(
            "aws",
            "infrastructure",
            "v2.5.0",
            AWS_COMPONENTS,
            &metadata(2, 5, aws_contract),
            Payload::Zstd,
        ))
        .unwrap();
    store
}

pub fn images() -> Images {
    Images::new(BTreeMap::from([
        ("cluster-capi-controllers".to_string(), CORE_IMAGE.to_string()),
        ("aws-cluster-api-controllers".to_string(), AWS_IMAGE.to_string()),
    ]))
}

pub fn config() -> ControllerConfig {
    ControllerConfig {
        install_timeout_secs: 10,
        install_poll_interval_secs: 1,
        feature_gate_variables: BTreeMap::from([("EXP_EKS".to_string(), "true".to_string())]),
        ..Default::default()
    }
}

pub fn reconciler(store: &Arc<MemoryStore>, platform: PlatformType) -> Reconciler {
    Reconciler::new(Arc::<MemoryStore>::clone(store), config(), platform, images())
}

pub fn deployment_key(name: &str) -> ObjectKey {
    ObjectKey::new(TypeRef::new("apps/v1", "Deployment"), Some(NAMESPACE), name)
}

pub fn inventory_key(name: &str) -> ObjectKey {
    ObjectKey::new(
        TypeRef::new("clusterctl.cluster.x-k8s.io/v1alpha3", "Provider"),
        Some(NAMESPACE),
        name,
    )
}

/// Condition of the operator's `ClusterOperator`, if set
pub fn condition(store: &MemoryStore, condition_type: &str) -> Option<Value> {
    let key = ObjectKey::new(
        TypeRef::new("config.openshift.io/v1", "ClusterOperator"),
        None,
        "cluster-api",
    );
    store.object(&key)?.data["status"]["conditions"]
        .as_array()?
        .iter()
        .find(|c| c["type"] == condition_type)
        .cloned()
}

/// Mark every Deployment Available at its current generation, like the
/// Deployment controller would once pods are ready
pub fn spawn_deployment_controller(store: Arc<MemoryStore>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let deployments = TypeRef::new("apps/v1", "Deployment");
        loop {
            for deployment in store.list(&deployments, None, None).await.unwrap_or_default() {
                let generation = deployment.metadata.generation.unwrap_or(1);
                let observed = deployment
                    .data
                    .pointer("/status/observedGeneration")
                    .and_then(Value::as_i64);
                if observed == Some(generation) {
                    continue;
                }
                let key = ObjectKey::of(&deployment).unwrap();
                let status = json!({"status": {
                    "observedGeneration": generation,
                    "conditions": [{"type": "Available", "status": "True"}],
                }});
                store.patch_status(&key, &status).await.unwrap();
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
}
