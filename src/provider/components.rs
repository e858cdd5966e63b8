//! # Components
//!
//! Decodes transformed manifests into objects and prepares them for install
//! into the provider's target namespace, the way `clusterctl` does:
//!
//! - namespaced objects are moved into the target namespace
//! - the `Namespace` object itself is renamed to the target namespace
//! - ServiceAccount subjects of role bindings follow the move
//! - webhook and conversion service references follow the move
//! - every object is labelled with the owning provider

use crate::constants::{CLUSTERCTL_LABEL, CLUSTER_PROVIDER_LABEL};
use crate::provider::Provider;
use kube::api::DynamicObject;
use serde_json::Value;
use thiserror::Error;

/// Kinds that are never namespaced
const CLUSTER_SCOPED_KINDS: &[&str] = &[
    "Namespace",
    "CustomResourceDefinition",
    "ClusterRole",
    "ClusterRoleBinding",
    "ValidatingWebhookConfiguration",
    "MutatingWebhookConfiguration",
    "APIService",
    "PriorityClass",
    "StorageClass",
    "ValidatingAdmissionPolicy",
    "ValidatingAdmissionPolicyBinding",
];

const CERT_MANAGER_INJECT_ANNOTATION: &str = "cert-manager.io/inject-ca-from";

#[derive(Debug, Error)]
pub enum ComponentsError {
    #[error("manifest {index}: invalid YAML: {source}")]
    Yaml {
        index: usize,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("manifest {index}: YAML missing {field}")]
    MissingField { index: usize, field: &'static str },

    #[error("manifest {index}: {source}")]
    Decode {
        index: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Is `kind` cluster-scoped?
#[must_use]
pub fn is_cluster_scoped(kind: &str) -> bool {
    CLUSTER_SCOPED_KINDS.contains(&kind)
}

/// Decode manifests and rewrite them for `provider`
///
/// Fragments that decode to nothing (comment-only documents) are skipped.
pub fn build_components(
    manifests: &[String],
    provider: &Provider,
) -> Result<Vec<DynamicObject>, ComponentsError> {
    let mut objects = Vec::with_capacity(manifests.len());
    for (index, manifest) in manifests.iter().enumerate() {
        let Some(mut value) = decode_manifest(index, manifest)? else {
            continue;
        };
        fix_target_namespace(&mut value, &provider.namespace);
        add_provider_labels(&mut value, &provider.manifest_label());
        let object = serde_json::from_value::<DynamicObject>(value)
            .map_err(|source| ComponentsError::Decode { index, source })?;
        objects.push(object);
    }
    Ok(objects)
}

fn decode_manifest(index: usize, manifest: &str) -> Result<Option<Value>, ComponentsError> {
    let has_content = manifest
        .lines()
        .map(str::trim)
        .any(|line| !line.is_empty() && !line.starts_with('#'));
    if !has_content {
        return Ok(None);
    }
    let value: Value =
        serde_yaml::from_str(manifest).map_err(|source| ComponentsError::Yaml { index, source })?;
    if value.is_null() {
        return Ok(None);
    }
    let missing = |field| ComponentsError::MissingField { index, field };
    value
        .get("apiVersion")
        .and_then(Value::as_str)
        .ok_or_else(|| missing("apiVersion"))?;
    value
        .get("kind")
        .and_then(Value::as_str)
        .ok_or_else(|| missing("kind"))?;
    value
        .pointer("/metadata/name")
        .and_then(Value::as_str)
        .ok_or_else(|| missing("metadata.name"))?;
    Ok(Some(value))
}

fn fix_target_namespace(value: &mut Value, namespace: &str) {
    let kind = value
        .get("kind")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    if let Some(metadata) = value.get_mut("metadata").and_then(Value::as_object_mut) {
        if kind == "Namespace" {
            metadata.insert("name".to_string(), Value::from(namespace));
            metadata.remove("namespace");
        } else if is_cluster_scoped(&kind) {
            metadata.remove("namespace");
        } else {
            metadata.insert("namespace".to_string(), Value::from(namespace));
        }

        if let Some(inject) = metadata
            .get_mut("annotations")
            .and_then(|a| a.get_mut(CERT_MANAGER_INJECT_ANNOTATION))
        {
            if let Some((_, name)) = inject.as_str().and_then(|s| s.split_once('/')) {
                *inject = Value::from(format!("{namespace}/{name}"));
            }
        }
    }

    match kind.as_str() {
        "ClusterRoleBinding" | "RoleBinding" => {
            if let Some(subjects) = value.get_mut("subjects").and_then(Value::as_array_mut) {
                for subject in subjects {
                    if subject.get("kind").and_then(Value::as_str) == Some("ServiceAccount") {
                        subject["namespace"] = Value::from(namespace);
                    }
                }
            }
        }
        "ValidatingWebhookConfiguration" | "MutatingWebhookConfiguration" => {
            if let Some(webhooks) = value.get_mut("webhooks").and_then(Value::as_array_mut) {
                for webhook in webhooks {
                    set_service_namespace(webhook.pointer_mut("/clientConfig/service"), namespace);
                }
            }
        }
        "CustomResourceDefinition" => {
            set_service_namespace(
                value.pointer_mut("/spec/conversion/webhook/clientConfig/service"),
                namespace,
            );
        }
        _ => {}
    }
}

fn set_service_namespace(service: Option<&mut Value>, namespace: &str) {
    if let Some(service) = service.and_then(Value::as_object_mut) {
        service.insert("namespace".to_string(), Value::from(namespace));
    }
}

fn add_provider_labels(value: &mut Value, provider_label: &str) {
    let Some(metadata) = value.get_mut("metadata").and_then(Value::as_object_mut) else {
        return;
    };
    let labels = metadata
        .entry("labels")
        .or_insert_with(|| Value::Object(serde_json::Map::new()));
    if let Some(labels) = labels.as_object_mut() {
        labels.insert(CLUSTER_PROVIDER_LABEL.to_string(), Value::from(provider_label));
        labels.insert(CLUSTERCTL_LABEL.to_string(), Value::from(""));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderType;

    fn provider() -> Provider {
        Provider {
            name: "aws".to_string(),
            namespace: "openshift-cluster-api".to_string(),
            version: "v2.5.0".to_string(),
            provider_type: ProviderType::Infrastructure,
            install_order: 20,
        }
    }

    fn manifests(docs: &[&str]) -> Vec<String> {
        docs.iter().map(|d| (*d).to_string()).collect()
    }

    const SERVICE_ACCOUNT: &str = r"apiVersion: v1
kind: ServiceAccount
metadata:
  name: capa-manager
  namespace: capa-system
";

    const BINDING: &str = r"apiVersion: rbac.authorization.k8s.io/v1
kind: ClusterRoleBinding
metadata:
  name: capa
  namespace: wrong
subjects:
- kind: ServiceAccount
  name: capa-manager
  namespace: capa-system
- kind: User
  name: admin
";

    const WEBHOOK: &str = r"apiVersion: admissionregistration.k8s.io/v1
kind: ValidatingWebhookConfiguration
metadata:
  name: capa-validating
  annotations:
    cert-manager.io/inject-ca-from: capa-system/capa-serving-cert
webhooks:
- name: a
  clientConfig:
    service:
      name: capa-webhook-service
      namespace: capa-system
";

    #[test]
    fn test_namespaces_rewritten() {
        let docs = manifests(&[
            "apiVersion: v1\nkind: Namespace\nmetadata:\n  name: capa-system\n",
            SERVICE_ACCOUNT,
            BINDING,
        ]);
        let objects = build_components(&docs, &provider()).unwrap();
        assert_eq!(objects.len(), 3);

        assert_eq!(objects[0].metadata.name.as_deref(), Some("openshift-cluster-api"));
        assert_eq!(objects[1].metadata.namespace.as_deref(), Some("openshift-cluster-api"));
        assert_eq!(objects[2].metadata.namespace, None);
        assert_eq!(objects[2].data["subjects"][0]["namespace"], "openshift-cluster-api");
        assert!(objects[2].data["subjects"][1].get("namespace").is_none());
    }

    #[test]
    fn test_provider_labels_added() {
        let docs = manifests(&[
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cfg\n  labels:\n    keep: me\n",
        ]);
        let objects = build_components(&docs, &provider()).unwrap();
        let labels = objects[0].metadata.labels.as_ref().unwrap();
        assert_eq!(
            labels.get(CLUSTER_PROVIDER_LABEL).map(String::as_str),
            Some("infrastructure-aws")
        );
        assert_eq!(labels.get(CLUSTERCTL_LABEL).map(String::as_str), Some(""));
        assert_eq!(labels.get("keep").map(String::as_str), Some("me"));
    }

    #[test]
    fn test_webhook_and_ca_injection_follow_namespace() {
        let docs = manifests(&[WEBHOOK]);
        let objects = build_components(&docs, &provider()).unwrap();
        let obj = &objects[0];
        assert_eq!(
            obj.data["webhooks"][0]["clientConfig"]["service"]["namespace"],
            "openshift-cluster-api"
        );
        assert_eq!(
            obj.metadata
                .annotations
                .as_ref()
                .and_then(|a| a.get(CERT_MANAGER_INJECT_ANNOTATION))
                .map(String::as_str),
            Some("openshift-cluster-api/capa-serving-cert")
        );
    }

    #[test]
    fn test_missing_fields_reported_with_index() {
        let docs = manifests(&[
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: ok\n",
            "apiVersion: v1\nmetadata:\n  name: no-kind\n",
        ]);
        let err = build_components(&docs, &provider()).unwrap_err();
        assert_eq!(err.to_string(), "manifest 1: YAML missing kind");
    }

    #[test]
    fn test_comment_only_fragment_skipped() {
        let docs = manifests(&[
            "# just a comment\n",
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: a\n",
        ]);
        assert_eq!(build_components(&docs, &provider()).unwrap().len(), 1);
    }
}
