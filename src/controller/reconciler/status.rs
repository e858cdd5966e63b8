//! # Status Updates
//!
//! Writes operator conditions to the `ClusterOperator` object.
//!
//! Each condition is written only when its status, reason or message changed,
//! so an idle reconcile produces no watch events. `lastTransitionTime` moves
//! only when the status flips.

use crate::cluster::{ClusterStore, ObjectKey, StoreError, TypeRef};
use crate::controller::reconciler::phases::{
    PhaseError, Severity, PREFLIGHT_CONDITION, PROVIDER_INSTALLED_CONDITION,
};
use async_trait::async_trait;
use kube::api::{DynamicObject, ObjectMeta, TypeMeta};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

const CLUSTER_OPERATOR_API_VERSION: &str = "config.openshift.io/v1";
const CLUSTER_OPERATOR_KIND: &str = "ClusterOperator";

pub const AVAILABLE_CONDITION: &str = "Available";
pub const PROGRESSING_CONDITION: &str = "Progressing";
pub const DEGRADED_CONDITION: &str = "Degraded";

pub const REASON_AS_EXPECTED: &str = "AsExpected";
pub const REASON_SYNCING: &str = "SyncingResources";
pub const REASON_UNSUPPORTED_PLATFORM: &str = "UnsupportedPlatform";

/// Destination for operator conditions
#[cfg_attr(test, automock)]
#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn set_condition(
        &self,
        condition_type: &str,
        status: bool,
        reason: &str,
        message: &str,
    ) -> Result<(), StoreError>;
}

/// [`StatusSink`] backed by a cluster-scoped `ClusterOperator`
pub struct ClusterOperatorStatus {
    store: Arc<dyn ClusterStore>,
    name: String,
}

impl std::fmt::Debug for ClusterOperatorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterOperatorStatus")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl ClusterOperatorStatus {
    pub fn new(store: Arc<dyn ClusterStore>, name: impl Into<String>) -> Self {
        Self {
            store,
            name: name.into(),
        }
    }

    fn key(&self) -> ObjectKey {
        ObjectKey::new(
            TypeRef::new(CLUSTER_OPERATOR_API_VERSION, CLUSTER_OPERATOR_KIND),
            None,
            &self.name,
        )
    }

    async fn get_or_create(&self) -> Result<DynamicObject, StoreError> {
        match self.store.get(&self.key()).await {
            Err(e) if e.is_not_found() => {
                debug!(name = %self.name, "creating ClusterOperator");
                let empty = DynamicObject {
                    types: Some(TypeMeta {
                        api_version: CLUSTER_OPERATOR_API_VERSION.to_string(),
                        kind: CLUSTER_OPERATOR_KIND.to_string(),
                    }),
                    metadata: ObjectMeta {
                        name: Some(self.name.clone()),
                        ..Default::default()
                    },
                    data: json!({"spec": {}}),
                };
                self.store.create(&empty).await
            }
            other => other,
        }
    }
}

#[async_trait]
impl StatusSink for ClusterOperatorStatus {
    async fn set_condition(
        &self,
        condition_type: &str,
        status: bool,
        reason: &str,
        message: &str,
    ) -> Result<(), StoreError> {
        let existing = self.get_or_create().await?;
        let mut conditions = existing
            .data
            .pointer("/status/conditions")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let status_value = if status { "True" } else { "False" };
        let position = conditions.iter().position(|c| c["type"] == condition_type);
        let now = || Value::from(chrono::Utc::now().to_rfc3339());
        let last_transition_time = match position.map(|i| &conditions[i]) {
            Some(current) if current["status"] == status_value => {
                if current["reason"] == reason && current["message"] == message {
                    debug!(condition = condition_type, "condition unchanged, skipping update");
                    return Ok(());
                }
                current
                    .get("lastTransitionTime")
                    .cloned()
                    .unwrap_or_else(now)
            }
            _ => now(),
        };

        let condition = json!({
            "type": condition_type,
            "status": status_value,
            "reason": reason,
            "message": message,
            "lastTransitionTime": last_transition_time,
        });
        match position {
            Some(i) => conditions[i] = condition,
            None => conditions.push(condition),
        }

        self.store
            .patch_status(&self.key(), &json!({"status": {"conditions": conditions}}))
            .await?;
        Ok(())
    }
}

/// Nothing left to do
///
/// Clears any phase condition a previous failure left at `False`.
pub async fn report_available(
    sink: &dyn StatusSink,
    reason: &str,
    message: &str,
) -> Result<(), StoreError> {
    for phase_condition in [PREFLIGHT_CONDITION, PROVIDER_INSTALLED_CONDITION] {
        sink.set_condition(phase_condition, true, REASON_AS_EXPECTED, "")
            .await?;
    }
    sink.set_condition(AVAILABLE_CONDITION, true, reason, message)
        .await?;
    sink.set_condition(PROGRESSING_CONDITION, false, REASON_AS_EXPECTED, "")
        .await?;
    sink.set_condition(DEGRADED_CONDITION, false, REASON_AS_EXPECTED, "")
        .await
}

/// Work is still in flight and will be retried
pub async fn report_progressing(
    sink: &dyn StatusSink,
    reason: &str,
    message: &str,
) -> Result<(), StoreError> {
    sink.set_condition(PROGRESSING_CONDITION, true, reason, message)
        .await
}

/// Surface a phase failure
///
/// Errors degrade the operator; warnings only mark it as progressing.
pub async fn report_failure(sink: &dyn StatusSink, error: &PhaseError) -> Result<(), StoreError> {
    sink.set_condition(error.condition_type, false, &error.reason, &error.message)
        .await?;
    match error.severity {
        Severity::Error => {
            sink.set_condition(DEGRADED_CONDITION, true, &error.reason, &error.message)
                .await?;
            sink.set_condition(AVAILABLE_CONDITION, false, &error.reason, &error.message)
                .await
        }
        Severity::Warning => report_progressing(sink, &error.reason, &error.message).await,
    }
}
