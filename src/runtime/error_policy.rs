//! # Error Policy
//!
//! Decides when a failed reconcile runs again. Backoff state is tracked per
//! triggering ConfigMap so one noisy object does not slow the others.

use crate::constants::DEFAULT_RECONCILIATION_ERROR_REQUEUE_SECS;
use crate::controller::reconciler::{BackoffState, Reconciler, ReconcilerError};
use crate::observability::metrics;
use k8s_openapi::api::core::v1::ConfigMap;
use kube_runtime::controller::Action;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Handle reconciliation errors with Fibonacci backoff
pub fn handle_reconciliation_error(
    obj: Arc<ConfigMap>,
    error: &ReconcilerError,
    ctx: Arc<Reconciler>,
) -> Action {
    let name = obj.metadata.name.as_deref().unwrap_or("unknown");
    let namespace = obj.metadata.namespace.as_deref().unwrap_or_default();

    let error_span = tracing::error_span!(
        "controller.reconciliation_error",
        resource.name = name,
        resource.namespace = namespace,
    );
    let _guard = error_span.enter();

    error!(error = %error, "reconciliation failed");
    metrics::increment_reconciliation_errors();

    let resource_key = format!("{namespace}/{name}");
    let (backoff_seconds, error_count) = match ctx.backoff_states.lock() {
        Ok(mut states) => {
            let state = states.entry(resource_key).or_insert_with(|| {
                BackoffState::new(ctx.config.backoff_min_minutes, ctx.config.backoff_max_minutes)
            });
            state.increment_error();
            (state.backoff.next_backoff_seconds(), state.error_count)
        }
        Err(e) => {
            warn!(error = %e, "failed to lock backoff states, using default backoff");
            (DEFAULT_RECONCILIATION_ERROR_REQUEUE_SECS, 0)
        }
    };

    let next_retry = chrono::Utc::now()
        + chrono::Duration::seconds(i64::try_from(backoff_seconds).unwrap_or(i64::MAX));
    info!(
        backoff_seconds,
        error_count,
        next_retry = %next_retry.to_rfc3339(),
        "retrying with Fibonacci backoff"
    );
    Action::requeue(Duration::from_secs(backoff_seconds))
}
