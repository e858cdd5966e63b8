//! # Watch Loop
//!
//! Controller watch loop over provider ConfigMaps in the managed namespace.
//!
//! Only ConfigMaps carrying the provider version label are watched. Every
//! event triggers a full reconcile, so reconciles run one at a time.
//!
//! The operator reports ready once the ConfigMap cache has finished its
//! initial list, and not ready again as soon as shutdown starts.

use crate::constants::PROVIDER_VERSION_LABEL;
use crate::controller::reconciler::{reconcile, Reconciler};
use crate::runtime::error_policy::handle_reconciliation_error;
use crate::server::ServerState;
use futures::StreamExt;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::Api;
use kube_runtime::reflector::Store;
use kube_runtime::{controller, watcher, Controller};
use std::sync::Arc;
use tracing::{debug, info, warn, Instrument};

/// Run the controller until a shutdown signal arrives
pub async fn run_watch_loop(
    config_maps: Api<ConfigMap>,
    reconciler: Arc<Reconciler>,
    server_state: Arc<ServerState>,
) -> Result<(), anyhow::Error> {
    info!("Starting controller watch loop...");

    let shutdown_state = Arc::clone(&server_state);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal, initiating graceful shutdown...");
            shutdown_state.mark_not_ready();
        }
    });

    let controller = Controller::new(
        config_maps,
        watcher::Config::default().labels(PROVIDER_VERSION_LABEL),
    );
    tokio::spawn(mark_ready_when_synced(controller.store(), server_state));

    controller
        .with_config(controller::Config::default().concurrency(1))
        .shutdown_on_signal()
        .run(reconcile, handle_reconciliation_error, reconciler)
        .for_each(|result| async move {
            match result {
                Ok((obj, action)) => debug!(object = %obj, ?action, "reconciled"),
                Err(e) => warn!(error = %e, "controller stream error"),
            }
        })
        .instrument(tracing::info_span!("controller.watch"))
        .await;

    info!("Controller stopped gracefully");
    Ok(())
}

/// Flip readiness once the ConfigMap cache has completed its initial list
///
/// Stays not ready if the controller stops before that.
async fn mark_ready_when_synced(cache: Store<ConfigMap>, server_state: Arc<ServerState>) {
    match cache.wait_until_ready().await {
        Ok(()) => server_state.mark_ready(),
        Err(e) => warn!(error = %e, "ConfigMap cache closed before initial sync"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube_runtime::reflector;

    #[tokio::test]
    async fn test_ready_after_initial_sync() {
        let state = Arc::new(ServerState::default());
        let (cache, mut writer) = reflector::store::<ConfigMap>();
        let task = tokio::spawn(mark_ready_when_synced(cache, Arc::clone(&state)));

        tokio::task::yield_now().await;
        assert!(!state.is_ready());

        writer.apply_watcher_event(&watcher::Event::Init);
        writer.apply_watcher_event(&watcher::Event::InitDone);
        task.await.unwrap();
        assert!(state.is_ready());
    }

    #[tokio::test]
    async fn test_not_ready_when_cache_closes_early() {
        let state = Arc::new(ServerState::default());
        let (cache, writer) = reflector::store::<ConfigMap>();
        drop(writer);

        mark_ready_when_synced(cache, Arc::clone(&state)).await;
        assert!(!state.is_ready());
    }
}
