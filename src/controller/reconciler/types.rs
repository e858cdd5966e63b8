//! # Reconciler Types
//!
//! The shared reconcile context and the controller-level error.

use crate::cluster::{ClusterStore, StoreError};
use crate::config::ControllerConfig;
use crate::controller::backoff::FibonacciBackoff;
use crate::controller::reconciler::config_client::{BuiltinProviders, ConfigClient};
use crate::controller::reconciler::installer::{KubeInstaller, ProviderInstaller};
use crate::controller::reconciler::phases::{Phase, PhaseError};
use crate::controller::reconciler::status::{ClusterOperatorStatus, StatusSink};
use crate::platform::{Images, PlatformType};
use crate::provider::source::SourceError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error("failed to read provider configuration: {0}")]
    Source(#[from] SourceError),

    #[error("provider {provider} failed in phase {phase}: {source}")]
    Phase {
        provider: String,
        phase: Phase,
        #[source]
        source: PhaseError,
    },

    #[error("failed to update operator status: {0}")]
    Status(#[from] StoreError),
}

/// Backoff state for a specific resource
#[derive(Debug, Clone)]
pub struct BackoffState {
    pub backoff: FibonacciBackoff,
    pub error_count: u32,
}

impl BackoffState {
    #[must_use]
    pub fn new(min_minutes: u64, max_minutes: u64) -> Self {
        Self {
            backoff: FibonacciBackoff::new(min_minutes, max_minutes),
            error_count: 0,
        }
    }

    pub fn increment_error(&mut self) {
        self.error_count += 1;
    }

    pub fn reset(&mut self) {
        self.error_count = 0;
        self.backoff.reset();
    }
}

/// Everything a reconcile needs, shared across reconciles
///
/// The platform and images are resolved once at startup. Nothing about
/// providers is kept here; every reconcile rebuilds that from the cluster.
#[derive(Clone)]
pub struct Reconciler {
    pub store: Arc<dyn ClusterStore>,
    pub config: ControllerConfig,
    pub platform: PlatformType,
    pub images: Images,
    pub config_client: Arc<dyn ConfigClient>,
    pub installer: Arc<dyn ProviderInstaller>,
    pub status: Arc<dyn StatusSink>,
    // Backoff state per resource (identified by namespace/name)
    pub backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("platform", &self.platform)
            .field("managed_namespace", &self.config.managed_namespace)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Wire the default collaborators over `store`
    pub fn new(
        store: Arc<dyn ClusterStore>,
        config: ControllerConfig,
        platform: PlatformType,
        images: Images,
    ) -> Self {
        let installer = KubeInstaller::new(
            Arc::clone(&store),
            config.install_timeout(),
            config.install_poll_interval(),
        );
        let status = ClusterOperatorStatus::new(Arc::clone(&store), &config.cluster_operator_name);
        Self {
            store,
            config,
            platform,
            images,
            config_client: Arc::new(BuiltinProviders),
            installer: Arc::new(installer),
            status: Arc::new(status),
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Forget the error history of a resource after a clean reconcile
    pub fn reset_backoff(&self, resource_key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            if let Some(state) = states.get_mut(resource_key) {
                state.reset();
            }
        }
    }
}
