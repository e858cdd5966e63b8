//! # Prelude
//!
//! Re-exports commonly used types and traits for convenience.
//!
//! ```rust
//! use capi_provider_operator::prelude::*;
//! ```

// Cluster access
pub use crate::cluster::{ClusterStore, KubeStore, MemoryStore, ObjectKey, StoreError, TypeRef};

// Provider model
pub use crate::provider::repository::{ConfigMapRepository, Repository};
pub use crate::provider::source::{ConfigSource, ProviderPayload};
pub use crate::provider::{Provider, ProviderType};

// Reconciler types - core controller functionality
pub use crate::controller::reconciler::installer::{KubeInstaller, ProviderInstaller};
pub use crate::controller::reconciler::phases::{Phase, PhaseError, PhaseOutcome};
pub use crate::controller::reconciler::{
    reconcile, reconcile_providers, BackoffState, Reconciler, ReconcilerError, StatusSink,
};

// Config and platform
pub use crate::config::ControllerConfig;
pub use crate::platform::{Images, PlatformType};
