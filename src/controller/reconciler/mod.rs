//! # Reconciler
//!
//! Provider installation reconciler.
//!
//! The reconciler:
//! - Watches provider ConfigMaps in the managed namespace
//! - Resolves the core and infrastructure providers for the platform
//! - Drives each provider through its install phases
//! - Reports the outcome as `ClusterOperator` conditions
//!
//! ## Reconciliation Flow
//!
//! 1. Read provider ConfigMaps
//! 2. Choose provider versions and sort by install order
//! 3. Per provider: `preflight_checks -> load -> fetch -> pre_install -> install`
//! 4. Update status

pub mod config_client;
pub mod installer;
pub mod phases;
pub mod reconcile;
pub mod status;
pub mod types;

// Re-export public API
pub use reconcile::{reconcile, reconcile_providers};
pub use status::{ClusterOperatorStatus, StatusSink};
pub use types::{BackoffState, Reconciler, ReconcilerError};
