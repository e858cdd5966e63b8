//! # Cluster API Provider Operator
//!
//! A Kubernetes operator that installs a Cluster API core provider plus the
//! infrastructure provider for the platform the cluster runs on.
//!
//! ## Overview
//!
//! 1. **Watching provider ConfigMaps** - labelled, versioned manifest bundles
//!    in the managed namespace
//! 2. **Checking contracts** - each provider version must declare a supported
//!    Cluster API contract
//! 3. **Rewriting manifests** - variables, images, manager commands and target namespace
//! 4. **Installing in order** - core first, waiting for Deployments to become Available
//! 5. **Reporting status** - conditions on the `ClusterOperator` object
//!
//! Configuration comes from environment variables; see
//! [`capi_provider_operator::config::ControllerConfig`].

use anyhow::Result;
use capi_provider_operator::runtime::{initialization::initialize, watch_loop::run_watch_loop};

#[tokio::main]
async fn main() -> Result<()> {
    let init = initialize().await?;
    run_watch_loop(init.config_maps, init.reconciler, init.server_state).await
}
