//! # Initialization
//!
//! Controller initialization: rustls setup, tracing, metrics, server
//! startup, Kubernetes client, platform and image resolution.

use crate::cluster::KubeStore;
use crate::config::ControllerConfig;
use crate::controller::reconciler::Reconciler;
use crate::observability;
use crate::platform::{resolve_platform, Images};
use crate::server::{start_server, ServerState};
use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::ConfigMap;
use kube::{api::Api, Client};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};

/// Initialization result containing all necessary components for the controller
pub struct InitializationResult {
    /// Provider ConfigMaps in the managed namespace
    pub config_maps: Api<ConfigMap>,
    /// Reconciler context
    pub reconciler: Arc<Reconciler>,
    /// Server state for health checks
    pub server_state: Arc<ServerState>,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field("reconciler", &self.reconciler)
            .field("server_ready", &self.server_state.is_ready())
            .finish_non_exhaustive()
    }
}

/// Initialize the controller runtime
///
/// The platform is resolved once here and handed to the reconciler by value.
pub async fn initialize() -> Result<InitializationResult> {
    // Required for rustls 0.23+ when no default provider is set via features
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        anyhow::bail!("Failed to install rustls crypto provider");
    }

    let config = ControllerConfig::from_env();
    init_tracing(&config.log_format);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        git_hash = env!("BUILD_GIT_HASH"),
        built = env!("BUILD_DATETIME"),
        "Starting Cluster API provider operator"
    );

    observability::metrics::register_metrics()?;

    let server_state = Arc::new(ServerState::default());
    let server_port = config.metrics_port;
    let server_state_clone = Arc::clone(&server_state);
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(server_port, server_state_clone).await {
            error!(error = %e, "HTTP server error");
        }
    });
    wait_for_server_ready(&config, &server_handle).await?;

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    let store = Arc::new(KubeStore::new(client.clone()));

    let platform = resolve_platform(store.as_ref(), config.platform_override.as_deref())
        .await
        .context("Failed to resolve platform")?;
    let images = Images::load(&config.images_file).context("Failed to load provider images")?;
    info!(%platform, images_file = %config.images_file, "platform resolved");

    let config_maps: Api<ConfigMap> = Api::namespaced(client, &config.managed_namespace);
    let reconciler = Arc::new(Reconciler::new(store, config, platform, images));

    info!("Controller initialized, starting watch loop...");

    Ok(InitializationResult {
        config_maps,
        reconciler,
        server_state,
    })
}

/// Install the global tracing subscriber
///
/// `LOG_FORMAT=json` (default) emits JSON lines, anything else plain text.
fn init_tracing(log_format: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "capi_provider_operator=info".into());
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = if log_format.eq_ignore_ascii_case("json") {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if let Err(e) = result {
        eprintln!("tracing subscriber already initialized: {e}");
    }
}

/// Wait until the HTTP server accepts connections
async fn wait_for_server_ready(
    config: &ControllerConfig,
    server_handle: &tokio::task::JoinHandle<()>,
) -> Result<()> {
    let startup_timeout = Duration::from_secs(config.server_startup_timeout_secs);
    let poll_interval = Duration::from_millis(config.server_poll_interval_ms);
    let addr = format!("127.0.0.1:{}", config.metrics_port);
    let start_time = Instant::now();

    loop {
        if server_handle.is_finished() {
            anyhow::bail!("HTTP server failed to start");
        }

        if tokio::net::TcpStream::connect(&addr).await.is_ok() {
            info!(%addr, "HTTP server is ready and accepting connections");
            return Ok(());
        }

        if start_time.elapsed() > startup_timeout {
            anyhow::bail!(
                "HTTP server failed to become ready within {} seconds",
                startup_timeout.as_secs()
            );
        }

        tokio::time::sleep(poll_interval).await;
    }
}
