//! # Constants
//!
//! Shared constants used throughout the operator.
//!
//! These values represent reasonable defaults and can be overridden via
//! environment variables where applicable (see [`crate::config::ControllerConfig`]).

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 8080;

/// Default HTTP server startup timeout (how long to wait for server to be ready)
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Default HTTP server readiness poll interval
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;

/// Namespace the operator manages and reads provider ConfigMaps from
pub const DEFAULT_MANAGED_NAMESPACE: &str = "openshift-cluster-api";

/// Name of the ClusterOperator object that receives status conditions
pub const DEFAULT_CLUSTER_OPERATOR_NAME: &str = "cluster-api";

/// JSON file mapping image keys to image references
pub const DEFAULT_IMAGES_FILE: &str = "/etc/cluster-api/images.json";

/// Budget for provider Deployments to become Available after install (seconds)
pub const DEFAULT_INSTALL_TIMEOUT_SECS: u64 = 300;

/// Poll interval while waiting for Deployments (seconds)
pub const DEFAULT_INSTALL_POLL_INTERVAL_SECS: u64 = 5;

/// Requeue interval after a fully successful reconcile (seconds)
pub const DEFAULT_SUCCESS_REQUEUE_SECS: u64 = 600;

/// Requeue interval while the target namespace is terminating (seconds)
pub const NAMESPACE_TERMINATING_REQUEUE_SECS: u64 = 10;

/// Fibonacci backoff bounds for reconciliation errors (minutes)
pub const DEFAULT_BACKOFF_MIN_MINUTES: u64 = 1;
pub const DEFAULT_BACKOFF_MAX_MINUTES: u64 = 10;

/// Field manager recorded on every write
pub const FIELD_MANAGER: &str = "capi-provider-operator";

// Provider ConfigMap labels

/// Label carrying the provider name (e.g. `cluster-api`, `aws`)
pub const PROVIDER_NAME_LABEL: &str = "provider.cluster.x-k8s.io/name";

/// Label carrying the provider type (`core`, `infrastructure`, ...)
pub const PROVIDER_TYPE_LABEL: &str = "provider.cluster.x-k8s.io/type";

/// Label carrying the provider version; its presence marks a ConfigMap as a provider source
pub const PROVIDER_VERSION_LABEL: &str = "provider.cluster.x-k8s.io/version";

/// Optional label overriding the default install order
pub const PROVIDER_INSTALL_ORDER_LABEL: &str = "provider.cluster.x-k8s.io/install-order";

// Provider ConfigMap keys

pub const COMPONENTS_KEY: &str = "components";
pub const COMPONENTS_ZSTD_KEY: &str = "components-zstd";
pub const METADATA_KEY: &str = "metadata";

/// Metadata file name inside a provider repository
pub const METADATA_FILE: &str = "metadata.yaml";

// Manifest placeholders emitted by the asset generator

/// Image reference placeholder in upstream manifests
pub const IMAGE_PLACEHOLDER: &str = "to.be/replaced:v99";

/// Default manager command path in upstream manifests
pub const COMMAND_PLACEHOLDER: &str = "/manager";

/// API contracts this operator knows how to install
pub const SUPPORTED_CONTRACTS: &[&str] = &["v1beta1", "v1beta2"];

// Labels and annotations written onto installed components

/// clusterctl label identifying the owning provider (`<type-prefix>-<name>`)
pub const CLUSTER_PROVIDER_LABEL: &str = "cluster.x-k8s.io/provider";

/// clusterctl marker label on every installed component
pub const CLUSTERCTL_LABEL: &str = "clusterctl.cluster.x-k8s.io";

/// Deployment annotation holding the sha256 of the applied spec
pub const SPEC_HASH_ANNOTATION: &str = "operator.openshift.io/spec-hash";

/// Deployment annotation recording the generation observed after our last write
pub const APPLIED_GENERATION_ANNOTATION: &str = "capi-operator.openshift.io/applied-generation";

/// CRD annotation requesting CA bundle injection by the service CA operator
pub const INJECT_CABUNDLE_ANNOTATION: &str = "service.beta.openshift.io/inject-cabundle";

/// Requeue used by the error policy when backoff state is unavailable (seconds)
pub const DEFAULT_RECONCILIATION_ERROR_REQUEUE_SECS: u64 = 60;
