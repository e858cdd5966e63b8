//! # Controller Configuration
//!
//! Operator-level settings loaded from environment variables.

use std::collections::BTreeMap;
use std::time::Duration;

/// Operator-level configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
/// Environment variables are populated from the operator Deployment manifest.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Namespace providers are installed into and provider ConfigMaps are read from
    pub managed_namespace: String,
    /// Platform override (skips the Infrastructure lookup when set)
    pub platform_override: Option<String>,
    /// Path to the JSON image map (`image key -> image reference`)
    pub images_file: String,
    /// Variables overlaid on the process environment during `${VAR}` substitution
    pub feature_gate_variables: BTreeMap<String, String>,
    /// Budget for provider Deployments to become Available (seconds)
    pub install_timeout_secs: u64,
    /// Poll interval while waiting for Deployments (seconds)
    pub install_poll_interval_secs: u64,
    /// Requeue interval after a successful reconcile (seconds)
    pub success_requeue_secs: u64,
    /// ClusterOperator object that receives conditions
    pub cluster_operator_name: String,
    /// Metrics and probe server port
    pub metrics_port: u16,
    /// HTTP server startup timeout (seconds)
    pub server_startup_timeout_secs: u64,
    /// HTTP server readiness poll interval (milliseconds)
    pub server_poll_interval_ms: u64,
    /// Log format (json, text)
    pub log_format: String,
    /// Fibonacci backoff minimum (minutes)
    pub backoff_min_minutes: u64,
    /// Fibonacci backoff maximum (minutes)
    pub backoff_max_minutes: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        use crate::constants::*;
        Self {
            managed_namespace: DEFAULT_MANAGED_NAMESPACE.to_string(),
            platform_override: None,
            images_file: DEFAULT_IMAGES_FILE.to_string(),
            feature_gate_variables: BTreeMap::new(),
            install_timeout_secs: DEFAULT_INSTALL_TIMEOUT_SECS,
            install_poll_interval_secs: DEFAULT_INSTALL_POLL_INTERVAL_SECS,
            success_requeue_secs: DEFAULT_SUCCESS_REQUEUE_SECS,
            cluster_operator_name: DEFAULT_CLUSTER_OPERATOR_NAME.to_string(),
            metrics_port: DEFAULT_METRICS_PORT,
            server_startup_timeout_secs: DEFAULT_SERVER_STARTUP_TIMEOUT_SECS,
            server_poll_interval_ms: DEFAULT_SERVER_POLL_INTERVAL_MS,
            log_format: "json".to_string(),
            backoff_min_minutes: DEFAULT_BACKOFF_MIN_MINUTES,
            backoff_max_minutes: DEFAULT_BACKOFF_MAX_MINUTES,
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    #[must_use]
    pub fn from_env() -> Self {
        use crate::constants::*;
        Self {
            managed_namespace: env_var_or_default_str(
                "MANAGED_NAMESPACE",
                DEFAULT_MANAGED_NAMESPACE,
            ),
            platform_override: std::env::var("PLATFORM")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            images_file: env_var_or_default_str("IMAGES_FILE", DEFAULT_IMAGES_FILE),
            feature_gate_variables: parse_variable_list(
                &std::env::var("FEATURE_GATE_VARIABLES").unwrap_or_default(),
            ),
            install_timeout_secs: env_var_or_default(
                "INSTALL_TIMEOUT_SECS",
                DEFAULT_INSTALL_TIMEOUT_SECS,
            ),
            install_poll_interval_secs: env_var_or_default(
                "INSTALL_POLL_INTERVAL_SECS",
                DEFAULT_INSTALL_POLL_INTERVAL_SECS,
            ),
            success_requeue_secs: env_var_or_default(
                "SUCCESS_REQUEUE_SECS",
                DEFAULT_SUCCESS_REQUEUE_SECS,
            ),
            cluster_operator_name: env_var_or_default_str(
                "CLUSTER_OPERATOR_NAME",
                DEFAULT_CLUSTER_OPERATOR_NAME,
            ),
            metrics_port: env_var_or_default("METRICS_PORT", DEFAULT_METRICS_PORT),
            server_startup_timeout_secs: env_var_or_default(
                "SERVER_STARTUP_TIMEOUT_SECS",
                DEFAULT_SERVER_STARTUP_TIMEOUT_SECS,
            ),
            server_poll_interval_ms: env_var_or_default(
                "SERVER_POLL_INTERVAL_MS",
                DEFAULT_SERVER_POLL_INTERVAL_MS,
            ),
            log_format: env_var_or_default_str("LOG_FORMAT", "json"),
            backoff_min_minutes: env_var_or_default(
                "BACKOFF_MIN_MINUTES",
                DEFAULT_BACKOFF_MIN_MINUTES,
            ),
            backoff_max_minutes: env_var_or_default(
                "BACKOFF_MAX_MINUTES",
                DEFAULT_BACKOFF_MAX_MINUTES,
            ),
        }
    }

    /// Get install wait budget
    #[must_use]
    pub fn install_timeout(&self) -> Duration {
        Duration::from_secs(self.install_timeout_secs)
    }

    /// Get Deployment readiness poll interval
    #[must_use]
    pub fn install_poll_interval(&self) -> Duration {
        Duration::from_secs(self.install_poll_interval_secs)
    }

    /// Get requeue interval after success
    #[must_use]
    pub fn success_requeue(&self) -> Duration {
        Duration::from_secs(self.success_requeue_secs)
    }
}

/// Parse `KEY=VALUE,KEY=VALUE` into a map, ignoring empty and malformed entries
#[must_use]
pub fn parse_variable_list(raw: &str) -> BTreeMap<String, String> {
    raw.split(',')
        .filter_map(|entry| {
            let (key, value) = entry.split_once('=')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            Some((key.to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Read environment variable or return default value
fn env_var_or_default<T: std::str::FromStr>(key: &str, default: T) -> T
where
    <T as std::str::FromStr>::Err: std::fmt::Debug,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Read environment variable as string or return default
fn env_var_or_default_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_variable_list() {
        let vars = parse_variable_list("EXP_MACHINE_POOL=true, CLUSTER_TOPOLOGY=false,,bogus");
        assert_eq!(vars.len(), 2);
        assert_eq!(vars.get("EXP_MACHINE_POOL").map(String::as_str), Some("true"));
        assert_eq!(vars.get("CLUSTER_TOPOLOGY").map(String::as_str), Some("false"));
    }

    #[test]
    fn test_parse_variable_list_empty() {
        assert!(parse_variable_list("").is_empty());
        assert!(parse_variable_list("=value").is_empty());
    }

    #[test]
    fn test_default_durations() {
        let config = ControllerConfig::default();
        assert_eq!(config.install_timeout(), Duration::from_secs(300));
        assert_eq!(config.success_requeue(), Duration::from_secs(600));
        assert_eq!(config.managed_namespace, "openshift-cluster-api");
    }
}
