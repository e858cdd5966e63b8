//! # Metrics
//!
//! Prometheus metrics for monitoring the operator.
//!
//! ## Metrics Exposed
//!
//! - `capi_operator_reconciliations_total` - Total number of reconciliations
//! - `capi_operator_reconciliation_errors_total` - Total number of reconciliation errors
//! - `capi_operator_reconciliation_duration_seconds` - Duration of reconciliation operations
//! - `capi_operator_provider_installs_total` - Successful provider installs by provider
//! - `capi_operator_phase_failures_total` - Phase failures by phase and reason
//! - `capi_operator_manifests_applied_total` - Applied manifests by outcome

use anyhow::Result;
use prometheus::{Histogram, IntCounter, IntCounterVec, Registry};
use std::sync::LazyLock;

// Metrics
pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "capi_operator_reconciliations_total",
        "Total number of reconciliations",
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "capi_operator_reconciliation_errors_total",
        "Total number of reconciliation errors",
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "capi_operator_reconciliation_duration_seconds",
            "Duration of reconciliation in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 120.0, 300.0]),
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static PROVIDER_INSTALLS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "capi_operator_provider_installs_total",
            "Total number of successful provider installs by provider",
        ),
        &["provider"],
    )
    .expect("Failed to create PROVIDER_INSTALLS_TOTAL metric - this should never happen")
});

static PHASE_FAILURES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "capi_operator_phase_failures_total",
            "Total number of provider phase failures by phase and reason",
        ),
        &["phase", "reason"],
    )
    .expect("Failed to create PHASE_FAILURES_TOTAL metric - this should never happen")
});

static MANIFESTS_APPLIED_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "capi_operator_manifests_applied_total",
            "Total number of applied manifests by outcome (changed, unchanged, failed)",
        ),
        &["outcome"],
    )
    .expect("Failed to create MANIFESTS_APPLIED_TOTAL metric - this should never happen")
});

#[allow(
    clippy::missing_errors_doc,
    reason = "Error documentation is provided in doc comments"
)]
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(PROVIDER_INSTALLS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(PHASE_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(MANIFESTS_APPLIED_TOTAL.clone()))?;

    Ok(())
}

pub fn increment_reconciliations() {
    RECONCILIATIONS_TOTAL.inc();
}

pub fn increment_reconciliation_errors() {
    RECONCILIATION_ERRORS_TOTAL.inc();
}

pub fn observe_reconciliation_duration(duration: f64) {
    RECONCILIATION_DURATION.observe(duration);
}

pub fn increment_provider_installs(provider: &str) {
    PROVIDER_INSTALLS_TOTAL.with_label_values(&[provider]).inc();
}

pub fn increment_phase_failures(phase: &str, reason: &str) {
    PHASE_FAILURES_TOTAL
        .with_label_values(&[phase, reason])
        .inc();
}

/// `outcome` is one of `changed`, `unchanged` or `failed`
pub fn increment_manifests_applied(outcome: &str) {
    MANIFESTS_APPLIED_TOTAL.with_label_values(&[outcome]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_increment_reconciliations() {
        let before = RECONCILIATIONS_TOTAL.get();
        increment_reconciliations();
        assert_eq!(RECONCILIATIONS_TOTAL.get(), before + 1u64);
    }

    #[test]
    fn test_increment_reconciliation_errors() {
        let before = RECONCILIATION_ERRORS_TOTAL.get();
        increment_reconciliation_errors();
        assert_eq!(RECONCILIATION_ERRORS_TOTAL.get(), before + 1u64);
    }

    #[test]
    fn test_observe_reconciliation_duration() {
        observe_reconciliation_duration(1.5);
        // Just verify it doesn't panic
    }

    #[test]
    fn test_increment_phase_failures_by_label() {
        let before = PHASE_FAILURES_TOTAL
            .with_label_values(&["load", "VersionIncompatible"])
            .get();
        increment_phase_failures("load", "VersionIncompatible");
        let after = PHASE_FAILURES_TOTAL
            .with_label_values(&["load", "VersionIncompatible"])
            .get();
        assert_eq!(after, before + 1u64);
    }

    #[test]
    fn test_increment_manifests_applied_by_outcome() {
        let before = MANIFESTS_APPLIED_TOTAL.with_label_values(&["failed"]).get();
        increment_manifests_applied("failed");
        let after = MANIFESTS_APPLIED_TOTAL.with_label_values(&["failed"]).get();
        assert_eq!(after, before + 1u64);
    }

    #[test]
    fn test_increment_provider_installs() {
        let before = PROVIDER_INSTALLS_TOTAL.with_label_values(&["test-provider"]).get();
        increment_provider_installs("test-provider");
        let after = PROVIDER_INSTALLS_TOTAL.with_label_values(&["test-provider"]).get();
        assert_eq!(after, before + 1u64);
    }
}
