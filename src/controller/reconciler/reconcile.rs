//! # Reconciliation Logic
//!
//! One reconcile installs the core provider and the platform's infrastructure
//! provider from the provider ConfigMaps in the managed namespace.
//!
//! 1. Read every provider ConfigMap into a [`ConfigSource`]
//! 2. Pick the providers to install and the highest version of each
//! 3. Sort them by install order
//! 4. Drive each provider through its phases, stopping at the first that
//!    does not finish
//! 5. Report the result as operator conditions
//!
//! Triggered by any provider ConfigMap change; which ConfigMap changed does
//! not matter because everything is rebuilt from the cluster.

use crate::controller::reconciler::phases::{
    run_phases, PhaseContext, PhaseOutcome, ProviderPhases, REASON_PROVIDER_CONFIG_INVALID,
};
use crate::controller::reconciler::status::{
    report_available, report_failure, report_progressing, AVAILABLE_CONDITION,
    DEGRADED_CONDITION, REASON_AS_EXPECTED, REASON_SYNCING, REASON_UNSUPPORTED_PLATFORM,
};
use crate::controller::reconciler::types::{Reconciler, ReconcilerError};
use crate::observability::metrics;
use crate::provider::order::sort_by_install_order;
use crate::provider::repository::ConfigMapRepository;
use crate::provider::source::{list_provider_config_maps, ConfigSource, SourceError};
use crate::provider::transform::Variables;
use crate::provider::{Provider, ProviderType};
use k8s_openapi::api::core::v1::ConfigMap;
use kube_runtime::controller::Action;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn, Instrument};

/// Core provider name
pub const CORE_PROVIDER: &str = "cluster-api";

/// Controller entry point for a provider ConfigMap event
pub async fn reconcile(
    cm: Arc<ConfigMap>,
    ctx: Arc<Reconciler>,
) -> Result<Action, ReconcilerError> {
    let resource_key = format!(
        "{}/{}",
        cm.metadata.namespace.as_deref().unwrap_or_default(),
        cm.metadata.name.as_deref().unwrap_or("unknown")
    );
    let span = tracing::info_span!("reconcile", trigger = %resource_key, platform = %ctx.platform);

    let action = reconcile_providers(&ctx).instrument(span).await?;
    ctx.reset_backoff(&resource_key);
    Ok(action)
}

/// Install or upgrade every provider the platform needs
pub async fn reconcile_providers(ctx: &Reconciler) -> Result<Action, ReconcilerError> {
    let start = Instant::now();
    metrics::increment_reconciliations();
    let result = reconcile_inner(ctx).await;
    metrics::observe_reconciliation_duration(start.elapsed().as_secs_f64());
    result
}

async fn reconcile_inner(ctx: &Reconciler) -> Result<Action, ReconcilerError> {
    let status = ctx.status.as_ref();

    let Some(infrastructure) = ctx.platform.infrastructure_provider() else {
        info!(platform = %ctx.platform, "no infrastructure provider for platform");
        let message = format!("Cluster API is not supported on platform {}", ctx.platform);
        report_available(status, REASON_UNSUPPORTED_PLATFORM, &message).await?;
        return Ok(Action::await_change());
    };

    let namespace = &ctx.config.managed_namespace;
    let sources = match read_sources(ctx).await {
        Ok(sources) => sources,
        Err(e) => {
            warn!(error = %e, "failed to read provider configmaps");
            let message = e.to_string();
            let reason = REASON_PROVIDER_CONFIG_INVALID;
            let conditions = [(DEGRADED_CONDITION, true), (AVAILABLE_CONDITION, false)];
            for (condition_type, value) in conditions {
                status
                    .set_condition(condition_type, value, reason, &message)
                    .await?;
            }
            return Err(e.into());
        }
    };

    let mut providers = desired_providers(&sources, infrastructure, namespace);
    sort_by_install_order(&mut providers);
    info!(
        providers = ?providers.iter().map(ToString::to_string).collect::<Vec<_>>(),
        "reconciling providers"
    );

    let variables = Variables::from_env_with(&ctx.config.feature_gate_variables);
    let phase_ctx = PhaseContext {
        sources: &sources,
        config_client: ctx.config_client.as_ref(),
        installer: ctx.installer.as_ref(),
        images: &ctx.images,
        variables: &variables,
    };

    for provider in &providers {
        let span = tracing::info_span!("provider", provider = %provider);
        let mut phases = ProviderPhases::new(provider, phase_ctx);
        let (phase, outcome) = run_phases(&mut phases).instrument(span).await;
        match outcome {
            PhaseOutcome::Continue => {}
            PhaseOutcome::Requeue(after) => {
                info!(provider = %provider, %phase, ?after, "provider requeued");
                let message = format!("waiting to install {provider}");
                report_progressing(status, REASON_SYNCING, &message).await?;
                return Ok(Action::requeue(after));
            }
            PhaseOutcome::Fail(e) => {
                warn!(
                    provider = %provider,
                    %phase,
                    reason = %e.reason,
                    error = %e.message,
                    "provider phase failed"
                );
                metrics::increment_phase_failures(phase.as_str(), &e.reason);
                report_failure(status, &e).await?;
                return Err(ReconcilerError::Phase {
                    provider: provider.to_string(),
                    phase,
                    source: e,
                });
            }
        }
    }

    let installed = providers
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    let message = format!("Cluster API providers installed: {installed}");
    report_available(status, REASON_AS_EXPECTED, &message).await?;
    info!(%installed, "all providers installed");
    Ok(Action::requeue(ctx.config.success_requeue()))
}

/// Read every provider ConfigMap; one malformed ConfigMap fails the whole read
async fn read_sources(ctx: &Reconciler) -> Result<Vec<ConfigSource>, SourceError> {
    let namespace = &ctx.config.managed_namespace;
    list_provider_config_maps(ctx.store.as_ref(), namespace)
        .await?
        .iter()
        .map(|cm| ConfigSource::from_config_map(cm, namespace))
        .collect()
}

/// The core provider plus the platform's infrastructure provider, each at
/// the highest version found among its sources
///
/// A provider without usable sources is still returned with an empty version
/// so its `load` phase reports why.
#[must_use]
pub fn desired_providers(
    sources: &[ConfigSource],
    infrastructure: &str,
    namespace: &str,
) -> Vec<Provider> {
    [
        (CORE_PROVIDER, ProviderType::Core),
        (infrastructure, ProviderType::Infrastructure),
    ]
    .into_iter()
    .map(|(name, provider_type)| {
        latest_source(sources, name, provider_type).map_or_else(
            || Provider {
                name: name.to_string(),
                namespace: namespace.to_string(),
                version: String::new(),
                provider_type,
                install_order: provider_type.default_install_order(),
            },
            |source| source.provider.clone(),
        )
    })
    .collect()
}

fn latest_source<'a>(
    sources: &'a [ConfigSource],
    name: &str,
    provider_type: ProviderType,
) -> Option<&'a ConfigSource> {
    let repository = ConfigMapRepository::from_sources(name, provider_type, sources).ok()?;
    let latest = repository.latest_version()?;
    sources
        .iter()
        .find(|s| s.is_for(name, provider_type) && s.provider.version == latest)
}
