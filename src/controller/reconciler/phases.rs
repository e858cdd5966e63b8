//! # Provider Phases
//!
//! Drives one provider through
//! `preflight_checks -> load -> fetch -> pre_install -> install`.
//!
//! Every phase returns a [`PhaseOutcome`]. The driver stops at the first
//! outcome that is not [`PhaseOutcome::Continue`]; later phases never run in
//! that pass. Each reconcile starts again from `preflight_checks`, so every
//! phase must be idempotent.
//!
//! `pre_install` carries the upgrade path: when the inventory records a
//! different version than the one being installed, the provider's old
//! components (except its Namespace and CRDs) are deleted before `install`.

use super::config_client::ConfigClient;
use super::installer::{InstallError, ProviderInstaller};
use crate::constants::NAMESPACE_TERMINATING_REQUEUE_SECS;
use crate::platform::{manager_command, Images, PlatformError};
use crate::provider::components::{build_components, ComponentsError};
use crate::provider::contract::{validate_contract, ContractError};
use crate::provider::repository::{
    parse_version, ConfigMapRepository, Repository, RepositoryError,
};
use crate::provider::source::ConfigSource;
use crate::provider::transform::{transform_components, ManifestError, Rewrite, Variables};
use crate::provider::Provider;
use async_trait::async_trait;
use kube::api::DynamicObject;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

/// Condition type of failures found before anything is written
pub const PREFLIGHT_CONDITION: &str = "Preflight";

/// Condition type of failures while rendering or writing provider components
pub const PROVIDER_INSTALLED_CONDITION: &str = "ProviderInstalled";

pub const REASON_PROVIDER_UNKNOWN: &str = "ProviderUnknown";
pub const REASON_VERSION_INCOMPATIBLE: &str = "VersionIncompatible";
pub const REASON_PROVIDER_CONFIG_INVALID: &str = "ProviderConfigInvalid";
pub const REASON_COMPONENTS_FETCH_ERROR: &str = "ComponentsFetchError";
pub const REASON_INSTALL_TIMEOUT: &str = "timed out waiting for deployment to become ready";
pub const REASON_INSTALL_FAILED: &str = "install failed";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    PreflightChecks,
    Load,
    Fetch,
    PreInstall,
    Install,
}

impl Phase {
    pub const ALL: [Self; 5] = [
        Self::PreflightChecks,
        Self::Load,
        Self::Fetch,
        Self::PreInstall,
        Self::Install,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PreflightChecks => "preflight_checks",
            Self::Load => "load",
            Self::Fetch => "fetch",
            Self::PreInstall => "pre_install",
            Self::Install => "install",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a failure is surfaced: `Error` degrades the operator, `Warning`
/// only reports progress and waits for the next pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// A phase failure, tagged for the status conditions
#[derive(Debug, Error)]
#[error("{reason}: {message}")]
pub struct PhaseError {
    pub reason: String,
    pub condition_type: &'static str,
    pub severity: Severity,
    pub message: String,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl PhaseError {
    pub fn new(
        condition_type: &'static str,
        reason: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            reason: reason.into(),
            condition_type,
            severity: Severity::Error,
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    #[must_use]
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }
}

#[derive(Debug)]
pub enum PhaseOutcome {
    Continue,
    Requeue(Duration),
    Fail(PhaseError),
}

impl PhaseOutcome {
    fn fail(
        condition_type: &'static str,
        reason: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Fail(PhaseError::new(condition_type, reason, source))
    }
}

/// The five phases of a provider reconcile
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PhaseSteps: Send {
    async fn preflight_checks(&mut self) -> PhaseOutcome;
    async fn load(&mut self) -> PhaseOutcome;
    async fn fetch(&mut self) -> PhaseOutcome;
    async fn pre_install(&mut self) -> PhaseOutcome;
    async fn install(&mut self) -> PhaseOutcome;
}

/// Run phases in order until one does not continue
///
/// Returns the last phase that ran and its outcome; `(Install, Continue)`
/// when every phase completed.
pub async fn run_phases(steps: &mut (dyn PhaseSteps + '_)) -> (Phase, PhaseOutcome) {
    for phase in Phase::ALL {
        let outcome = match phase {
            Phase::PreflightChecks => steps.preflight_checks().await,
            Phase::Load => steps.load().await,
            Phase::Fetch => steps.fetch().await,
            Phase::PreInstall => steps.pre_install().await,
            Phase::Install => steps.install().await,
        };
        debug!(%phase, ?outcome, "phase finished");
        if !matches!(outcome, PhaseOutcome::Continue) {
            return (phase, outcome);
        }
    }
    (Phase::Install, PhaseOutcome::Continue)
}

/// Options recorded by `load` for the later phases
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentOptions {
    pub target_namespace: String,
    pub version: String,
}

/// Collaborators shared by every provider of one reconcile
#[derive(Clone, Copy)]
pub struct PhaseContext<'a> {
    pub sources: &'a [ConfigSource],
    pub config_client: &'a dyn ConfigClient,
    pub installer: &'a dyn ProviderInstaller,
    pub images: &'a Images,
    pub variables: &'a Variables,
}

/// [`PhaseSteps`] for one provider
pub struct ProviderPhases<'a> {
    provider: &'a Provider,
    ctx: PhaseContext<'a>,
    repository: Option<ConfigMapRepository>,
    options: Option<ComponentOptions>,
    components: Vec<DynamicObject>,
}

impl<'a> ProviderPhases<'a> {
    pub fn new(provider: &'a Provider, ctx: PhaseContext<'a>) -> Self {
        Self {
            provider,
            ctx,
            repository: None,
            options: None,
            components: Vec::new(),
        }
    }

    fn fetch_components(&self) -> Result<Vec<DynamicObject>, FetchError> {
        let (Some(repository), Some(options)) = (&self.repository, &self.options) else {
            return Err(FetchError::NotLoaded);
        };
        let raw = repository.get_file(&options.version, &repository.components_path())?;
        let text = String::from_utf8(raw)?;
        let image = self.ctx.images.image_for(self.provider)?;
        let command = manager_command(self.provider);
        let manifests = transform_components(
            &text,
            self.ctx.variables,
            Rewrite {
                image,
                command: &command,
            },
        )?;
        Ok(build_components(&manifests, self.provider)?)
    }
}

/// Versions match when they parse to the same semver, whatever their `v` prefix
///
/// Unparseable versions fall back to a plain string comparison.
fn same_version(installed: &str, wanted: &str) -> bool {
    match (parse_version(installed), parse_version(wanted)) {
        (Ok(installed), Ok(wanted)) => installed == wanted,
        _ => installed == wanted,
    }
}

#[derive(Debug, Error)]
enum FetchError {
    #[error("provider repository not loaded")]
    NotLoaded,

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("provider components are not valid UTF-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),

    #[error(transparent)]
    Image(#[from] PlatformError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Components(#[from] ComponentsError),
}

#[async_trait]
impl PhaseSteps for ProviderPhases<'_> {
    async fn preflight_checks(&mut self) -> PhaseOutcome {
        PhaseOutcome::Continue
    }

    async fn load(&mut self) -> PhaseOutcome {
        let provider = self.provider;
        if let Err(e) = self
            .ctx
            .config_client
            .provider(&provider.name, provider.provider_type)
        {
            return PhaseOutcome::fail(PREFLIGHT_CONDITION, REASON_PROVIDER_UNKNOWN, e);
        }

        let repository = match ConfigMapRepository::from_sources(
            &provider.name,
            provider.provider_type,
            self.ctx.sources,
        ) {
            Ok(repository) => repository,
            Err(e) => {
                return PhaseOutcome::fail(PREFLIGHT_CONDITION, REASON_PROVIDER_CONFIG_INVALID, e)
            }
        };
        self.options = Some(ComponentOptions {
            target_namespace: provider.namespace.clone(),
            version: provider.version.clone(),
        });

        match validate_contract(provider, &repository) {
            Ok(contract) => {
                debug!(provider = %provider, %contract, "contract validated");
            }
            Err(
                e @ (ContractError::NoReleaseSeries { .. } | ContractError::Incompatible { .. }),
            ) => return PhaseOutcome::fail(PREFLIGHT_CONDITION, REASON_VERSION_INCOMPATIBLE, e),
            Err(e) => {
                return PhaseOutcome::fail(PREFLIGHT_CONDITION, REASON_PROVIDER_CONFIG_INVALID, e)
            }
        }
        self.repository = Some(repository);
        PhaseOutcome::Continue
    }

    async fn fetch(&mut self) -> PhaseOutcome {
        match self.fetch_components() {
            Ok(components) => {
                debug!(provider = %self.provider, count = components.len(), "fetched components");
                self.components = components;
                PhaseOutcome::Continue
            }
            Err(e) => PhaseOutcome::fail(
                PROVIDER_INSTALLED_CONDITION,
                REASON_COMPONENTS_FETCH_ERROR,
                e,
            ),
        }
    }

    async fn pre_install(&mut self) -> PhaseOutcome {
        let installer = self.ctx.installer;
        let provider = self.provider;

        if let Err(e) = installer.ensure_custom_resource_definitions().await {
            return PhaseOutcome::fail(
                PROVIDER_INSTALLED_CONDITION,
                "failed to install inventory CRD",
                e,
            );
        }

        match installer.namespace_terminating(&provider.namespace).await {
            Ok(true) => {
                info!(namespace = %provider.namespace, "target namespace is terminating");
                return PhaseOutcome::Requeue(Duration::from_secs(
                    NAMESPACE_TERMINATING_REQUEUE_SECS,
                ));
            }
            Ok(false) => {}
            Err(e) => {
                let reason = "failed to read target namespace";
                return PhaseOutcome::Fail(
                    PhaseError::new(PROVIDER_INSTALLED_CONDITION, reason, e)
                        .with_severity(Severity::Warning),
                );
            }
        }

        match installer.installed_version(provider).await {
            Ok(Some(installed)) if !same_version(&installed, &provider.version) => {
                info!(provider = %provider, %installed, "upgrade detected");
                if let Err(e) = installer.delete(provider).await {
                    return PhaseOutcome::fail(
                        PROVIDER_INSTALLED_CONDITION,
                        "failed to delete outdated components",
                        e,
                    );
                }
            }
            Ok(_) => {}
            Err(e) => {
                let reason = "failed to read provider inventory";
                return PhaseOutcome::Fail(
                    PhaseError::new(PROVIDER_INSTALLED_CONDITION, reason, e)
                        .with_severity(Severity::Warning),
                );
            }
        }
        PhaseOutcome::Continue
    }

    async fn install(&mut self) -> PhaseOutcome {
        let components = std::mem::take(&mut self.components);
        match self.ctx.installer.install(self.provider, components).await {
            Ok(()) => {
                info!(provider = %self.provider, "provider installed");
                PhaseOutcome::Continue
            }
            Err(e) => PhaseOutcome::Fail(e.into()),
        }
    }
}

impl From<InstallError> for PhaseError {
    fn from(e: InstallError) -> Self {
        let reason = if e.is_timeout() {
            REASON_INSTALL_TIMEOUT
        } else {
            REASON_INSTALL_FAILED
        };
        Self::new(PROVIDER_INSTALLED_CONDITION, reason, e)
    }
}
